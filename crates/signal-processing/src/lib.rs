pub mod conditioner;
pub mod features;
pub mod filters;
pub mod spectral;


pub use conditioner::*;
pub use features::*;
pub use filters::{Biquad, BiquadCoeffs, SosCascade};
pub use spectral::{WelchEstimator, WelchPsd};
