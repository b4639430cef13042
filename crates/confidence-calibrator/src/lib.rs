//! Confidence calibration for ensemble outputs
//!
//! Maps raw confidences (including score-derived approximations) onto
//! observed accuracy with Platt scaling, isotonic regression or temperature
//! scaling, and measures miscalibration with ECE, MCE and the Brier score.

pub mod calibrator;

pub use calibrator::{
    calibration_stats, CalibratedConfidence, CalibrationMethod, CalibrationStats, ConfidenceCalibrator,
    ReliabilityBin, DEFAULT_BINS, MIN_CALIBRATION_SAMPLES,
};
