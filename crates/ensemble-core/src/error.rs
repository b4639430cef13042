use thiserror::Error;

/// Coarse category a caller can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The data handed in cannot be processed; fix the caller.
    BadInput,
    /// No trained model can answer right now; retrain or retry with other data.
    NoUsableModel,
    /// The ensemble was set up inconsistently; fix the configuration.
    BadConfiguration,
    /// The caller cancelled the operation.
    Cancelled,
    /// A worker task panicked or was aborted unexpectedly.
    Internal,
}

/// Failure of a single adapter during one train or predict call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterFailure {
    pub adapter: String,
    pub reason: String,
}

impl std::fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.adapter, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Insufficient samples: filter requires at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not trained: {0}")]
    NotTrained(String),

    #[error("Ensemble prediction failed: all {attempted} adapters failed ({})", join_failures(.failures))]
    EnsemblePrediction {
        attempted: usize,
        failures: Vec<AdapterFailure>,
    },

    #[error("Ensemble training failed: no adapter trained successfully ({})", join_failures(.failures))]
    EnsembleTraining { failures: Vec<AdapterFailure> },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Feature length mismatch: model expects {expected} features, got {actual}")]
    FeatureLengthMismatch { expected: usize, actual: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task error: {0}")]
    Task(String),
}

fn join_failures(failures: &[AdapterFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EnsembleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnsembleError::InsufficientSamples { .. }
            | EnsembleError::DegenerateSignal(_)
            | EnsembleError::InvalidInput(_) => ErrorKind::BadInput,
            EnsembleError::NotTrained(_)
            | EnsembleError::EnsemblePrediction { .. }
            | EnsembleError::EnsembleTraining { .. } => ErrorKind::NoUsableModel,
            EnsembleError::Configuration(_) | EnsembleError::FeatureLengthMismatch { .. } => {
                ErrorKind::BadConfiguration
            }
            EnsembleError::Cancelled => ErrorKind::Cancelled,
            EnsembleError::Task(_) => ErrorKind::Internal,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EnsembleError::Configuration(msg.into())
    }
}

pub type EnsembleResult<T> = Result<T, EnsembleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinct() {
        let bad_input = EnsembleError::InsufficientSamples { required: 27, actual: 10 };
        let no_model = EnsembleError::NotTrained("knn".to_string());
        let bad_config = EnsembleError::FeatureLengthMismatch { expected: 10, actual: 12 };

        assert_eq!(bad_input.kind(), ErrorKind::BadInput);
        assert_eq!(no_model.kind(), ErrorKind::NoUsableModel);
        assert_eq!(bad_config.kind(), ErrorKind::BadConfiguration);
        assert_eq!(EnsembleError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_prediction_error_lists_failures() {
        let err = EnsembleError::EnsemblePrediction {
            attempted: 2,
            failures: vec![
                AdapterFailure { adapter: "a".into(), reason: "boom".into() },
                AdapterFailure { adapter: "b".into(), reason: "bust".into() },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("all 2 adapters failed"));
        assert!(msg.contains("a: boom"));
        assert!(msg.contains("b: bust"));
    }
}
