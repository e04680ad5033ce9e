//! Error types for gpulock

use thiserror::Error;

/// Main error type for gpulock
#[derive(Error, Debug)]
pub enum GpulockError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The probe report does not have the expected shape
    #[error("Malformed probe output at line {line}: {reason}")]
    MalformedProbeOutput { line: usize, reason: String },

    /// Not enough lock stores to ever reach a quorum
    #[error("Store configuration error: {configured} store(s) configured, at least {required} required")]
    StoreConfiguration { configured: usize, required: usize },

    /// A single quorum round did not produce a valid lease
    #[error("Acquisition of '{key}' failed: {accepted} of {quorum} required stores accepted in time")]
    AcquisitionTimeout {
        key: String,
        accepted: usize,
        quorum: usize,
    },

    /// Every idle candidate was tried without winning a lease
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The caller's overall deadline passed before a lease was won
    #[error("Deadline exceeded after {0} candidate(s)")]
    DeadlineExceeded(usize),

    /// Some stores could not be reached while releasing a lease
    #[error("Release of '{key}' incomplete: {unreachable} store(s) unreachable")]
    ReleaseIncomplete { key: String, unreachable: usize },

    /// Lock store error
    #[error("Store error: {0}")]
    Store(String),

    /// The probe command could not be run
    #[error("Probe error: {0}")]
    Probe(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GpulockError {
    /// Whether the failure is local to one candidate and the scan may move on
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GpulockError::AcquisitionTimeout { .. } | GpulockError::Store(_)
        )
    }

    /// Whether the failure points at the environment rather than contention
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            GpulockError::Config(_)
                | GpulockError::MalformedProbeOutput { .. }
                | GpulockError::StoreConfiguration { .. }
                | GpulockError::Probe(_)
                | GpulockError::Io(_)
        )
    }
}

/// Result type for gpulock operations
pub type GpulockResult<T> = Result<T, GpulockError>;

impl From<serde_json::Error> for GpulockError {
    fn from(err: serde_json::Error) -> Self {
        GpulockError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpulockError {
    fn from(err: toml::de::Error) -> Self {
        GpulockError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpulockError::Config("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");

        let err = GpulockError::AcquisitionTimeout {
            key: "host:gpu1".to_string(),
            accepted: 1,
            quorum: 2,
        };
        assert_eq!(
            err.to_string(),
            "Acquisition of 'host:gpu1' failed: 1 of 2 required stores accepted in time"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nvidia-smi not found");
        let err: GpulockError = io_err.into();
        assert!(matches!(err, GpulockError::Io(_)));
        assert!(err.is_environment());
    }

    #[test]
    fn test_error_classification() {
        let contended = GpulockError::AcquisitionTimeout {
            key: "k".to_string(),
            accepted: 0,
            quorum: 1,
        };
        assert!(contended.is_retryable());
        assert!(!contended.is_environment());

        let malformed = GpulockError::MalformedProbeOutput {
            line: 3,
            reason: "expected 8 columns, found 2".to_string(),
        };
        assert!(!malformed.is_retryable());
        assert!(malformed.is_environment());

        let exhausted = GpulockError::ResourceUnavailable("No GPU available".to_string());
        assert!(!exhausted.is_retryable());
        assert!(!exhausted.is_environment());
    }
}
