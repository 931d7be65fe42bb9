//! Service error type.

use thiserror::Error;

/// Errors from background services.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    /// A cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    /// Two jobs share a name.
    #[error("duplicate job name: {0}")]
    DuplicateJobName(String),

    /// The referenced job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Publishing the synthetic envelope failed.
    #[error("bus error: {0}")]
    Bus(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            ServiceError::JobNotFound("j9".into()).to_string(),
            "job not found: j9"
        );
        assert_eq!(
            ServiceError::DuplicateJobName("daily".into()).to_string(),
            "duplicate job name: daily"
        );
    }
}
