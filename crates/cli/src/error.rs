use connectors::error::ConnectorError;
use engine_core::state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the job file: {0}")]
    JobFileRead(#[from] std::io::Error),

    #[error("Failed to parse the job file as JSON: {0}")]
    JobParse(#[from] serde_json::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectorError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Failed to read the dead-letter directory: {0}")]
    DlqRead(std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_read_failure_names_the_dead_letter_directory() {
        let err = CliError::DlqRead(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(err.to_string().contains("dead-letter directory"));
        assert!(!err.to_string().contains("job file"));
    }
}
