use model::error::ErrorKind;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::{Error as PgError, error::SqlState};

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Connection string could not be parsed.
    #[error("Invalid connection string: {0}")]
    InvalidUrl(String),

    /// Driver-level Postgres error.
    #[error("Postgres error: {0}")]
    Postgres(#[from] PgError),

    /// I/O error while reading a snapshot file.
    #[error("Source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot line that is not a JSON object.
    #[error("Malformed source record at line {line}: {source}")]
    MalformedRecord {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    /// Operation exceeded its per-call timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Destination temporarily unreachable or saturated.
    #[error("Destination unavailable: {0}")]
    Unavailable(String),

    /// Type or constraint violation reported by the destination.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad credentials or insufficient privileges.
    #[error("Authorization failed: {0}")]
    Authorization(String),
}

impl ConnectorError {
    /// Maps the error onto the record-level taxonomy that drives retry and
    /// dead-letter decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Postgres(pg_err) => classify_pg_error(pg_err),
            ConnectorError::Io(_) => ErrorKind::Transient,
            ConnectorError::Timeout(_) => ErrorKind::Transient,
            ConnectorError::Unavailable(_) => ErrorKind::Transient,
            ConnectorError::Validation(_) => ErrorKind::Validation,
            ConnectorError::MalformedRecord { .. } => ErrorKind::Validation,
            ConnectorError::InvalidUrl(_) => ErrorKind::Validation,
            ConnectorError::Authorization(_) => ErrorKind::Authorization,
        }
    }
}

fn classify_pg_error(err: &PgError) -> ErrorKind {
    if err.is_closed() {
        return ErrorKind::Transient;
    }

    let Some(code) = err.code() else {
        // No SQLSTATE means the failure happened below the protocol layer
        // (socket reset, handshake), which is worth retrying.
        return ErrorKind::Transient;
    };

    if is_retryable_pg_code(code) {
        return ErrorKind::Transient;
    }

    if is_authorization_pg_code(code) {
        return ErrorKind::Authorization;
    }

    ErrorKind::Validation
}

fn is_retryable_pg_code(code: &SqlState) -> bool {
    matches!(
        *code,
        SqlState::T_R_SERIALIZATION_FAILURE
            | SqlState::T_R_DEADLOCK_DETECTED
            | SqlState::LOCK_NOT_AVAILABLE
            | SqlState::TOO_MANY_CONNECTIONS
            | SqlState::ADMIN_SHUTDOWN
            | SqlState::CRASH_SHUTDOWN
            | SqlState::CANNOT_CONNECT_NOW
            | SqlState::CONNECTION_FAILURE
            | SqlState::CONNECTION_DOES_NOT_EXIST
            | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
            | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
            | SqlState::CONNECTION_EXCEPTION
            | SqlState::QUERY_CANCELED
            | SqlState::OPERATOR_INTERVENTION
            | SqlState::FDW_UNABLE_TO_ESTABLISH_CONNECTION
    )
}

fn is_authorization_pg_code(code: &SqlState) -> bool {
    matches!(
        *code,
        SqlState::INVALID_AUTHORIZATION_SPECIFICATION
            | SqlState::INVALID_PASSWORD
            | SqlState::INSUFFICIENT_PRIVILEGE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_unavailability_are_transient() {
        let err = ConnectorError::Timeout(Duration::from_secs(120));
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = ConnectorError::Unavailable("connection refused".into());
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn malformed_records_are_validation_errors() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ConnectorError::MalformedRecord {
            line: 42,
            source: parse_err,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn authorization_is_never_retried() {
        let err = ConnectorError::Authorization("permission denied".into());
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}
