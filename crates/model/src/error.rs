use serde::{Deserialize, Serialize};
use std::fmt;

/// Record-level error taxonomy. Transient failures are retried then
/// dead-lettered; validation failures are dead-lettered immediately;
/// authorization failures abort the job. Cap exhaustion and an open
/// breaker are control flow, not record errors, so they have no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "TransientError")]
    Transient,
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "AuthorizationError")]
    Authorization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transient => "TransientError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Authorization => "AuthorizationError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_taxonomy_names() {
        let json = serde_json::to_string(&ErrorKind::Validation).unwrap();
        assert_eq!(json, "\"ValidationError\"");
    }
}
