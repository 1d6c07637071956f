//! Shared API response types

use serde::Serialize;
use serde_json::Value;

/// Error payload nested under `"error"` in every failed response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. `NOT_FOUND`)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional error details (field errors, limits)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Top-level error envelope: `{"error": {...}}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_value(ErrorResponse::new("NOT_FOUND", "missing")).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "missing");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn test_error_response_with_details() {
        let details = serde_json::json!({"email": "is required"});
        let json =
            serde_json::to_value(ErrorResponse::with_details("VALIDATION", "bad", details)).unwrap();
        assert_eq!(json["error"]["details"]["email"], "is required");
    }
}
