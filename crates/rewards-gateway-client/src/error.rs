//! Error types for the gateway client

use serde::Deserialize;
use thiserror::Error;

/// How a failure should be treated by callers.
///
/// Every [`GatewayError`] is classified exactly once, here, so downstream
/// code branches on the kind and never re-parses messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The named remote procedure is not deployed
    ProcedureMissing,
    /// The addressed table or column does not exist
    SchemaMismatch,
    /// The backend refused the request (validation, auth, conflict)
    Rejected,
    /// Transport failure, server fault, or anything unrecognised
    Unavailable,
}

/// Gateway client error
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error
    #[error("Server error {status}: {message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Remote procedure is not exposed by the backend
    #[error("Procedure not found: {0}")]
    ProcedureNotFound(String),

    /// Auth endpoint refused the credentials or token
    #[error("Auth error: {0}")]
    Auth(String),

    /// Realtime channel failure
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Postgres/PostgREST codes meaning "this function is not there".
const PROCEDURE_MISSING_CODES: &[&str] = &["PGRST202", "42883"];

/// Postgres/PostgREST codes meaning "this relation or column is not there".
const SCHEMA_MISMATCH_CODES: &[&str] = &["42P01", "42703", "PGRST204", "PGRST205"];

impl GatewayError {
    /// Classify this error for retry/fallback decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ProcedureNotFound(_) => ErrorKind::ProcedureMissing,
            GatewayError::Server { status, code, message } => {
                classify_server(*status, code.as_deref(), message)
            }
            GatewayError::Auth(_) => ErrorKind::Rejected,
            GatewayError::Http(_)
            | GatewayError::Json(_)
            | GatewayError::Realtime(_)
            | GatewayError::InvalidResponse(_) => ErrorKind::Unavailable,
        }
    }

    /// Build a server error from a status and the raw error body.
    pub(crate) fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => GatewayError::Server {
                status,
                code: parsed.code,
                message: parsed
                    .message
                    .or(parsed.msg)
                    .or(parsed.error_description)
                    .unwrap_or_else(|| body.to_string()),
            },
            Err(_) => GatewayError::Server {
                status,
                code: None,
                message: body.to_string(),
            },
        }
    }
}

fn classify_server(status: u16, code: Option<&str>, message: &str) -> ErrorKind {
    if let Some(code) = code {
        if PROCEDURE_MISSING_CODES.contains(&code) {
            return ErrorKind::ProcedureMissing;
        }
        if SCHEMA_MISMATCH_CODES.contains(&code) {
            return ErrorKind::SchemaMismatch;
        }
    } else if status == 400 && message.contains("does not exist") {
        // Older gateways report undefined columns without a code
        return ErrorKind::SchemaMismatch;
    }

    match status {
        400 | 401 | 403 | 404 | 409 | 422 => ErrorKind::Rejected,
        _ => ErrorKind::Unavailable,
    }
}

/// Error payload shapes returned by the REST and auth endpoints.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_function_code_is_procedure_missing() {
        let err = GatewayError::from_body(
            404,
            r#"{"code":"PGRST202","message":"Could not find the function public.claim_offer"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::ProcedureMissing);
    }

    #[test]
    fn test_undefined_column_is_schema_mismatch() {
        let err = GatewayError::from_body(
            400,
            r#"{"code":"42703","message":"column users.last_daily_claim does not exist"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_codeless_does_not_exist_is_schema_mismatch() {
        let err = GatewayError::from_body(400, "relation \"daily_claims\" does not exist");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_permission_denied_is_rejected() {
        let err = GatewayError::from_body(
            403,
            r#"{"code":"42501","message":"permission denied for table offer_claims"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn test_server_fault_is_unavailable() {
        let err = GatewayError::from_body(503, "upstream connect error");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(
            GatewayError::Realtime("socket closed".into()).kind(),
            ErrorKind::Unavailable
        );
    }
}
