//! Error types for the rewards SDK

use rewards_gateway_client::{ErrorKind, GatewayError};
use thiserror::Error;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// Generic text shown for failures the user cannot act on
pub const TRY_AGAIN_LATER: &str = "Something went wrong. Try again later.";

/// SDK error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdkError {
    /// Remote procedure is not deployed; claim tiers may fall back
    #[error("Procedure unavailable: {0}")]
    ProcedureUnavailable(String),

    /// Table or column missing on the backend
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Backend refused the request (validation or auth)
    #[error("{0}")]
    Rejected(String),

    /// Network error or unrecognised failure
    #[error("Network error: {0}")]
    Network(String),

    /// Operation needs a signed-in identity
    #[error("Not signed in")]
    NotSignedIn,

    /// Debit larger than the current balance
    #[error("Insufficient balance: cost {cost}, balance {balance}")]
    InsufficientBalance { cost: u64, balance: u64 },

    /// Credentials failed local validation
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SdkError {
    /// Taxonomy class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SdkError::ProcedureUnavailable(_) => ErrorKind::ProcedureMissing,
            SdkError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            SdkError::Rejected(_)
            | SdkError::NotSignedIn
            | SdkError::InsufficientBalance { .. }
            | SdkError::InvalidCredentials(_) => ErrorKind::Rejected,
            SdkError::Network(_)
            | SdkError::Serialization(_)
            | SdkError::Config(_) => ErrorKind::Unavailable,
        }
    }

    /// Text suitable for a user-facing notification.
    ///
    /// Rejections are shown verbatim; everything else gets a generic retry hint.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Rejected => self.to_string(),
            _ => TRY_AGAIN_LATER.to_string(),
        }
    }
}

impl From<GatewayError> for SdkError {
    fn from(err: GatewayError) -> Self {
        let message = match &err {
            GatewayError::Server { message, .. } => message.clone(),
            GatewayError::Auth(message) => message.clone(),
            other => other.to_string(),
        };

        match err.kind() {
            ErrorKind::ProcedureMissing => SdkError::ProcedureUnavailable(message),
            ErrorKind::SchemaMismatch => SdkError::SchemaMismatch(message),
            ErrorKind::Rejected => SdkError::Rejected(message),
            ErrorKind::Unavailable => SdkError::Network(message),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_surface_verbatim() {
        let err = SdkError::Rejected("Invalid login credentials".into());
        assert_eq!(err.user_message(), "Invalid login credentials");
    }

    #[test]
    fn test_network_errors_are_generic() {
        let err = SdkError::Network("connection reset".into());
        assert_eq!(err.user_message(), TRY_AGAIN_LATER);
    }

    #[test]
    fn test_gateway_errors_keep_their_class() {
        let err: SdkError = GatewayError::ProcedureNotFound("claim_offer".into()).into();
        assert_eq!(err.kind(), ErrorKind::ProcedureMissing);

        let err: SdkError = GatewayError::Auth("Email not confirmed".into()).into();
        assert_eq!(err, SdkError::Rejected("Email not confirmed".into()));
    }
}
