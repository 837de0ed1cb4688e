use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Client errors
    ValidationError,
    AuthenticationError,
    NotFound,
    Conflict,
    RateLimited,

    // Settlement errors
    IntentNotActive,
    DuplicateDigest,
    ConfirmationMissing,

    // Ledger errors
    LedgerNotIndexed,
    LedgerError,
    SignerError,

    // System errors
    DatabaseError,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCategory {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::AuthenticationError => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict | Self::IntentNotActive | Self::DuplicateDigest => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ConfirmationMissing => StatusCode::UNPROCESSABLE_ENTITY,
            Self::LedgerNotIndexed | Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::LedgerError | Self::SignerError => StatusCode::BAD_GATEWAY,
            Self::DatabaseError | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthenticationError => "AUTH_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::IntentNotActive => "INTENT_NOT_ACTIVE",
            Self::DuplicateDigest => "DUPLICATE_DIGEST",
            Self::ConfirmationMissing => "CONFIRMATION_MISSING",
            Self::LedgerNotIndexed => "LEDGER_NOT_INDEXED",
            Self::LedgerError => "LEDGER_ERROR",
            Self::SignerError => "SIGNER_ERROR",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError
                | Self::AuthenticationError
                | Self::NotFound
                | Self::Conflict
                | Self::RateLimited
                | Self::IntentNotActive
                | Self::DuplicateDigest
                | Self::ConfirmationMissing
        )
    }

    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_code())
    }
}
