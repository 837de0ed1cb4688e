use thiserror::Error;

use super::{AppError, ErrorCategory};

/// Failure kinds of the settlement path.
///
/// Only [`SettlementError::NotYetIndexed`] is transient; the ledger gateway
/// retries it locally and every other kind propagates to the caller.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("transaction {digest} is not yet indexed by the ledger")]
    NotYetIndexed { digest: String },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("payment intent {0} is not active")]
    NotActive(String),

    #[error("transaction digest {0} has already been processed")]
    DuplicateDigest(String),

    #[error("transaction {digest} produced no {event_type} event")]
    ConfirmationMissing { digest: String, event_type: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type SettlementResult<T> = Result<T, SettlementError>;

impl SettlementError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Subscription product whose billing period cannot produce a due date
    pub fn invalid_period(product_id: &str, period_secs: i64) -> Self {
        Self::InvalidRequest(format!(
            "product {} has an unusable billing period of {}s",
            product_id, period_secs
        ))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotYetIndexed { .. })
    }

    /// Stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotYetIndexed { .. } => "not_yet_indexed",
            Self::Ledger(_) => "ledger_error",
            Self::NotFound { .. } => "not_found",
            Self::NotActive(_) => "not_active",
            Self::DuplicateDigest(_) => "duplicate_digest",
            Self::ConfirmationMissing { .. } => "confirmation_missing",
            Self::Store(_) => "store_error",
            Self::Signer(_) => "signer_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Conflict(_) => "conflict",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotYetIndexed { .. } => ErrorCategory::LedgerNotIndexed,
            Self::Ledger(_) => ErrorCategory::LedgerError,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::NotActive(_) => ErrorCategory::IntentNotActive,
            Self::DuplicateDigest(_) => ErrorCategory::DuplicateDigest,
            Self::ConfirmationMissing { .. } => ErrorCategory::ConfirmationMissing,
            Self::Store(_) => ErrorCategory::DatabaseError,
            Self::Signer(_) => ErrorCategory::SignerError,
            Self::InvalidRequest(_) => ErrorCategory::ValidationError,
            Self::Conflict(_) => ErrorCategory::Conflict,
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        let category = err.category();
        let message = err.to_string();
        AppError::with_category(category, message).with_source(err)
    }
}
