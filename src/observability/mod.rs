pub mod correlation;
pub mod logging;
pub mod sanitization;

#[cfg(test)]
mod tests;

pub use correlation::{
    request_id_middleware, CorrelationGuard, RateLimitConfig, RequestContext,
    CORRELATION_ID_HEADER, REQUEST_ID_HEADER,
};
pub use logging::{init_logging, LoggingConfig};
pub use sanitization::{
    sanitize_signature, sanitize_tx_bytes, sanitize_wallet, SanitizationConfig, SensitiveData,
    SensitiveDataType,
};
