use std::fmt;

use tracing::warn;

/// Configuration for sensitive data sanitization
#[derive(Clone, Debug)]
pub struct SanitizationConfig {
    /// Whether to partially redact wallet addresses
    pub sanitize_wallets: bool,
    /// Whether to redact serialized transaction bytes
    pub sanitize_tx_bytes: bool,
    /// Maximum characters to show from start/end of sensitive data
    pub partial_show_chars: usize,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            sanitize_wallets: true,
            sanitize_tx_bytes: true,
            partial_show_chars: 6,
        }
    }
}

/// A wrapper for sensitive data that implements safe Display and Debug
#[derive(Clone)]
pub struct SensitiveData<T> {
    inner: T,
    data_type: SensitiveDataType,
    config: SanitizationConfig,
}

#[derive(Clone, Debug, Copy)]
pub enum SensitiveDataType {
    /// On-chain wallet address of a payer or payee
    WalletAddress,
    /// Base64 transaction signature
    Signature,
    /// Base64 serialized transaction
    TransactionBytes,
    /// Transaction digest
    Digest,
}

impl SensitiveDataType {
    fn display_name(&self) -> &'static str {
        match self {
            Self::WalletAddress => "wallet",
            Self::Signature => "signature",
            Self::TransactionBytes => "tx_bytes",
            Self::Digest => "digest",
        }
    }
}

impl<T: fmt::Display> SensitiveData<T> {
    pub fn new(data: T, data_type: SensitiveDataType) -> Self {
        Self {
            inner: data,
            data_type,
            config: SanitizationConfig::default(),
        }
    }

    pub fn with_config(data: T, data_type: SensitiveDataType, config: SanitizationConfig) -> Self {
        Self {
            inner: data,
            data_type,
            config,
        }
    }

    /// Get the raw inner value (use with caution - only for necessary business
    /// logic)
    pub fn inner(&self) -> &T {
        warn!(
            data_type = self.data_type.display_name(),
            "Raw sensitive data accessed - ensure this is necessary and secure"
        );
        &self.inner
    }

    fn sanitized_repr(&self) -> String {
        let original = self.inner.to_string();

        let should_sanitize = match self.data_type {
            SensitiveDataType::WalletAddress => self.config.sanitize_wallets,
            SensitiveDataType::TransactionBytes => self.config.sanitize_tx_bytes,
            SensitiveDataType::Signature => true,
            // Digests are public identifiers
            SensitiveDataType::Digest => false,
        };

        if !should_sanitize {
            return original;
        }

        let len = original.chars().count();
        if len <= self.config.partial_show_chars * 2 {
            format!(
                "[REDACTED_{}]",
                self.data_type.display_name().to_uppercase()
            )
        } else {
            let start: String = original.chars().take(self.config.partial_show_chars).collect();
            let end: String = original
                .chars()
                .skip(len - self.config.partial_show_chars)
                .collect();
            let middle_len = len - (self.config.partial_show_chars * 2);

            format!(
                "{}[REDACTED_{}_{}_CHARS]{}",
                start,
                self.data_type.display_name().to_uppercase(),
                middle_len,
                end
            )
        }
    }
}

impl<T: fmt::Display> fmt::Display for SensitiveData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sanitized_repr())
    }
}

impl<T: fmt::Display> fmt::Debug for SensitiveData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.sanitized_repr())
    }
}

pub fn sanitize_wallet<T: fmt::Display>(wallet: T) -> SensitiveData<T> {
    SensitiveData::new(wallet, SensitiveDataType::WalletAddress)
}

pub fn sanitize_signature<T: fmt::Display>(signature: T) -> SensitiveData<T> {
    SensitiveData::new(signature, SensitiveDataType::Signature)
}

pub fn sanitize_tx_bytes<T: fmt::Display>(tx_bytes: T) -> SensitiveData<T> {
    SensitiveData::new(tx_bytes, SensitiveDataType::TransactionBytes)
}
