use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Observer endpoint registered by a merchant
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    pub id: String,
    pub merchant_id: String,
    pub url: String,
    /// Optional secret for HMAC-SHA256 signature generation
    pub secret: Option<String>,
    /// Event names this endpoint receives; empty means all
    #[serde(default)]
    pub events: Vec<String>,
    pub enabled: bool,
    pub description: Option<String>,
}

impl fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("id", &self.id)
            .field("merchant_id", &self.merchant_id)
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("events", &self.events)
            .field("enabled", &self.enabled)
            .field("description", &self.description)
            .finish()
    }
}

impl WebhookEndpoint {
    pub fn new(
        id: impl Into<String>,
        merchant_id: impl Into<String>,
        url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let url = url.into();
        validate_webhook_url(&url, false)?;

        Ok(Self {
            id: id.into(),
            merchant_id: merchant_id.into(),
            url,
            secret: None,
            events: Vec::new(),
            enabled: true,
            description: None,
        })
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> anyhow::Result<Self> {
        let secret = secret.into();
        validate_hmac_secret(&secret)?;
        self.secret = Some(secret);
        Ok(self)
    }

    pub fn with_events(mut self, events: Vec<String>) -> Self {
        self.events = events;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn should_receive_event(&self, event_name: &str) -> bool {
        self.enabled && (self.events.is_empty() || self.events.iter().any(|e| e == event_name))
    }

    /// Re-checked on every delivery; records are written by external tooling
    pub fn validate(&self, allow_private_targets: bool) -> anyhow::Result<()> {
        validate_webhook_url(&self.url, allow_private_targets)
    }
}

/// Validate webhook URL to prevent SSRF attacks
pub fn validate_webhook_url(url: &str, allow_private_targets: bool) -> anyhow::Result<()> {
    let parsed_url =
        reqwest::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL format: {}", e))?;

    match parsed_url.scheme() {
        "http" | "https" => {}
        scheme => return Err(anyhow::anyhow!("Unsupported URL scheme: {}", scheme)),
    }

    #[cfg(not(debug_assertions))]
    if parsed_url.scheme() != "https" && !allow_private_targets {
        return Err(anyhow::anyhow!(
            "HTTPS required for webhook URLs in production"
        ));
    }

    let host = parsed_url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL must have a host"))?;

    if allow_private_targets {
        return Ok(());
    }

    // Bracketed IPv6 hosts
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = IpAddr::from_str(bare_host) {
        if is_private_ip(ip) {
            return Err(anyhow::anyhow!(
                "Webhook URLs cannot target private IP addresses"
            ));
        }
    } else {
        let host_lower = host.to_lowercase();
        if host_lower == "localhost" || host_lower.ends_with(".localhost") {
            return Err(anyhow::anyhow!("Webhook URLs cannot target localhost"));
        }
    }

    if let Some(port) = parsed_url.port() {
        if is_dangerous_port(port) {
            return Err(anyhow::anyhow!(
                "Webhook URLs cannot target dangerous ports"
            ));
        }
    }

    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private()
                || ipv4.is_loopback()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_documentation()
                || ipv4.is_unspecified()
                || ipv4.is_multicast()
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6.is_multicast()
                || (ipv6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7
                || (ipv6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10
        }
    }
}

fn is_dangerous_port(port: u16) -> bool {
    match port {
        22 | 23 | 25 | 53 | 110 | 143 | 993 | 995 => true,
        1433 | 1521 | 3306 | 5432 | 6379 | 27017 => true,
        8080..=8090 | 9000..=9999 => true,
        _ => false,
    }
}

/// Minimum length and character variety for HMAC-SHA256 secrets
fn validate_hmac_secret(secret: &str) -> anyhow::Result<()> {
    const MIN_SECRET_LENGTH: usize = 32;

    if secret.len() < MIN_SECRET_LENGTH {
        return Err(anyhow::anyhow!(
            "HMAC secret must be at least {} characters long",
            MIN_SECRET_LENGTH
        ));
    }

    let classes = [
        secret.chars().any(|c| c.is_ascii_uppercase()),
        secret.chars().any(|c| c.is_ascii_lowercase()),
        secret.chars().any(|c| c.is_ascii_digit()),
        secret.chars().any(|c| !c.is_ascii_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    if classes < 3 {
        return Err(anyhow::anyhow!(
            "HMAC secret must contain at least 3 of: uppercase, lowercase, digits, special characters"
        ));
    }

    Ok(())
}
