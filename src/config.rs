use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerConfig;
use crate::observability::correlation::RateLimitConfig;
use crate::webhooks::WebhookConfig;

/// File name of the daemon configuration inside the data directory
pub const CONFIG_FILE_NAME: &str = "subpayd.conf";

/// Daemon configuration, persisted as TOML with kebab-case keys
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub http_bind_ip: String,
    pub http_bind_port: u16,
    /// HTTP Basic password; authentication is off when unset
    pub http_password: Option<String>,
    /// Holds the database and logs
    pub data_dir: Option<PathBuf>,
    pub event_bus_capacity: usize,
    pub ledger: LedgerConfig,
    pub webhooks: WebhookConfig,
    pub rate_limiting: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_ip: default_bind_ip(),
            http_bind_port: 7070,
            http_password: None,
            data_dir: None,
            event_bus_capacity: 1000,
            ledger: LedgerConfig::default(),
            webhooks: WebhookConfig::default(),
            rate_limiting: RateLimitConfig::default(),
        }
    }
}

/// Command line and environment values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub password: Option<String>,
    /// `ip:port`
    pub addr: Option<String>,
    pub ledger_rpc_url: Option<String>,
    pub signer_url: Option<String>,
    pub no_auth: bool,
}

impl Config {
    /// Location of the configuration file inside `data_dir`
    pub fn path_in(data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join(CONFIG_FILE_NAME)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write-then-rename so a crash never leaves a half-written file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, contents)?;

        if let Err(e) = std::fs::rename(&temp_path, path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e).with_context(|| format!("replacing {}", path.display()));
        }
        Ok(())
    }

    /// Load `path`, creating it from defaults when missing or unreadable,
    /// and generate a password when none is set.
    ///
    /// Returns whether a password was generated.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let path = path.as_ref();

        let mut config = match path.exists().then(|| Self::load_from_file(path)) {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Configuration unreadable, replacing with defaults");
                Self::default()
            }
            None => Self::default(),
        };

        let password_generated = config.http_password.is_none();
        if password_generated {
            config.http_password = Some(Self::generate_password());
        }
        config.save_to_file(path)?;

        Ok((config, password_generated))
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(data_dir) = overrides.data_dir {
            self.data_dir = Some(data_dir);
        }
        if let Some(addr) = overrides.addr {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid listen address {addr:?}"))?;
            self.http_bind_ip = addr.ip().to_string();
            self.http_bind_port = addr.port();
        }
        if let Some(url) = overrides.ledger_rpc_url {
            self.ledger.rpc_url = url;
        }
        if let Some(url) = overrides.signer_url {
            self.ledger.signer_url = url;
        }
        if let Some(password) = overrides.password {
            self.http_password = Some(password);
        }
        if overrides.no_auth {
            self.http_password = None;
        }
        Ok(())
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("ledger.rpc-url", &self.ledger.rpc_url),
            ("ledger.signer-url", &self.ledger.signer_url),
        ] {
            let parsed = reqwest::Url::parse(url).with_context(|| format!("{name} is not a URL"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("{name} must use http or https, got {}", parsed.scheme());
            }
        }
        if self.ledger.retry.max_attempts == 0 {
            bail!("ledger.retry.max-attempts must be at least 1");
        }
        if self.ledger.payment_event.is_empty() || self.ledger.intent_created_event.is_empty() {
            bail!("ledger event type suffixes must not be empty");
        }
        if self.event_bus_capacity == 0 {
            bail!("event-bus-capacity must be at least 1");
        }
        Ok(())
    }

    /// Settlement calls cannot be built without both on-chain coordinates
    pub fn has_settlement_target(&self) -> bool {
        !self.ledger.package_id.is_empty() && !self.ledger.registry_id.is_empty()
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_bind_ip, self.http_bind_port)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.request_timeout_secs)
    }

    pub fn is_auth_enabled(&self) -> bool {
        self.http_password.is_some()
    }

    pub fn auth_password(&self) -> Option<&str> {
        self.http_password.as_deref()
    }

    /// 32 random bytes, hex encoded
    pub fn generate_password() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

fn default_bind_ip() -> String {
    // Listen on all interfaces inside containers
    let containerized = std::env::var("DOCKER_CONTAINER").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
        || Path::new("/.dockerenv").exists();
    if containerized {
        "0.0.0.0".to_string()
    } else {
        "127.0.0.1".to_string()
    }
}
