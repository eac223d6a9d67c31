//! Service configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. built-in defaults ([`AppConfig::default`])
//! 2. an optional TOML file (`--config`)
//! 3. command-line flags and their environment variables ([`Overrides`])
//!
//! A TOML file may also seed tutorial examples:
//!
//! ```toml
//! port = 8000
//! debug = true
//!
//! [[tutorial_examples]]
//! question = "Does coffee after 2pm hurt my sleep?"
//! measure_style = "score"
//! measure_question = "How well did you sleep? (1-10)"
//! group_a = "Coffee after 2pm"
//! group_b = "No coffee after 2pm"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::TutorialExample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    /// PostgreSQL URL. Without one the service keeps its data in memory.
    pub database_url: Option<String>,
    /// HS256 secret for bearer tokens. Without one, tokens are decoded
    /// without signature verification (development only).
    pub jwt_secret: Option<String>,
    /// Serve CSV exports inline instead of through the reverse proxy.
    pub debug: bool,
    /// Where CSV exports are written for the reverse proxy to serve.
    pub export_dir: PathBuf,
    /// Internal location the reverse proxy maps onto `export_dir`.
    pub protected_prefix: String,
    pub login_url: String,
    /// Seed for arm randomisation. Unset draws from OS entropy.
    pub random_seed: Option<u64>,
    /// Notices are POSTed here when set, otherwise only logged.
    pub notify_webhook: Option<String>,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
    pub tutorial_examples: Vec<TutorialExample>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            port: 8000,
            database_url: None,
            jwt_secret: None,
            debug: false,
            export_dir: std::env::temp_dir().join("randomise-me-exports"),
            protected_prefix: "/protected".to_string(),
            login_url: "/accounts/login".to_string(),
            random_seed: None,
            notify_webhook: None,
            request_timeout_secs: 30,
            body_limit_bytes: 1024 * 1024,
            tutorial_examples: Vec::new(),
        }
    }
}

/// Command-line values. `None` leaves the lower layer in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub database_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub debug: Option<bool>,
    pub export_dir: Option<PathBuf>,
    pub random_seed: Option<u64>,
    pub notify_webhook: Option<String>,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(raw).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, then `path` if given, then `overrides`.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => AppConfig::default(),
        };
        let config = base.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, o: Overrides) -> Self {
        if let Some(port) = o.port {
            self.port = port;
        }
        if o.database_url.is_some() {
            self.database_url = o.database_url;
        }
        if o.jwt_secret.is_some() {
            self.jwt_secret = o.jwt_secret;
        }
        if let Some(debug) = o.debug {
            self.debug = debug;
        }
        if let Some(dir) = o.export_dir {
            self.export_dir = dir;
        }
        if o.random_seed.is_some() {
            self.random_seed = o.random_seed;
        }
        if o.notify_webhook.is_some() {
            self.notify_webhook = o.notify_webhook;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.protected_prefix.starts_with('/') {
            anyhow::bail!("protected_prefix must start with '/'");
        }
        if !self.login_url.starts_with('/') && url::Url::parse(&self.login_url).is_err() {
            anyhow::bail!("login_url must be a path or an absolute URL");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        if let Some(ref hook) = self.notify_webhook {
            url::Url::parse(hook).context("notify_webhook is not a valid URL")?;
        }
        Ok(())
    }
}
