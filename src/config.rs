//! Configuration management for cf-ddns.

use crate::error::{DdnsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Token value shipped in the sample config; treated as unset.
pub const PLACEHOLDER_API_TOKEN: &str = "api_token_here";

/// TTL applied to managed records unless a zone overrides it.
pub const DEFAULT_TTL: u32 = 300;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cloudflare credentials.
    pub authentication: Authentication,

    /// Zones whose records are kept in sync, in processing order.
    #[serde(default)]
    pub cloudflare: Vec<ZoneConfig>,
}

/// Credential block. A usable token wins over the email + key pair.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Authentication {
    /// API token (or environment variable name if prefixed with $).
    #[serde(default)]
    pub api_token: String,

    /// Global API key fallback.
    #[serde(default)]
    pub api_key: Option<ApiKey>,
}

/// Legacy email + global API key pair.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(default)]
    pub account_email: String,
    #[serde(default)]
    pub api_key: String,
}

/// One managed zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone ID.
    pub zone_id: String,

    /// Whether to proxy through Cloudflare (default: false).
    #[serde(default)]
    pub proxied: bool,

    /// Labels under the zone; "" is the bare domain.
    #[serde(default)]
    pub subdomains: Vec<String>,

    /// TTL in seconds (default: 300).
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

/// Resolved authentication scheme. Exactly one is used per request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`.
    Token(String),
    /// `X-Auth-Email` / `X-Auth-Key`.
    Key { email: String, key: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Credentials::Token(<redacted>)"),
            Credentials::Key { email, .. } => f
                .debug_struct("Credentials::Key")
                .field("email", email)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("api_token", &"<redacted>")
            .field("api_key", &self.api_key)
            .finish()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("account_email", &self.account_email)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Authentication {
    /// Pick the credential scheme: a real token first, then the key pair.
    pub fn credentials(&self) -> Result<Credentials> {
        let token = resolve_env(self.api_token.trim());
        if !token.is_empty() && token != PLACEHOLDER_API_TOKEN {
            return Ok(Credentials::Token(token));
        }

        if let Some(api_key) = &self.api_key {
            let email = resolve_env(api_key.account_email.trim());
            let key = resolve_env(api_key.api_key.trim());
            if !email.is_empty() && !key.is_empty() {
                return Ok(Credentials::Key { email, key });
            }
        }

        Err(DdnsError::Config(
            "no usable credentials: set authentication.api_token or authentication.api_key"
                .to_string(),
        ))
    }
}

impl Config {
    /// Candidate locations searched when no path is given on the command line.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from("config.json")];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("cf-ddns").join("config.json"));
        }
        candidates.push(PathBuf::from("/etc/cf-ddns/config.json"));
        candidates
    }

    /// First existing candidate, or `config.json` in the working directory.
    pub fn default_path() -> PathBuf {
        Self::search_paths()
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }

    /// Load and validate configuration from a specific path.
    ///
    /// Files ending in `.toml` are read as TOML, everything else as JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document (no validation).
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| DdnsError::Config(e.to_string()))
    }

    /// Parse a TOML document (no validation).
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations that could never complete a cycle.
    pub fn validate(&self) -> Result<()> {
        self.authentication.credentials()?;

        if self.cloudflare.is_empty() {
            return Err(DdnsError::Config(
                "at least one zone must be listed under \"cloudflare\"".to_string(),
            ));
        }

        for (index, zone) in self.cloudflare.iter().enumerate() {
            if zone.zone_id.trim().is_empty() {
                return Err(DdnsError::Config(format!(
                    "cloudflare[{}]: zone_id is empty",
                    index
                )));
            }
        }

        Ok(())
    }
}

impl ZoneConfig {
    /// Subdomain labels normalized the way record names are compared.
    pub fn normalized_subdomains(&self) -> impl Iterator<Item = String> + '_ {
        self.subdomains.iter().map(|s| s.trim().to_lowercase())
    }
}

/// Resolve environment variable references (values starting with $).
///
/// An unset variable resolves to "" so the value counts as not configured.
pub(crate) fn resolve_env(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!("Environment variable {} not set", var_name);
            String::new()
        })
    } else {
        value.to_string()
    }
}
