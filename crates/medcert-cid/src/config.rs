//! Configuration for the upstream client, the lookup TTL policy and the cache.
//!
//! Every struct deserializes with field defaults so a partial `[oms]` or
//! `[lookup]` table is enough. The bare `OMS_*` environment variables used by
//! existing deployments are applied with [`OmsConfig::apply_env`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CidError, CidResult};
use crate::retry::RetryPolicy;

pub const ENV_API_BASE: &str = "OMS_API_BASE";
pub const ENV_TOKEN_URL: &str = "OMS_TOKEN_URL";
pub const ENV_CLIENT_ID: &str = "OMS_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "OMS_CLIENT_SECRET";

/// Upstream classification API settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct OmsConfig {
    /// Base URL of the ICD API, e.g. `https://id.who.int/icd`.
    #[serde(default)]
    pub api_base: Option<String>,

    /// OAuth2 token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// OAuth2 scope requested with the client-credentials grant.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// ICD-11 release, e.g. `2024-01`.
    #[serde(default = "default_release_id")]
    pub release_id: String,

    #[serde(default = "default_linearization")]
    pub linearization: String,

    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,

    /// Skip TLS certificate verification. Only for broken upstream chains.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_scope() -> String {
    "icdapi_access".into()
}
fn default_release_id() -> String {
    "2024-01".into()
}
fn default_linearization() -> String {
    "mms".into()
}
fn default_search_timeout_ms() -> u64 {
    10_000
}
fn default_token_timeout_ms() -> u64 {
    5_000
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            token_url: None,
            client_id: None,
            client_secret: None,
            scope: default_scope(),
            release_id: default_release_id(),
            linearization: default_linearization(),
            search_timeout_ms: default_search_timeout_ms(),
            token_timeout_ms: default_token_timeout_ms(),
            accept_invalid_certs: false,
            retry: RetrySettings::default(),
        }
    }
}

impl fmt::Debug for OmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OmsConfig")
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "***"),
            )
            .field("scope", &self.scope)
            .field("release_id", &self.release_id)
            .field("linearization", &self.linearization)
            .field("search_timeout_ms", &self.search_timeout_ms)
            .field("token_timeout_ms", &self.token_timeout_ms)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OmsConfig {
    /// Reads the bare `OMS_*` variables from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    /// Overlays `OMS_*` values returned by `lookup`; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = read(ENV_API_BASE) {
            self.api_base = Some(v);
        }
        if let Some(v) = read(ENV_TOKEN_URL) {
            self.token_url = Some(v);
        }
        if let Some(v) = read(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = read(ENV_CLIENT_SECRET) {
            self.client_secret = Some(v);
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Returns `(client_id, client_secret)` or a configuration error naming
    /// the missing variables.
    pub fn credentials(&self) -> CidResult<(&str, &str)> {
        let id = self.client_id.as_deref().filter(|s| !s.trim().is_empty());
        let secret = self
            .client_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty());
        match (id, secret) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(CidError::configuration(format!(
                "{ENV_CLIENT_ID} or {ENV_CLIENT_SECRET} is not configured"
            ))),
        }
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.search_timeout_ms == 0 || self.token_timeout_ms == 0 {
            return Err("oms timeouts must be > 0".into());
        }
        if self.release_id.trim().is_empty() {
            return Err("oms.release_id must not be empty".into());
        }
        if self.linearization.trim().is_empty() {
            return Err("oms.linearization must not be empty".into());
        }
        for (name, value) in [("oms.api_base", &self.api_base), ("oms.token_url", &self.token_url)] {
            if let Some(v) = value {
                url::Url::parse(v).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
            }
        }
        self.retry.validate()
    }
}

/// Retry settings for idempotent upstream GET calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err("oms.retry.base_delay_ms must be <= oms.retry.max_delay_ms".into());
        }
        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// TTL policy for the lookup service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// TTL for free-text search results.
    pub search_ttl_secs: u64,
    /// TTL for exact-code entries. Codes are stable, so this is longer.
    pub code_ttl_secs: u64,
    /// Subtracted from the server-announced token lifetime.
    pub token_safety_margin_secs: u64,
    /// Lower bound for the cached token TTL.
    pub token_ttl_floor_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: 86_400,
            code_ttl_secs: 604_800,
            token_safety_margin_secs: 30,
            token_ttl_floor_secs: 60,
        }
    }
}

impl LookupConfig {
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    /// `max(expires_in - margin, floor)`.
    pub fn token_ttl(&self, expires_in: u64) -> Duration {
        let secs = expires_in
            .saturating_sub(self.token_safety_margin_secs)
            .max(self.token_ttl_floor_secs);
        Duration::from_secs(secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.search_ttl_secs == 0 || self.code_ttl_secs == 0 {
            return Err("lookup TTLs must be > 0".into());
        }
        if self.token_ttl_floor_secs == 0 {
            return Err("lookup.token_ttl_floor_secs must be > 0".into());
        }
        Ok(())
    }
}

/// In-memory cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long an expired entry is kept around for stale fallback reads.
    pub stale_retention_secs: u64,
    /// Interval of the background purge task; 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_retention_secs: 604_800,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_oms_defaults() {
        let cfg = OmsConfig::default();
        assert_eq!(cfg.scope, "icdapi_access");
        assert_eq!(cfg.release_id, "2024-01");
        assert_eq!(cfg.linearization, "mms");
        assert_eq!(cfg.search_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.token_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.retry.max_retries, 3);
        assert!(!cfg.accept_invalid_certs);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_apply_env_ignores_empty_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE, "https://id.who.int/icd"),
            (ENV_CLIENT_ID, "client"),
            (ENV_CLIENT_SECRET, "   "),
        ]);
        let mut cfg = OmsConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.api_base.as_deref(), Some("https://id.who.int/icd"));
        assert_eq!(cfg.client_id.as_deref(), Some("client"));
        assert!(cfg.client_secret.is_none());
        assert!(cfg.token_url.is_none());
    }

    #[test]
    fn test_credentials_required() {
        let cfg = OmsConfig::default();
        assert!(matches!(cfg.credentials(), Err(CidError::Configuration(_))));

        let cfg = OmsConfig::default().with_credentials("id", "secret");
        assert_eq!(cfg.credentials().unwrap(), ("id", "secret"));
    }

    #[test]
    fn test_debug_masks_secret() {
        let cfg = OmsConfig::default().with_credentials("id", "super-secret");
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let cfg = OmsConfig::default().with_api_base("not a url");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_token_ttl_policy() {
        let lookup = LookupConfig::default();
        assert_eq!(lookup.token_ttl(3600), Duration::from_secs(3570));
        assert_eq!(lookup.token_ttl(80), Duration::from_secs(60));
        assert_eq!(lookup.token_ttl(10), Duration::from_secs(60));

        let lookup = LookupConfig {
            token_safety_margin_secs: 300,
            ..Default::default()
        };
        assert_eq!(lookup.token_ttl(3600), Duration::from_secs(3300));
    }

    #[test]
    fn test_code_ttl_longer_than_search_ttl() {
        let lookup = LookupConfig::default();
        assert!(lookup.code_ttl() > lookup.search_ttl());
        assert_eq!(lookup.search_ttl(), Duration::from_secs(86_400));
    }
}
