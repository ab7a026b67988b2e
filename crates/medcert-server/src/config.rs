use std::{net::SocketAddr, time::Duration};

use medcert_cid::{CacheConfig, LookupConfig, OmsConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Upstream ICD API
    #[serde(default)]
    pub oms: OmsConfig,
    /// Cache TTL policy for tokens and lookups
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Rate limit on the /cid endpoints
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.oms.validate()?;
        self.lookup.validate()?;
        if self.rate_limit.enabled && (self.rate_limit.limit == 0 || self.rate_limit.window_secs == 0)
        {
            return Err("rate_limit.limit and rate_limit.window_secs must be > 0".into());
        }
        if matches!(self.auth.bearer_token.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err("auth.bearer_token must not be empty when set".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Fixed-window limit applied per client key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
    /// Key clients by `X-Forwarded-For` instead of the peer address.
    /// Enable only behind a proxy that sets the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_rate_limit_enabled() -> bool {
    true
}
fn default_rate_limit() -> u32 {
    10
}
fn default_rate_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            limit: default_rate_limit(),
            window_secs: default_rate_window_secs(),
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Optional shared bearer token required on the /cid endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing)]
    pub bearer_token: Option<String>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        load_config_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`load_config`], with the bare `OMS_*` variables read through
    /// `lookup` instead of the process environment.
    pub fn load_config_with_env(
        path: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("medcert.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., MEDCERT__LOOKUP__SEARCH_TTL_SECS=3600
        builder = builder.add_source(
            Environment::with_prefix("MEDCERT")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let mut merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Deployments configure the upstream through OMS_API_BASE and friends
        merged.oms.apply_env(lookup);
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.addr().port(), 3000);
        assert_eq!(cfg.rate_limit.limit, 10);
        assert_eq!(cfg.rate_limit.window(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_rate_limit_rejected_only_when_enabled() {
        let mut cfg = AppConfig::default();
        cfg.rate_limit.limit = 0;
        assert!(cfg.validate().is_err());
        cfg.rate_limit.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn forwarded_for_untrusted_and_auth_off_by_default() {
        let cfg = AppConfig::default();
        assert!(!cfg.rate_limit.trust_forwarded_for);
        assert!(cfg.auth.bearer_token.is_none());
    }

    #[test]
    fn blank_bearer_token_rejected() {
        let mut cfg = AppConfig::default();
        cfg.auth.bearer_token = Some("  ".into());
        assert!(cfg.validate().is_err());
        cfg.auth.bearer_token = Some("s3cret".into());
        assert!(cfg.validate().is_ok());
    }
}
