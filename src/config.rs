use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineSettings;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set in {1} environment")]
    MissingSecret(&'static str, String),
}

/// Service configuration, read from `COURTSIDE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// development | staging | production
    pub environment: String,
    pub webhook_secret: Option<String>,
    /// Max age of a webhook signature timestamp; `None` disables the check.
    pub webhook_tolerance_secs: Option<i64>,
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub gateway_currency: String,
    pub gateway_timeout: Duration,
    pub compact_threshold: u64,
    pub reaper_interval: Duration,
    pub engine: EngineSettings,
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match get(name).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            value: other.to_string(),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset and empty variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let environment = get("COURTSIDE_ENVIRONMENT").unwrap_or_else(|| "development".into());

        let webhook_secret = get("COURTSIDE_WEBHOOK_SECRET");
        if webhook_secret.is_none() && environment == "production" {
            return Err(ConfigError::MissingSecret("COURTSIDE_WEBHOOK_SECRET", environment));
        }

        let tolerance: i64 = parse_var(&get, "COURTSIDE_WEBHOOK_TOLERANCE_SECS", 300)?;
        let metrics_port = match get("COURTSIDE_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                name: "COURTSIDE_METRICS_PORT",
                value,
            })?),
        };

        Ok(Self {
            bind: get("COURTSIDE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&get, "COURTSIDE_PORT", 8080)?,
            data_dir: PathBuf::from(get("COURTSIDE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port,
            webhook_secret,
            webhook_tolerance_secs: (tolerance > 0).then_some(tolerance),
            gateway_base_url: get("COURTSIDE_GATEWAY_BASE_URL").unwrap_or_else(|| "https://api.paymongo.com".into()),
            gateway_secret_key: get("COURTSIDE_GATEWAY_SECRET_KEY").unwrap_or_default(),
            gateway_currency: get("COURTSIDE_GATEWAY_CURRENCY").unwrap_or_else(|| "PHP".into()),
            gateway_timeout: Duration::from_secs(parse_var(&get, "COURTSIDE_GATEWAY_TIMEOUT_SECS", 10)?),
            compact_threshold: parse_var(&get, "COURTSIDE_COMPACT_THRESHOLD", 1000)?,
            reaper_interval: Duration::from_secs(parse_var(&get, "COURTSIDE_REAPER_INTERVAL_SECS", 60)?),
            engine: EngineSettings {
                paid_status_enabled: parse_flag(&get, "COURTSIDE_PAID_STATUS", true)?,
                draft_sessions_block: parse_flag(&get, "COURTSIDE_DRAFT_SESSIONS_BLOCK", true)?,
            },
            environment,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("courtside.wal")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.environment, "development");
        assert_eq!(cfg.webhook_secret, None);
        assert_eq!(cfg.webhook_tolerance_secs, Some(300));
        assert_eq!(cfg.gateway_timeout, Duration::from_secs(10));
        assert_eq!(cfg.metrics_port, None);
        assert!(cfg.engine.paid_status_enabled);
        assert!(cfg.engine.draft_sessions_block);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/courtside.wal"));
    }

    #[test]
    fn production_requires_webhook_secret() {
        assert_eq!(
            load(&[("COURTSIDE_ENVIRONMENT", "production"), ("COURTSIDE_WEBHOOK_SECRET", "")]).unwrap_err(),
            ConfigError::MissingSecret("COURTSIDE_WEBHOOK_SECRET", "production".into())
        );
        let cfg = load(&[("COURTSIDE_ENVIRONMENT", "production"), ("COURTSIDE_WEBHOOK_SECRET", "whsec")]).unwrap();
        assert_eq!(cfg.webhook_secret.as_deref(), Some("whsec"));
    }

    #[test]
    fn toggles_and_invalid_values() {
        let cfg = load(&[
            ("COURTSIDE_PAID_STATUS", "false"),
            ("COURTSIDE_DRAFT_SESSIONS_BLOCK", "0"),
            ("COURTSIDE_WEBHOOK_TOLERANCE_SECS", "0"),
            ("COURTSIDE_METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert!(!cfg.engine.paid_status_enabled);
        assert!(!cfg.engine.draft_sessions_block);
        assert_eq!(cfg.webhook_tolerance_secs, None);
        assert_eq!(cfg.metrics_port, Some(9100));

        assert!(matches!(
            load(&[("COURTSIDE_PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "COURTSIDE_PORT", .. })
        ));
        assert!(matches!(
            load(&[("COURTSIDE_PAID_STATUS", "maybe")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
