//! Process configuration.
//!
//! Everything tunable is read once at startup into an immutable [`AppConfig`]
//! which is then handed to the components that need it. Values come from the
//! process environment (after `.env` has been loaded by `main`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// What the orchestrator does once every real strategy has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Report the failure to the caller.
    #[default]
    Strict,
    /// Synthesize a placeholder artifact and report success with a note.
    Lenient,
}

impl FromStr for FailureMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" | "placeholder" => Ok(Self::Lenient),
            other => Err(Error::config(format!(
                "ACQUISITION_MODE must be 'strict' or 'lenient', got '{other}'"
            ))),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Artifact store and eviction settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Entries older than this are removed by the sweeper.
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// Delay between the end of a delivery and deletion of the artifact.
    pub delivery_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./downloads"),
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(600),
            delivery_grace: Duration::from_secs(60),
        }
    }
}

/// Strategy and orchestration settings.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub mode: FailureMode,
    pub coalesce_requests: bool,
    pub max_artifact_bytes: u64,
    pub ytdlp_path: String,
    pub ytdlp_timeout: Duration,
    pub converter_api_url: Option<String>,
    pub converter_api_key: Option<String>,
    pub converter_timeout: Duration,
    pub direct_fetch_timeout: Duration,
    /// Multiplier applied to every per-strategy timeout in aggressive mode.
    pub aggressive_timeout_factor: u32,
    /// Accept source URLs on loopback, private and link-local hosts.
    pub allow_private_sources: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            mode: FailureMode::Strict,
            coalesce_requests: true,
            max_artifact_bytes: 2 * 1024 * 1024 * 1024,
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_timeout: Duration::from_secs(180),
            converter_api_url: None,
            converter_api_key: None,
            converter_timeout: Duration::from_secs(90),
            direct_fetch_timeout: Duration::from_secs(60),
            aggressive_timeout_factor: 2,
            allow_private_sources: false,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Shared secret required on acquisition requests. `None` disables the check.
    pub api_key: Option<String>,
    /// Prefix for advertised download URLs, e.g. `https://media.example.com`.
    pub public_base_url: Option<String>,
    pub store: StoreConfig,
    pub acquisition: AcquisitionConfig,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self {
            log_dir: PathBuf::from("./logs"),
            ..Self::default()
        };

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }
        if let Some(port) = get("API_PORT") {
            config.server.port = parse_value("API_PORT", &port)?;
        }
        if let Some(cors) = get("API_ENABLE_CORS") {
            config.server.enable_cors = parse_bool("API_ENABLE_CORS", &cors)?;
        }

        config.api_key = get("API_KEY");
        config.public_base_url = get("PUBLIC_BASE_URL").map(|u| u.trim_end_matches('/').to_string());

        if let Some(dir) = get("DOWNLOAD_DIR") {
            config.store.dir = PathBuf::from(dir);
        }
        if let Some(v) = get("ARTIFACT_TTL_SECS") {
            config.store.ttl = parse_secs("ARTIFACT_TTL_SECS", &v)?;
        }
        if let Some(v) = get("SWEEP_INTERVAL_SECS") {
            config.store.sweep_interval = parse_secs("SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("DELIVERY_GRACE_SECS") {
            config.store.delivery_grace = parse_secs("DELIVERY_GRACE_SECS", &v)?;
        }

        let acq = &mut config.acquisition;
        if let Some(v) = get("ACQUISITION_MODE") {
            acq.mode = v.parse()?;
        }
        if let Some(v) = get("COALESCE_REQUESTS") {
            acq.coalesce_requests = parse_bool("COALESCE_REQUESTS", &v)?;
        }
        if let Some(v) = get("MAX_ARTIFACT_BYTES") {
            acq.max_artifact_bytes = parse_value("MAX_ARTIFACT_BYTES", &v)?;
        }
        if let Some(v) = get("YTDLP_PATH") {
            acq.ytdlp_path = v;
        }
        if let Some(v) = get("YTDLP_TIMEOUT_SECS") {
            acq.ytdlp_timeout = parse_secs("YTDLP_TIMEOUT_SECS", &v)?;
        }
        acq.converter_api_url = get("CONVERTER_API_URL");
        acq.converter_api_key = get("CONVERTER_API_KEY");
        if let Some(v) = get("CONVERTER_TIMEOUT_SECS") {
            acq.converter_timeout = parse_secs("CONVERTER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("DIRECT_FETCH_TIMEOUT_SECS") {
            acq.direct_fetch_timeout = parse_secs("DIRECT_FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("AGGRESSIVE_TIMEOUT_FACTOR") {
            acq.aggressive_timeout_factor = parse_value("AGGRESSIVE_TIMEOUT_FACTOR", &v)?;
            if acq.aggressive_timeout_factor == 0 {
                return Err(Error::config("AGGRESSIVE_TIMEOUT_FACTOR must be at least 1"));
            }
        }

        if let Some(v) = get("ALLOW_PRIVATE_SOURCES") {
            acq.allow_private_sources = parse_bool("ALLOW_PRIVATE_SOURCES", &v)?;
        }

        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if config.store.ttl.is_zero() {
            return Err(Error::config("ARTIFACT_TTL_SECS must be greater than zero"));
        }
        if config.store.sweep_interval.is_zero() {
            return Err(Error::config("SWEEP_INTERVAL_SECS must be greater than zero"));
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} has an invalid value: '{raw}'")))
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    parse_value::<u64>(key, raw).map(Duration::from_secs)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key} must be a boolean, got '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.acquisition.mode, FailureMode::Strict);
        assert!(config.acquisition.coalesce_requests);
        assert!(config.api_key.is_none());
        assert!(!config.acquisition.allow_private_sources);
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("API_PORT", "9000"),
            ("API_KEY", "secret"),
            ("ACQUISITION_MODE", "lenient"),
            ("COALESCE_REQUESTS", "false"),
            ("DELIVERY_GRACE_SECS", "5"),
            ("PUBLIC_BASE_URL", "https://media.example.com/"),
            ("ALLOW_PRIVATE_SOURCES", "yes"),
        ])
        .unwrap();
        assert!(config.acquisition.allow_private_sources);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.acquisition.mode, FailureMode::Lenient);
        assert!(!config.acquisition.coalesce_requests);
        assert_eq!(config.store.delivery_grace, Duration::from_secs(5));
        assert_eq!(
            config.public_base_url.as_deref(),
            Some("https://media.example.com")
        );
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = load(&[("API_KEY", "  "), ("API_PORT", "")]).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(load(&[("API_PORT", "not-a-port")]).is_err());
        assert!(load(&[("ACQUISITION_MODE", "yolo")]).is_err());
        assert!(load(&[("COALESCE_REQUESTS", "maybe")]).is_err());
        assert!(load(&[("ARTIFACT_TTL_SECS", "0")]).is_err());
        assert!(load(&[("AGGRESSIVE_TIMEOUT_FACTOR", "0")]).is_err());
    }
}
