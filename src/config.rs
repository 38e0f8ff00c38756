use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ConsistencyMode, GuardOptions, NightKeyScheme};
use crate::model::HotelCapacity;

const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Process configuration: an optional JSON file, then `INNKEEP_*` variables on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub max_connections: usize,
    pub consistency: ConsistencyMode,
    pub key_scheme: NightKeyScheme,
    pub max_concurrent_lookups: usize,
    pub write_behind_capacity: usize,
    /// 0 or absent disables the per-request deadline.
    pub request_timeout_ms: Option<u64>,
    /// Capacities provisioned on start when the hotel is not yet known.
    pub hotels: Vec<HotelCapacity>,
}

impl Default for Config {
    fn default() -> Self {
        let guard = GuardOptions::default();
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            max_connections: 256,
            consistency: guard.mode,
            key_scheme: guard.key_scheme,
            max_concurrent_lookups: guard.max_concurrent_lookups,
            write_behind_capacity: guard.write_behind_capacity,
            request_timeout_ms: None,
            hotels: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    Env { var: &'static str, value: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {e}", path.display()),
            ConfigError::Parse(path, e) => write!(f, "invalid config {}: {e}", path.display()),
            ConfigError::Env { var, value, reason } => write!(f, "{var}={value:?}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
            ConfigError::Env { .. } => None,
        }
    }
}

impl Config {
    /// File named by `INNKEEP_CONFIG` (default `config.json`), then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("INNKEEP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(path.to_path_buf(), e)),
        }
    }

    /// Override fields from `INNKEEP_*` variables as resolved by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("INNKEEP_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("INNKEEP_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_PORT")? {
            self.port = v;
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_METRICS_PORT")? {
            self.metrics_port = Some(v);
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_MAX_CONNECTIONS")? {
            self.max_connections = v;
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_CONSISTENCY")? {
            self.consistency = v;
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_KEY_SCHEME")? {
            self.key_scheme = v;
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_MAX_CONCURRENT_LOOKUPS")? {
            self.max_concurrent_lookups = v;
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_WRITE_BEHIND_CAPACITY")? {
            self.write_behind_capacity = v;
        }
        if let Some(v) = env_parse(&lookup, "INNKEEP_REQUEST_TIMEOUT_MS")? {
            self.request_timeout_ms = Some(v);
        }
        if let Some(raw) = lookup("INNKEEP_HOTELS") {
            self.hotels = serde_json::from_str(&raw).map_err(|e| ConfigError::Env {
                var: "INNKEEP_HOTELS",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn guard_options(&self) -> GuardOptions {
        GuardOptions {
            mode: self.consistency,
            key_scheme: self.key_scheme,
            max_concurrent_lookups: self.max_concurrent_lookups,
            write_behind_capacity: self.write_behind_capacity,
            request_timeout: self
                .request_timeout_ms
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("reservation.journal")
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Env {
            var,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    fn test_config_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::from_file(&test_config_path("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.consistency, ConsistencyMode::Serialized);
        assert_eq!(config.key_scheme, NightKeyScheme::Legacy);
        assert_eq!(config.guard_options().request_timeout, None);
    }

    #[test]
    fn file_fields_override_defaults() {
        let path = test_config_path("partial.json");
        std::fs::write(
            &path,
            r#"{"port": 9000, "consistency": "legacy", "key_scheme": "boundaries",
                "hotels": [{"hotel_id": "H1", "rooms": 10}]}"#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.consistency, ConsistencyMode::Legacy);
        assert_eq!(config.key_scheme, NightKeyScheme::Boundaries);
        assert_eq!(config.hotels, vec![HotelCapacity { hotel_id: "H1".into(), rooms: 10 }]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = test_config_path("broken.json");
        std::fs::write(&path, "{ port: ").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("INNKEEP_PORT", "7001"),
                ("INNKEEP_DATA_DIR", "/var/lib/innkeep"),
                ("INNKEEP_CONSISTENCY", "legacy"),
                ("INNKEEP_REQUEST_TIMEOUT_MS", "250"),
                ("INNKEEP_MAX_CONCURRENT_LOOKUPS", "8"),
                ("INNKEEP_HOTELS", r#"[{"hotel_id":"H9","rooms":3}]"#),
            ]))
            .unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.journal_path(), PathBuf::from("/var/lib/innkeep/reservation.journal"));
        assert_eq!(config.hotels.len(), 1);

        let options = config.guard_options();
        assert_eq!(options.mode, ConsistencyMode::Legacy);
        assert_eq!(options.max_concurrent_lookups, 8);
        assert_eq!(options.request_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("INNKEEP_KEY_SCHEME", "sideways")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "INNKEEP_KEY_SCHEME", .. }));
        assert!(err.to_string().contains("sideways"));

        let err = config.apply_env(env(&[("INNKEEP_PORT", "http")])).unwrap_err();
        assert!(err.to_string().starts_with("INNKEEP_PORT"));
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = Config { request_timeout_ms: Some(0), ..Config::default() };
        assert_eq!(config.guard_options().request_timeout, None);
    }
}
