//! Server configuration, read once from `SLOTBOOK_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// Prometheus exporter port; `None` disables metrics export.
    pub metrics_port: Option<u16>,
    /// Base URL of the resource catalog, without a trailing slash.
    pub catalog_url: String,
    pub catalog_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unparseable values fall back to the default, as unset ones do.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            get(key).and_then(|s| s.trim().parse().ok())
        }

        Self {
            port: parsed(&get, "SLOTBOOK_PORT").unwrap_or(5433),
            bind: get("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("SLOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parsed(&get, "SLOTBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "SLOTBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&get, "SLOTBOOK_METRICS_PORT"),
            catalog_url: get("SLOTBOOK_CATALOG_URL")
                .unwrap_or_else(|| "http://localhost:8081".into())
                .trim_end_matches('/')
                .to_string(),
            catalog_timeout: Duration::from_millis(
                parsed(&get, "SLOTBOOK_CATALOG_TIMEOUT_MS").unwrap_or(2000),
            ),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
