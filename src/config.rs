use std::path::PathBuf;
use std::time::Duration;

use crate::engine::ConfirmPolicy;
use crate::model::ResourceType;

/// Process configuration, read from `TRIPBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// JSON catalog file. Missing file means an empty catalog.
    pub catalog_path: PathBuf,
    pub confirm: ConfirmPolicy,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How often elapsed confirmed bookings are completed. `None` disables the sweep.
    pub complete_interval: Option<Duration>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_bool = |key: &str| get(key).and_then(|v| parse_flag(&v));

        let mut confirm = ConfirmPolicy::global(parse_bool("TRIPBOOK_AUTO_CONFIRM").unwrap_or(false));
        for kind in ResourceType::ALL {
            let key = format!("TRIPBOOK_AUTO_CONFIRM_{}", kind.as_str().to_uppercase());
            if let Some(flag) = parse_bool(&key) {
                confirm = confirm.with_override(kind, flag);
            }
        }

        let data_dir = PathBuf::from(get("TRIPBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let catalog_path = get("TRIPBOOK_CATALOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("catalog.json"));

        Self {
            port: get("TRIPBOOK_PORT").and_then(|s| s.parse().ok()).unwrap_or(7878),
            bind: get("TRIPBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir,
            catalog_path,
            confirm,
            max_connections: get("TRIPBOOK_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            compact_threshold: get("TRIPBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            complete_interval: match get("TRIPBOOK_COMPLETE_INTERVAL_SECS").and_then(|s| s.parse::<u64>().ok()) {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => Some(Duration::from_secs(60)),
            },
            metrics_port: get("TRIPBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
