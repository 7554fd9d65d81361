use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `CHAIRBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            catalog_path: PathBuf::from("./services.json"),
            password: "chairbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            port: parsed(&lookup, "CHAIRBOOK_PORT").unwrap_or(d.port),
            bind: lookup("CHAIRBOOK_BIND").unwrap_or(d.bind),
            data_dir: lookup("CHAIRBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            catalog_path: lookup("CHAIRBOOK_CATALOG")
                .map(PathBuf::from)
                .unwrap_or(d.catalog_path),
            password: lookup("CHAIRBOOK_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "CHAIRBOOK_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "CHAIRBOOK_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "CHAIRBOOK_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("chairbook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}
