use std::path::PathBuf;

/// Runtime settings, read from `BLOCKPLAN_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends after which startup compacts the log.
    pub compact_threshold: u64,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            data_dir: PathBuf::from(lookup("BLOCKPLAN_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: lookup("BLOCKPLAN_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("BLOCKPLAN_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            log_filter: lookup("BLOCKPLAN_LOG").unwrap_or_else(|| "info".into()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("blocks.wal")
    }
}
