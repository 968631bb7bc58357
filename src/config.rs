use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::wal::DEFAULT_MAX_FILE_BYTES;

pub const ENV_WAL_DIR: &str = "RTCACHE_WAL_DIR";
pub const ENV_ENABLE_WAL: &str = "RTCACHE_ENABLE_WAL";
pub const ENV_MAX_CACHE_SIZE: &str = "RTCACHE_MAX_CACHE_SIZE";
pub const ENV_MAX_WAL_FILE_BYTES: &str = "RTCACHE_MAX_WAL_FILE_BYTES";
pub const ENV_SYNC_WRITES: &str = "RTCACHE_SYNC_WRITES";
pub const ENV_FLUSH_INTERVAL_MS: &str = "RTCACHE_FLUSH_INTERVAL_MS";
pub const ENV_BATCH_SIZE: &str = "RTCACHE_BATCH_SIZE";

pub const DEFAULT_WAL_DIR: &str = "./rtcache_wal";
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub wal_dir: PathBuf,
    /// false = no WAL: nothing is logged and recovery is a no-op
    pub enable_wal: bool,
    pub max_cache_size: usize,
    /// Active WAL file is rotated once it reaches this size
    pub max_wal_file_bytes: u64,
    /// true = fsync every append, false = OS buffer (faster)
    pub sync_writes: bool,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::from(DEFAULT_WAL_DIR),
            enable_wal: true,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_wal_file_bytes: DEFAULT_MAX_FILE_BYTES,
            sync_writes: true,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `RTCACHE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values keep
    /// the current setting.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_WAL_DIR).filter(|d| !d.trim().is_empty()) {
            self.wal_dir = PathBuf::from(dir);
        }
        if let Some(flag) = parse_var::<Flag>(&lookup, ENV_ENABLE_WAL) {
            self.enable_wal = flag.0;
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_CACHE_SIZE) {
            self.max_cache_size = size;
        }
        if let Some(bytes) = parse_var(&lookup, ENV_MAX_WAL_FILE_BYTES) {
            self.max_wal_file_bytes = bytes;
        }
        if let Some(flag) = parse_var::<Flag>(&lookup, ENV_SYNC_WRITES) {
            self.sync_writes = flag.0;
        }
        if let Some(ms) = parse_var(&lookup, ENV_FLUSH_INTERVAL_MS) {
            self.flush_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>(&lookup, ENV_BATCH_SIZE) {
            self.batch_size = size.max(1);
        }
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

/// Boolean accepting `1/0`, `true/false`, `on/off`, `yes/no`.
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(Flag(true)),
            "0" | "false" | "off" | "no" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}
