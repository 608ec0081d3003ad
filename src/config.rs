use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where an instance keeps its pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Pages live in process memory (SQLite `memdb` VFS)
    #[default]
    Memory,
    /// Pages live in a database file inside the transient storage directory
    File,
}

impl Display for StorageMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::File => write!(f, "file"),
        }
    }
}

impl FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageMode::Memory),
            "file" => Ok(StorageMode::File),
            other => Err(anyhow!(
                "Unknown storage mode '{}', expected 'memory' or 'file'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    /// Backing storage for new instances
    pub storage: StorageMode,

    /// Parent directory for transient storage (system temp dir when unset)
    pub storage_root: Option<PathBuf>,

    /// Prefix for instance identities, e.g. `memdb` gives `memdb1`, `memdb2`, ...
    pub name_prefix: String,

    /// Maximum number of pooled connections per instance
    pub pool_max_size: u32,

    /// How long a checkout waits for a free connection
    pub connection_timeout_secs: u64,

    /// How long a statement waits on a locked database
    pub busy_timeout_ms: u64,

    /// gzip level used for dump files (0-9)
    pub dump_compression_level: u32,
}

const EMPTY_CONFIG: &str = r#"### memdb configuration file

### backing storage for new instances: "memory" or "file"
# storage = "memory"

### parent directory for per-instance transient storage
# storage_root = "/tmp"

### identity prefix for new instances
# name_prefix = "memdb"

### connection pool settings
# pool_max_size = 8
# connection_timeout_secs = 30
# busy_timeout_ms = 5000

### gzip level for dump files (0-9)
# dump_compression_level = 6
"#;

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::Memory,
            storage_root: None,
            name_prefix: "memdb".to_string(),
            pool_max_size: 8,
            connection_timeout_secs: 30,
            busy_timeout_ms: 5000,
            dump_compression_level: 6,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from a TOML file and `MEMDB_*` environment variables
    ///
    /// With an explicit path, a missing file is created from a commented template.
    /// Without one, `$HOME/.memdb/memdb.toml` is read if it exists.
    pub fn new(path: &Option<String>) -> Result<DatabaseConfig> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let p = Self::config_file_path();
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                }
            }
        }

        // E.g., `MEMDB_POOL_MAX_SIZE=4` caps the pool at four connections
        builder = builder.add_source(config::Environment::with_prefix("MEMDB"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config)
    }

    /// Build a configuration from flat key/value settings
    pub fn from_map(config: &HashMap<String, String>) -> Result<DatabaseConfig> {
        let defaults = DatabaseConfig::default();

        let storage = match config.get("storage") {
            Some(s) => s.parse()?,
            None => defaults.storage,
        };

        let storage_root = config
            .get("storage_root")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let name_prefix = config
            .get("name_prefix")
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or(defaults.name_prefix);

        let pool_max_size = config
            .get("pool_max_size")
            .and_then(|s| s.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.pool_max_size);

        let connection_timeout_secs = config
            .get("connection_timeout_secs")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.connection_timeout_secs);

        let busy_timeout_ms = config
            .get("busy_timeout_ms")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.busy_timeout_ms);

        let dump_compression_level = config
            .get("dump_compression_level")
            .and_then(|s| s.parse().ok())
            .filter(|n: &u32| *n <= 9)
            .unwrap_or(defaults.dump_compression_level);

        Ok(DatabaseConfig {
            storage,
            storage_root,
            name_prefix,
            pool_max_size,
            connection_timeout_secs,
            busy_timeout_ms,
            dump_compression_level,
        })
    }

    /// Checkout timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Busy timeout as Duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Directory that receives per-instance transient storage
    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Storage Mode:       {}", self.storage),
            format!("Storage Root:       {}", self.storage_root().display()),
            format!("Name Prefix:        {}", self.name_prefix),
            format!("Pool Max Size:      {}", self.pool_max_size),
            format!("Checkout Timeout:   {} seconds", self.connection_timeout_secs),
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
            format!("Dump Compression:   level {}", self.dump_compression_level),
        ]
        .join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.memdb/memdb.toml", home_dir)
    }
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_map() {
        let config = DatabaseConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.storage, StorageMode::Memory);
        assert_eq!(config.name_prefix, "memdb");
        assert_eq!(config.pool_max_size, 8);
        assert_eq!(config.connection_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_map_overrides() {
        let mut map = HashMap::new();
        map.insert("storage".to_string(), "file".to_string());
        map.insert("pool_max_size".to_string(), "3".to_string());
        map.insert("busy_timeout_ms".to_string(), "250".to_string());
        map.insert("storage_root".to_string(), "/var/tmp".to_string());

        let config = DatabaseConfig::from_map(&map).unwrap();
        assert_eq!(config.storage, StorageMode::File);
        assert_eq!(config.pool_max_size, 3);
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.storage_root(), PathBuf::from("/var/tmp"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let mut map = HashMap::new();
        map.insert("pool_max_size".to_string(), "0".to_string());
        map.insert("dump_compression_level".to_string(), "42".to_string());

        let config = DatabaseConfig::from_map(&map).unwrap();
        assert_eq!(config.pool_max_size, 8);
        assert_eq!(config.dump_compression_level, 6);
    }

    #[test]
    fn test_unknown_storage_mode() {
        let mut map = HashMap::new();
        map.insert("storage".to_string(), "tape".to_string());
        assert!(DatabaseConfig::from_map(&map).is_err());
    }

    #[test]
    fn test_new_creates_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memdb.toml");
        let path_str = path.to_str().unwrap().to_string();

        let config = DatabaseConfig::new(&Some(path_str.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.name_prefix, "memdb");

        std::fs::write(&path, "name_prefix = \"scratch\"\npool_max_size = 2\n").unwrap();
        let config = DatabaseConfig::new(&Some(path_str)).unwrap();
        assert_eq!(config.name_prefix, "scratch");
        assert_eq!(config.pool_max_size, 2);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
