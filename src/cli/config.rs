//! Custodia operator configuration file handling
//!
//! Provides default configuration generation and loading for the operator
//! binary. Configuration files are TOML and live in the data directory
//! next to the fragment and label stores.
//!
//! Every section is optional; missing keys take the library defaults.

use custodia::relations::LookupConfig;
use custodia::restore::RestoreConfig;
use custodia::supplier::ConnectorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Custodia operator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodiaConfig {
    /// Where local state lives
    pub storage: StorageConfig,

    /// Restore session timers and local copy policy
    pub restore: RestoreConfig,

    /// Supplier connector timeouts and storage quota
    pub suppliers: ConnectorConfig,

    /// Relation directory scanning
    pub lookup: LookupConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the fragment and label stores
    /// (default: `<data_local_dir>/custodia`)
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Directory of the fragment store.
    pub fn fragments_dir(&self) -> PathBuf {
        self.data_dir.join("fragments")
    }

    /// Root of the label store.
    pub fn labels_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl CustodiaConfig {
    /// Create a configuration rooted at `data_dir`
    #[allow(dead_code)]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            storage: StorageConfig { data_dir },
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: CustodiaConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    #[allow(dead_code)]
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Load the config at `path`, writing a default one first if missing
    pub fn load_or_create(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            let data_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(default_data_dir);
            Self::create_default(path, &data_dir)?;
            tracing::info!(path = %path.display(), "Created default configuration");
        }
        Self::load(path)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(data_dir: &Path) -> String {
        format!(
            r#"# Custodia Configuration
#
# Durations are human readable ("100ms", "20s", "1m").

[storage]
# Root of the local fragment store and the supplier label files
data_dir = "{data_dir}"

[restore]
# Scheduling tick between blocks
tick = "100ms"
# How often a block is checked for fixability while fragments arrive
fixable_check = "1s"
# How often a block is checked for stalls
stall_check = "5s"
# Re-scan and re-request after this long without progress
stall_after = "1m"
# Keep fragments in the local store after their block is restored
keep_local_copies = true

[suppliers]
request_timeout = "20s"
refuse_timeout = "10s"
queue_timeout = "10s"
# Total space wanted across all suppliers, in bytes
needed_bytes_total = 33554432
# Number of suppliers the total is spread over (optional)
# desired_suppliers = 7

[lookup]
prefix = "customer_supplier"
limit_lookups = 100
max_misses_in_row = 3

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
level = "info"
"#,
            data_dir = data_dir.display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(
        config_path: &Path,
        data_dir: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(data_dir);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Get the default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("custodia")
}

/// Get the default config file path
///
/// - Data: ~/.local/share/custodia/
/// - Config: ~/.local/share/custodia/config.toml
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}
