use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Identity of the measurement system recorded on every path.
/// `address` is the get-or-create key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_system_name")]
    pub name: String,
    #[serde(default = "default_system_address")]
    pub address: String,
    #[serde(default = "default_system_description")]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceConfig {
    /// Hard wall-clock limit for one tool invocation
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Per-hop wait passed to the tool
    #[serde(default = "default_wait")]
    pub wait_secs: u64,
    /// Ceiling on captured bytes per output stream
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoConfig {
    /// MaxMind City database; geolocation is disabled when unset
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_system_name() -> String {
    match hostname::get() {
        Ok(host) => format!("Topologer Server ({})", host.to_string_lossy()),
        Err(_) => "Topologer Server".to_string(),
    }
}

fn default_system_address() -> String {
    "localhost".to_string()
}

fn default_system_description() -> String {
    "Default measurement system".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_wait() -> u64 {
    3
}

fn default_max_output() -> usize {
    1024 * 1024
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/topologer/topology.db")
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: default_system_name(),
            address: default_system_address(),
            description: default_system_description(),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            wait_secs: default_wait(),
            max_output_bytes: default_max_output(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}
