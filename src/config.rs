use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub metrics_listen: Option<String>,
    #[serde(default = "default_max_interfaces")]
    pub max_interfaces: usize,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub samplers: SamplersConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_request_buffer_bytes")]
    pub request_buffer_bytes: usize,
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplersConfig {
    #[serde(default = "default_cpu_window_secs")]
    pub cpu_window_secs: u64,
    #[serde(default)]
    pub cpu_retry_delay_ms: u64,
    #[serde(default = "default_interval_secs")]
    pub load_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub memory_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub netif_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_proc_stat")]
    pub proc_stat: PathBuf,
    #[serde(default = "default_proc_loadavg")]
    pub proc_loadavg: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            metrics_listen: None,
            max_interfaces: default_max_interfaces(),
            server: ServerConfig::default(),
            samplers: SamplersConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_buffer_bytes: default_request_buffer_bytes(),
            io_timeout_ms: None,
            max_connections: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for SamplersConfig {
    fn default() -> Self {
        Self {
            cpu_window_secs: default_cpu_window_secs(),
            cpu_retry_delay_ms: 0,
            load_interval_secs: default_interval_secs(),
            memory_interval_secs: default_interval_secs(),
            netif_interval_secs: default_interval_secs(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            proc_stat: default_proc_stat(),
            proc_loadavg: default_proc_loadavg(),
        }
    }
}

impl ServerConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_addr("listen", &self.listen)?;
        if let Some(metrics_listen) = &self.metrics_listen {
            validate_addr("metrics_listen", metrics_listen)?;
        }
        if self.backlog < 1 {
            return Err(ConfigError::Validation("backlog must be >= 1".to_string()));
        }
        if self.max_interfaces < 1 {
            return Err(ConfigError::Validation(
                "max_interfaces must be >= 1".to_string(),
            ));
        }

        validate_server(&self.server)?;
        validate_samplers(&self.samplers)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../hostmine.yaml.example")
    }
}

fn validate_addr(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} is required")));
    }
    if SocketAddr::from_str(value).is_err() {
        return Err(ConfigError::Validation(format!(
            "{field} must be a valid host:port address"
        )));
    }
    Ok(())
}

fn validate_server(cfg: &ServerConfig) -> Result<(), ConfigError> {
    if cfg.request_buffer_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.request_buffer_bytes must be > 0".to_string(),
        ));
    }
    if cfg.io_timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "server.io_timeout_ms must be > 0 when set".to_string(),
        ));
    }
    if cfg.max_connections == Some(0) {
        return Err(ConfigError::Validation(
            "server.max_connections must be >= 1 when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_samplers(cfg: &SamplersConfig) -> Result<(), ConfigError> {
    let intervals = [
        ("samplers.cpu_window_secs", cfg.cpu_window_secs),
        ("samplers.load_interval_secs", cfg.load_interval_secs),
        ("samplers.memory_interval_secs", cfg.memory_interval_secs),
        ("samplers.netif_interval_secs", cfg.netif_interval_secs),
    ];
    for (name, value) in intervals {
        if value < 1 {
            return Err(ConfigError::Validation(format!("{name} must be >= 1")));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:9750".to_string()
}

const fn default_backlog() -> u32 {
    5
}

const fn default_max_interfaces() -> usize {
    16
}

const fn default_request_buffer_bytes() -> usize {
    1024
}

const fn default_shutdown_grace_ms() -> u64 {
    2000
}

const fn default_cpu_window_secs() -> u64 {
    3
}

const fn default_interval_secs() -> u64 {
    1
}

fn default_proc_stat() -> PathBuf {
    PathBuf::from("/proc/stat")
}

fn default_proc_loadavg() -> PathBuf {
    PathBuf::from("/proc/loadavg")
}
