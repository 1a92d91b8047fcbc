//! flotilla.toml configuration.
//!
//! ```toml
//! data_dir = "/var/lib/flotilla"
//!
//! [tasks]
//! timeout_secs = 600
//! max_parallel = 32
//!
//! [providers]
//! enabled = ["mock", "static"]
//!
//! [services]
//! enabled = ["mock"]
//!
//! [logs]
//! dir = "/var/log/flotilla"
//! lines = 100
//!
//! [config_management]
//! driver = "directory"
//! databag_dir = "/var/lib/flotilla/databags"
//! converge_command = "ssh -p {ssh_port} {ssh_username}@{fqdn} sudo chef-client"
//! ```

use std::path::{Path, PathBuf};

use flotilla_tasks::{DEFAULT_MAX_PARALLEL, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlotillaConfig {
    pub data_dir: PathBuf,
    pub tasks: TasksConfig,
    pub providers: ProvidersConfig,
    pub services: ServicesConfig,
    pub logs: LogsConfig,
    pub config_management: CmConfig,
}

/// Aggregated app logs, one `{app}.log` file per app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub dir: PathBuf,
    /// Lines returned by `app logs` when no count is given.
    pub lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub timeout_secs: u64,
    pub max_parallel: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmDriver {
    Mock,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmConfig {
    pub driver: CmDriver,
    /// Defaults to `{data_dir}/databags`.
    pub databag_dir: Option<PathBuf>,
    pub converge_command: Option<String>,
    pub run_command: Option<String>,
    pub controller_command: Option<String>,
}

impl Default for FlotillaConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/flotilla"),
            tasks: TasksConfig::default(),
            providers: ProvidersConfig::default(),
            services: ServicesConfig::default(),
            logs: LogsConfig::default(),
            config_management: CmConfig::default(),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["mock".to_string(), "static".to_string()],
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["mock".to_string()],
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/log/flotilla"),
            lines: 100,
        }
    }
}

impl Default for CmConfig {
    fn default() -> Self {
        Self {
            driver: CmDriver::Directory,
            databag_dir: None,
            converge_command: None,
            run_command: None,
            controller_command: None,
        }
    }
}

impl FlotillaConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlotillaConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Read `path` if it exists, otherwise fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn databag_dir(&self) -> PathBuf {
        self.config_management
            .databag_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("databags"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlotillaConfig::load(&dir.path().join("flotilla.toml")).unwrap();
        assert_eq!(config, FlotillaConfig::default());
        assert_eq!(config.tasks.timeout_secs, 600);
        assert_eq!(config.tasks.max_parallel, 32);
        assert_eq!(config.config_management.driver, CmDriver::Directory);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let toml_str = r#"
data_dir = "/tmp/flotilla"

[tasks]
max_parallel = 4

[config_management]
driver = "mock"
"#;
        let config: FlotillaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/flotilla"));
        assert_eq!(config.tasks.max_parallel, 4);
        assert_eq!(config.tasks.timeout_secs, 600);
        assert_eq!(config.providers.enabled, vec!["mock", "static"]);
        assert_eq!(config.config_management.driver, CmDriver::Mock);
        assert_eq!(config.databag_dir(), PathBuf::from("/tmp/flotilla/databags"));
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flotilla.toml");
        std::fs::write(
            &path,
            "[services]\nenabled = []\n[config_management]\ndatabag_dir = \"/srv/bags\"\n",
        )
        .unwrap();
        let config = FlotillaConfig::load(&path).unwrap();
        assert!(config.services.enabled.is_empty());
        assert_eq!(config.databag_dir(), PathBuf::from("/srv/bags"));
    }

    #[test]
    fn log_settings_are_read() {
        let config: FlotillaConfig = toml::from_str("[logs]\ndir = \"/srv/logs\"\n").unwrap();
        assert_eq!(config.logs.dir, PathBuf::from("/srv/logs"));
        assert_eq!(config.logs.lines, 100);
    }

    #[test]
    fn unknown_cm_driver_is_rejected() {
        let result: Result<FlotillaConfig, _> =
            toml::from_str("[config_management]\ndriver = \"puppet\"\n");
        assert!(result.is_err());
    }
}
