//! Configuration handling for Wirecloak

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const LOCAL_CONFIG_FILE: &str = "wirecloak.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub privilege: PrivilegeConfig,
    pub process: ProcessConfig,
}

/// Filesystem locations the core reads from or installs into
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one `<name>.conf` per profile
    pub config_dir: PathBuf,
    /// Directory whose entries are the live network interfaces
    pub net_class_dir: PathBuf,
}

/// Absolute paths of the external utilities we drive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub install: String,
    pub rm: String,
    pub ls: String,
    pub wg: String,
    pub wg_quick: String,
    pub overlay_chroot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Elevation front-end prefixed to every privileged command
    pub frontend: String,
    /// Run privileged commands directly when already running as root
    pub skip_when_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_secs: u64,
    pub kill_grace_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/wireguard"),
            net_class_dir: PathBuf::from("/sys/class/net"),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            install: "/usr/bin/install".to_string(),
            rm: "/usr/bin/rm".to_string(),
            ls: "/usr/bin/ls".to_string(),
            wg: "/usr/bin/wg".to_string(),
            wg_quick: "/usr/bin/wg-quick".to_string(),
            overlay_chroot: "/usr/sbin/overlayroot-chroot".to_string(),
        }
    }
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            frontend: "/usr/bin/pkexec".to_string(),
            skip_when_root: true,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            kill_grace_ms: 2000,
        }
    }
}

impl ProcessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location for the per-user config file
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wirecloak").join("config.toml"))
    }

    /// Load config from an explicit path or the default locations
    ///
    /// Lookup order: `explicit`, `./wirecloak.toml`, the per-user config
    /// file. Falls back to built-in defaults when none exist.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::load(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            debug!("Loading config from {}", local.display());
            return Self::load(&local);
        }

        if let Some(user) = Self::user_config_path() {
            if user.exists() {
                debug!("Loading config from {}", user.display());
                return Self::load(&user);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}
