//! Bringing tunnels up and down, and reporting their statistics

use crate::config::{Config, ToolsConfig};
use crate::process::{CommandRunner, Escalator, ProcessError};
use crate::validate::derive_interface_name;
use crate::wireguard::status::{parse_latest_handshakes, parse_transfer, StatusCache, TunnelStatus};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid interface name: {0}")]
    InvalidInterface(String),
    #[error("Failed to toggle tunnel{}", details_suffix(.details))]
    ToggleFailed { details: String },
}

fn details_suffix(details: &str) -> String {
    if details.is_empty() {
        ".".to_string()
    } else {
        format!(": {}", details)
    }
}

/// Requested tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelAction {
    Up,
    Down,
}

impl TunnelAction {
    pub fn from_enable(enable: bool) -> Self {
        if enable {
            TunnelAction::Up
        } else {
            TunnelAction::Down
        }
    }

    /// `wg-quick` subcommand
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelAction::Up => "up",
            TunnelAction::Down => "down",
        }
    }
}

pub struct TunnelController {
    escalator: Escalator,
    runner: Arc<dyn CommandRunner>,
    tools: ToolsConfig,
    net_class_dir: PathBuf,
    timeout: Duration,
    cache: Mutex<StatusCache>,
}

impl TunnelController {
    pub fn new(escalator: Escalator, runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        Self::with_cache(escalator, runner, config, StatusCache::new())
    }

    /// Build a controller around an existing cache
    pub fn with_cache(
        escalator: Escalator,
        runner: Arc<dyn CommandRunner>,
        config: &Config,
        cache: StatusCache,
    ) -> Self {
        Self {
            escalator,
            runner,
            tools: config.tools.clone(),
            net_class_dir: config.storage.net_class_dir.clone(),
            timeout: config.process.timeout(),
            cache: Mutex::new(cache),
        }
    }

    /// Whether a network interface called `iface` currently exists
    pub fn interface_exists(&self, iface: &str) -> bool {
        self.net_class_dir.join(iface).exists()
    }

    /// Bring the tunnel for profile `name` up or down
    ///
    /// Bringing up an interface that already exists first takes it down, so
    /// a stale or half-configured tunnel starts from a clean state.
    pub fn toggle_tunnel(&self, name: &str, enable: bool) -> Result<(), TunnelError> {
        let iface =
            derive_interface_name(name).ok_or_else(|| TunnelError::InvalidInterface(name.to_string()))?;
        let action = TunnelAction::from_enable(enable);

        if action == TunnelAction::Up && self.interface_exists(&iface) {
            debug!("{} already present, resetting before bringing it up", iface);
            if let Err(e) = self.wg_quick(TunnelAction::Down, &iface) {
                warn!("Reset of {} failed: {}", iface, e);
            }
        }

        self.wg_quick(action, &iface).map_err(|e| {
            let details = match e {
                ProcessError::NonZeroExit { stderr, .. } => stderr,
                other => other.to_string(),
            };
            TunnelError::ToggleFailed { details }
        })?;

        info!("Tunnel {} is {}", iface, action.as_str());
        Ok(())
    }

    /// Current state and statistics of the tunnel for profile `name`
    ///
    /// Query failures are not errors: the last successfully read values are
    /// returned instead.
    pub fn tunnel_status(&self, name: &str) -> TunnelStatus {
        let Some(iface) = derive_interface_name(name) else {
            return TunnelStatus::inactive();
        };
        if !self.interface_exists(&iface) {
            return TunnelStatus::inactive();
        }

        let handshake = match self.wg_show(&iface, "latest-handshakes") {
            Ok(output) => {
                let newest = parse_latest_handshakes(&output);
                self.cache().record_handshake(&iface, newest);
                newest
            }
            Err(e) => {
                warn!("Handshake query for {} failed, using cached value: {}", iface, e);
                self.cache().handshake(&iface)
            }
        };

        let (rx, tx) = match self.wg_show(&iface, "transfer") {
            Ok(output) => {
                let (rx, tx) = parse_transfer(&output);
                self.cache().record_transfer(&iface, rx, tx);
                (rx, tx)
            }
            Err(e) => {
                warn!("Transfer query for {} failed, using cached value: {}", iface, e);
                self.cache().transfer(&iface)
            }
        };

        TunnelStatus {
            active: true,
            handshake,
            rx,
            tx,
        }
    }

    fn wg_quick(&self, action: TunnelAction, iface: &str) -> Result<(), ProcessError> {
        self.escalator
            .run(&self.tools.wg_quick, &[action.as_str().to_string(), iface.to_string()])
            .and_then(|output| output.check(&self.tools.wg_quick))
            .map(|_| ())
    }

    fn wg_show(&self, iface: &str, what: &str) -> Result<String, ProcessError> {
        let args = ["show".to_string(), iface.to_string(), what.to_string()];
        self.runner
            .run(&self.tools.wg, &args, self.timeout)
            .and_then(|output| output.check(&self.tools.wg))
            .map(|output| output.stdout)
    }

    fn cache(&self) -> MutexGuard<'_, StatusCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
