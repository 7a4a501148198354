//! Operation surface for a presentation layer
//!
//! [`VpnBackend`] runs each blocking operation on tokio's blocking pool and
//! publishes the outcome on a broadcast channel, so a UI can stay
//! responsive and react to:
//!
//! - [`BackendEvent::ProfileImported`]: the profile list changed
//! - [`BackendEvent::TunnelStateChanged`]: a tunnel went up or down
//! - [`BackendEvent::OperationError`]: a message to show the user
//!
//! Operations on the same profile are not serialized against each other.

use crate::config::Config;
use crate::process::{CommandRunner, Escalator, SystemRunner};
use crate::wireguard::{
    ProfileError, ProfileManager, SyncOutcome, TunnelController, TunnelError, TunnelStatus,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

const PERSIST_WARNING: &str =
    "Installed to live system, but failed to persist. Reboot may be required.";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Profile(#[from] ProfileError),
    #[error("{0}")]
    Tunnel(#[from] TunnelError),
    #[error("Background task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Emitted after an import, and after any removal
    ProfileImported,
    TunnelStateChanged,
    OperationError(String),
}

struct Core {
    profiles: ProfileManager,
    tunnels: TunnelController,
}

#[derive(Clone)]
pub struct VpnBackend {
    core: Arc<Core>,
    events: broadcast::Sender<BackendEvent>,
}

impl VpnBackend {
    /// Backend that runs real processes on this host
    pub fn from_config(config: &Config) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemRunner::with_kill_grace(config.process.kill_grace()));
        Self::with_runner(runner, config)
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        let escalator = Escalator::from_config(runner.clone(), config);
        Self::new(
            ProfileManager::new(escalator.clone(), config),
            TunnelController::new(escalator, runner, config),
        )
    }

    pub fn new(profiles: ProfileManager, tunnels: TunnelController) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            core: Arc::new(Core { profiles, tunnels }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    pub async fn import_profile(&self, source: &str) -> Result<SyncOutcome, BackendError> {
        let source = source.to_string();
        let result = self
            .blocking(move |core| core.profiles.import_profile(&source))
            .await?;

        match result {
            Ok(outcome) => {
                if !outcome.persist_ok {
                    self.emit(BackendEvent::OperationError(PERSIST_WARNING.to_string()));
                }
                self.emit(BackendEvent::ProfileImported);
                Ok(outcome)
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    pub async fn remove_profile(&self, name: &str) -> Result<SyncOutcome, BackendError> {
        let name = name.to_string();
        let result = self
            .blocking(move |core| core.profiles.remove_profile(&name))
            .await?;

        match result {
            Ok(outcome) => {
                self.emit(BackendEvent::ProfileImported);
                Ok(outcome)
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    pub async fn list_profiles(&self) -> Result<Vec<String>, BackendError> {
        self.blocking(|core| core.profiles.list_profiles()).await
    }

    pub async fn toggle_tunnel(&self, name: &str, enable: bool) -> Result<(), BackendError> {
        let name = name.to_string();
        let result = self
            .blocking(move |core| core.tunnels.toggle_tunnel(&name, enable))
            .await?;

        match result {
            Ok(()) => {
                self.emit(BackendEvent::TunnelStateChanged);
                Ok(())
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    pub async fn tunnel_status(&self, name: &str) -> Result<TunnelStatus, BackendError> {
        let name = name.to_string();
        self.blocking(move |core| core.tunnels.tunnel_status(&name))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Core) -> T + Send + 'static,
        T: Send + 'static,
    {
        let core = self.core.clone();
        tokio::task::spawn_blocking(move || f(&core))
            .await
            .map_err(|e| self.report(e.into()))
    }

    fn report(&self, error: BackendError) -> BackendError {
        self.emit(BackendEvent::OperationError(error.to_string()));
        error
    }

    fn emit(&self, event: BackendEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for backend event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{failed, ok, ScriptedRunner};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        _net_dir: TempDir,
        config: Config,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let net_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.config_dir = root.path().join("wireguard");
        config.storage.net_class_dir = net_dir.path().to_path_buf();
        config.privilege.skip_when_root = false;
        Fixture {
            root,
            _net_dir: net_dir,
            config,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<BackendEvent>) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_import_emits_profile_imported() {
        let fx = fixture();
        let source = fx.root.path().join("wg0.conf");
        fs::write(&source, "PrivateKey=abc\nDNS=1.1.1.1\n").unwrap();

        let runner = Arc::new(ScriptedRunner::succeeding());
        let backend = VpnBackend::with_runner(runner.clone(), &fx.config);
        let mut rx = backend.subscribe();

        let outcome = backend
            .import_profile(source.to_str().unwrap())
            .await
            .unwrap();
        assert!(outcome.persist_ok);
        assert_eq!(drain(&mut rx), vec![BackendEvent::ProfileImported]);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_import_partial_success_warns_then_notifies() {
        let fx = fixture();
        let source = fx.root.path().join("wg0.conf");
        fs::write(&source, "PrivateKey=abc\n").unwrap();

        let runner = Arc::new(ScriptedRunner::new(|_, args| {
            if args[0] == "/usr/sbin/overlayroot-chroot" {
                Ok(failed(1, ""))
            } else {
                Ok(ok(""))
            }
        }));
        let backend = VpnBackend::with_runner(runner, &fx.config);
        let mut rx = backend.subscribe();

        let outcome = backend
            .import_profile(source.to_str().unwrap())
            .await
            .unwrap();
        assert!(outcome.live_ok && !outcome.persist_ok);
        assert_eq!(
            drain(&mut rx),
            vec![
                BackendEvent::OperationError(PERSIST_WARNING.to_string()),
                BackendEvent::ProfileImported,
            ]
        );
    }

    #[tokio::test]
    async fn test_import_invalid_name_reports_error() {
        let fx = fixture();
        let source = fx.root.path().join("wg0.txt");
        fs::write(&source, "PrivateKey=abc\n").unwrap();

        let runner = Arc::new(ScriptedRunner::succeeding());
        let backend = VpnBackend::with_runner(runner.clone(), &fx.config);
        let mut rx = backend.subscribe();

        let result = backend.import_profile(source.to_str().unwrap()).await;
        assert!(matches!(
            result,
            Err(BackendError::Profile(ProfileError::InvalidName(_)))
        ));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BackendEvent::OperationError(msg) if msg.starts_with("Invalid profile name")));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_always_notifies() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(failed(1, "denied"))));
        let backend = VpnBackend::with_runner(runner, &fx.config);
        let mut rx = backend.subscribe();

        let outcome = backend.remove_profile("wg0.conf").await.unwrap();
        assert!(!outcome.live_ok);
        assert_eq!(drain(&mut rx), vec![BackendEvent::ProfileImported]);
    }

    #[tokio::test]
    async fn test_toggle_events() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|_, args| {
            if args.iter().any(|a| a == "up") {
                Ok(ok(""))
            } else {
                Ok(failed(1, "wg-quick: `wg0' is not a WireGuard interface"))
            }
        }));
        let backend = VpnBackend::with_runner(runner, &fx.config);
        let mut rx = backend.subscribe();

        backend.toggle_tunnel("wg0.conf", true).await.unwrap();
        assert!(backend.toggle_tunnel("wg0.conf", false).await.is_err());

        assert_eq!(
            drain(&mut rx),
            vec![
                BackendEvent::TunnelStateChanged,
                BackendEvent::OperationError(
                    "Failed to toggle tunnel: wg-quick: `wg0' is not a WireGuard interface"
                        .to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_and_status() {
        let fx = fixture();
        fs::create_dir(&fx.config.storage.config_dir).unwrap();
        fs::write(fx.config.storage.config_dir.join("b.conf"), "").unwrap();
        fs::write(fx.config.storage.config_dir.join("a.conf"), "").unwrap();

        let runner = Arc::new(ScriptedRunner::succeeding());
        let backend = VpnBackend::with_runner(runner.clone(), &fx.config);

        assert_eq!(
            backend.list_profiles().await.unwrap(),
            vec!["a.conf", "b.conf"]
        );
        assert_eq!(
            backend.tunnel_status("a.conf").await.unwrap(),
            TunnelStatus::inactive()
        );
        assert!(runner.calls().is_empty());
    }
}
