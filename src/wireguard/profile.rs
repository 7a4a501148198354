//! WireGuard profile storage
//!
//! Profiles are plain `<name>.conf` files in the configuration directory,
//! owned by root with mode 0600. The directory is the only source of truth;
//! nothing is kept in memory between calls.
//!
//! Writes go to two places: the live filesystem and, through the overlay
//! chroot helper, the persistent lower layer so that the change survives a
//! reboot on overlay-root systems.

use crate::config::{Config, ToolsConfig};
use crate::process::{Escalator, ProcessError};
use crate::validate::{file_name, is_valid_profile_filename};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::LazyLock;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

static DNS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*DNS\s*=").expect("dns line regex"));

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Invalid profile name: {0}")]
    InvalidName(String),
    #[error("Could not open source file {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create temporary staging file: {0}")]
    TempFile(#[source] io::Error),
    #[error("Failed to install profile to live system: {0}")]
    LiveInstall(#[source] ProcessError),
}

/// Result of a write that targets both the live and persistent locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub live_ok: bool,
    pub persist_ok: bool,
}

pub struct ProfileManager {
    escalator: Escalator,
    tools: ToolsConfig,
    config_dir: PathBuf,
}

impl ProfileManager {
    pub fn new(escalator: Escalator, config: &Config) -> Self {
        Self {
            escalator,
            tools: config.tools.clone(),
            config_dir: config.storage.config_dir.clone(),
        }
    }

    /// Import a profile from a local path or `file://` URI
    ///
    /// DNS assignments are stripped before the file is installed. A failed
    /// live install aborts; a failed persistent install is reported through
    /// [`SyncOutcome::persist_ok`].
    pub fn import_profile(&self, source: &str) -> Result<SyncOutcome, ProfileError> {
        let local_path = resolve_source_path(source);

        let name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| is_valid_profile_filename(name))
            .ok_or_else(|| {
                ProfileError::InvalidName(local_path.to_string_lossy().into_owned())
            })?
            .to_string();

        let bytes = fs::read(&local_path).map_err(|source| ProfileError::SourceUnreadable {
            path: local_path.clone(),
            source,
        })?;
        let cleaned = strip_dns_lines(&String::from_utf8_lossy(&bytes));

        let staged = stage(&cleaned).map_err(ProfileError::TempFile)?;
        let staged_path = staged.path().to_string_lossy().into_owned();
        let destination = self.destination(&name);

        debug!("Staged {} at {}", name, staged_path);

        let install_args = vec![
            "-o".to_string(),
            "root".to_string(),
            "-g".to_string(),
            "root".to_string(),
            "-m".to_string(),
            "600".to_string(),
            staged_path,
            destination.clone(),
        ];

        self.escalator
            .run(&self.tools.install, &install_args)
            .and_then(|output| output.check(&self.tools.install))
            .map_err(ProfileError::LiveInstall)?;
        info!("Installed profile {}", destination);

        let persist_args: Vec<String> = std::iter::once(self.tools.install.clone())
            .chain(install_args)
            .collect();
        let persist_ok = match self
            .escalator
            .run(&self.tools.overlay_chroot, &persist_args)
            .and_then(|output| output.check(&self.tools.overlay_chroot))
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to persist profile {}: {}", name, e);
                false
            }
        };

        Ok(SyncOutcome {
            live_ok: true,
            persist_ok,
        })
    }

    /// Delete a profile from the live and persistent locations
    ///
    /// Both deletions are best-effort; their results are returned but never
    /// turned into an error.
    pub fn remove_profile(&self, name: &str) -> Result<SyncOutcome, ProfileError> {
        let name = file_name(name)
            .filter(|name| is_valid_profile_filename(name))
            .ok_or_else(|| ProfileError::InvalidName(name.to_string()))?;
        let destination = self.destination(name);

        let live_ok = self.best_effort(&self.tools.rm, &["-f".to_string(), destination.clone()]);
        let persist_ok = self.best_effort(
            &self.tools.overlay_chroot,
            &[self.tools.rm.clone(), "-f".to_string(), destination.clone()],
        );

        info!(
            "Removed profile {} (live: {}, persistent: {})",
            destination, live_ok, persist_ok
        );
        Ok(SyncOutcome {
            live_ok,
            persist_ok,
        })
    }

    /// Sorted, deduplicated `.conf` filenames in the configuration directory
    ///
    /// Tries an unprivileged listing first. An empty result, whether the
    /// directory is empty or unreadable, falls back to a privileged `ls`.
    pub fn list_profiles(&self) -> Vec<String> {
        let mut profiles = self.list_unprivileged();

        if profiles.is_empty() {
            debug!(
                "No profiles visible in {}, trying privileged listing",
                self.config_dir.display()
            );
            profiles.extend(self.list_privileged());
        }

        profiles.into_iter().collect()
    }

    fn list_unprivileged(&self) -> BTreeSet<String> {
        let entries = match fs::read_dir(&self.config_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {}: {}", self.config_dir.display(), e);
                return BTreeSet::new();
            }
        };

        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".conf"))
            .collect()
    }

    fn list_privileged(&self) -> BTreeSet<String> {
        let dir = self.config_dir.to_string_lossy().into_owned();
        match self
            .escalator
            .run(&self.tools.ls, &[dir])
            .and_then(|output| output.check(&self.tools.ls))
        {
            Ok(output) => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|name| is_valid_profile_filename(name))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!("Privileged profile listing failed: {}", e);
                BTreeSet::new()
            }
        }
    }

    fn best_effort(&self, program: &str, args: &[String]) -> bool {
        match self
            .escalator
            .run(program, args)
            .and_then(|output| output.check(program))
        {
            Ok(_) => true,
            Err(e) => {
                warn!("{} failed (ignored): {}", program, e);
                false
            }
        }
    }

    fn destination(&self, name: &str) -> String {
        self.config_dir.join(name).to_string_lossy().into_owned()
    }
}

/// Map a `file://` URI to a local path; anything else is taken as a path
pub fn resolve_source_path(source: &str) -> PathBuf {
    match Url::parse(source) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(source)),
        _ => PathBuf::from(source),
    }
}

/// Drop `DNS =` assignments, keeping every other line in order
pub fn strip_dns_lines(content: &str) -> String {
    let mut cleaned = String::with_capacity(content.len());
    for line in content.lines().filter(|line| !DNS_LINE.is_match(line)) {
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned
}

fn stage(content: &str) -> io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}
