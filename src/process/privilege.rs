//! Privilege escalation for commands that touch protected state

use super::{CommandRunner, ProcessError, ProcessOutput};
use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs commands as root through an elevation front-end such as `pkexec`
///
/// With no front-end configured the command runs directly, which is what
/// happens when the process already has root.
#[derive(Clone)]
pub struct Escalator {
    runner: Arc<dyn CommandRunner>,
    frontend: Option<String>,
    timeout: Duration,
}

impl Escalator {
    pub fn new(runner: Arc<dyn CommandRunner>, frontend: Option<String>, timeout: Duration) -> Self {
        Self {
            runner,
            frontend,
            timeout,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        let frontend = if config.privilege.skip_when_root && is_root() {
            debug!("Already running as root, privileged commands run directly");
            None
        } else {
            Some(config.privilege.frontend.clone())
        };

        Self::new(runner, frontend, config.process.timeout())
    }

    pub fn frontend(&self) -> Option<&str> {
        self.frontend.as_deref()
    }

    /// Run `program args...` with elevated privileges
    pub fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        match &self.frontend {
            Some(frontend) => {
                let argv: Vec<String> = std::iter::once(program.to_string())
                    .chain(args.iter().cloned())
                    .collect();
                self.runner.run(frontend, &argv, self.timeout)
            }
            None => self.runner.run(program, args, self.timeout),
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
