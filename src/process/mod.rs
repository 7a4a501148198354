//! Subprocess execution
//!
//! Every external tool is started through a [`CommandRunner`] with an
//! explicit argument vector. Nothing here goes through a shell.
//!
//! A run that starts and exits before the deadline yields a
//! [`ProcessOutput`]; callers still have to check [`ProcessOutput::success`]
//! because a completed run may have exited nonzero or died on a signal.

pub mod privilege;

pub use privilege::Escalator;

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start process {program}: {source}")]
    StartFailure {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Process {program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("Failed to wait for process {program}: {source}")]
    WaitFailure {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Process {program} exited with status {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// Captured result of a process that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or -1 when the process was terminated by a signal
    pub exit_code: i32,
    /// False when the process was terminated by a signal
    pub normal_exit: bool,
}

impl ProcessOutput {
    /// Ran to normal completion and exited zero
    pub fn success(&self) -> bool {
        self.normal_exit && self.exit_code == 0
    }

    /// Turn an unsuccessful completion into [`ProcessError::NonZeroExit`]
    pub fn check(self, program: &str) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::NonZeroExit {
                program: program.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Starts external programs and waits for them
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Runs programs on the host with piped stdout/stderr
pub struct SystemRunner {
    kill_grace: Duration,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// How long to wait for a killed child to be reaped
    pub fn with_kill_grace(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        debug!(program, ?args, "exec");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::StartFailure {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    let _ = child.kill();
                    reap(&mut child, self.kill_grace);
                    return Err(ProcessError::WaitFailure {
                        program: program.to_string(),
                        source,
                    });
                }
            }

            if Instant::now() >= deadline {
                warn!(program, timeout_secs = timeout.as_secs(), "process timed out, killing");
                let _ = child.kill();
                reap(&mut child, self.kill_grace);
                // Reader threads are left to finish on their own; a grandchild
                // may still hold the pipes open.
                return Err(ProcessError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }

            thread::sleep(POLL_INTERVAL);
        };

        let output = ProcessOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            exit_code: status.code().unwrap_or(-1),
            normal_exit: status.code().is_some(),
        };
        debug!(program, exit_code = output.exit_code, "exited");
        Ok(output)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn reap(child: &mut Child, grace: Duration) {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return,
            Ok(None) => thread::sleep(POLL_INTERVAL),
        }
    }
    warn!("killed process was not reaped within {}ms", grace.as_millis());
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for exercising callers without spawning anything

    use super::*;
    use std::sync::Mutex;

    type Responder = dyn Fn(&str, &[String]) -> Result<ProcessOutput, ProcessError> + Send + Sync;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Call {
        pub program: String,
        pub args: Vec<String>,
    }

    impl Call {
        /// Program followed by its arguments
        pub fn argv(&self) -> Vec<String> {
            std::iter::once(self.program.clone())
                .chain(self.args.iter().cloned())
                .collect()
        }
    }

    pub struct ScriptedRunner {
        calls: Mutex<Vec<Call>>,
        respond: Box<Responder>,
    }

    impl ScriptedRunner {
        pub fn new<F>(respond: F) -> Self
        where
            F: Fn(&str, &[String]) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
        {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        /// Every command succeeds with empty output
        pub fn succeeding() -> Self {
            Self::new(|_, _| Ok(ok("")))
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &self,
            program: &str,
            args: &[String],
            _timeout: Duration,
        ) -> Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(Call {
                program: program.to_string(),
                args: args.to_vec(),
            });
            (self.respond)(program, args)
        }
    }

    pub fn ok(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            normal_exit: true,
        }
    }

    pub fn failed(code: i32, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: code,
            normal_exit: true,
        }
    }

    pub fn timed_out(program: &str) -> ProcessError {
        ProcessError::Timeout {
            program: program.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}
