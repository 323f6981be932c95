// In: src/orchestrator/external.rs

//! Implementations that run as a separate executable.
//!
//! The command protocol:
//! - `<cmd> [args] produce --case-json <path>` writes the encoded stream of
//!   the described case to stdout.
//! - `<cmd> [args] consume` reads a stream on stdin and writes the stream it
//!   understood, re-encoded, to stdout.
//!
//! A nonzero exit status is a crash; stderr is kept as the diagnostic.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::implementation::Implementation;
use crate::codec;
use crate::error::{IntegrityError, Result};
use crate::golden::GoldenCase;
use crate::types::{DecodedDataset, FeatureSet};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Trailing stderr kept in an error message.
const MAX_DIAGNOSTIC_BYTES: usize = 2048;

#[derive(Debug)]
pub struct ExternalImplementation {
    name: String,
    command: PathBuf,
    args: Vec<String>,
    features: FeatureSet,
    emits: FeatureSet,
    timeout: Duration,
}

/// Owns a running child. Dropping it before the child was seen to exit
/// kills and reaps the child, which also closes its pipes.
struct ChildGuard {
    child: Child,
    exited: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            exited: false,
        }
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        self.exited |= status.is_some();
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

struct ProcessOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ExternalImplementation {
    pub fn new(
        name: impl Into<String>,
        command: PathBuf,
        args: Vec<String>,
        features: FeatureSet,
        emits: FeatureSet,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            args,
            features,
            emits,
            timeout,
        }
    }

    fn failure(&self, message: String) -> IntegrityError {
        IntegrityError::Implementation {
            name: self.name.clone(),
            message,
        }
    }

    /// Runs one protocol command, feeding `stdin` and enforcing the timeout.
    fn run(&self, command_args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .args(command_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(format!("cannot start {}: {e}", self.command.display())))?;

        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let output = thread::scope(|scope| -> Result<ProcessOutput> {
            // Dropped before the scope joins the pipe threads below.
            let mut child = ChildGuard::new(child);

            // Feeding and draining happen on their own threads so a child that
            // fills one pipe while we block on another cannot deadlock us.
            if let (Some(bytes), Some(mut pipe)) = (stdin, stdin_pipe) {
                scope.spawn(move || {
                    // A child that exits early closes the pipe; its exit
                    // status reports the real problem.
                    let _ = pipe.write_all(bytes);
                });
            }
            let stdout = stdout_pipe.map(|mut pipe| {
                scope.spawn(move || {
                    let mut buf = Vec::new();
                    pipe.read_to_end(&mut buf).map(|_| buf)
                })
            });
            let stderr = stderr_pipe.map(|mut pipe| {
                scope.spawn(move || {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf);
                    buf
                })
            });

            let started = Instant::now();
            let status = loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if started.elapsed() >= self.timeout {
                    return Err(self.failure(format!(
                        "{} timed out after {:?}",
                        command_args.first().copied().unwrap_or("command"),
                        self.timeout
                    )));
                }
                thread::sleep(POLL_INTERVAL);
            };

            let stdout = match stdout {
                Some(handle) => handle
                    .join()
                    .map_err(|_| self.failure("stdout reader panicked".to_string()))??,
                None => Vec::new(),
            };
            let stderr = match stderr {
                Some(handle) => handle
                    .join()
                    .map_err(|_| self.failure("stderr reader panicked".to_string()))?,
                None => Vec::new(),
            };
            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
            })
        })?;

        if !output.status.success() {
            let tail_start = output.stderr.len().saturating_sub(MAX_DIAGNOSTIC_BYTES);
            return Err(self.failure(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr[tail_start..]).trim()
            )));
        }
        log::debug!(
            "{} {:?} wrote {} bytes",
            self.name,
            command_args,
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}

impl Implementation for ExternalImplementation {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &FeatureSet {
        &self.features
    }

    fn reads(&self) -> &FeatureSet {
        &self.features
    }

    fn emits(&self) -> &FeatureSet {
        &self.emits
    }

    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        let description = case.to_description()?;
        let mut file = tempfile::Builder::new()
            .prefix("arrow-interop-case-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut file, &description)?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        self.run(&["produce", "--case-json", &path], None)
    }

    fn consume(&self, bytes: &[u8]) -> Result<DecodedDataset> {
        let echoed = self.run(&["consume"], Some(bytes))?;
        codec::read_dataset(&echoed)
            .map_err(|e| self.failure(format!("consume output is not a valid stream: {e}")))
    }
}
