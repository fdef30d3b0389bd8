//! External command execution
//!
//! Every system tool the installer touches (lsblk, sgdisk, parted, mkfs,
//! pacstrap, arch-chroot, grub-install, efibootmgr...) goes through a
//! [`CommandRunner`]. The production runner, [`SystemRunner`], spawns each
//! command in its own process group, registers it with the child registry,
//! streams stdout and stderr line by line and polls the cancellation token
//! between lines.
//!
//! Tests substitute a scripted runner, so the planning and provisioning code
//! never calls `std::process::Command` directly.

use crate::cancel::CancellationToken;
use crate::error::{CommandError, OUTPUT_TAIL_CHARS, output_tail};
use crate::process_guard::{self, CommandProcessGroup};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often the runner wakes up to check cancellation and timeouts.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time a process group gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// A fully described external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Changes system state; skipped under dry-run.
    pub mutating: bool,
    /// Only probes and detection utilities are bounded.
    pub timeout: Option<Duration>,
    /// Keep the complete stdout for parsing instead of only the tail.
    pub capture_stdout: bool,
}

impl CommandSpec {
    /// A state-changing command (partitioning, formatting, installing...).
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            mutating: true,
            timeout: None,
            capture_stdout: false,
        }
    }

    /// A read-only query whose stdout is parsed.
    pub fn probe<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mutating: false,
            capture_stdout: true,
            ..Self::new(program, args)
        }
    }

    /// `arch-chroot <root> <program> <args...>`
    pub fn chroot<I, S>(root: &Path, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = vec![root.display().to_string(), program.into()];
        full.extend(args.into_iter().map(Into::into));
        Self::new("arch-chroot", full)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capturing(mut self) -> Self {
        self.capture_stdout = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of a command that ran to completion (successfully or not).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Full stdout, only populated for `CommandSpec::capturing` commands.
    pub stdout: String,
    /// Last characters of interleaved stdout/stderr.
    pub tail: String,
    /// None when killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Stand-in result for a command skipped under dry-run.
    pub fn skipped() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into the uniform command error.
    pub fn ensure_success(&self, spec: &CommandSpec) -> Result<(), CommandError> {
        if self.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                command: spec.to_string(),
                exit_code: self.exit_code,
                output_tail: self.tail.clone(),
            })
        }
    }
}

/// Seam between the installer and the operating system.
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion, calling `on_line` for every output line.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`], not as
    /// an error; `Err` means the command could not be run, timed out or was
    /// cancelled.
    fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandOutput, CommandError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs commands on the live system.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    cancel: CancellationToken,
}

impl SystemRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandOutput, CommandError> {
        let command = spec.to_string();
        if self.cancel.is_cancelled() {
            return Err(CommandError::Cancelled { command });
        }

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let pid = child.id();
        process_guard::register_child(pid);

        let (tx, rx) = mpsc::channel::<(Stream, String)>();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Stream::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let started = Instant::now();
        let mut stdout = String::new();
        let mut tail = String::new();

        let interrupted = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((stream, line)) => {
                    if spec.capture_stdout && stream == Stream::Stdout {
                        stdout.push_str(&line);
                        stdout.push('\n');
                    }
                    push_bounded(&mut tail, &line);
                    on_line(&line);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break None,
            }

            if self.cancel.is_cancelled() {
                break Some(CommandError::Cancelled {
                    command: command.clone(),
                });
            }
            if let Some(limit) = spec.timeout
                && started.elapsed() >= limit
            {
                break Some(CommandError::TimedOut {
                    command: command.clone(),
                    seconds: limit.as_secs(),
                });
            }
        };

        if let Some(err) = interrupted {
            warn!("Terminating `{}`: {}", command, err);
            process_guard::terminate_child(&mut child, TERMINATE_GRACE);
            process_guard::unregister_child(pid);
            return Err(err);
        }

        let status = child.wait();
        process_guard::unregister_child(pid);
        for reader in readers {
            let _ = reader.join();
        }
        let status = status.map_err(|source| CommandError::Io {
            command: command.clone(),
            source,
        })?;

        debug!("`{}` exited with {:?}", command, status.code());
        Ok(CommandOutput {
            stdout,
            tail: output_tail(&tail, OUTPUT_TAIL_CHARS),
            exit_code: status.code(),
        })
    }
}

fn spawn_reader<R>(
    source: R,
    stream: Stream,
    tx: mpsc::Sender<(Stream, String)>,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Append a line to the rolling tail, keeping memory bounded.
fn push_bounded(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    let limit = OUTPUT_TAIL_CHARS * 8;
    if tail.len() > limit {
        let mut cut = tail.len() - OUTPUT_TAIL_CHARS * 4;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}
