//! Test doubles for the command and progress seams.
//!
//! `ScriptedRunner` records every command instead of running it and replays
//! canned output matched by command-line prefix. `RecordingReporter` keeps
//! every progress event. Both are public so integration tests can drive the
//! whole pipeline against a temporary mount root.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::CommandError;
use crate::progress::{InstallEvent, Outcome, ProgressReporter};
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Reply {
    Output { stdout: String, exit_code: i32 },
    Missing,
    Cancelled,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    reply: Reply,
}

/// Command runner that never touches the system.
///
/// Rules match on the start of the rendered command line
/// (e.g. `"lsblk -J"` or `"arch-chroot /mnt efibootmgr"`). One-shot rules
/// are consumed in the order they were added and win over standing rules;
/// among standing rules the most recently added wins. Unmatched commands
/// succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    once: Mutex<VecDeque<Rule>>,
    standing: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every matching command succeeds with `stdout`.
    pub fn respond(&self, prefix: &str, stdout: &str) -> &Self {
        self.push_standing(prefix, Reply::Output {
            stdout: stdout.to_string(),
            exit_code: 0,
        })
    }

    /// The next matching command succeeds with `stdout`.
    pub fn respond_once(&self, prefix: &str, stdout: &str) -> &Self {
        if let Ok(mut once) = self.once.lock() {
            once.push_back(Rule {
                prefix: prefix.to_string(),
                reply: Reply::Output {
                    stdout: stdout.to_string(),
                    exit_code: 0,
                },
            });
        }
        self
    }

    /// Every matching command exits with `exit_code` and prints `output`.
    pub fn fail(&self, prefix: &str, exit_code: i32, output: &str) -> &Self {
        self.push_standing(prefix, Reply::Output {
            stdout: output.to_string(),
            exit_code,
        })
    }

    /// Every matching command fails to spawn as if not installed.
    pub fn missing(&self, prefix: &str) -> &Self {
        self.push_standing(prefix, Reply::Missing)
    }

    /// Every matching command is interrupted by cancellation.
    pub fn cancel_on(&self, prefix: &str) -> &Self {
        self.push_standing(prefix, Reply::Cancelled)
    }

    fn push_standing(&self, prefix: &str, reply: Reply) -> &Self {
        if let Ok(mut standing) = self.standing.lock() {
            standing.push(Rule {
                prefix: prefix.to_string(),
                reply,
            });
        }
        self
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered command lines received so far.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// Index of the first command starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.starts_with(prefix))
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    fn reply_for(&self, line: &str) -> Option<Reply> {
        if let Ok(mut once) = self.once.lock()
            && let Some(idx) = once.iter().position(|r| line.starts_with(&r.prefix))
        {
            return once.remove(idx).map(|r| r.reply);
        }
        self.standing.lock().ok().and_then(|standing| {
            standing
                .iter()
                .rev()
                .find(|r| line.starts_with(&r.prefix))
                .map(|r| r.reply.clone())
        })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandOutput, CommandError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        let line = spec.to_string();

        match self.reply_for(&line) {
            None => Ok(CommandOutput::skipped()),
            Some(Reply::Missing) => Err(CommandError::Spawn {
                command: line,
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            }),
            Some(Reply::Cancelled) => Err(CommandError::Cancelled { command: line }),
            Some(Reply::Output { stdout, exit_code }) => {
                for l in stdout.lines() {
                    on_line(l);
                }
                Ok(CommandOutput {
                    tail: stdout.clone(),
                    stdout: if spec.capture_stdout { stdout } else { String::new() },
                    exit_code: Some(exit_code),
                })
            }
        }
    }
}

/// Reporter that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<InstallEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InstallEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// `(message, percent)` pairs in emission order.
    pub fn progress(&self) -> Vec<(String, u8)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InstallEvent::Progress { message, percent } => Some((message, percent)),
                _ => None,
            })
            .collect()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InstallEvent::Log(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Every terminal outcome reported (a correct run reports exactly one).
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InstallEvent::Finished(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.log_lines()
            .into_iter()
            .filter(|l| l.starts_with("WARNING"))
            .collect()
    }

    fn push(&self, event: InstallEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressReporter for RecordingReporter {
    fn progress(&self, message: &str, percent: u8) {
        self.push(InstallEvent::Progress {
            message: message.to_string(),
            percent,
        });
    }

    fn log_line(&self, line: &str) {
        self.push(InstallEvent::Log(line.to_string()));
    }

    fn finished(&self, outcome: &Outcome) {
        self.push(InstallEvent::Finished(outcome.clone()));
    }
}
