//! Progress and log reporting.
//!
//! The pipeline never touches UI state. It is handed a [`ProgressReporter`]
//! at construction and pushes ordered `(message, percent)` events, raw log
//! lines and exactly one terminal [`Outcome`] through it.

use std::sync::mpsc::Sender;
use tracing::{error, info, warn};

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// Sink for pipeline events, owned by the caller.
pub trait ProgressReporter: Send + Sync {
    /// A step started; `percent` never decreases within a run.
    fn progress(&self, message: &str, percent: u8);

    /// One raw line of command output or installer commentary.
    fn log_line(&self, line: &str);

    /// Called exactly once when the run ends.
    fn finished(&self, _outcome: &Outcome) {}
}

/// Event form of the reporter callbacks, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Progress { message: String, percent: u8 },
    Log(String),
    Finished(Outcome),
}

/// Forwards events over an mpsc channel to another thread (e.g. a UI loop).
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: Sender<InstallEvent>,
}

impl ChannelReporter {
    pub fn new(sender: Sender<InstallEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelReporter {
    fn progress(&self, message: &str, percent: u8) {
        // A dropped receiver means nobody is watching; the install continues
        let _ = self.sender.send(InstallEvent::Progress {
            message: message.to_string(),
            percent,
        });
    }

    fn log_line(&self, line: &str) {
        let _ = self.sender.send(InstallEvent::Log(line.to_string()));
    }

    fn finished(&self, outcome: &Outcome) {
        let _ = self.sender.send(InstallEvent::Finished(outcome.clone()));
    }
}

/// Writes everything to the tracing subscriber. Used by the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn progress(&self, message: &str, percent: u8) {
        info!("[{:>3}%] {}", percent, message);
    }

    fn log_line(&self, line: &str) {
        info!(target: "archey::log", "{}", line);
    }

    fn finished(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded => info!("Installation complete"),
            Outcome::Failed(msg) => error!("Installation failed: {}", msg),
            Outcome::Cancelled => warn!("Installation cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_channel_reporter_preserves_order() {
        let (tx, rx) = mpsc::channel();
        let reporter = ChannelReporter::new(tx);

        reporter.progress("Partitioning disk...", 5);
        reporter.log_line("$ wipefs -a /dev/sda");
        reporter.finished(&Outcome::Succeeded);
        drop(reporter);

        let events: Vec<InstallEvent> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                InstallEvent::Progress {
                    message: "Partitioning disk...".into(),
                    percent: 5
                },
                InstallEvent::Log("$ wipefs -a /dev/sda".into()),
                InstallEvent::Finished(Outcome::Succeeded),
            ]
        );
    }

    #[test]
    fn test_channel_reporter_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let reporter = ChannelReporter::new(tx);
        reporter.progress("still fine", 50);
        reporter.finished(&Outcome::Cancelled);
    }
}
