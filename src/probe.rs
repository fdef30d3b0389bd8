//! Block-device inventory.

use crate::command::{CommandRunner, CommandSpec};
use crate::disk::Disk;
use crate::error::ProbeError;
use crate::parsers::lsblk;
use std::time::Duration;
use tracing::debug;

/// Queries the running system's disks through `lsblk`. Read-only.
pub struct DiskProbe<'a> {
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> DiskProbe<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn spec() -> CommandSpec {
        CommandSpec::probe("lsblk", ["-J", "-b", "-o", lsblk::COLUMNS])
    }

    /// All disks with their partitions, in lsblk order.
    pub fn disks(&self) -> Result<Vec<Disk>, ProbeError> {
        let spec = Self::spec().with_timeout(self.timeout);
        let output = self.runner.run(&spec, &mut |_| {}).map_err(|e| match e {
            e if e.is_not_found() => ProbeError::ToolUnavailable { tool: "lsblk" },
            e => ProbeError::Command(e),
        })?;
        output.ensure_success(&spec)?;

        let disks = lsblk::parse_inventory(&output.stdout)?;
        debug!("Probe found {} disk(s)", disks.len());
        Ok(disks)
    }

    /// One disk by name (`sda` or `/dev/sda`).
    pub fn disk(&self, name: &str) -> Result<Disk, ProbeError> {
        let name = name.strip_prefix("/dev/").unwrap_or(name);
        self.disks()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ProbeError::DiskNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    const ONE_DISK: &str = r#"{"blockdevices":[{"name":"vda","size":21474836480,"type":"disk","model":null}]}"#;

    #[test]
    fn test_disk_lookup() {
        let runner = ScriptedRunner::new();
        runner.respond("lsblk -J", ONE_DISK);
        let probe = DiskProbe::new(&runner, Duration::from_secs(10));

        let disk = probe.disk("/dev/vda").unwrap();
        assert_eq!(disk.size, 20 << 30);
        assert!(matches!(probe.disk("sdz"), Err(ProbeError::DiskNotFound(_))));
        assert_eq!(runner.calls()[0].timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_missing_lsblk_is_tool_unavailable() {
        let runner = ScriptedRunner::new();
        runner.missing("lsblk");
        let probe = DiskProbe::new(&runner, Duration::from_secs(10));
        assert!(matches!(
            probe.disks(),
            Err(ProbeError::ToolUnavailable { tool: "lsblk" })
        ));
    }

    #[test]
    fn test_failed_or_garbled_probe() {
        let runner = ScriptedRunner::new();
        runner.fail("lsblk", 1, "lsblk: unknown column");
        let probe = DiskProbe::new(&runner, Duration::from_secs(10));
        assert!(matches!(probe.disks(), Err(ProbeError::Command(_))));

        let runner = ScriptedRunner::new();
        runner.respond("lsblk", "{");
        let probe = DiskProbe::new(&runner, Duration::from_secs(10));
        assert!(matches!(probe.disks(), Err(ProbeError::Malformed(_))));
    }
}
