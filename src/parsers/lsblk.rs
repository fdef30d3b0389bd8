//! `lsblk` output.
//!
//! The probe runs `lsblk -J -b -o NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,LABEL,MODEL`.
//! util-linux before 2.33 prints sizes as JSON strings even with `-b`, so
//! both forms are accepted.

use crate::disk::{Disk, Partition};
use crate::error::ParseError;
use serde::Deserialize;

const TOOL: &str = "lsblk";

/// Columns requested by the probe, in order.
pub const COLUMNS: &str = "NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,LABEL,MODEL";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    size: Option<SizeField>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeField {
    Number(u64),
    Text(String),
}

impl LsblkDevice {
    fn size_bytes(&self) -> Result<u64, ParseError> {
        match &self.size {
            None => Ok(0),
            Some(SizeField::Number(n)) => Ok(*n),
            Some(SizeField::Text(s)) => s.trim().parse().map_err(|_| {
                ParseError::malformed(TOOL, format!("size '{}' of {} is not a byte count", s, self.name))
            }),
        }
    }

    fn is(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }
}

fn text(field: Option<String>) -> String {
    field.map(|s| s.trim().to_string()).unwrap_or_default()
}

/// Disks (and their partitions) from `lsblk -J -b` output.
/// Loop devices, ROMs and other non-disk entries are dropped.
pub fn parse_inventory(json: &str) -> Result<Vec<Disk>, ParseError> {
    let output: LsblkOutput =
        serde_json::from_str(json).map_err(|e| ParseError::malformed(TOOL, e.to_string()))?;

    let mut disks = Vec::new();
    for device in output.blockdevices.into_iter().filter(|d| d.is("disk")) {
        let size = device.size_bytes()?;
        let mut partitions = Vec::new();
        for child in device.children.into_iter().filter(|c| c.is("part")) {
            partitions.push(Partition {
                size: child.size_bytes()?,
                name: child.name,
                fstype: text(child.fstype),
                label: text(child.label),
                mountpoint: text(child.mountpoint),
            });
        }

        let model = text(device.model);
        disks.push(Disk {
            name: device.name,
            size,
            model: if model.is_empty() { "Unknown".to_string() } else { model },
            partitions,
        });
    }
    Ok(disks)
}

/// Child device names from `lsblk -ln -o NAME <disk>`, in enumeration order.
pub fn parse_name_list(output: &str, disk_name: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != disk_name)
        .map(str::to_string)
        .collect()
}
