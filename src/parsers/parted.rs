//! `parted -s <disk> unit MiB print free` output.
//!
//! ```text
//! Number  Start      End        Size       File system  Name      Flags
//!         0.02MiB    1.00MiB    0.98MiB    Free Space
//!  1      1.00MiB    101MiB     100MiB     fat32        EFI       boot, esp
//!  3      117MiB     243317MiB  243200MiB  ntfs         Basic...  msftdata
//!         243317MiB  476940MiB  233623MiB  Free Space
//! ```
//!
//! Values are converted to MiB whatever unit parted printed them in.

use crate::error::ParseError;

const TOOL: &str = "parted";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartedPartition {
    pub number: u32,
    pub start_mib: f64,
    pub end_mib: f64,
    pub size_mib: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeRegion {
    pub start_mib: f64,
    pub end_mib: f64,
    pub size_mib: f64,
}

/// Partition table rows in the order parted printed them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartedTable {
    pub partitions: Vec<PartedPartition>,
    pub free: Vec<FreeRegion>,
}

impl PartedTable {
    pub fn partition(&self, number: u32) -> Option<&PartedPartition> {
        self.partitions.iter().find(|p| p.number == number)
    }
}

pub fn parse_print_free(output: &str) -> Result<PartedTable, ParseError> {
    let mut lines = output.lines();
    if !lines.any(|l| l.trim_start().starts_with("Number")) {
        return Err(ParseError::Missing {
            tool: TOOL,
            what: "partition table",
        });
    }

    let mut table = PartedTable::default();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }

        if let Ok(number) = fields[0].parse::<u32>() {
            if fields.len() < 4 {
                return Err(ParseError::malformed(TOOL, format!("short partition row: '{}'", line.trim())));
            }
            table.partitions.push(PartedPartition {
                number,
                start_mib: to_mib(fields[1])?,
                end_mib: to_mib(fields[2])?,
                size_mib: to_mib(fields[3])?,
            });
        } else if line.contains("Free Space") {
            table.free.push(FreeRegion {
                start_mib: to_mib(fields[0])?,
                end_mib: to_mib(fields[1])?,
                size_mib: to_mib(fields[2])?,
            });
        }
    }
    Ok(table)
}

/// `"243317MiB"`, `"1.00MB"`, `"512B"` → MiB.
fn to_mib(value: &str) -> Result<f64, ParseError> {
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| ParseError::malformed(TOOL, format!("not a size: '{}'", value)))?;

    const MIB: f64 = 1024.0 * 1024.0;
    let bytes_per_unit = match unit {
        "B" => 1.0,
        "kB" => 1e3,
        "KiB" => 1024.0,
        "MB" => 1e6,
        "MiB" => MIB,
        "GB" => 1e9,
        "GiB" => MIB * 1024.0,
        "TB" => 1e12,
        "TiB" => MIB * 1024.0 * 1024.0,
        other => {
            return Err(ParseError::malformed(TOOL, format!("unknown unit '{}' in '{}'", other, value)));
        }
    };
    Ok(number * bytes_per_unit / MIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUALBOOT_DISK: &str = "\
Model: ATA Samsung SSD 860 (scsi)
Disk /dev/sda: 476940MiB
Sector size (logical/physical): 512B/512B
Partition Table: gpt
Disk Flags:

Number  Start      End        Size       File system  Name                          Flags
        0.02MiB    1.00MiB    0.98MiB    Free Space
 1      1.00MiB    101MiB     100MiB     fat32        EFI system partition          boot, esp
 2      101MiB     117MiB     16.0MiB                 Microsoft reserved partition  msftres
 3      117MiB     243317MiB  243200MiB  ntfs         Basic data partition          msftdata
        243317MiB  476940MiB  233623MiB  Free Space
";

    #[test]
    fn test_parse_partitions_and_free_regions() {
        let table = parse_print_free(DUALBOOT_DISK).unwrap();
        assert_eq!(table.partitions.len(), 3);
        assert_eq!(table.free.len(), 2);

        let windows = table.partition(3).unwrap();
        assert_eq!(windows.start_mib, 117.0);
        assert_eq!(windows.end_mib, 243317.0);

        let tail = table.free[1];
        assert_eq!(tail.start_mib, 243317.0);
        assert_eq!(tail.size_mib, 233623.0);
        assert!(table.free[0].size_mib < 1.0);
    }

    #[test]
    fn test_decimal_units_are_converted() {
        assert_eq!(to_mib("1048576B").unwrap(), 1.0);
        assert_eq!(to_mib("2GiB").unwrap(), 2048.0);
        assert!((to_mib("1000MB").unwrap() - 953.674).abs() < 0.001);
        assert!(to_mib("12XB").is_err());
        assert!(to_mib("MiB").is_err());
    }

    #[test]
    fn test_missing_table_header() {
        let out = "Error: /dev/sdb: unrecognised disk label\n";
        assert!(matches!(
            parse_print_free(out),
            Err(ParseError::Missing { .. })
        ));
    }

    #[test]
    fn test_empty_table() {
        let out = "Number  Start  End  Size  File system  Name  Flags\n";
        let table = parse_print_free(out).unwrap();
        assert!(table.partitions.is_empty());
        assert!(table.free.is_empty());
    }
}
