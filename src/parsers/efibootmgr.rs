//! `efibootmgr` output.

use crate::error::ParseError;

const TOOL: &str = "efibootmgr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    /// Four uppercase hex digits, e.g. `0003`
    pub id: String,
    pub label: String,
    /// Marked with `*`
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootState {
    pub current: Option<String>,
    pub order: Vec<String>,
    pub entries: Vec<BootEntry>,
}

pub fn parse(output: &str) -> Result<BootState, ParseError> {
    let mut state = BootState::default();
    let mut saw_order = false;

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("BootOrder:") {
            saw_order = true;
            state.order = rest
                .split(',')
                .map(|id| id.trim().to_uppercase())
                .filter(|id| !id.is_empty())
                .collect();
            if let Some(bad) = state.order.iter().find(|id| !is_boot_id(id)) {
                return Err(ParseError::malformed(TOOL, format!("bad BootOrder entry '{}'", bad)));
            }
        } else if let Some(rest) = line.strip_prefix("BootCurrent:") {
            state.current = Some(rest.trim().to_uppercase());
        } else if let Some(entry) = parse_entry(line) {
            state.entries.push(entry);
        }
    }

    if !saw_order {
        return Err(ParseError::Missing {
            tool: TOOL,
            what: "BootOrder",
        });
    }
    Ok(state)
}

/// `Boot0003* Archey\tHD(1,GPT,...)` → entry with label `Archey`.
fn parse_entry(line: &str) -> Option<BootEntry> {
    let rest = line.strip_prefix("Boot")?;
    let id = rest.get(..4)?;
    if !is_boot_id(id) {
        return None;
    }
    let rest = &rest[4..];
    let (active, rest) = match rest.strip_prefix('*') {
        Some(r) => (true, r),
        None => (false, rest),
    };
    // Device path follows the label after a tab on newer efibootmgr
    let label = rest.split('\t').next().unwrap_or("").trim().to_string();
    Some(BootEntry {
        id: id.to_uppercase(),
        label,
        active,
    })
}

fn is_boot_id(id: &str) -> bool {
    id.len() == 4 && id.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "BootCurrent: 0001\n\
Timeout: 1 seconds\n\
BootOrder: 0000,0001,001a\n\
Boot0000* Windows Boot Manager\tHD(1,GPT,c1a2...,0x800,0x32000)/File(\\EFI\\Microsoft\\Boot\\bootmgfw.efi)\n\
Boot0001* UEFI: PXE IPv4 Intel(R) Ethernet\n\
Boot001A  Archey\tHD(1,GPT,...)/File(\\EFI\\Archey\\grubx64.efi)\n";

    #[test]
    fn test_parse_order_and_entries() {
        let state = parse(SAMPLE).unwrap();
        assert_eq!(state.current.as_deref(), Some("0001"));
        assert_eq!(state.order, vec!["0000", "0001", "001A"]);
        assert_eq!(state.entries.len(), 3);

        assert_eq!(state.entries[0].label, "Windows Boot Manager");
        assert!(state.entries[0].active);
        assert_eq!(state.entries[2].id, "001A");
        assert_eq!(state.entries[2].label, "Archey");
        assert!(!state.entries[2].active);
    }

    #[test]
    fn test_missing_boot_order() {
        let out = "BootCurrent: 0001\nBoot0001* Archey\n";
        assert_eq!(
            parse(out),
            Err(ParseError::Missing {
                tool: "efibootmgr",
                what: "BootOrder"
            })
        );
    }

    #[test]
    fn test_rejects_garbage_order() {
        assert!(parse("BootOrder: 0001,zz\n").is_err());
    }

    #[test]
    fn test_ignores_non_entry_boot_lines() {
        let state = parse("BootNext: 0002\nBootOrder: 0002\nBoot12\n").unwrap();
        assert!(state.entries.is_empty());
        assert_eq!(state.order, vec!["0002"]);
    }
}
