//! Firmware boot-order prioritization.
//!
//! Pure logic over parsed `efibootmgr` state: find the entry the bootloader
//! installer just wrote and move it to the front, keeping everything else in
//! its original relative order. Entries are never created or deleted.

use crate::parsers::efibootmgr::{BootEntry, BootState};

/// Outcome of a reorder attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOrderChange {
    /// Write this order back to the firmware
    Reordered(Vec<String>),
    AlreadyFirst(String),
    NoMatchingEntry,
}

/// First entry whose label mentions the product name or "arch linux", or is
/// exactly "arch". Case-insensitive.
pub fn find_preferred_entry<'a>(entries: &'a [BootEntry], product: &str) -> Option<&'a BootEntry> {
    let product = product.trim().to_lowercase();
    entries.iter().find(|entry| {
        let label = entry.label.trim().to_lowercase();
        (!product.is_empty() && label.contains(&product))
            || label.contains("arch linux")
            || label == "arch"
    })
}

/// `order` with `id` moved to the front.
pub fn move_to_front(order: &[String], id: &str) -> Vec<String> {
    let mut reordered = Vec::with_capacity(order.len() + 1);
    reordered.push(id.to_string());
    reordered.extend(order.iter().filter(|o| !o.eq_ignore_ascii_case(id)).cloned());
    reordered
}

pub fn prioritize(state: &BootState, product: &str) -> BootOrderChange {
    let Some(entry) = find_preferred_entry(&state.entries, product) else {
        return BootOrderChange::NoMatchingEntry;
    };

    if state.order.first().is_some_and(|first| first.eq_ignore_ascii_case(&entry.id)) {
        return BootOrderChange::AlreadyFirst(entry.id.clone());
    }
    BootOrderChange::Reordered(move_to_front(&state.order, &entry.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, label: &str) -> BootEntry {
        BootEntry {
            id: id.into(),
            label: label.into(),
            active: true,
        }
    }

    fn state(order: &[&str], entries: Vec<BootEntry>) -> BootState {
        BootState {
            current: None,
            order: order.iter().map(|s| s.to_string()).collect(),
            entries,
        }
    }

    #[test]
    fn test_moves_product_entry_to_front() {
        let s = state(&["0001", "0002", "0003"], vec![entry("0002", "archey")]);
        assert_eq!(
            prioritize(&s, "Archey"),
            BootOrderChange::Reordered(vec!["0002".into(), "0001".into(), "0003".into()])
        );
    }

    #[test]
    fn test_label_patterns() {
        let entries = vec![
            entry("0000", "Windows Boot Manager"),
            entry("0004", "Archer Firmware Tool"),
            entry("0005", "ARCH"),
            entry("0006", "Arch Linux (fallback)"),
        ];
        assert_eq!(find_preferred_entry(&entries, "Archey").unwrap().id, "0005");
        assert_eq!(find_preferred_entry(&entries[..2], "Archey"), None);
        assert_eq!(find_preferred_entry(&entries[1..2], "archer").unwrap().id, "0004");
    }

    #[test]
    fn test_no_match_leaves_order_alone() {
        let s = state(&["0001", "0002"], vec![entry("0001", "Windows Boot Manager")]);
        assert_eq!(prioritize(&s, "Archey"), BootOrderChange::NoMatchingEntry);
    }

    #[test]
    fn test_already_first() {
        let s = state(&["0003", "0001"], vec![entry("0003", "Archey")]);
        assert_eq!(
            prioritize(&s, "Archey"),
            BootOrderChange::AlreadyFirst("0003".into())
        );
    }

    #[test]
    fn test_entry_missing_from_order_is_prepended() {
        let s = state(&["0000"], vec![entry("0007", "Archey")]);
        assert_eq!(
            prioritize(&s, "Archey"),
            BootOrderChange::Reordered(vec!["0007".into(), "0000".into()])
        );
    }
}
