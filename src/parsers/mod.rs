//! Parsers for system tool output.
//!
//! One module per tool, each turning raw stdout into typed values or a
//! [`ParseError`](crate::error::ParseError). None of them run commands, so the
//! rest of the installer never looks at tool output directly.

pub mod efibootmgr;
pub mod lsblk;
pub mod parted;
