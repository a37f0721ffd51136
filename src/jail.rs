//! Jail records and config files
//!
//! This module provides:
//! - Network records of a jail and its attachments
//! - Network mode derived from those records
//! - Reading, patching and writing jail.conf files

pub mod conf;
pub mod state;
pub mod types;
