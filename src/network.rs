//! Network plumbing for VNET jails
//!
//! Provides:
//! - Epair creation, renaming and teardown
//! - Bridge membership for switch bridges
//! - Address and MAC value parsing
//! - Rendering of the jail config network block

pub mod bridge;
pub mod epair;
pub mod ip;
pub mod mac;
pub mod provisioner;
pub mod vnet;
