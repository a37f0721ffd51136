//! Jail network mode
//!
//! A jail is always in exactly one of three network modes. The mode is never
//! stored; it is derived from the inherit flags and the attachment list.

use std::fmt;

use crate::jail::types::Jail;

/// Network mode of a jail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Shares the host network stack for the flagged protocols
    Inherited { ipv4: bool, ipv6: bool },
    /// Own stack, no interfaces
    IsolatedEmpty,
    /// Own VNET stack with at least one epair
    IsolatedActive,
}

impl NetworkMode {
    /// Derive the mode of a jail
    ///
    /// Inherit flags take precedence; a jail carrying both flags and
    /// attachments is treated as inherited.
    pub fn of(jail: &Jail) -> Self {
        if jail.inherits() {
            NetworkMode::Inherited {
                ipv4: jail.inherit_ipv4,
                ipv6: jail.inherit_ipv6,
            }
        } else if jail.attachments.is_empty() {
            NetworkMode::IsolatedEmpty
        } else {
            NetworkMode::IsolatedActive
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Inherited { ipv4, ipv6 } => {
                let protocols: Vec<&str> = [(*ipv4, "ipv4"), (*ipv6, "ipv6")]
                    .iter()
                    .filter(|(set, _)| *set)
                    .map(|(_, name)| *name)
                    .collect();
                write!(f, "inherited ({})", protocols.join(", "))
            }
            NetworkMode::IsolatedEmpty => write!(f, "isolated (no interfaces)"),
            NetworkMode::IsolatedActive => write!(f, "isolated (vnet)"),
        }
    }
}
