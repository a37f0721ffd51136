//! Host network provisioning seam
//!
//! The synthesizer never touches interfaces directly; it asks a
//! [`Provisioner`] for epairs, switch lookups and bridge membership.

use crate::error::{Error, Result};
use crate::network::bridge::{self, Bridge};
use crate::network::epair;
use serde::{Deserialize, Serialize};

/// A virtual switch backed by a host bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub id: u32,
    pub name: String,
    /// Bridge interface carrying the switch (e.g., "bridge0")
    pub bridge: String,
}

/// Host-level network operations the synthesizer depends on
pub trait Provisioner {
    /// Make sure an epair exists for every base name
    fn ensure_epairs(&self, bases: &[String]) -> Result<()>;

    /// Tear down an epair; absent epairs are not an error
    fn delete_epair(&self, base: &str) -> Result<()>;

    /// Look up a switch by id
    fn switch(&self, id: u32) -> Result<Switch>;

    /// Bridge interface of a switch
    fn bridge_name(&self, id: u32) -> Result<String> {
        self.switch(id).map(|s| s.bridge)
    }

    /// Add an interface to a bridge unless it is already a member
    fn ensure_bridge_member(&self, bridge: &str, interface: &str) -> Result<()>;
}

/// Provisioner backed by ifconfig(8) on the local host
#[derive(Debug, Clone, Default)]
pub struct HostProvisioner {
    switches: Vec<Switch>,
}

impl HostProvisioner {
    pub fn new(switches: Vec<Switch>) -> Self {
        Self { switches }
    }
}

impl Provisioner for HostProvisioner {
    fn ensure_epairs(&self, bases: &[String]) -> Result<()> {
        if bases.is_empty() {
            return Ok(());
        }

        bridge::load_modules()?;
        let interfaces = epair::list_interfaces()?;

        for base in bases {
            let host = epair::host_side(base);
            if interfaces.iter().any(|i| *i == host) {
                continue;
            }
            epair::create(base)?;
        }

        Ok(())
    }

    fn delete_epair(&self, base: &str) -> Result<()> {
        let interfaces = epair::list_interfaces()?;
        epair::destroy(base, &interfaces)
    }

    fn switch(&self, id: u32) -> Result<Switch> {
        self.switches
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(Error::SwitchNotFound(id))
    }

    fn ensure_bridge_member(&self, bridge: &str, interface: &str) -> Result<()> {
        Bridge::new(bridge).ensure_member(interface)
    }
}
