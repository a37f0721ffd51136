//! Bridge membership for switch bridges
//!
//! Switch bridges themselves are created by the switch subsystem; this
//! module only checks and adds epair members.

use crate::error::{Error, Result};
use crate::network::epair::ifconfig;

#[cfg(target_os = "freebsd")]
use std::ffi::CString;

// FreeBSD kldload syscall - not in libc crate
#[cfg(target_os = "freebsd")]
unsafe extern "C" {
    fn kldload(file: *const libc::c_char) -> libc::c_int;
}

/// A bridge interface
#[derive(Debug, Clone)]
pub struct Bridge {
    /// Bridge interface name (e.g., "bridge0")
    name: String,
}

impl Bridge {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// List member interfaces
    pub fn members(&self) -> Result<Vec<String>> {
        let output = ifconfig(&[&self.name]).map_err(|e| match e {
            Error::CommandFailed { message, .. } if message.contains("does not exist") => {
                Error::InterfaceNotFound(self.name.clone())
            }
            other => other,
        })?;
        Ok(parse_members(&output))
    }

    /// Add a member interface to the bridge
    pub fn add_member(&self, interface: &str) -> Result<()> {
        ifconfig(&[&self.name, "addm", interface]).map(|_| ())
    }

    /// Add a member unless it is already attached
    pub fn ensure_member(&self, interface: &str) -> Result<()> {
        if self.members()?.iter().any(|m| m == interface) {
            return Ok(());
        }
        self.add_member(interface)?;
        tracing::info!(bridge = %self.name, member = interface, "added bridge member");
        Ok(())
    }
}

/// Extract member names from `ifconfig <bridge>` output
fn parse_members(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("member: "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(String::from)
        .collect()
}

/// Load the kernel modules epairs and bridges depend on
#[cfg(target_os = "freebsd")]
pub fn load_modules() -> Result<()> {
    let modules = ["if_bridge", "bridgestp", "if_epair"];

    for module in modules {
        let module_cstr = CString::new(module).map_err(|e| {
            Error::InvalidValue(format!("Invalid module name {}: {}", module, e))
        })?;

        // Use native kldload(2) syscall instead of spawning process
        let result = unsafe { kldload(module_cstr.as_ptr()) };

        if result < 0 {
            let err = std::io::Error::last_os_error();
            let errno = err.raw_os_error().unwrap_or(0);

            // Ignore if module is already loaded (EEXIST) or built-in (ENOENT)
            if errno != libc::EEXIST && errno != libc::ENOENT {
                return Err(Error::CommandFailed {
                    command: format!("kldload {}", module),
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(not(target_os = "freebsd"))]
pub fn load_modules() -> Result<()> {
    Ok(())
}
