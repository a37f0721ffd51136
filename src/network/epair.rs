//! Epair interface management for VNET jails
//!
//! Epairs are virtual Ethernet pairs used to connect VNET jails to bridges.
//! Each jail/switch pair gets one epair named `<token>_<switch>`: the `a` end
//! stays on the host and joins the switch's bridge, the `b` end is handed to
//! the jail through `vnet.interface`.

use crate::error::{Error, Result};
use std::process::Command;

/// Run ifconfig(8) and return its stdout
pub(crate) fn ifconfig(args: &[&str]) -> Result<String> {
    let command = format!("ifconfig {}", args.join(" "));
    let output = Command::new("ifconfig")
        .args(args)
        .output()
        .map_err(|e| Error::CommandFailed {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::CommandFailed {
            command,
            message: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Names of every interface on the host
pub fn list_interfaces() -> Result<Vec<String>> {
    let output = ifconfig(&["-l"])?;
    Ok(output.split_whitespace().map(String::from).collect())
}

/// Host-side interface name of an epair
pub fn host_side(base: &str) -> String {
    format!("{}a", base)
}

/// Jail-side interface name of an epair
pub fn jail_side(base: &str) -> String {
    format!("{}b", base)
}

/// Derive the `b` end from the `a` end printed by `ifconfig epair create`
fn peer_of(created: &str) -> Result<String> {
    created
        .strip_suffix('a')
        .map(|s| format!("{}b", s))
        .ok_or_else(|| Error::CommandFailed {
            command: "ifconfig epair create".to_string(),
            message: format!("unexpected epair name format: {}", created),
        })
}

/// Create an epair and rename its ends to `<base>a` / `<base>b`
pub fn create(base: &str) -> Result<()> {
    // Output is something like "epair0a\n"
    let created = ifconfig(&["epair", "create"])?.trim().to_string();
    if created.is_empty() {
        return Err(Error::CommandFailed {
            command: "ifconfig epair create".to_string(),
            message: "no interface name returned".to_string(),
        });
    }
    let peer = peer_of(&created)?;

    let host = host_side(base);
    if let Err(e) = ifconfig(&[&created, "name", &host]) {
        let _ = ifconfig(&[&created, "destroy"]);
        return Err(e);
    }

    let jail = jail_side(base);
    if let Err(e) = ifconfig(&[&peer, "name", &jail]) {
        // Destroying either end destroys both
        let _ = ifconfig(&[&host, "destroy"]);
        return Err(e);
    }

    tracing::info!(epair = base, "created epair");
    Ok(())
}

/// Destroy an epair by base name
///
/// An epair that does not exist is already in the desired state.
pub fn destroy(base: &str, interfaces: &[String]) -> Result<()> {
    let host = host_side(base);
    if !interfaces.iter().any(|i| *i == host) {
        tracing::debug!(epair = base, "epair already absent");
        return Ok(());
    }

    match ifconfig(&[&host, "destroy"]) {
        Ok(_) => {
            tracing::info!(epair = base, "destroyed epair");
            Ok(())
        }
        Err(Error::CommandFailed { message, .. }) if message.contains("does not exist") => Ok(()),
        Err(e) => Err(e),
    }
}
