//! VNET directive rendering
//!
//! Turns a jail's network mode and its resolved attachments into the
//! network directive block of the jail config. Rendering is pure: every
//! object has already been resolved and every epair provisioned, so the
//! same input always yields the same lines.

use crate::jail::state::NetworkMode;
use crate::network::epair::{host_side, jail_side};
use crate::network::ip::Ipv4Assignment;
use crate::network::mac::MacAddr;
use ipnet::Ipv6Net;
use std::net::{Ipv4Addr, Ipv6Addr};

/// IPv4 configuration of a resolved attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Plan {
    Dhcp,
    Static {
        assignment: Ipv4Assignment,
        gateway: Ipv4Addr,
    },
    None,
}

/// IPv6 configuration of a resolved attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv6Plan {
    Slaac,
    Static { network: Ipv6Net, gateway: Ipv6Addr },
    None,
}

/// An attachment with every object reference replaced by its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    /// Epair base name, `<token>_<switch>`
    pub base: String,
    pub switch_id: u32,
    pub mac: Option<MacAddr>,
    /// Bridge of the attachment's switch
    pub bridge: String,
    pub ipv4: Ipv4Plan,
    pub ipv6: Ipv6Plan,
}

/// Default routes claimed so far while walking the attachments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteAccumulator {
    pub ipv4_route_set: bool,
    pub ipv6_route_set: bool,
}

/// Render the network directives for a jail
///
/// Lines are returned without indentation or trailing newline.
pub fn render(mode: NetworkMode, attachments: &[ResolvedAttachment]) -> Vec<String> {
    match mode {
        NetworkMode::Inherited { ipv4, ipv6 } => {
            let mut lines = Vec::new();
            if ipv4 {
                lines.push("ip4=inherit;".to_string());
            }
            if ipv6 {
                lines.push("ip6=inherit;".to_string());
            }
            lines
        }
        NetworkMode::IsolatedEmpty => vec!["ip4=disable;".to_string(), "ip6=disable;".to_string()],
        NetworkMode::IsolatedActive => render_vnet(attachments),
    }
}

fn render_vnet(attachments: &[ResolvedAttachment]) -> Vec<String> {
    let mut lines = vec!["vnet;".to_string()];

    lines.extend(
        attachments
            .iter()
            .filter(|a| a.switch_id != 0)
            .map(|a| format!(r#"vnet.interface += "{}";"#, jail_side(&a.base))),
    );

    attachments
        .iter()
        .fold(RouteAccumulator::default(), |routes, attachment| {
            let (directives, routes) = attachment_directives(attachment, routes);
            lines.extend(directives);
            routes
        });

    lines
}

/// Directives of one attachment, threading the default-route state through
pub fn attachment_directives(
    attachment: &ResolvedAttachment,
    mut routes: RouteAccumulator,
) -> (Vec<String>, RouteAccumulator) {
    let host = host_side(&attachment.base);
    let jail = jail_side(&attachment.base);
    let mut lines = Vec::new();

    if let Some(mac) = attachment.mac {
        lines.push(format!(
            r#"exec.prestart += "ifconfig {} ether {} up";"#,
            host,
            mac.previous()
        ));
        lines.push(format!(
            r#"exec.prestart += "ifconfig {} ether {} up";"#,
            jail, mac
        ));
        lines.push(format!(
            r#"exec.prestart += "if ! ifconfig {bridge} | grep -qw {host}; then ifconfig {bridge} addm {host}; fi";"#,
            bridge = attachment.bridge,
            host = host
        ));
    }

    match attachment.ipv4 {
        Ipv4Plan::Dhcp => {
            lines.push(format!(r#"exec.start += "dhclient {}";"#, jail));
            lines.push(format!(r#"exec.start += "sysrc ifconfig_{}=\"DHCP\"";"#, jail));
        }
        Ipv4Plan::Static {
            assignment,
            gateway,
        } => {
            let args = assignment.ifconfig_args();
            lines.push(format!(r#"exec.start += "ifconfig {} {}";"#, jail, args));
            if !routes.ipv4_route_set {
                lines.push(format!(r#"exec.start += "route add default {}";"#, gateway));
                routes.ipv4_route_set = true;
            }
            lines.push(format!(
                r#"exec.start += "sysrc ifconfig_{}=\"{}\"";"#,
                jail, args
            ));
        }
        Ipv4Plan::None => {}
    }

    match attachment.ipv6 {
        Ipv6Plan::Slaac => {
            lines.push(format!(
                r#"exec.start += "ifconfig {} inet6 accept_rtadv up";"#,
                jail
            ));
            lines.push(format!(
                r#"exec.start += "sysrc ifconfig_{}_ipv6=\"inet6 accept_rtadv\"";"#,
                jail
            ));
        }
        Ipv6Plan::Static { network, gateway } => {
            lines.push(format!(r#"exec.start += "ifconfig {} inet6 {}";"#, jail, network));
            if !routes.ipv6_route_set {
                lines.push(format!(
                    r#"exec.start += "sysrc ipv6_defaultrouter=\"{}\"";"#,
                    gateway
                ));
                routes.ipv6_route_set = true;
            }
            lines.push(format!(
                r#"exec.start += "sysrc ifconfig_{}_ipv6=\"inet6 {}\"";"#,
                jail, network
            ));
        }
        Ipv6Plan::None => {}
    }

    (lines, routes)
}
