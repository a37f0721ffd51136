//! Command-line interface for Rigging
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::store::ObjectKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Rigging - FreeBSD jail network synthesis
#[derive(Parser)]
#[command(name = "rigging")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "rigging.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Jail records and base configs
    Jail {
        #[command(subcommand)]
        action: JailAction,
    },

    /// Jail network management
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },

    /// Network objects (MAC and address values)
    Object {
        #[command(subcommand)]
        action: ObjectAction,
    },

    /// Sample resource usage of every jail once
    Usage {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Actions for the jail command
#[derive(Subcommand)]
pub enum JailAction {
    /// Register a jail and write its base config
    Create {
        /// Container id
        ctid: u32,

        /// Jail name
        name: String,

        /// Jail root directory
        #[arg(short, long)]
        path: PathBuf,

        /// Memory limit in megabytes
        #[arg(short, long)]
        memory: Option<u64>,
    },

    /// Set the jail's memory limit
    Memory {
        /// Container id
        ctid: u32,

        /// Limit in megabytes
        megabytes: u64,
    },

    /// Show a jail's network state
    Show {
        /// Container id
        ctid: u32,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Actions for the network command
#[derive(Subcommand)]
pub enum NetworkAction {
    /// Share the host network stack
    Inherit {
        /// Container id
        ctid: u32,

        /// Inherit IPv4
        #[arg(long)]
        ipv4: bool,

        /// Inherit IPv6
        #[arg(long)]
        ipv6: bool,
    },

    /// Stop sharing the host network stack
    Disinherit {
        /// Container id
        ctid: u32,
    },

    /// Attach a jail to a switch
    Add {
        /// Container id
        ctid: u32,

        /// Switch id
        #[arg(short, long)]
        switch: u32,

        /// MAC object id (generated if not given)
        #[arg(long)]
        mac: Option<u32>,

        /// IPv4 address object id
        #[arg(long, requires = "ipv4_gw", conflicts_with = "dhcp")]
        ipv4: Option<u32>,

        /// IPv4 gateway object id
        #[arg(long, requires = "ipv4")]
        ipv4_gw: Option<u32>,

        /// IPv6 address object id
        #[arg(long, requires = "ipv6_gw", conflicts_with = "slaac")]
        ipv6: Option<u32>,

        /// IPv6 gateway object id
        #[arg(long, requires = "ipv6")]
        ipv6_gw: Option<u32>,

        /// Configure IPv4 with DHCP
        #[arg(long)]
        dhcp: bool,

        /// Configure IPv6 with SLAAC
        #[arg(long)]
        slaac: bool,
    },

    /// Detach a jail from a switch
    Delete {
        /// Container id
        ctid: u32,

        /// Attachment id (see `jail show`)
        attachment: u32,
    },

    /// Rebuild network directives from stored state
    Sync {
        /// Container id (all jails if omitted)
        ctid: Option<u32>,
    },
}

/// Actions for the object command
#[derive(Subcommand)]
pub enum ObjectAction {
    /// Create a network object
    Create {
        /// Object name
        name: String,

        /// Object kind
        #[arg(short, long, value_enum)]
        kind: ObjectKind,

        /// Object values (e.g., 10.0.0.5/24)
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// List network objects
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "rigging", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_network_add() {
        let cli = Cli::try_parse_from([
            "rigging", "network", "add", "101", "--switch", "5", "--dhcp", "--ipv6", "3",
            "--ipv6-gw", "4",
        ])
        .unwrap();

        match cli.command {
            Commands::Network {
                action:
                    NetworkAction::Add {
                        ctid,
                        switch,
                        dhcp,
                        ipv6,
                        ipv6_gw,
                        ..
                    },
            } => {
                assert_eq!((ctid, switch), (101, 5));
                assert!(dhcp);
                assert_eq!((ipv6, ipv6_gw), (Some(3), Some(4)));
            }
            _ => panic!("expected network add"),
        }
    }

    #[test]
    fn test_gateway_requires_address() {
        assert!(
            Cli::try_parse_from(["rigging", "network", "add", "1", "--switch", "5", "--ipv4-gw", "2"])
                .is_err()
        );
    }

    #[test]
    fn test_object_kind_parses() {
        let cli = Cli::try_parse_from([
            "rigging", "object", "create", "web-ip", "--kind", "host", "10.0.0.5/24",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Object {
                action: ObjectAction::Create {
                    kind: ObjectKind::Host,
                    ..
                }
            }
        ));
    }
}
