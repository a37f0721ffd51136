//! Rigging - FreeBSD jail network synthesis
//!
//! Keeps the network section of every jail config in line with the jail's
//! recorded network intent: inherited host stack, isolated without
//! interfaces, or VNET with epairs plugged into switch bridges.

mod cli;
mod error;
mod ident;
mod jail;
mod locks;
mod manifest;
mod network;
mod store;
mod synthesizer;
mod usage;

use cli::{Cli, Commands, JailAction, NetworkAction, ObjectAction};
use error::{Error, ErrorContext, Result};
use jail::conf::JailConfFiles;
use jail::state::NetworkMode;
use jail::types::{AttachmentRequest, NetworkAttachment, ObjectId};
use locks::JailLocks;
use manifest::RiggingConfig;
use network::provisioner::HostProvisioner;
use store::{JailStore, JsonStore};
use synthesizer::NetworkSynthesizer;
use usage::{UsageSampler, UsageStatus};

type Synthesizer = NetworkSynthesizer<JsonStore, HostProvisioner>;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rigging=debug" } else { "rigging=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    // Commands that don't require config
    if let Commands::Completion { shell } = &cli.command {
        Cli::generate_completion(*shell);
        return Ok(());
    }

    init_tracing(cli.verbose);

    let config = manifest::load(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), switches = config.switches.len(), "loaded config");

    let synth = NetworkSynthesizer::new(
        JsonStore::in_dir(&config.config.data_dir),
        HostProvisioner::new(config.switches.clone()),
        JailConfFiles::new(&config.config.jails_dir),
        JailLocks::in_dir(&config.config.data_dir),
        config.config.token_length,
    );

    match cli.command {
        Commands::Jail { action } => jail_command(&synth, &config, action),
        Commands::Network { action } => network_command(&synth, action),
        Commands::Object { action } => object_command(&synth, action),
        Commands::Usage { json } => usage_command(&synth, &config, json),
        // Already handled above
        Commands::Completion { .. } => unreachable!(),
    }
}

fn check_ctid(config: &RiggingConfig, ctid: u32) -> Result<()> {
    if ctid == 0 || ctid > config.config.max_ctid {
        return Err(Error::validation(
            ErrorContext::jail(ctid),
            format!("ctid must be between 1 and {}", config.config.max_ctid),
        ));
    }
    Ok(())
}

fn jail_command(synth: &Synthesizer, config: &RiggingConfig, action: JailAction) -> Result<()> {
    match action {
        JailAction::Create {
            ctid,
            name,
            path,
            memory,
        } => {
            check_ctid(config, ctid)?;
            synth.create_jail(ctid, &name, &path, memory)?;
            println!(
                "Created jail {} ({}) at {}",
                ctid,
                name,
                synth.files().path(ctid).display()
            );
        }
        JailAction::Memory { ctid, megabytes } => {
            synth.set_memory_limit(ctid, megabytes)?;
            println!("Memory limit of jail {} set to {}M", ctid, megabytes);
        }
        JailAction::Show { ctid, json } => show_jail(synth, ctid, json)?,
    }
    Ok(())
}

fn show_jail(synth: &Synthesizer, ctid: u32, json: bool) -> Result<()> {
    let jail = synth.store().jail(ctid)?;
    let token = synth.token(ctid)?;
    let mode = NetworkMode::of(&jail);

    if json {
        let value = serde_json::json!({
            "ctid": jail.ctid,
            "name": jail.name,
            "token": token,
            "mode": mode.to_string(),
            "inherit_ipv4": jail.inherit_ipv4,
            "inherit_ipv6": jail.inherit_ipv6,
            "attachments": jail.attachments,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Jail {} ({})", jail.ctid, jail.name);
    println!("  Token:  {}", token);
    println!("  Config: {}", synth.files().path(ctid).display());
    println!("  Mode:   {}", mode);

    if !jail.attachments.is_empty() {
        println!();
        println!(
            "  {:<6} {:<8} {:<8} {:<16} {:<16}",
            "ID", "SWITCH", "MAC", "IPV4", "IPV6"
        );
        println!("  {}", "-".repeat(58));
        for a in &jail.attachments {
            println!(
                "  {:<6} {:<8} {:<8} {:<16} {:<16}",
                a.id,
                a.switch_id,
                object_ref(a.mac()),
                ipv4_summary(a),
                ipv6_summary(a)
            );
        }
    }
    Ok(())
}

fn object_ref(id: Option<ObjectId>) -> String {
    id.map(|id| format!("#{}", id)).unwrap_or_else(|| "-".into())
}

fn ipv4_summary(a: &NetworkAttachment) -> String {
    if a.dhcp {
        "dhcp".into()
    } else {
        format!("{} via {}", object_ref(a.ipv4), object_ref(a.ipv4_gateway))
    }
}

fn ipv6_summary(a: &NetworkAttachment) -> String {
    if a.slaac {
        "slaac".into()
    } else {
        format!("{} via {}", object_ref(a.ipv6), object_ref(a.ipv6_gateway))
    }
}

fn network_command(synth: &Synthesizer, action: NetworkAction) -> Result<()> {
    match action {
        NetworkAction::Inherit { ctid, ipv4, ipv6 } => {
            synth.inherit_network(ctid, ipv4, ipv6)?;
            println!("Jail {} now inherits the host network", ctid);
        }
        NetworkAction::Disinherit { ctid } => {
            synth.disinherit_network(ctid)?;
            println!("Jail {} network isolated", ctid);
        }
        NetworkAction::Add {
            ctid,
            switch,
            mac,
            ipv4,
            ipv4_gw,
            ipv6,
            ipv6_gw,
            dhcp,
            slaac,
        } => {
            let request = AttachmentRequest {
                switch_id: switch,
                mac,
                ipv4,
                ipv4_gateway: ipv4_gw,
                ipv6,
                ipv6_gateway: ipv6_gw,
                dhcp,
                slaac,
            };
            let attachment = synth.add_attachment(ctid, request)?;
            println!(
                "Attached jail {} to switch {} (attachment {})",
                ctid, switch, attachment.id
            );
        }
        NetworkAction::Delete { ctid, attachment } => {
            synth.delete_attachment(ctid, attachment)?;
            println!("Removed attachment {} from jail {}", attachment, ctid);
        }
        NetworkAction::Sync { ctid: Some(ctid) } => {
            synth.regenerate(ctid)?;
            println!("Synchronized jail {}", ctid);
        }
        NetworkAction::Sync { ctid: None } => {
            let count = synth.regenerate_all()?;
            println!("Synchronized {} jail(s)", count);
        }
    }
    Ok(())
}

fn object_command(synth: &Synthesizer, action: ObjectAction) -> Result<()> {
    match action {
        ObjectAction::Create { name, kind, values } => {
            let id = synth.store().create_object(&name, kind, values)?;
            println!("Created object {} ({})", id, name);
        }
        ObjectAction::List { json } => {
            let objects = synth.store().objects()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&objects)?);
                return Ok(());
            }

            println!("{:<6} {:<24} {:<8} VALUES", "ID", "NAME", "KIND");
            println!("{}", "-".repeat(60));
            for o in &objects {
                println!(
                    "{:<6} {:<24} {:<8} {}",
                    o.id,
                    o.name,
                    o.kind.to_string(),
                    o.values.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn usage_command(synth: &Synthesizer, config: &RiggingConfig, json: bool) -> Result<()> {
    let sampler = UsageSampler::new(synth.locks().clone(), config.config.token_length);
    let usage = sampler.sample(&synth.store().jails()?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
        return Ok(());
    }

    println!(
        "{:<8} {:<20} {:<10} {:>12} {:>8} {:>6}",
        "CTID", "NAME", "STATE", "MEMORY", "PCPU", "PROCS"
    );
    println!("{}", "-".repeat(69));
    for u in &usage {
        match &u.status {
            UsageStatus::Active {
                memory_bytes,
                pcpu,
                processes,
            } => println!(
                "{:<8} {:<20} {:<10} {:>11}M {:>7.1}% {:>6}",
                u.ctid,
                u.name,
                "active",
                memory_bytes / (1024 * 1024),
                pcpu,
                processes
            ),
            UsageStatus::Inactive => {
                println!("{:<8} {:<20} {:<10}", u.ctid, u.name, "inactive")
            }
            UsageStatus::Skipped => println!("{:<8} {:<20} {:<10}", u.ctid, u.name, "busy"),
        }
    }
    Ok(())
}
