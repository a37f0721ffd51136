//! Resource usage sampling
//!
//! Reads per-jail rctl(8) usage counters. Sampling never waits on a jail
//! that is being reconfigured: a busy jail is reported as skipped for this
//! cycle.

use crate::error::Result;
use crate::ident;
use crate::jail::types::Jail;
use crate::locks::JailLocks;
use serde::Serialize;
use std::process::Command;

/// Usage of one jail in a sampling cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JailUsage {
    pub ctid: u32,
    pub name: String,
    #[serde(flatten)]
    pub status: UsageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum UsageStatus {
    Active {
        memory_bytes: u64,
        pcpu: f64,
        processes: u64,
    },
    /// No rctl counters; the jail is not running
    Inactive,
    /// A mutation held the jail's lock
    Skipped,
}

/// Samples rctl usage for a set of jails
#[derive(Debug, Clone)]
pub struct UsageSampler {
    locks: JailLocks,
    token_length: usize,
}

impl UsageSampler {
    pub fn new(locks: JailLocks, token_length: usize) -> Self {
        Self {
            locks,
            token_length,
        }
    }

    /// Run one sampling cycle
    pub fn sample(&self, jails: &[Jail]) -> Result<Vec<JailUsage>> {
        let mut out = Vec::with_capacity(jails.len());

        for jail in jails {
            let token = ident::derive(u64::from(jail.ctid), self.token_length)?;
            let status = self
                .locks
                .try_lock(jail.ctid, || read_usage(&token))?
                .unwrap_or_else(|| {
                    tracing::debug!(ctid = jail.ctid, "jail busy, skipping usage sample");
                    UsageStatus::Skipped
                });

            out.push(JailUsage {
                ctid: jail.ctid,
                name: jail.name.clone(),
                status,
            });
        }

        Ok(out)
    }
}

fn read_usage(token: &str) -> UsageStatus {
    let subject = format!("jail:{}", token);
    let output = match Command::new("rctl").args(["-u", &subject]).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::debug!(
                subject = %subject,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "rctl reported no usage"
            );
            return UsageStatus::Inactive;
        }
        Err(e) => {
            tracing::debug!(subject = %subject, error = %e, "failed to run rctl");
            return UsageStatus::Inactive;
        }
    };

    parse_usage(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `rctl -u` output (`resource=value` per line)
fn parse_usage(output: &str) -> UsageStatus {
    let mut memory_bytes = None;
    let mut pcpu = None;
    let mut processes = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "memoryuse" => memory_bytes = value.parse().ok(),
            "pcpu" => pcpu = value.parse().ok(),
            "maxproc" => processes = value.parse().ok(),
            _ => {}
        }
    }

    match (memory_bytes, pcpu, processes) {
        (None, None, None) => UsageStatus::Inactive,
        (memory_bytes, pcpu, processes) => UsageStatus::Active {
            memory_bytes: memory_bytes.unwrap_or(0),
            pcpu: pcpu.unwrap_or(0.0),
            processes: processes.unwrap_or(0),
        },
    }
}
