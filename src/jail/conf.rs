//! Per-jail jail.conf(5) files
//!
//! Every jail owns one file, `<jails_dir>/<ctid>/<ctid>.conf`, holding a single
//! block. The base directives (path, hostname, devfs, rc hooks, rctl limits)
//! belong to jail creation; the network directives belong to the synthesizer.
//! This module recognizes the network subset so it can be stripped and
//! regenerated without touching anything else.

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Assignment operator of a jail.conf statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `key;`
    Flag,
    /// `key = value;`
    Assign,
    /// `key += value;`
    Append,
}

/// One `key [op value];` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement<'a> {
    pub key: &'a str,
    pub op: Op,
    /// Value with surrounding quotes removed
    pub value: Option<&'a str>,
}

impl<'a> Statement<'a> {
    /// Parse a single line
    ///
    /// Returns `None` for anything outside the statement grammar: block
    /// openers, closing braces, comments, blank lines.
    pub fn parse(line: &'a str) -> Option<Self> {
        let body = line.trim().strip_suffix(';')?.trim_end();
        if body.is_empty() {
            return None;
        }

        let (key, op, value) = match body.find('=') {
            Some(idx) => {
                let lhs = &body[..idx];
                let rhs = body[idx + 1..].trim();
                match lhs.trim_end().strip_suffix('+') {
                    Some(key) => (key.trim(), Op::Append, Some(unquote(rhs))),
                    None => (lhs.trim(), Op::Assign, Some(unquote(rhs))),
                }
            }
            None => (body, Op::Flag, None),
        };

        if key.is_empty() || !key.chars().all(is_key_char) {
            return None;
        }

        Some(Self { key, op, value })
    }

    /// Check whether this statement is owned by the network synthesizer
    pub fn is_network(&self) -> bool {
        match self.key {
            "vnet" | "vnet.interface" => true,
            k if k == "ip4" || k == "ip6" || k.starts_with("ip4.") || k.starts_with("ip6.") => {
                true
            }
            k if k.starts_with("exec.") => self.value.is_some_and(is_network_command),
            _ => false,
        }
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '$' | '-')
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Check whether a hook command configures jail networking
fn is_network_command(command: &str) -> bool {
    let words: Vec<&str> = command.split_whitespace().collect();

    if words.iter().any(|w| *w == "ifconfig" || *w == "dhclient") {
        return true;
    }

    if words
        .windows(3)
        .any(|w| w == ["route", "add", "default"])
    {
        return true;
    }

    words.windows(2).any(|w| {
        w[0] == "sysrc" && (w[1].starts_with("ifconfig_") || w[1].starts_with("ipv6"))
    })
}

/// Check whether a raw line is a network directive
pub fn is_network_line(line: &str) -> bool {
    Statement::parse(line).is_some_and(|s| s.is_network())
}

/// Remove every network directive, keeping all other lines in order
pub fn strip_network_directives(text: &str) -> String {
    text.split('\n')
        .filter(|line| !is_network_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Insert directives as tab-indented lines before the block's closing brace
///
/// Returns `None` when the text has no closing brace.
pub fn insert_before_closing_brace(text: &str, directives: &[String]) -> Option<String> {
    let mut lines: Vec<String> = text.split('\n').map(String::from).collect();
    let close = lines
        .iter()
        .rposition(|line| line.trim_start().starts_with('}'))?;

    let indented = directives.iter().map(|d| format!("\t{}", d));
    lines.splice(close..close, indented);

    Some(lines.join("\n"))
}

/// Collapse runs of blank lines into a single blank line
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = false;

    for line in text.split('\n') {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        out.push(line);
    }

    out.join("\n")
}

/// Root path of the jail (`path = "...";`)
pub fn jail_root(text: &str) -> Option<PathBuf> {
    text.lines()
        .filter_map(Statement::parse)
        .find(|s| s.key == "path" && s.op == Op::Assign)
        .and_then(|s| s.value)
        .map(PathBuf::from)
}

/// Remove interface and IPv6 rc variables from a jail's /etc/rc.conf
pub fn scrub_rc_conf(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.starts_with("ifconfig") && !line.starts_with("ipv6"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// rctl memory hook for a jail
pub fn memory_hook(token: &str, megabytes: u64) -> String {
    format!(
        "exec.poststart += \"rctl -a jail:{}:memoryuse:deny={}M\";",
        token, megabytes
    )
}

/// Replace the jail's rctl memory hook, or add one before the closing brace
pub fn set_memory_limit(text: &str, token: &str, megabytes: u64) -> Option<String> {
    let prefix = format!(
        "exec.poststart += \"rctl -a jail:{}:memoryuse:deny=",
        token
    );
    let hook = memory_hook(token, megabytes);

    let mut lines: Vec<String> = text.split('\n').map(String::from).collect();
    if let Some(line) = lines
        .iter_mut()
        .find(|line| line.trim_start().starts_with(&prefix))
    {
        *line = format!("\t{}", hook);
        return Some(lines.join("\n"));
    }

    insert_before_closing_brace(text, &[hook])
}

/// Turn a jail name into a valid hostname label
pub fn hostname_from_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.to_ascii_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let mut host = out.trim_matches('-').to_string();
    host.truncate(63);

    if host.is_empty() {
        "host".to_string()
    } else {
        host
    }
}

/// Options for a freshly created jail's base block
#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub token: String,
    pub root: PathBuf,
    pub hostname: String,
    pub memory_mb: Option<u64>,
}

impl BaseConfig {
    /// Render the base block
    ///
    /// The block is labelled with the token so that the running jail's name
    /// matches its `jail:<token>` rctl subject.
    pub fn render(&self) -> String {
        let token = &self.token;
        let mut config = String::new();

        config.push_str(&format!("{} {{\n", token));
        config.push_str(&format!("\t$ctid = \"{}\";\n", token));
        config.push_str(&format!("\tpath = \"{}\";\n", self.root.display()));
        config.push_str(&format!("\thost.hostname = \"{}\";\n", self.hostname));
        config.push_str("\tpersist;\n");
        config.push_str("\texec.clean;\n\n");

        config.push_str("\tmount.devfs;\n");
        config.push_str("\tdevfs_ruleset=\"8181\";\n\n");

        config.push_str("\tallow.sysvipc;\n");
        config.push_str("\tallow.reserved_ports;\n");
        config.push_str("\tallow.raw_sockets;\n");
        config.push_str("\tallow.socket_af;\n\n");

        config.push_str("\texec.start += \"/bin/sh /etc/rc\";\n");
        if let Some(mb) = self.memory_mb {
            config.push_str(&format!("\t{}\n", memory_hook(token, mb)));
        }
        config.push_str("\texec.stop += \"/bin/sh /etc/rc.shutdown\";\n");
        if self.memory_mb.is_some() {
            config.push_str(&format!("\texec.poststop += \"rctl -r jail:{}\";\n", token));
        }

        config.push_str("}\n");
        config
    }
}

/// Reads and writes jail.conf files
#[derive(Debug, Clone)]
pub struct JailConfFiles {
    jails_dir: PathBuf,
}

impl JailConfFiles {
    pub fn new(jails_dir: impl Into<PathBuf>) -> Self {
        Self {
            jails_dir: jails_dir.into(),
        }
    }

    /// Directory holding a jail's files
    pub fn jail_dir(&self, ctid: u32) -> PathBuf {
        self.jails_dir.join(ctid.to_string())
    }

    /// Path of a jail's config file
    pub fn path(&self, ctid: u32) -> PathBuf {
        self.jail_dir(ctid).join(format!("{}.conf", ctid))
    }

    pub fn exists(&self, ctid: u32) -> bool {
        self.path(ctid).is_file()
    }

    /// Read a jail's config
    pub fn read(&self, ctid: u32) -> Result<String> {
        let path = self.path(ctid);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ConfigNotFound(path.clone()),
            _ => Error::Read {
                path: path.clone(),
                source: e,
            },
        })
    }

    /// Replace a jail's config, creating its directory if needed
    pub fn write(&self, ctid: u32, text: &str) -> Result<()> {
        let dir = self.jail_dir(ctid);
        fs::create_dir_all(&dir).map_err(|e| Error::Write {
            path: dir.clone(),
            source: e,
        })?;

        write_atomic(&self.path(ctid), &collapse_blank_lines(text))
    }
}

/// Write a file through a uniquely named temporary sibling and rename
///
/// An existing file keeps its permissions. The temporary file is removed
/// if any step fails.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let write_err = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(meta.permissions())
            .map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
