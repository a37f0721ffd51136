//! Network synthesis for jails
//!
//! The synthesizer owns the network directive block of every jail config.
//! Each transition (inherit, disinherit, add or delete an attachment) runs
//! under the jail's lock and follows the same pipeline:
//!
//! 1. load the jail record and validate the request
//! 2. resolve every object reference into concrete addresses
//! 3. strip the old network directives and render the new block
//! 4. provision epairs and bridge membership on the host
//! 5. persist the config file, then the jail record
//!
//! Nothing is persisted until steps 1-4 have succeeded, so a failed
//! transition leaves the previous config and state in place.

use crate::error::{AddressField, Error, ErrorContext, Result};
use crate::ident;
use crate::jail::conf::{self, BaseConfig, JailConfFiles};
use crate::jail::state::NetworkMode;
use crate::jail::types::{AddressMode, AttachmentRequest, Jail, NetworkAttachment, nonzero};
use crate::locks::JailLocks;
use crate::network::epair;
use crate::network::ip::{
    parse_ipv4_assignment, parse_ipv4_gateway, parse_ipv6_assignment, parse_ipv6_gateway,
};
use crate::network::mac::MacAddr;
use crate::network::provisioner::Provisioner;
use crate::network::vnet::{self, Ipv4Plan, Ipv6Plan, ResolvedAttachment};
use crate::store::{GeneratedMac, JailStore, ObjectResolver};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Jail network synthesizer
pub struct NetworkSynthesizer<S, P> {
    store: S,
    provisioner: P,
    files: JailConfFiles,
    token_length: usize,
    locks: JailLocks,
}

impl<S, P> NetworkSynthesizer<S, P>
where
    S: JailStore + ObjectResolver,
    P: Provisioner,
{
    pub fn new(
        store: S,
        provisioner: P,
        files: JailConfFiles,
        locks: JailLocks,
        token_length: usize,
    ) -> Self {
        Self {
            store,
            provisioner,
            files,
            token_length,
            locks,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn files(&self) -> &JailConfFiles {
        &self.files
    }

    /// Locks shared with background samplers
    pub fn locks(&self) -> &JailLocks {
        &self.locks
    }

    pub fn token(&self, ctid: u32) -> Result<String> {
        ident::derive(u64::from(ctid), self.token_length)
    }

    /// Register a jail and write its base config
    ///
    /// The new jail starts isolated with no interfaces.
    pub fn create_jail(
        &self,
        ctid: u32,
        name: &str,
        root: &Path,
        memory_mb: Option<u64>,
    ) -> Result<Jail> {
        let ctx = ErrorContext::jail(ctid);
        if ctid == 0 {
            return Err(Error::validation(ctx, "ctid must be non-zero"));
        }
        if name.trim().is_empty() {
            return Err(Error::validation(ctx, "jail name must not be empty"));
        }
        if memory_mb == Some(0) {
            return Err(Error::validation(ctx, "memory limit must be at least 1MB"));
        }

        self.locks.lock(ctid, || -> Result<Jail> {
            let jails = self.store.jails()?;
            if jails.iter().any(|j| j.ctid == ctid) {
                return Err(Error::validation(ctx, "jail already exists"));
            }
            if jails.iter().any(|j| j.name == name) {
                return Err(Error::validation(
                    ctx,
                    format!("jail name '{}' already in use", name),
                ));
            }
            if self.files.exists(ctid) {
                return Err(Error::validation(
                    ctx,
                    format!("config already exists at {}", self.files.path(ctid).display()),
                ));
            }

            let token = self.token(ctid)?;
            let base = BaseConfig {
                token: token.clone(),
                root: root.to_path_buf(),
                hostname: conf::hostname_from_name(name),
                memory_mb,
            }
            .render();

            let jail = Jail::new(ctid, name);
            let directives = vnet::render(NetworkMode::of(&jail), &[]);
            let text = conf::insert_before_closing_brace(&base, &directives)
                .ok_or_else(|| Error::InvalidConfigFormat(self.files.path(ctid)))?;

            self.files.write(ctid, &text)?;
            self.store.insert_jail(jail.clone())?;

            tracing::info!(ctid, token = %token, name, "created jail");
            Ok(jail)
        })
    }

    /// Replace the jail's rctl memory limit
    ///
    /// The limit is also applied to the running jail when there is one.
    pub fn set_memory_limit(&self, ctid: u32, megabytes: u64) -> Result<()> {
        if megabytes == 0 {
            return Err(Error::validation(
                ErrorContext::jail(ctid),
                "memory limit must be at least 1MB",
            ));
        }

        self.locks.lock(ctid, || -> Result<()> {
            self.store.jail(ctid)?;
            let token = self.token(ctid)?;
            let text = self.files.read(ctid)?;
            let updated = conf::set_memory_limit(&text, &token, megabytes)
                .ok_or_else(|| Error::InvalidConfigFormat(self.files.path(ctid)))?;
            self.files.write(ctid, &updated)?;

            apply_live_memory_limit(&token, megabytes);
            tracing::info!(ctid, megabytes, "updated memory limit");
            Ok(())
        })
    }

    /// Switch a jail to the host's network stack
    ///
    /// Every attachment is torn down along with its epair.
    pub fn inherit_network(&self, ctid: u32, ipv4: bool, ipv6: bool) -> Result<()> {
        if !ipv4 && !ipv6 {
            return Err(Error::validation(
                ErrorContext::jail(ctid),
                "inherit needs at least one of ipv4 or ipv6",
            ));
        }

        self.locks.lock(ctid, || -> Result<()> {
            let jail = self.store.jail(ctid)?;
            let token = self.token(ctid)?;
            let mode = NetworkMode::Inherited { ipv4, ipv6 };
            let text = self.render_config(ctid, mode, &[])?;

            for attachment in &jail.attachments {
                self.provisioner
                    .delete_epair(&ident::epair_base(&token, attachment.switch_id))?;
            }

            self.files.write(ctid, &text)?;
            self.scrub_rc_conf(ctid, &text);

            self.store.set_inherited(ctid, ipv4, ipv6)?;

            tracing::info!(
                ctid,
                ipv4,
                ipv6,
                removed = jail.attachments.len(),
                "jail now inherits host network"
            );
            Ok(())
        })
    }

    /// Give a jail its own network stack again
    pub fn disinherit_network(&self, ctid: u32) -> Result<()> {
        self.locks.lock(ctid, || -> Result<()> {
            let mut jail = self.store.jail(ctid)?;
            jail.inherit_ipv4 = false;
            jail.inherit_ipv6 = false;

            let mode = NetworkMode::of(&jail);
            let resolved = self.resolve_all(&jail)?;
            let text = self.render_config(ctid, mode, &resolved)?;
            self.provision(&resolved)?;

            self.files.write(ctid, &text)?;
            self.store.set_inherited(ctid, false, false)?;

            tracing::info!(ctid, mode = %mode, "jail network isolated");
            Ok(())
        })
    }

    /// Attach a jail to a switch
    pub fn add_attachment(&self, ctid: u32, request: AttachmentRequest) -> Result<NetworkAttachment> {
        self.locks.lock(ctid, || -> Result<NetworkAttachment> {
            let jail = self.store.jail(ctid)?;
            let switch_id = request.switch_id;
            let ctx = ErrorContext::jail(ctid).switch(switch_id);

            if jail.inherits() {
                return Err(Error::StateConflict {
                    ctid,
                    message: "jail inherits the host network; disinherit before adding interfaces"
                        .to_string(),
                });
            }
            if switch_id == 0 {
                return Err(Error::validation(ctx, "switch id must be non-zero"));
            }
            if jail.uses_switch(switch_id) {
                return Err(Error::validation(ctx, "jail is already attached to this switch"));
            }
            let switch = self.provisioner.switch(switch_id)?;

            // Id 0 marks the candidate until the store assigns one
            let candidate = request.clone().into_attachment(0, request.mac);
            validate_addressing(&candidate, ctx)?;
            self.check_unused(&candidate, ctx)?;

            let generated = match candidate.mac() {
                Some(_) => None,
                None => Some(GeneratedMac {
                    name: self.mac_object_name(&jail.name, &switch.name)?,
                    mac: MacAddr::random_local(),
                }),
            };

            let token = self.token(ctid)?;
            let mut resolved = self.resolve_all(&jail)?;
            let mut new = self.resolve(ctid, &token, &candidate)?;
            if let Some(generated) = &generated {
                new.mac = Some(generated.mac);
            }
            resolved.push(new);

            let text = self.render_config(ctid, NetworkMode::IsolatedActive, &resolved)?;
            self.provision(&resolved)?;

            self.files.write(ctid, &text)?;
            let attachment = self
                .store
                .insert_attachment(ctid, request, generated.clone())?;
            if let Some(generated) = &generated {
                tracing::info!(
                    ctid,
                    switch_id,
                    object = %generated.name,
                    mac = %generated.mac,
                    "generated MAC"
                );
            }

            tracing::info!(ctid, switch_id, attachment = attachment.id, "attached jail to switch");
            Ok(attachment)
        })
    }

    /// Detach a jail from a switch and destroy the epair
    pub fn delete_attachment(&self, ctid: u32, attachment_id: u32) -> Result<()> {
        self.locks.lock(ctid, || -> Result<()> {
            let mut jail = self.store.jail(ctid)?;
            if jail.inherits() {
                return Err(Error::StateConflict {
                    ctid,
                    message: "jail inherits the host network and has no interfaces".to_string(),
                });
            }
            let removed = jail
                .attachment(attachment_id)
                .cloned()
                .ok_or(Error::AttachmentNotFound {
                    ctid,
                    attachment_id,
                })?;
            jail.attachments.retain(|a| a.id != attachment_id);

            let token = self.token(ctid)?;
            let mode = NetworkMode::of(&jail);
            let resolved = self.resolve_all(&jail)?;
            let text = self.render_config(ctid, mode, &resolved)?;
            self.provision(&resolved)?;
            self.provisioner
                .delete_epair(&ident::epair_base(&token, removed.switch_id))?;

            self.files.write(ctid, &text)?;
            self.store.remove_attachment(ctid, attachment_id)?;

            tracing::info!(
                ctid,
                switch_id = removed.switch_id,
                attachment = attachment_id,
                "detached jail from switch"
            );
            Ok(())
        })
    }

    /// Rebuild a jail's network directives from its stored state
    pub fn regenerate(&self, ctid: u32) -> Result<()> {
        self.locks.lock(ctid, || -> Result<()> {
            let jail = self.store.jail(ctid)?;
            let mode = NetworkMode::of(&jail);
            let resolved = self.resolve_all(&jail)?;
            let text = self.render_config(ctid, mode, &resolved)?;
            self.provision(&resolved)?;

            self.files.write(ctid, &text)?;

            tracing::debug!(ctid, mode = %mode, "regenerated network directives");
            Ok(())
        })
    }

    /// Regenerate every jail, returning how many were processed
    pub fn regenerate_all(&self) -> Result<usize> {
        let jails = self.store.jails()?;
        for jail in &jails {
            self.regenerate(jail.ctid)?;
        }
        Ok(jails.len())
    }

    /// Read the jail's config and swap in a fresh network block
    fn render_config(
        &self,
        ctid: u32,
        mode: NetworkMode,
        resolved: &[ResolvedAttachment],
    ) -> Result<String> {
        let current = self.files.read(ctid)?;
        let stripped = conf::strip_network_directives(&current);
        let directives = vnet::render(mode, resolved);
        conf::insert_before_closing_brace(&stripped, &directives)
            .ok_or_else(|| Error::InvalidConfigFormat(self.files.path(ctid)))
    }

    fn resolve_all(&self, jail: &Jail) -> Result<Vec<ResolvedAttachment>> {
        if jail.inherits() {
            return Ok(Vec::new());
        }
        let token = self.token(jail.ctid)?;
        jail.attachments
            .iter()
            .map(|a| self.resolve(jail.ctid, &token, a))
            .collect()
    }

    fn resolve(
        &self,
        ctid: u32,
        token: &str,
        attachment: &NetworkAttachment,
    ) -> Result<ResolvedAttachment> {
        let ctx = ErrorContext::jail(ctid).switch(attachment.switch_id);
        let wrap = |field: Option<AddressField>| {
            move |source: Error| Error::Resolution {
                context: match field {
                    Some(field) => ctx.field(field),
                    None => ctx,
                },
                source: Box::new(source),
            }
        };

        let bridge = self
            .provisioner
            .bridge_name(attachment.switch_id)
            .map_err(wrap(None))?;

        let mac = attachment
            .mac()
            .map(|id| {
                self.store
                    .resolve_value(id)
                    .and_then(|v| v.parse::<MacAddr>())
                    .and_then(|mac| {
                        if mac.is_multicast() {
                            Err(Error::InvalidValue(format!(
                                "multicast MAC {} cannot be assigned to an interface",
                                mac
                            )))
                        } else {
                            Ok(mac)
                        }
                    })
                    .map_err(wrap(Some(AddressField::Mac)))
            })
            .transpose()?;

        let ipv4 = match attachment.ipv4_mode() {
            AddressMode::Dynamic => Ipv4Plan::Dhcp,
            AddressMode::Static { address, gateway } => Ipv4Plan::Static {
                assignment: self
                    .store
                    .resolve_value(address)
                    .and_then(|v| parse_ipv4_assignment(&v))
                    .map_err(wrap(Some(AddressField::Ipv4)))?,
                gateway: self
                    .store
                    .resolve_value(gateway)
                    .and_then(|v| parse_ipv4_gateway(&v))
                    .map_err(wrap(Some(AddressField::Ipv4Gateway)))?,
            },
            AddressMode::Unconfigured => Ipv4Plan::None,
        };

        let ipv6 = match attachment.ipv6_mode() {
            AddressMode::Dynamic => Ipv6Plan::Slaac,
            AddressMode::Static { address, gateway } => Ipv6Plan::Static {
                network: self
                    .store
                    .resolve_value(address)
                    .and_then(|v| parse_ipv6_assignment(&v))
                    .map_err(wrap(Some(AddressField::Ipv6)))?,
                gateway: self
                    .store
                    .resolve_value(gateway)
                    .and_then(|v| parse_ipv6_gateway(&v))
                    .map_err(wrap(Some(AddressField::Ipv6Gateway)))?,
            },
            AddressMode::Unconfigured => Ipv6Plan::None,
        };

        Ok(ResolvedAttachment {
            base: ident::epair_base(token, attachment.switch_id),
            switch_id: attachment.switch_id,
            mac,
            bridge,
            ipv4,
            ipv6,
        })
    }

    /// Ensure every epair exists and MAC-bearing host legs sit on their bridge
    fn provision(&self, resolved: &[ResolvedAttachment]) -> Result<()> {
        let bases: Vec<String> = resolved.iter().map(|a| a.base.clone()).collect();
        self.provisioner.ensure_epairs(&bases)?;

        for attachment in resolved.iter().filter(|a| a.mac.is_some()) {
            self.provisioner
                .ensure_bridge_member(&attachment.bridge, &epair::host_side(&attachment.base))?;
        }
        Ok(())
    }

    /// Reject MAC and address objects already used by another attachment
    fn check_unused(&self, candidate: &NetworkAttachment, ctx: ErrorContext) -> Result<()> {
        let mut refs = vec![(AddressField::Mac, candidate.mac())];
        if let AddressMode::Static { address, .. } = candidate.ipv4_mode() {
            refs.push((AddressField::Ipv4, Some(address)));
        }
        if let AddressMode::Static { address, .. } = candidate.ipv6_mode() {
            refs.push((AddressField::Ipv6, Some(address)));
        }

        for (field, id) in refs {
            let Some(id) = id else { continue };
            let used = self.store.is_object_in_use(id).map_err(|e| Error::Resolution {
                context: ctx.field(field),
                source: Box::new(e),
            })?;
            if used {
                return Err(Error::validation(
                    ctx.field(field),
                    format!("object {} is already in use", id),
                ));
            }
        }
        Ok(())
    }

    /// Name for a generated MAC object: `<jail>-<switch>`, then `-1`, `-2`, ...
    fn mac_object_name(&self, jail: &str, switch: &str) -> Result<String> {
        let base = format!("{}-{}", jail, switch);
        if !self.store.object_name_exists(&base)? {
            return Ok(base);
        }

        let mut n = 1u32;
        loop {
            let name = format!("{}-{}", base, n);
            if !self.store.object_name_exists(&name)? {
                return Ok(name);
            }
            n += 1;
        }
    }

    /// Drop interface lines from the jail's rc.conf after entering inherit mode
    ///
    /// Failures are logged; the config change has already been persisted.
    fn scrub_rc_conf(&self, ctid: u32, config: &str) {
        let Some(root) = conf::jail_root(config) else {
            tracing::debug!(ctid, "no jail root in config, skipping rc.conf scrub");
            return;
        };

        let path = root.join("etc").join("rc.conf");
        if !path.is_file() {
            return;
        }

        let result = fs::read_to_string(&path)
            .map_err(|e| Error::Read {
                path: path.clone(),
                source: e,
            })
            .and_then(|text| conf::write_atomic(&path, &conf::scrub_rc_conf(&text)));

        if let Err(e) = result {
            tracing::warn!(ctid, path = %path.display(), error = %e, "failed to scrub rc.conf");
        }
    }
}

/// Each protocol needs DHCP/SLAAC or a complete static pair
fn validate_addressing(candidate: &NetworkAttachment, ctx: ErrorContext) -> Result<()> {
    if !candidate.dhcp {
        if nonzero(candidate.ipv4).is_none() {
            return Err(Error::validation(
                ctx.field(AddressField::Ipv4),
                "an IPv4 address is required without DHCP",
            ));
        }
        if nonzero(candidate.ipv4_gateway).is_none() {
            return Err(Error::validation(
                ctx.field(AddressField::Ipv4Gateway),
                "an IPv4 gateway is required without DHCP",
            ));
        }
    }

    if !candidate.slaac {
        if nonzero(candidate.ipv6).is_none() {
            return Err(Error::validation(
                ctx.field(AddressField::Ipv6),
                "an IPv6 address is required without SLAAC",
            ));
        }
        if nonzero(candidate.ipv6_gateway).is_none() {
            return Err(Error::validation(
                ctx.field(AddressField::Ipv6Gateway),
                "an IPv6 gateway is required without SLAAC",
            ));
        }
    }

    Ok(())
}

/// Apply a memory limit to a running jail with rctl(8)
fn apply_live_memory_limit(token: &str, megabytes: u64) {
    let rule = format!("jail:{}:memoryuse:deny={}M", token, megabytes);
    match Command::new("rctl").args(["-a", &rule]).output() {
        Ok(output) if output.status.success() => {
            tracing::debug!(rule = %rule, "applied rctl rule");
        }
        Ok(output) => tracing::warn!(
            rule = %rule,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "rctl rejected rule; it takes effect on next start"
        ),
        Err(e) => tracing::warn!(rule = %rule, error = %e, "failed to run rctl"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::jail::types::ObjectId;
    use crate::network::provisioner::Switch;
    use crate::store::{JsonStore, ObjectKind};
    use crate::usage::{UsageSampler, UsageStatus};
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeProvisioner {
        switches: Vec<Switch>,
        calls: RefCell<Vec<String>>,
        fail_ensure: Cell<bool>,
    }

    impl FakeProvisioner {
        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Provisioner for FakeProvisioner {
        fn ensure_epairs(&self, bases: &[String]) -> Result<()> {
            if self.fail_ensure.get() {
                return Err(Error::CommandFailed {
                    command: "ifconfig epair create".into(),
                    message: "no epair".into(),
                });
            }
            self.calls
                .borrow_mut()
                .push(format!("ensure {}", bases.join(",")));
            Ok(())
        }

        fn delete_epair(&self, base: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("delete {}", base));
            Ok(())
        }

        fn switch(&self, id: u32) -> Result<Switch> {
            self.switches
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or(Error::SwitchNotFound(id))
        }

        fn ensure_bridge_member(&self, bridge: &str, interface: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("member {} {}", bridge, interface));
            Ok(())
        }
    }

    /// JSON store whose attachment inserts always fail
    struct RejectingInserts(JsonStore);

    impl JailStore for RejectingInserts {
        fn jail(&self, ctid: u32) -> Result<Jail> {
            self.0.jail(ctid)
        }

        fn jails(&self) -> Result<Vec<Jail>> {
            self.0.jails()
        }

        fn insert_jail(&self, jail: Jail) -> Result<()> {
            self.0.insert_jail(jail)
        }

        fn set_inherited(&self, ctid: u32, ipv4: bool, ipv6: bool) -> Result<()> {
            self.0.set_inherited(ctid, ipv4, ipv6)
        }

        fn insert_attachment(
            &self,
            _ctid: u32,
            _request: AttachmentRequest,
            _generated: Option<GeneratedMac>,
        ) -> Result<NetworkAttachment> {
            Err(Error::Write {
                path: PathBuf::from("state.json"),
                source: std::io::Error::other("no space left on device"),
            })
        }

        fn remove_attachment(&self, ctid: u32, attachment_id: u32) -> Result<()> {
            self.0.remove_attachment(ctid, attachment_id)
        }
    }

    impl ObjectResolver for RejectingInserts {
        fn resolve_value(&self, id: ObjectId) -> Result<String> {
            self.0.resolve_value(id)
        }

        fn is_object_in_use(&self, id: ObjectId) -> Result<bool> {
            self.0.is_object_in_use(id)
        }

        fn object_name_exists(&self, name: &str) -> Result<bool> {
            self.0.object_name_exists(name)
        }
    }

    struct Fixture {
        dir: TempDir,
        synth: NetworkSynthesizer<JsonStore, FakeProvisioner>,
    }

    fn provisioner() -> FakeProvisioner {
        FakeProvisioner {
            switches: vec![
                Switch {
                    id: 5,
                    name: "lan".into(),
                    bridge: "bridge0".into(),
                },
                Switch {
                    id: 7,
                    name: "dmz".into(),
                    bridge: "bridge1".into(),
                },
            ],
            ..Default::default()
        }
    }

    /// A synthesizer over `dir`, built the way `main` builds one per invocation
    fn synthesizer<S>(dir: &Path, store: S) -> NetworkSynthesizer<S, FakeProvisioner>
    where
        S: JailStore + ObjectResolver,
    {
        NetworkSynthesizer::new(
            store,
            provisioner(),
            JailConfFiles::new(dir.join("jails")),
            JailLocks::in_dir(&dir.join("db")),
            5,
        )
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let synth = synthesizer(dir.path(), JsonStore::in_dir(&dir.path().join("db")));
            Self { dir, synth }
        }

        /// A second, independent synthesizer over the same directories
        fn another(&self) -> NetworkSynthesizer<JsonStore, FakeProvisioner> {
            synthesizer(self.dir.path(), JsonStore::in_dir(&self.dir.path().join("db")))
        }

        fn root(&self) -> PathBuf {
            self.dir.path().join("root")
        }

        fn jail(&self, ctid: u32, name: &str) {
            self.synth
                .create_jail(ctid, name, &self.root(), Some(512))
                .unwrap();
        }

        fn object(&self, name: &str, value: &str) -> u32 {
            self.synth
                .store()
                .create_object(name, ObjectKind::Host, vec![value.into()])
                .unwrap()
        }

        fn config(&self, ctid: u32) -> String {
            self.synth.files().read(ctid).unwrap()
        }

        fn network_lines(&self, ctid: u32) -> Vec<String> {
            self.config(ctid)
                .lines()
                .filter(|l| conf::is_network_line(l))
                .map(|l| l.trim().to_string())
                .collect()
        }

        fn token(&self, ctid: u32) -> String {
            self.synth.token(ctid).unwrap()
        }
    }

    #[test]
    fn test_new_jail_is_isolated_empty() {
        let f = Fixture::new();
        f.jail(101, "web");

        assert_eq!(f.network_lines(101), vec!["ip4=disable;", "ip6=disable;"]);
        let config = f.config(101);
        let token = f.token(101);
        assert!(config.starts_with(&format!("{} {{", token)));
        assert!(config.contains(&format!("rctl -a jail:{}:memoryuse:deny=512M", token)));
        assert!(f.synth.create_jail(101, "again", &f.root(), None).is_err());
    }

    #[test]
    fn test_dhcp_slaac_attachment() {
        let f = Fixture::new();
        f.jail(101, "web");
        let token = f.token(101);
        assert_eq!(token, ident::derive(101, 5).unwrap());

        let attachment = f
            .synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap();
        assert!(attachment.mac.is_some());

        let lines = f.network_lines(101);
        let base = format!("{}_5", token);
        for expected in [
            "vnet;".to_string(),
            format!(r#"vnet.interface += "{}b";"#, base),
            format!(r#"exec.start += "dhclient {}b";"#, base),
            format!(r#"exec.start += "sysrc ifconfig_{}b=\"DHCP\"";"#, base),
            format!(r#"exec.start += "sysrc ifconfig_{}b_ipv6=\"inet6 accept_rtadv\"";"#, base),
        ] {
            assert!(lines.contains(&expected), "missing {}", expected);
        }
        assert!(!lines.iter().any(|l| l.contains("disable")));

        assert!(f.synth.store().object_name_exists("web-lan").unwrap());
        assert_eq!(
            f.synth.provisioner().calls(),
            vec![
                format!("ensure {}", base),
                format!("member bridge0 {}a", base),
            ]
        );
    }

    #[test]
    fn test_generated_mac_name_gets_suffix() {
        let f = Fixture::new();
        f.jail(1, "web");
        f.jail(2, "other");
        f.synth
            .store()
            .create_object("web-lan", ObjectKind::Mac, vec!["02:00:00:00:00:01".into()])
            .unwrap();
        f.synth
            .store()
            .create_object("web-lan-1", ObjectKind::Mac, vec!["02:00:00:00:00:02".into()])
            .unwrap();

        f.synth
            .add_attachment(1, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap();
        assert!(f.synth.store().object_name_exists("web-lan-2").unwrap());
    }

    #[test]
    fn test_duplicate_switch_rejected_without_changes() {
        let f = Fixture::new();
        f.jail(101, "web");
        f.synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap();
        let config = f.config(101);
        let jail = f.synth.store().jail(101).unwrap();

        let err = f
            .synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.config(101), config);
        assert_eq!(f.synth.store().jail(101).unwrap(), jail);
    }

    #[test]
    fn test_single_default_route() {
        let f = Fixture::new();
        f.jail(101, "web");
        let ip_a = f.object("a-ip", "10.0.0.5/24");
        let gw_a = f.object("a-gw", "10.0.0.1");
        let ip_b = f.object("b-ip", "10.1.0.5/16");
        let gw_b = f.object("b-gw", "10.1.0.1");

        f.synth
            .add_attachment(101, AttachmentRequest::new(5).ipv4(ip_a, gw_a).slaac())
            .unwrap();
        f.synth
            .add_attachment(101, AttachmentRequest::new(7).ipv4(ip_b, gw_b).slaac())
            .unwrap();

        let lines = f.network_lines(101);
        let routes: Vec<&String> = lines
            .iter()
            .filter(|l| l.contains("route add default"))
            .collect();
        assert_eq!(routes, vec![r#"exec.start += "route add default 10.0.0.1";"#]);

        let token = f.token(101);
        assert!(lines.contains(&format!(
            r#"exec.start += "ifconfig {}_7b inet 10.1.0.5 netmask 255.255.0.0";"#,
            token
        )));
    }

    #[test]
    fn test_missing_static_pair() {
        let f = Fixture::new();
        f.jail(101, "web");
        let ip = f.object("ip", "10.0.0.5/24");

        let mut request = AttachmentRequest::new(5).slaac();
        request.ipv4 = Some(ip);
        let err = f.synth.add_attachment(101, request).unwrap_err();
        match err {
            Error::Validation { context, .. } => {
                assert_eq!(context.switch_id, Some(5));
                assert_eq!(context.field, Some(AddressField::Ipv4Gateway));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unresolvable_gateway_leaves_state_untouched() {
        let f = Fixture::new();
        f.jail(101, "web");
        let ip = f.object("ip", "10.0.0.5/24");
        let gw = f.object("gw", "not-an-address");
        let config = f.config(101);

        let err = f
            .synth
            .add_attachment(101, AttachmentRequest::new(5).ipv4(ip, gw).slaac())
            .unwrap_err();
        match &err {
            Error::Resolution { context, .. } => {
                assert_eq!(*context, ErrorContext::jail(101).switch(5).field(AddressField::Ipv4Gateway));
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(f.config(101), config);
        assert!(f.synth.store().jail(101).unwrap().attachments.is_empty());
        assert!(!f.synth.store().object_name_exists("web-lan").unwrap());
        assert!(f.synth.provisioner().calls().is_empty());
    }

    #[test]
    fn test_provisioning_failure_creates_nothing() {
        let f = Fixture::new();
        f.jail(101, "web");
        let config = f.config(101);
        f.synth.provisioner().fail_ensure.set(true);

        let err = f
            .synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalCommand);
        assert_eq!(f.config(101), config);
        assert!(!f.synth.store().object_name_exists("web-lan").unwrap());
    }

    #[test]
    fn test_object_in_use_rejected() {
        let f = Fixture::new();
        f.jail(1, "web");
        f.jail(2, "db");
        let mac = f
            .synth
            .store()
            .create_object("shared", ObjectKind::Mac, vec!["02:00:00:00:00:10".into()])
            .unwrap();

        f.synth
            .add_attachment(1, AttachmentRequest::new(5).mac(mac).dhcp().slaac())
            .unwrap();
        let err = f
            .synth
            .add_attachment(2, AttachmentRequest::new(5).mac(mac).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_multicast_mac_rejected() {
        let f = Fixture::new();
        f.jail(1, "web");
        let mac = f
            .synth
            .store()
            .create_object("mcast", ObjectKind::Mac, vec!["01:00:5e:00:00:01".into()])
            .unwrap();

        let err = f
            .synth
            .add_attachment(1, AttachmentRequest::new(5).mac(mac).dhcp().slaac())
            .unwrap_err();
        match err {
            Error::Resolution { context, .. } => {
                assert_eq!(context.field, Some(AddressField::Mac));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_and_zero_switch() {
        let f = Fixture::new();
        f.jail(1, "web");

        let err = f
            .synth
            .add_attachment(1, AttachmentRequest::new(0).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .synth
            .add_attachment(1, AttachmentRequest::new(42).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_inherit_removes_attachments() {
        let f = Fixture::new();
        f.jail(101, "web");
        let token = f.token(101);
        f.synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap();
        f.synth
            .add_attachment(101, AttachmentRequest::new(7).dhcp().slaac())
            .unwrap();

        f.synth.inherit_network(101, true, false).unwrap();

        let jail = f.synth.store().jail(101).unwrap();
        assert!(jail.attachments.is_empty());
        assert!(jail.inherit_ipv4);
        assert!(!jail.inherit_ipv6);
        assert_eq!(f.network_lines(101), vec!["ip4=inherit;"]);

        let calls = f.synth.provisioner().calls();
        assert!(calls.contains(&format!("delete {}_5", token)));
        assert!(calls.contains(&format!("delete {}_7", token)));

        let err = f
            .synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn test_inherit_requires_a_protocol() {
        let f = Fixture::new();
        f.jail(1, "web");
        let err = f.synth.inherit_network(1, false, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_rc_conf_scrubbed_only_entering_inherit() {
        let f = Fixture::new();
        f.jail(1, "web");
        let etc = f.root().join("etc");
        fs::create_dir_all(&etc).unwrap();
        let rc = etc.join("rc.conf");
        let original = "hostname=\"web\"\nifconfig_abc_5b=\"DHCP\"\nipv6_defaultrouter=\"fe80::1\"\nsshd_enable=\"YES\"";
        fs::write(&rc, original).unwrap();

        f.synth.disinherit_network(1).unwrap();
        assert_eq!(fs::read_to_string(&rc).unwrap(), original);

        f.synth.inherit_network(1, true, true).unwrap();
        assert_eq!(
            fs::read_to_string(&rc).unwrap(),
            "hostname=\"web\"\nsshd_enable=\"YES\""
        );

        let restored = "ifconfig_abc_5b=\"DHCP\"";
        fs::write(&rc, restored).unwrap();
        f.synth.regenerate(1).unwrap();
        assert_eq!(fs::read_to_string(&rc).unwrap(), restored);

        f.synth.disinherit_network(1).unwrap();
        assert_eq!(fs::read_to_string(&rc).unwrap(), restored);
        assert_eq!(f.network_lines(1), vec!["ip4=disable;", "ip6=disable;"]);
    }

    #[test]
    fn test_regenerate_is_idempotent() {
        let f = Fixture::new();
        f.jail(101, "web");
        let ip = f.object("ip", "10.0.0.5/24");
        let gw = f.object("gw", "10.0.0.1");
        let ip6 = f.object("ip6", "2001:db8::5");
        let gw6 = f.object("gw6", "2001:db8::1");
        f.synth
            .add_attachment(101, AttachmentRequest::new(5).ipv4(ip, gw).ipv6(ip6, gw6))
            .unwrap();

        f.synth.regenerate(101).unwrap();
        let first = f.config(101);
        f.synth.regenerate(101).unwrap();
        assert_eq!(f.config(101), first);
        assert_eq!(f.synth.regenerate_all().unwrap(), 1);
        assert_eq!(f.config(101), first);
    }

    #[test]
    fn test_delete_attachment() {
        let f = Fixture::new();
        f.jail(101, "web");
        let token = f.token(101);
        let a = f
            .synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap();
        let b = f
            .synth
            .add_attachment(101, AttachmentRequest::new(7).dhcp().slaac())
            .unwrap();

        f.synth.delete_attachment(101, a.id).unwrap();
        let lines = f.network_lines(101);
        assert!(lines.contains(&format!(r#"vnet.interface += "{}_7b";"#, token)));
        assert!(!lines.iter().any(|l| l.contains(&format!("{}_5", token))));
        assert!(f.synth.provisioner().calls().contains(&format!("delete {}_5", token)));

        f.synth.delete_attachment(101, b.id).unwrap();
        assert_eq!(f.network_lines(101), vec!["ip4=disable;", "ip6=disable;"]);

        let err = f.synth.delete_attachment(101, b.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_base_lines_survive_transitions() {
        let f = Fixture::new();
        f.jail(101, "web");
        let before: Vec<String> = f
            .config(101)
            .lines()
            .filter(|l| !conf::is_network_line(l))
            .map(String::from)
            .collect();

        f.synth
            .add_attachment(101, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap();
        f.synth.inherit_network(101, false, true).unwrap();
        f.synth.disinherit_network(101).unwrap();

        let after: Vec<String> = f
            .config(101)
            .lines()
            .filter(|l| !conf::is_network_line(l))
            .map(String::from)
            .collect();
        assert_eq!(after, before);
    }

    #[test]
    fn test_delete_on_inherited_jail_conflicts() {
        let f = Fixture::new();
        f.jail(1, "web");
        f.synth.inherit_network(1, true, false).unwrap();

        let err = f.synth.delete_attachment(1, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(f.network_lines(1), vec!["ip4=inherit;"]);
    }

    #[test]
    fn test_jail_lock_visible_to_another_synthesizer() {
        let f = Fixture::new();
        f.jail(1, "web");
        let other = f.another();
        let sampler = UsageSampler::new(other.locks().clone(), 5);
        let jails = other.store().jails().unwrap();

        let usage = f.synth.locks().lock(1, || sampler.sample(&jails)).unwrap();
        assert_eq!(usage[0].status, UsageStatus::Skipped);

        let busy = f
            .synth
            .locks()
            .lock(1, || other.locks().try_lock(1, || ()))
            .unwrap();
        assert_eq!(busy, None);
    }

    #[test]
    fn test_failed_store_write_leaves_no_mac_object() {
        let dir = TempDir::new().unwrap();
        let synth = synthesizer(
            dir.path(),
            RejectingInserts(JsonStore::in_dir(&dir.path().join("db"))),
        );
        synth
            .create_jail(1, "web", &dir.path().join("root"), None)
            .unwrap();

        let err = synth
            .add_attachment(1, AttachmentRequest::new(5).dhcp().slaac())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let store = &synth.store().0;
        assert!(store.objects().unwrap().is_empty());
        assert!(store.jail(1).unwrap().attachments.is_empty());
    }

    #[test]
    fn test_set_memory_limit() {
        let f = Fixture::new();
        f.jail(101, "web");
        let token = f.token(101);

        f.synth.set_memory_limit(101, 2048).unwrap();
        let config = f.config(101);
        assert!(config.contains(&format!("rctl -a jail:{}:memoryuse:deny=2048M", token)));
        assert!(!config.contains("deny=512M"));
        assert!(f.synth.set_memory_limit(101, 0).is_err());
        assert!(f.synth.set_memory_limit(999, 64).is_err());
    }
}
