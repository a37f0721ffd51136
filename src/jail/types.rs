//! Jail network records

use serde::{Deserialize, Serialize};

/// Reference to a network object (MAC, host address, gateway)
pub type ObjectId = u32;

/// Treat a zero reference the same as an absent one
pub fn nonzero(reference: Option<ObjectId>) -> Option<ObjectId> {
    reference.filter(|id| *id != 0)
}

/// How one protocol of an attachment gets its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// DHCP for IPv4, SLAAC for IPv6
    Dynamic,
    /// Static address and gateway objects
    Static {
        address: ObjectId,
        gateway: ObjectId,
    },
    /// Nothing configured for this protocol
    Unconfigured,
}

impl AddressMode {
    fn pick(dynamic: bool, address: Option<ObjectId>, gateway: Option<ObjectId>) -> Self {
        if dynamic {
            return AddressMode::Dynamic;
        }
        match (nonzero(address), nonzero(gateway)) {
            (Some(address), Some(gateway)) => AddressMode::Static { address, gateway },
            _ => AddressMode::Unconfigured,
        }
    }
}

/// A jail's attachment to a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Store-assigned attachment id
    pub id: u32,
    /// Switch this attachment plugs into
    pub switch_id: u32,
    #[serde(default)]
    pub mac: Option<ObjectId>,
    #[serde(default)]
    pub ipv4: Option<ObjectId>,
    #[serde(default)]
    pub ipv4_gateway: Option<ObjectId>,
    #[serde(default)]
    pub ipv6: Option<ObjectId>,
    #[serde(default)]
    pub ipv6_gateway: Option<ObjectId>,
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub slaac: bool,
}

impl NetworkAttachment {
    pub fn ipv4_mode(&self) -> AddressMode {
        AddressMode::pick(self.dhcp, self.ipv4, self.ipv4_gateway)
    }

    pub fn ipv6_mode(&self) -> AddressMode {
        AddressMode::pick(self.slaac, self.ipv6, self.ipv6_gateway)
    }

    /// MAC object, if one is assigned
    pub fn mac(&self) -> Option<ObjectId> {
        nonzero(self.mac)
    }
}

/// Request to attach a jail to a switch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentRequest {
    pub switch_id: u32,
    pub mac: Option<ObjectId>,
    pub ipv4: Option<ObjectId>,
    pub ipv4_gateway: Option<ObjectId>,
    pub ipv6: Option<ObjectId>,
    pub ipv6_gateway: Option<ObjectId>,
    pub dhcp: bool,
    pub slaac: bool,
}

impl AttachmentRequest {
    pub fn new(switch_id: u32) -> Self {
        Self {
            switch_id,
            ..Default::default()
        }
    }

    pub fn dhcp(mut self) -> Self {
        self.dhcp = true;
        self
    }

    pub fn slaac(mut self) -> Self {
        self.slaac = true;
        self
    }

    pub fn mac(mut self, mac: ObjectId) -> Self {
        self.mac = Some(mac);
        self
    }

    pub fn ipv4(mut self, address: ObjectId, gateway: ObjectId) -> Self {
        self.ipv4 = Some(address);
        self.ipv4_gateway = Some(gateway);
        self
    }

    pub fn ipv6(mut self, address: ObjectId, gateway: ObjectId) -> Self {
        self.ipv6 = Some(address);
        self.ipv6_gateway = Some(gateway);
        self
    }

    /// Build the attachment record once the store has assigned an id
    pub fn into_attachment(self, id: u32, mac: Option<ObjectId>) -> NetworkAttachment {
        NetworkAttachment {
            id,
            switch_id: self.switch_id,
            mac: nonzero(mac),
            ipv4: nonzero(self.ipv4),
            ipv4_gateway: nonzero(self.ipv4_gateway),
            ipv6: nonzero(self.ipv6),
            ipv6_gateway: nonzero(self.ipv6_gateway),
            dhcp: self.dhcp,
            slaac: self.slaac,
        }
    }
}

/// A jail as seen by the network engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jail {
    pub ctid: u32,
    pub name: String,
    #[serde(default)]
    pub inherit_ipv4: bool,
    #[serde(default)]
    pub inherit_ipv6: bool,
    /// Attachments in insertion order
    #[serde(default)]
    pub attachments: Vec<NetworkAttachment>,
}

impl Jail {
    pub fn new(ctid: u32, name: impl Into<String>) -> Self {
        Self {
            ctid,
            name: name.into(),
            inherit_ipv4: false,
            inherit_ipv6: false,
            attachments: Vec::new(),
        }
    }

    pub fn inherits(&self) -> bool {
        self.inherit_ipv4 || self.inherit_ipv6
    }

    pub fn attachment(&self, id: u32) -> Option<&NetworkAttachment> {
        self.attachments.iter().find(|a| a.id == id)
    }

    pub fn uses_switch(&self, switch_id: u32) -> bool {
        self.attachments.iter().any(|a| a.switch_id == switch_id)
    }
}
