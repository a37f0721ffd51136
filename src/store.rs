//! Persistent jail network state
//!
//! Jail records, their attachments and the network objects they reference
//! live in a single JSON document. Every mutation is a narrow command that
//! loads the document, changes one field group and writes it back
//! atomically, so unrelated fields are never clobbered by a stale copy.
//! Commands hold an exclusive lock on `<data_dir>/state.lock` from load to
//! save, so concurrent processes never lose each other's updates.

use crate::error::{Error, ErrorContext, Result};
use crate::jail::conf::write_atomic;
use crate::jail::types::{AttachmentRequest, Jail, NetworkAttachment, ObjectId};
use crate::locks;
use crate::network::mac::MacAddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Jail records and their attachments
pub trait JailStore {
    fn jail(&self, ctid: u32) -> Result<Jail>;

    fn jails(&self) -> Result<Vec<Jail>>;

    fn insert_jail(&self, jail: Jail) -> Result<()>;

    /// Set the inherit flags; inheriting drops every attachment in the same write
    fn set_inherited(&self, ctid: u32, ipv4: bool, ipv6: bool) -> Result<()>;

    /// Append an attachment and return it with its assigned id
    ///
    /// A generated MAC is stored as a new object in the same write and
    /// replaces the request's MAC reference.
    fn insert_attachment(
        &self,
        ctid: u32,
        request: AttachmentRequest,
        generated: Option<GeneratedMac>,
    ) -> Result<NetworkAttachment>;

    fn remove_attachment(&self, ctid: u32, attachment_id: u32) -> Result<()>;
}

/// Resolution of network object references
pub trait ObjectResolver {
    /// The single value stored in an object
    fn resolve_value(&self, id: ObjectId) -> Result<String>;

    /// Whether any attachment references the object
    fn is_object_in_use(&self, id: ObjectId) -> Result<bool>;

    fn object_name_exists(&self, name: &str) -> Result<bool>;
}

/// A MAC minted for a new attachment, stored as object `name`
#[derive(Debug, Clone)]
pub struct GeneratedMac {
    pub name: String,
    pub mac: MacAddr,
}

/// Kind of a network object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Mac,
    Host,
    Network,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Mac => "mac",
            ObjectKind::Host => "host",
            ObjectKind::Network => "network",
        };
        write!(f, "{}", s)
    }
}

/// A named address or MAC value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkObject {
    pub id: ObjectId,
    pub name: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    next_attachment_id: u32,
    #[serde(default)]
    next_object_id: u32,
    #[serde(default)]
    jails: Vec<Jail>,
    #[serde(default)]
    objects: Vec<NetworkObject>,
}

impl StateDocument {
    fn jail_mut(&mut self, ctid: u32) -> Result<&mut Jail> {
        self.jails
            .iter_mut()
            .find(|j| j.ctid == ctid)
            .ok_or(Error::JailNotFound(ctid))
    }

    fn allocate_attachment_id(&mut self) -> u32 {
        self.next_attachment_id += 1;
        self.next_attachment_id
    }

    fn allocate_object_id(&mut self) -> ObjectId {
        self.next_object_id += 1;
        self.next_object_id
    }

    fn add_object(&mut self, name: &str, kind: ObjectKind, values: Vec<String>) -> Result<ObjectId> {
        if self.objects.iter().any(|o| o.name == name) {
            return Err(Error::InvalidValue(format!("object '{}' already exists", name)));
        }
        let id = self.allocate_object_id();
        self.objects.push(NetworkObject {
            id,
            name: name.to_string(),
            kind,
            values,
        });
        Ok(id)
    }
}

/// State kept in `<data_dir>/state.json`
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under a data directory
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("state.json"))
    }

    fn load(&self) -> Result<StateDocument> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateDocument::default()),
            Err(e) => {
                return Err(Error::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&content).map_err(|e| Error::StateParse {
            path: self.path.clone(),
            source: e,
        })
    }

    fn save(&self, state: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json = serde_json::to_string_pretty(state).map_err(|e| Error::StateParse {
            path: self.path.clone(),
            source: e,
        })?;
        write_atomic(&self.path, &json)
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Load, mutate and save under the store lock; nothing is written on error
    fn update<T>(&self, f: impl FnOnce(&mut StateDocument) -> Result<T>) -> Result<T> {
        let _lock = locks::acquire(&self.lock_path())?;
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }

    pub fn objects(&self) -> Result<Vec<NetworkObject>> {
        Ok(self.load()?.objects)
    }

    pub fn create_object(&self, name: &str, kind: ObjectKind, values: Vec<String>) -> Result<ObjectId> {
        if name.trim().is_empty() {
            return Err(Error::InvalidValue("object name must not be empty".into()));
        }
        if values.is_empty() {
            return Err(Error::InvalidValue(format!("object '{}' needs a value", name)));
        }

        self.update(|state| state.add_object(name, kind, values))
    }
}

impl JailStore for JsonStore {
    fn jail(&self, ctid: u32) -> Result<Jail> {
        self.load()?
            .jails
            .into_iter()
            .find(|j| j.ctid == ctid)
            .ok_or(Error::JailNotFound(ctid))
    }

    fn jails(&self) -> Result<Vec<Jail>> {
        Ok(self.load()?.jails)
    }

    fn insert_jail(&self, jail: Jail) -> Result<()> {
        self.update(|state| {
            if state.jails.iter().any(|j| j.ctid == jail.ctid) {
                return Err(Error::validation(
                    ErrorContext::jail(jail.ctid),
                    "jail already exists",
                ));
            }
            if state.jails.iter().any(|j| j.name == jail.name) {
                return Err(Error::validation(
                    ErrorContext::jail(jail.ctid),
                    format!("jail name '{}' already in use", jail.name),
                ));
            }
            state.jails.push(jail);
            Ok(())
        })
    }

    fn set_inherited(&self, ctid: u32, ipv4: bool, ipv6: bool) -> Result<()> {
        self.update(|state| {
            let jail = state.jail_mut(ctid)?;
            jail.inherit_ipv4 = ipv4;
            jail.inherit_ipv6 = ipv6;
            if jail.inherits() {
                jail.attachments.clear();
            }
            Ok(())
        })
    }

    fn insert_attachment(
        &self,
        ctid: u32,
        request: AttachmentRequest,
        generated: Option<GeneratedMac>,
    ) -> Result<NetworkAttachment> {
        self.update(|state| {
            // Existence check before allocating so a failure burns no id
            state.jail_mut(ctid)?;
            let mac = match generated {
                Some(GeneratedMac { name, mac }) => {
                    Some(state.add_object(&name, ObjectKind::Mac, vec![mac.to_string()])?)
                }
                None => request.mac,
            };
            let id = state.allocate_attachment_id();
            let attachment = request.into_attachment(id, mac);
            state.jail_mut(ctid)?.attachments.push(attachment.clone());
            Ok(attachment)
        })
    }

    fn remove_attachment(&self, ctid: u32, attachment_id: u32) -> Result<()> {
        self.update(|state| {
            let jail = state.jail_mut(ctid)?;
            let before = jail.attachments.len();
            jail.attachments.retain(|a| a.id != attachment_id);
            if jail.attachments.len() == before {
                return Err(Error::AttachmentNotFound {
                    ctid,
                    attachment_id,
                });
            }
            Ok(())
        })
    }
}

impl ObjectResolver for JsonStore {
    fn resolve_value(&self, id: ObjectId) -> Result<String> {
        let state = self.load()?;
        let object = state
            .objects
            .iter()
            .find(|o| o.id == id)
            .ok_or(Error::ObjectNotFound(id))?;

        match object.values.as_slice() {
            [value] => Ok(value.clone()),
            [] => Err(Error::InvalidValue(format!("object {} has no value", id))),
            _ => Err(Error::InvalidValue(format!(
                "object {} has {} values, expected one",
                id,
                object.values.len()
            ))),
        }
    }

    fn is_object_in_use(&self, id: ObjectId) -> Result<bool> {
        let state = self.load()?;
        if !state.objects.iter().any(|o| o.id == id) {
            return Err(Error::ObjectNotFound(id));
        }

        Ok(state.jails.iter().flat_map(|j| &j.attachments).any(|a| {
            [a.mac, a.ipv4, a.ipv4_gateway, a.ipv6, a.ipv6_gateway].contains(&Some(id))
        }))
    }

    fn object_name_exists(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.objects.iter().any(|o| o.name == name))
    }
}
