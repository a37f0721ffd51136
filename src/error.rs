//! Unified error types for Rigging

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Address field of an attachment an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    Mac,
    Ipv4,
    Ipv4Gateway,
    Ipv6,
    Ipv6Gateway,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressField::Mac => "mac",
            AddressField::Ipv4 => "ipv4",
            AddressField::Ipv4Gateway => "ipv4_gateway",
            AddressField::Ipv6 => "ipv6",
            AddressField::Ipv6Gateway => "ipv6_gateway",
        };
        write!(f, "{}", s)
    }
}

/// Where in a jail's network intent an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorContext {
    pub ctid: u32,
    pub switch_id: Option<u32>,
    pub field: Option<AddressField>,
}

impl ErrorContext {
    pub fn jail(ctid: u32) -> Self {
        Self {
            ctid,
            switch_id: None,
            field: None,
        }
    }

    pub fn switch(mut self, switch_id: u32) -> Self {
        self.switch_id = Some(switch_id);
        self
    }

    pub fn field(mut self, field: AddressField) -> Self {
        self.field = Some(field);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jail {}", self.ctid)?;
        if let Some(switch_id) = self.switch_id {
            write!(f, ", switch {}", switch_id)?;
        }
        if let Some(field) = self.field {
            write!(f, ", field {}", field)?;
        }
        Ok(())
    }
}

/// Coarse error classification used for diagnostics and exit handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    ExternalCommand,
    Io,
    StateConflict,
    Config,
}

/// Main error type for Rigging operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to lock '{path}': {source}")]
    Lock { path: PathBuf, source: io::Error },

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    // Validation errors
    #[error("Validation failed ({context}): {message}")]
    Validation {
        context: ErrorContext,
        message: String,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid jail config format in '{0}': no closing brace")]
    InvalidConfigFormat(PathBuf),

    // Not found errors
    #[error("Jail config not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Jail {0} not found")]
    JailNotFound(u32),

    #[error("Attachment {attachment_id} not found on jail {ctid}")]
    AttachmentNotFound { ctid: u32, attachment_id: u32 },

    #[error("Network object {0} not found")]
    ObjectNotFound(u32),

    #[error("Switch {0} not found")]
    SwitchNotFound(u32),

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    // Resolution errors carry the attachment context of the failing lookup
    #[error("Failed to resolve {context}: {source}")]
    Resolution {
        context: ErrorContext,
        source: Box<Error>,
    },

    // Mode errors
    #[error("State conflict on jail {ctid}: {message}")]
    StateConflict { ctid: u32, message: String },

    // External command errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a validation error scoped to a jail
    pub fn validation(context: ErrorContext, message: impl Into<String>) -> Self {
        Error::Validation {
            context,
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Read { .. }
            | Error::Write { .. }
            | Error::Lock { .. }
            | Error::Serialize(_) => ErrorKind::Io,
            Error::ConfigRead { .. }
            | Error::ConfigParse(_)
            | Error::ConfigValidation(_)
            | Error::StateParse { .. } => ErrorKind::Config,
            Error::Validation { .. } | Error::InvalidValue(_) | Error::InvalidConfigFormat(_) => {
                ErrorKind::Validation
            }
            Error::ConfigNotFound(_)
            | Error::JailNotFound(_)
            | Error::AttachmentNotFound { .. }
            | Error::ObjectNotFound(_)
            | Error::SwitchNotFound(_)
            | Error::InterfaceNotFound(_) => ErrorKind::NotFound,
            Error::Resolution { source, .. } => source.kind(),
            Error::StateConflict { .. } => ErrorKind::StateConflict,
            Error::CommandFailed { .. } => ErrorKind::ExternalCommand,
        }
    }
}

/// Result type alias for Rigging operations
pub type Result<T> = std::result::Result<T, Error>;
