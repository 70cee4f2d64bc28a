//! Error types for client provisioning

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Provisioning error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to {action} {}: {source}", .path.display())]
    Persist {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("unable to derive identifier from {0}")]
    InvalidIdentifier(String),

    #[error("endpoint {0} already exists (use --force to update)")]
    AlreadyExists(String),

    #[error("outbound tag {tag} is already assigned to {hostname}")]
    TagConflict { tag: String, hostname: String },

    #[error("--tag or --host is required")]
    BindingNotSpecified,

    #[error("client endpoint {0:?} not found")]
    BindingHostNotFound(String),

    #[error("outbound tag {0:?} is not registered")]
    BindingTagNotFound(String),

    #[error("tag {tag:?} does not match host {host:?}")]
    BindingTagMismatch { tag: String, host: String },

    #[error("invalid redirect rule: {0}")]
    InvalidRule(String),

    #[error("redirect {target} via {tag} already exists")]
    DuplicateRedirect { target: String, tag: String },

    #[error("reverse tag {tag} {detail}")]
    ReverseTagConflict { tag: String, detail: String },

    #[error("{0}")]
    Conflict(String),

    #[error("listen port {port} is already in use on {address}")]
    PortUnavailable { address: String, port: u16 },

    #[error("no free ports available from {0} to 65535")]
    NoPortAvailable(u16),

    #[error("{0} not found")]
    NotFound(String),

    #[error("forward inbound {0} not found")]
    InboundNotFound(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    pub fn invalid_rule<S: Into<String>>(msg: S) -> Self {
        Error::InvalidRule(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Error::NotFound(what.into())
    }

    /// Attach the failing action and path to an I/O error
    pub fn persist(action: &'static str, path: &Path, source: io::Error) -> Self {
        Error::Persist {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error reports an absent target (callers may ignore it)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InboundNotFound(_)
                | Error::BindingHostNotFound(_)
                | Error::BindingTagNotFound(_)
        )
    }

    /// Whether the error is a conflict with existing state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists(_)
                | Error::TagConflict { .. }
                | Error::DuplicateRedirect { .. }
                | Error::ReverseTagConflict { .. }
                | Error::Conflict(_)
                | Error::PortUnavailable { .. }
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
