//! Tag and consumer identities, plus protocol addressing.
//!
//! Both identities are opaque strings to the broker. The only structure the
//! broker ever reads out of a tag is the optional `"<proto>://"` prefix used
//! by [`TagAddress`] to pick a provider protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Separator between a protocol prefix and the channel name.
pub const PROTOCOL_SEPARATOR: &str = "://";

/// Name of an external value stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Logical subscriber identity.
///
/// Not a connection: one consumer may hold interest in many tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identity for sessions that do not bring their own.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Wire protocol used to reach a tag's provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Channel Access
    Ca,
    /// PV Access
    Pva,
}

impl Protocol {
    /// Prefix matching: `ca` in any case is Channel Access, everything else
    /// falls through to PV Access.
    pub fn from_prefix(prefix: &str) -> Self {
        if prefix.eq_ignore_ascii_case("ca") {
            Protocol::Ca
        } else {
            Protocol::Pva
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ca => write!(f, "ca"),
            Protocol::Pva => write!(f, "pva"),
        }
    }
}

/// Error parsing a protocol name from configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown protocol '{0}' (expected 'ca' or 'pva')")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ca" => Ok(Protocol::Ca),
            "pva" => Ok(Protocol::Pva),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// A tag split into the protocol that serves it and the bare channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAddress {
    pub protocol: Protocol,
    pub channel: String,
}

impl TagAddress {
    /// Split `"ca://NAME"` / `"pva://NAME"`; a tag without a prefix is served
    /// by `default_protocol`.
    pub fn parse(tag: &Tag, default_protocol: Protocol) -> Self {
        match tag.as_str().split_once(PROTOCOL_SEPARATOR) {
            Some((prefix, channel)) => Self {
                protocol: Protocol::from_prefix(prefix),
                channel: channel.to_string(),
            },
            None => Self {
                protocol: default_protocol,
                channel: tag.as_str().to_string(),
            },
        }
    }
}
