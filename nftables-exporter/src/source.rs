//! Counter source abstraction.
//!
//! A [`CounterSource`] hands out the tables known to the kernel and the
//! stateful objects defined in each of them. Implementations wrap a single
//! stateful handle and are not expected to be usable from several threads at
//! once, hence the `&mut self` receivers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while querying a counter source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Invalid nft JSON output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table {0} has an unsupported family")]
    UnsupportedFamily(String),

    #[error("{0}")]
    Backend(String),
}

impl SourceError {
    /// Create a backend error from any message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Protocol family of an nftables table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableFamily {
    Inet,
    Ipv4,
    Ipv6,
    Arp,
    Netdev,
    Bridge,
    Unknown,
}

impl TableFamily {
    /// Parse an `nft` family keyword; unrecognized keywords map to `Unknown`.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "inet" => TableFamily::Inet,
            "ip" => TableFamily::Ipv4,
            "ip6" => TableFamily::Ipv6,
            "arp" => TableFamily::Arp,
            "netdev" => TableFamily::Netdev,
            "bridge" => TableFamily::Bridge,
            _ => TableFamily::Unknown,
        }
    }

    /// The keyword `nft` uses for this family, if it has one.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            TableFamily::Inet => Some("inet"),
            TableFamily::Ipv4 => Some("ip"),
            TableFamily::Ipv6 => Some("ip6"),
            TableFamily::Arp => Some("arp"),
            TableFamily::Netdev => Some("netdev"),
            TableFamily::Bridge => Some("bridge"),
            TableFamily::Unknown => None,
        }
    }
}

impl FromStr for TableFamily {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_keyword(s))
    }
}

/// A named table within one protocol family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub family: TableFamily,
}

impl Table {
    pub fn new(name: impl Into<String>, family: TableFamily) -> Self {
        Self {
            name: name.into(),
            family,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family.keyword() {
            Some(family) => write!(f, "{} {}", family, self.name),
            None => write!(f, "unknown {}", self.name),
        }
    }
}

/// A named counter and its current totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterObject {
    pub name: String,
    pub bytes: u64,
    pub packets: u64,
}

impl CounterObject {
    pub fn new(name: impl Into<String>, bytes: u64, packets: u64) -> Self {
        Self {
            name: name.into(),
            bytes,
            packets,
        }
    }
}

/// A stateful object found in a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Counter(CounterObject),
    /// Any other object kind (quota, limit, ct helper, ...).
    Other { kind: String, name: String },
}

impl Object {
    /// The counter held by this object, if it is one.
    pub fn as_counter(&self) -> Option<&CounterObject> {
        match self {
            Object::Counter(counter) => Some(counter),
            Object::Other { .. } => None,
        }
    }
}

/// Provider of nftables tables and their stateful objects.
pub trait CounterSource: Send {
    /// List every table currently loaded.
    fn list_tables(&mut self) -> Result<Vec<Table>, SourceError>;

    /// List the stateful objects of one table.
    fn get_objects(&mut self, table: &Table) -> Result<Vec<Object>, SourceError>;
}
