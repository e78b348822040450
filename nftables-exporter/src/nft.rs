//! Counter source backed by the `nft` command line tool.
//!
//! The ruleset is read through `nft --json`, which prints documents of the
//! form:
//!
//! ```text
//! {"nftables": [
//!   {"metainfo": {...}},
//!   {"table": {"family": "inet", "name": "filter", "handle": 1}},
//!   {"counter": {"family": "inet", "table": "filter", "name": "http", "packets": 4, "bytes": 240}},
//!   ...
//! ]}
//! ```

use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::source::{CounterObject, CounterSource, Object, SourceError, Table, TableFamily};

/// Stateful object kinds besides counters.
const OTHER_OBJECT_KINDS: &[&str] = &[
    "quota",
    "limit",
    "ct helper",
    "ct timeout",
    "ct expectation",
    "secmark",
    "synproxy",
];

#[derive(Debug, Deserialize)]
struct Document {
    nftables: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    family: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CounterEntry {
    name: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    packets: u64,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    #[serde(default)]
    name: String,
}

/// Parse the output of `nft --json list tables`.
pub fn parse_tables(json: &str) -> Result<Vec<Table>, SourceError> {
    let document: Document = serde_json::from_str(json)?;
    let mut tables = Vec::new();

    for entry in document.nftables {
        for (kind, body) in entry {
            if kind == "table" {
                let table: TableEntry = serde_json::from_value(body)?;
                tables.push(Table::new(
                    table.name,
                    TableFamily::from_keyword(&table.family),
                ));
            }
        }
    }

    Ok(tables)
}

/// Parse the output of `nft --json list table <family> <name>`.
///
/// Only stateful objects are returned; chains, rules, sets and metadata are
/// dropped.
pub fn parse_objects(json: &str) -> Result<Vec<Object>, SourceError> {
    let document: Document = serde_json::from_str(json)?;
    let mut objects = Vec::new();

    for entry in document.nftables {
        for (kind, body) in entry {
            if kind == "counter" {
                let counter: CounterEntry = serde_json::from_value(body)?;
                objects.push(Object::Counter(CounterObject::new(
                    counter.name,
                    counter.bytes,
                    counter.packets,
                )));
            } else if OTHER_OBJECT_KINDS.contains(&kind.as_str()) {
                let named: NamedEntry = serde_json::from_value(body)?;
                objects.push(Object::Other {
                    kind,
                    name: named.name,
                });
            } else {
                trace!(kind = %kind, "Skipping non-object ruleset entry");
            }
        }
    }

    Ok(objects)
}

/// [`CounterSource`] that shells out to `nft`.
#[derive(Debug, Clone)]
pub struct NftCommandSource {
    binary: PathBuf,
}

impl NftCommandSource {
    /// Create a source using the given `nft` binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, SourceError> {
        let command = format!("{} --json {}", self.binary.display(), args.join(" "));
        debug!(command = %command, "Running nft");

        let output = Command::new(&self.binary)
            .arg("--json")
            .args(args)
            .output()
            .map_err(|source| SourceError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Command {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NftCommandSource {
    fn default() -> Self {
        Self::new("nft")
    }
}

impl CounterSource for NftCommandSource {
    fn list_tables(&mut self) -> Result<Vec<Table>, SourceError> {
        let output = self.run(&["list", "tables"])?;
        parse_tables(&output)
    }

    fn get_objects(&mut self, table: &Table) -> Result<Vec<Object>, SourceError> {
        let family = table
            .family
            .keyword()
            .ok_or_else(|| SourceError::UnsupportedFamily(table.name.clone()))?;
        let output = self.run(&["list", "table", family, &table.name])?;
        parse_objects(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLES: &str = r#"{"nftables": [
        {"metainfo": {"version": "1.0.9", "release_name": "Old Doc Yak #3", "json_schema_version": 1}},
        {"table": {"family": "inet", "name": "filter", "handle": 1}},
        {"table": {"family": "ip", "name": "nat", "handle": 2}},
        {"table": {"family": "bridge", "name": "br-filter", "handle": 3}}
    ]}"#;

    const TABLE_FILTER: &str = r#"{"nftables": [
        {"metainfo": {"version": "1.0.9", "json_schema_version": 1}},
        {"table": {"family": "inet", "name": "filter", "handle": 1}},
        {"chain": {"family": "inet", "table": "filter", "name": "input", "handle": 1,
                   "type": "filter", "hook": "input", "prio": 0, "policy": "accept"}},
        {"counter": {"family": "inet", "name": "http-in", "table": "filter", "handle": 4,
                     "packets": 12, "bytes": 3456}},
        {"counter": {"family": "inet", "name": "ssh", "table": "filter", "handle": 5,
                     "packets": 0, "bytes": 0}},
        {"quota": {"family": "inet", "name": "monthly", "table": "filter", "handle": 6,
                   "bytes": 1000000, "used": 0, "inv": false}},
        {"ct helper": {"family": "inet", "name": "ftp-standard", "table": "filter", "handle": 7,
                       "type": "ftp", "protocol": "tcp", "l3proto": "inet"}},
        {"rule": {"family": "inet", "table": "filter", "chain": "input", "handle": 8,
                  "expr": [{"counter": {"packets": 1, "bytes": 2}}]}}
    ]}"#;

    #[test]
    fn test_parse_tables() {
        let tables = parse_tables(TABLES).unwrap();

        assert_eq!(
            tables,
            vec![
                Table::new("filter", TableFamily::Inet),
                Table::new("nat", TableFamily::Ipv4),
                Table::new("br-filter", TableFamily::Bridge),
            ]
        );
    }

    #[test]
    fn test_parse_tables_empty_ruleset() {
        let tables = parse_tables(r#"{"nftables": [{"metainfo": {"version": "1.0.9"}}]}"#).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn test_parse_objects() {
        let objects = parse_objects(TABLE_FILTER).unwrap();

        assert_eq!(objects.len(), 4);
        assert_eq!(
            objects[0],
            Object::Counter(CounterObject::new("http-in", 3456, 12))
        );
        assert_eq!(objects[1], Object::Counter(CounterObject::new("ssh", 0, 0)));
        assert_eq!(
            objects[2],
            Object::Other {
                kind: "quota".to_string(),
                name: "monthly".to_string()
            }
        );
        assert_eq!(
            objects[3],
            Object::Other {
                kind: "ct helper".to_string(),
                name: "ftp-standard".to_string()
            }
        );
    }

    #[test]
    fn test_parse_objects_ignores_rule_counters() {
        let objects = parse_objects(TABLE_FILTER).unwrap();
        let counters = objects.iter().filter_map(Object::as_counter).count();
        assert_eq!(counters, 2);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            parse_tables("not json"),
            Err(SourceError::Json(_))
        ));
        assert!(matches!(
            parse_objects(r#"{"nftables": [{"counter": {"bytes": 1}}]}"#),
            Err(SourceError::Json(_))
        ));
    }

    #[test]
    fn test_get_objects_unknown_family() {
        let mut source = NftCommandSource::default();
        let table = Table::new("mystery", TableFamily::Unknown);

        assert!(matches!(
            source.get_objects(&table),
            Err(SourceError::UnsupportedFamily(name)) if name == "mystery"
        ));
    }

    #[test]
    fn test_missing_binary() {
        let mut source = NftCommandSource::new("/nonexistent/nft");

        assert!(matches!(
            source.list_tables(),
            Err(SourceError::Spawn { .. })
        ));
    }
}
