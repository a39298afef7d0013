//! Schema configuration: the on-disk shape consumed at [`crate::router::Router`]
//! construction (`spec.md` §6). Loading this file is the only "loading
//! mechanism" this crate owns — watching it, reloading on a signal,
//! and wiring the result into a running dispatcher are out of scope.

pub mod error;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use error::Error;

/// Shard function family, as named in the `type:` field of a shard rule.
///
/// `Default` is accepted by the parser but rejected by
/// [`crate::router::Router::new`] — defaults are implicit and may not
/// be declared explicitly (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKind {
    Default,
    Hash,
    Range,
}

/// One `rules.shard` entry: binds a logical table to its shard key,
/// shard function, and node placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRuleConfig {
    pub table: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ShardKind,
    pub nodes: Vec<String>,
    pub locations: Vec<usize>,
    /// Rows per sub-table; required when `kind` is `range`.
    #[serde(default)]
    pub table_row_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Node used for non-sharded tables and sharded tables reached without
    /// a shard-key predicate.
    pub default: String,
    #[serde(default)]
    pub shard: Vec<ShardRuleConfig>,
}

/// A schema's sharding configuration, as loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub db: String,
    /// The global node pool this schema may place rules onto.
    pub nodes: Vec<String>,
    pub rules: RulesConfig,
}

impl SchemaConfig {
    /// Parse a schema configuration from its TOML source, reporting a
    /// line-aware error on malformed input.
    pub fn parse(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|err| Error::config(source, err))
    }

    /// Load and parse a schema configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_schema() {
        let toml = r#"
            db = "shop"
            nodes = ["n1", "n2"]

            [rules]
            default = "n1"

            [[rules.shard]]
            table = "orders"
            key = "id"
            type = "hash"
            nodes = ["n1", "n2"]
            locations = [2, 2]
        "#;
        let schema = SchemaConfig::parse(toml).unwrap();
        assert_eq!(schema.db, "shop");
        assert_eq!(schema.rules.shard.len(), 1);
        assert_eq!(schema.rules.shard[0].kind, ShardKind::Hash);
    }

    #[test]
    fn reports_line_on_malformed_toml() {
        let broken = "db = \"shop\"\nnodes = [\n";
        let err = SchemaConfig::parse(broken).unwrap_err();
        assert!(matches!(err, Error::MissingField(_, _) | Error::Deser(_)));
    }
}
