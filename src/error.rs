//! Routing errors.
//!
//! Every error `BuildPlan` or `NewRouter` can produce lives in this one
//! enum. Nothing in this crate panics on an input-dependent path; a
//! malformed statement or schema always comes back as a `RouterError`.

use thiserror::Error;

/// Error produced while constructing a [`crate::router::Router`] from
/// configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructError {
    #[error("default node \"{0}\" is not a member of schema.nodes")]
    DefaultNodeNotInSchema(String),

    #[error("rule for table \"{0}\" references node \"{1}\" not in schema.nodes")]
    RuleNodeNotInSchema(String, String),

    #[error("rule type \"default\" may not be declared explicitly; defaults are implicit")]
    ExplicitDefaultRule,

    #[error("duplicate rule for table \"{0}\"")]
    DuplicateTable(String),

    #[error("locations has {0} entries but nodes has {1}")]
    LocationsCount(usize, usize),

    #[error("sub-table index {0} has 4 or fewer digits but total sub-tables must stay under 10000")]
    TooManySubTables(usize),

    #[error("range rule for table \"{0}\" requires table_row_limit > 0")]
    MissingRowLimit(String),
}

/// Error produced while building or rewriting a [`crate::plan::Plan`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("{0}")]
    Construct(#[from] ConstructError),

    /// Statement kind not one of `Select`, `Insert`, `Replace`, `Update`, `Delete`.
    #[error("statement kind is not routable")]
    NoPlan,

    /// Sharded rule, non-empty statement, no predicate constrained the shard key.
    #[error("no predicate constrained the shard key for a sharded table")]
    NoCriteria,

    /// Evaluator produced an empty node set.
    #[error("routing produced no target node")]
    NoRouteNode,

    #[error("INSERT targets more than one node in a single statement")]
    InsertInMulti,

    #[error("UPDATE targets more than one node in a single statement")]
    UpdateInMulti,

    #[error("DELETE targets more than one node in a single statement")]
    DeleteInMulti,

    #[error("REPLACE targets more than one node in a single statement")]
    ReplaceInMulti,

    #[error("INSERT ... SELECT is not supported")]
    SelectInInsert,

    #[error("REPLACE ... SELECT is not supported")]
    SelectInReplace,

    /// Assignment modifies the shard-key column of a sharded (multi-node) rule.
    #[error("assignment targets the shard key column \"{0}\" of a sharded rule")]
    UpdateKey(String),

    /// Rewriter received an AST variant inconsistent with its family.
    #[error("statement does not match the rewriter's expected family")]
    StmtConvert,

    /// `INSERT`/`REPLACE` row is positional but not well-typed, or the
    /// shard key column could not be located among the statement's columns.
    #[error("could not determine the shard key's column position")]
    ColumnMissing,

    /// Shard function could not place a value: wrong type.
    #[error("value could not be coerced to the shard key's type")]
    KeyTypeMismatch,

    /// Shard function could not place a value: out of the configured range.
    #[error("value {0} is out of the configured range [0, {1})")]
    KeyOutOfRange(i64, i64),
}
