//! Rule & Router registry (C2): per-table routing rules, resolved by
//! normalized logical table name.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::ast::Expr;
use crate::config::{ShardKind, ShardRuleConfig, SchemaConfig};
use crate::error::ConstructError;
use crate::shard::{DefaultShard, HashShard, RangeShard, Shard};

/// Maximum sub-table index width: `orders_9999` is the largest valid
/// suffix, so a rule may declare at most 10,000 sub-tables.
const MAX_SUB_TABLES: usize = 10_000;

/// An immutable routing rule bound to one logical `(db, table)`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub key: String,
    pub nodes: Vec<String>,
    pub locations: Vec<usize>,
    /// `table_to_node[i]` is the index into `nodes` sub-table `i` lives on.
    pub table_to_node: Vec<usize>,
    pub shard: Arc<dyn Shard>,
}

impl Rule {
    fn from_config(schema: &SchemaConfig, rule: &ShardRuleConfig) -> Result<Self, ConstructError> {
        if rule.kind == ShardKind::Default {
            return Err(ConstructError::ExplicitDefaultRule);
        }
        for node in &rule.nodes {
            if !schema.nodes.contains(node) {
                return Err(ConstructError::RuleNodeNotInSchema(
                    rule.table.clone(),
                    node.clone(),
                ));
            }
        }
        if rule.locations.len() != rule.nodes.len() {
            return Err(ConstructError::LocationsCount(
                rule.locations.len(),
                rule.nodes.len(),
            ));
        }

        let total: usize = rule.locations.iter().sum();
        if total > MAX_SUB_TABLES {
            return Err(ConstructError::TooManySubTables(total));
        }

        let mut table_to_node = Vec::with_capacity(total);
        for (node_idx, &count) in rule.locations.iter().enumerate() {
            table_to_node.extend(std::iter::repeat(node_idx).take(count));
        }

        let shard: Arc<dyn Shard> = match rule.kind {
            ShardKind::Hash => Arc::new(HashShard::new(total)),
            ShardKind::Range => {
                let row_limit = rule
                    .table_row_limit
                    .ok_or_else(|| ConstructError::MissingRowLimit(rule.table.clone()))?;
                Arc::new(RangeShard::new(total, row_limit))
            }
            ShardKind::Default => unreachable!("rejected above"),
        };

        Ok(Self {
            key: rule.key.clone(),
            nodes: rule.nodes.clone(),
            locations: rule.locations.clone(),
            table_to_node,
            shard,
        })
    }

    fn default_rule(default_node: &str) -> Self {
        Self {
            key: String::new(),
            nodes: vec![default_node.to_string()],
            locations: vec![1],
            table_to_node: vec![0],
            shard: Arc::new(DefaultShard),
        }
    }

    /// Number of sub-tables this rule is sized for.
    pub fn total(&self) -> usize {
        self.table_to_node.len()
    }

    /// `true` for the schema's implicit default rule: single node, one
    /// sub-table, used for non-sharded tables and as the fallback for
    /// a sharded table reached without a shard-key predicate.
    pub fn is_default(&self) -> bool {
        self.nodes.len() == 1 && self.total() == 1 && self.key.is_empty()
    }

    /// Reject an `UPDATE` / `ON DUPLICATE KEY UPDATE` assignment list
    /// that targets the shard key column of a multi-node rule
    /// (`spec.md` §4.2). Single-node and default rules are exempt.
    pub fn check_update_exprs(&self, assignments: &[(String, Expr)]) -> Result<(), crate::error::RouterError> {
        if self.is_default() || self.nodes.len() <= 1 {
            return Ok(());
        }
        for (column, _) in assignments {
            if column.eq_ignore_ascii_case(&self.key) {
                return Err(crate::error::RouterError::UpdateKey(self.key.clone()));
            }
        }
        Ok(())
    }
}

/// Immutable per-schema registry of rules.
#[derive(Debug, Clone)]
pub struct Router {
    pub db: String,
    pub nodes: Vec<String>,
    rules: HashMap<String, Rule>,
    pub default_rule: Rule,
}

impl Router {
    /// Validate `schema` and construct its router (`spec.md` §4.2).
    /// Fatal to this router instance; never runs on the hot path.
    pub fn new(schema: &SchemaConfig) -> Result<Self, ConstructError> {
        if !schema.nodes.contains(&schema.rules.default) {
            return Err(ConstructError::DefaultNodeNotInSchema(
                schema.rules.default.clone(),
            ));
        }

        let mut rules = HashMap::new();
        for shard_rule in &schema.rules.shard {
            let normalized = normalize_table_name(&shard_rule.table, &schema.db);
            if rules.contains_key(&normalized) {
                return Err(ConstructError::DuplicateTable(shard_rule.table.clone()));
            }
            let rule = Rule::from_config(schema, shard_rule)?;
            debug!(table = %shard_rule.table, total = rule.total(), "registered shard rule");
            rules.insert(normalized, rule);
        }

        Ok(Self {
            db: schema.db.clone(),
            nodes: schema.nodes.clone(),
            rules,
            default_rule: Rule::default_rule(&schema.rules.default),
        })
    }

    /// Resolve a logical table name to its rule, falling back to
    /// [`Router::default_rule`] when the table carries none.
    pub fn get_rule(&self, table_name: &str) -> &Rule {
        let normalized = normalize_table_name(table_name, &self.db);
        self.rules.get(&normalized).unwrap_or(&self.default_rule)
    }
}

/// Normalize a table identifier the same way on registration and
/// lookup: lowercase, strip backticks/double-quotes, and drop a
/// leading `db.` qualifier equal to the router's own database.
///
/// Generalizes the teacher's alias-aware `Table::from` to operate on
/// the bare string form the parser hands back, rather than a parsed
/// `RangeVar` node.
pub fn normalize_table_name(raw: &str, db: &str) -> String {
    let stripped: String = raw.chars().filter(|c| *c != '`' && *c != '"').collect();
    let lowered = stripped.to_lowercase();
    let db_prefix = format!("{}.", db.to_lowercase());
    lowered
        .strip_prefix(db_prefix.as_str())
        .map(str::to_string)
        .unwrap_or(lowered)
}

static ROUTER: Lazy<ArcSwapOption<Router>> = Lazy::new(ArcSwapOption::empty);

/// The process-wide router currently in force, if one has been loaded
/// via [`reload`]. `spec.md` §5's "atomically swapping the pointer"
/// made concrete: readers never block on a concurrent reload.
pub fn current() -> Option<Arc<Router>> {
    ROUTER.load_full()
}

/// Validate `schema`, construct a new [`Router`], and atomically swap
/// it in as the process-wide current router. The previous router
/// remains valid for any plan already in flight.
pub fn reload(schema: &SchemaConfig) -> Result<Arc<Router>, ConstructError> {
    let router = Arc::new(Router::new(schema)?);
    ROUTER.store(Some(router.clone()));
    Ok(router)
}
