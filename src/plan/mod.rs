//! Predicate evaluator (C3) and statement rewriter (C4): turn a parsed
//! [`Statement`] plus the [`Rule`] the router resolved for it into a
//! [`Plan`] — a node → rewritten-SQL-strings mapping, or a well-defined
//! [`RouterError`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, trace};

use crate::ast::{
    ColumnRef, DeleteStmt, Expr, InsertStmt, Literal, ReplaceStmt, SelectStmt, Statement,
    UpdateStmt,
};
use crate::error::RouterError;
use crate::router::{Router, Rule};
use crate::shard::KeyValue;

/// The routing result for one statement.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The full candidate set, `[0, total)`.
    pub table_indexs: Vec<usize>,
    /// The subset surviving predicate evaluation; sorted, deduplicated.
    pub route_table_indexs: Vec<usize>,
    /// Distinct node indices (into the rule's `nodes`) covering `route_table_indexs`.
    pub route_node_indexs: Vec<usize>,
    /// Rewritten SQL strings, grouped by destination node, in
    /// ascending-`route_table_indexs` order per node.
    pub rewritten_sqls: HashMap<String, Vec<String>>,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plan: {} sub-table(s) across {} node(s), {} statement(s) rewritten",
            self.route_table_indexs.len(),
            self.route_node_indexs.len(),
            self.rewritten_sqls.values().map(Vec::len).sum::<usize>()
        )
    }
}

/// Owns the plan's vectors while assembly is in progress; frozen into
/// an immutable [`Plan`] by [`PlanBuilder::finish`]. Keeps the
/// mutable-then-frozen construction local rather than mutating a
/// shared `Plan` in place.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    rewritten_sqls: HashMap<String, Vec<String>>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: String, sql: String) {
        self.rewritten_sqls.entry(node).or_default().push(sql);
    }

    fn finish(self, rule: &Rule, route_table_indexs: BTreeSet<usize>) -> Plan {
        let route_node_indexs: BTreeSet<usize> = route_table_indexs
            .iter()
            .map(|&i| rule.table_to_node[i])
            .collect();
        Plan {
            table_indexs: (0..rule.total()).collect(),
            route_table_indexs: route_table_indexs.into_iter().collect(),
            route_node_indexs: route_node_indexs.into_iter().collect(),
            rewritten_sqls: self.rewritten_sqls,
        }
    }
}

/// Build a routing plan for `stmt` against `router`.
pub fn build_plan(stmt: &Statement, router: &Router) -> Result<Plan, RouterError> {
    let Some(table) = stmt.table() else {
        return Err(RouterError::NoPlan);
    };
    let rule = router.get_rule(&table.to_string());
    trace!(table = %table, sharded = !rule.is_default(), "resolved rule");

    match stmt {
        Statement::Select(s) => build_select(s, router, rule),
        Statement::Insert(s) => build_insert(s, rule),
        Statement::Replace(s) => build_replace(s, rule),
        Statement::Update(s) => build_update(s, router, rule),
        Statement::Delete(s) => build_delete(s, router, rule),
        Statement::Other(_) => Err(RouterError::NoPlan),
    }
}

fn broadcast_unchanged(sql: String, default_rule: &Rule) -> Plan {
    let node = default_rule.nodes[0].clone();
    let mut rewritten = HashMap::new();
    rewritten.insert(node, vec![sql]);
    Plan {
        table_indexs: vec![0],
        route_table_indexs: vec![],
        route_node_indexs: vec![0],
        rewritten_sqls: rewritten,
    }
}

/// Assemble the final plan from a survived index set, enforcing the
/// single-node constraint writes carry (`multi_error`) and `NoRouteNode`.
fn assemble(
    indices: BTreeSet<usize>,
    rule: &Rule,
    multi_error: Option<RouterError>,
    render: impl Fn(usize) -> String,
) -> Result<Plan, RouterError> {
    let node_indices: BTreeSet<usize> = indices.iter().map(|&i| rule.table_to_node[i]).collect();
    if node_indices.is_empty() {
        return Err(RouterError::NoRouteNode);
    }
    if node_indices.len() > 1 {
        if let Some(err) = multi_error {
            return Err(err);
        }
    }
    let mut builder = PlanBuilder::new();
    for &idx in &indices {
        let node = rule.nodes[rule.table_to_node[idx]].clone();
        builder.push(node, render(idx));
    }
    Ok(builder.finish(rule, indices))
}

fn sub_table_name(logical: &str, index: usize) -> String {
    format!("{logical}_{index:04}")
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

fn build_select(s: &SelectStmt, router: &Router, rule: &Rule) -> Result<Plan, RouterError> {
    if rule.is_default() {
        return Ok(broadcast_unchanged(
            s.render(&s.table.to_string()),
            &router.default_rule,
        ));
    }
    let Some(where_clause) = &s.where_clause else {
        return Ok(broadcast_unchanged(
            s.render(&s.table.to_string()),
            &router.default_rule,
        ));
    };

    let all: BTreeSet<usize> = (0..rule.total()).collect();
    let (indices, touched) = eval(where_clause, rule, &all)?;
    if !touched {
        return Err(RouterError::NoCriteria);
    }
    debug!(indices = ?indices, "select routed");
    assemble(indices, rule, None, |idx| {
        s.render(&sub_table_name(&s.table.name, idx))
    })
}

// ---------------------------------------------------------------------------
// INSERT / REPLACE
// ---------------------------------------------------------------------------

fn find_key_column_position(columns: &[String], key: &str) -> Result<usize, RouterError> {
    if columns.is_empty() {
        return Err(RouterError::ColumnMissing);
    }
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(key))
        .ok_or(RouterError::ColumnMissing)
}

fn literal_value(e: &Expr) -> Option<KeyValue> {
    match e {
        Expr::Literal(Literal::Integer(v)) => Some(KeyValue::Integer(*v)),
        Expr::Literal(Literal::String(s)) => Some(KeyValue::String(s.clone())),
        _ => None,
    }
}

fn values_indices(rows: &[Vec<Expr>], col_pos: usize, rule: &Rule) -> Result<BTreeSet<usize>, RouterError> {
    let mut indices = BTreeSet::new();
    for row in rows {
        let value_expr = row.get(col_pos).ok_or(RouterError::ColumnMissing)?;
        let value = literal_value(value_expr).ok_or(RouterError::KeyTypeMismatch)?;
        indices.insert(rule.shard.find_for_key(&value)?);
    }
    Ok(indices)
}

fn build_insert(s: &InsertStmt, rule: &Rule) -> Result<Plan, RouterError> {
    if s.select.is_some() {
        return Err(RouterError::SelectInInsert);
    }
    if rule.is_default() {
        return Ok(broadcast_unchanged(s.render(&s.table.to_string()), rule));
    }
    let col_pos = find_key_column_position(&s.columns, &rule.key)?;
    let indices = values_indices(&s.rows, col_pos, rule)?;
    if indices.is_empty() {
        return Err(RouterError::NoCriteria);
    }
    assemble(indices, rule, Some(RouterError::InsertInMulti), |idx| {
        s.render(&sub_table_name(&s.table.name, idx))
    })
}

fn build_replace(s: &ReplaceStmt, rule: &Rule) -> Result<Plan, RouterError> {
    if s.select.is_some() {
        return Err(RouterError::SelectInReplace);
    }
    if rule.is_default() {
        return Ok(broadcast_unchanged(s.render(&s.table.to_string()), rule));
    }
    let col_pos = find_key_column_position(&s.columns, &rule.key)?;
    let indices = values_indices(&s.rows, col_pos, rule)?;
    if indices.is_empty() {
        return Err(RouterError::NoCriteria);
    }
    assemble(indices, rule, Some(RouterError::ReplaceInMulti), |idx| {
        s.render(&sub_table_name(&s.table.name, idx))
    })
}

// ---------------------------------------------------------------------------
// UPDATE / DELETE
// ---------------------------------------------------------------------------

fn build_update(s: &UpdateStmt, router: &Router, rule: &Rule) -> Result<Plan, RouterError> {
    rule.check_update_exprs(&s.set_exprs)?;
    if rule.is_default() {
        return Ok(broadcast_unchanged(
            s.render(&s.table.to_string()),
            &router.default_rule,
        ));
    }
    let Some(where_clause) = &s.where_clause else {
        return Ok(broadcast_unchanged(
            s.render(&s.table.to_string()),
            &router.default_rule,
        ));
    };
    let all: BTreeSet<usize> = (0..rule.total()).collect();
    let (indices, touched) = eval(where_clause, rule, &all)?;
    if !touched {
        return Err(RouterError::NoCriteria);
    }
    assemble(indices, rule, Some(RouterError::UpdateInMulti), |idx| {
        s.render(&sub_table_name(&s.table.name, idx))
    })
}

fn build_delete(s: &DeleteStmt, router: &Router, rule: &Rule) -> Result<Plan, RouterError> {
    if rule.is_default() {
        return Ok(broadcast_unchanged(
            s.render(&s.table.to_string()),
            &router.default_rule,
        ));
    }
    let Some(where_clause) = &s.where_clause else {
        return Ok(broadcast_unchanged(
            s.render(&s.table.to_string()),
            &router.default_rule,
        ));
    };
    let all: BTreeSet<usize> = (0..rule.total()).collect();
    let (indices, touched) = eval(where_clause, rule, &all)?;
    if !touched {
        return Err(RouterError::NoCriteria);
    }
    assemble(indices, rule, Some(RouterError::DeleteInMulti), |idx| {
        s.render(&sub_table_name(&s.table.name, idx))
    })
}

// ---------------------------------------------------------------------------
// Predicate evaluator (C3)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
}

fn flip(cmp: Cmp) -> Cmp {
    match cmp {
        Cmp::Lt => Cmp::Gt,
        Cmp::Le => Cmp::Ge,
        Cmp::Gt => Cmp::Lt,
        Cmp::Ge => Cmp::Le,
    }
}

fn column_name(e: &Expr) -> Option<&str> {
    match e {
        Expr::Column(ColumnRef { name, .. }) => Some(name.as_str()),
        _ => None,
    }
}

fn is_key_column(e: &Expr, rule: &Rule) -> bool {
    column_name(e)
        .map(|n| n.eq_ignore_ascii_case(&rule.key))
        .unwrap_or(false)
}

/// Recursively evaluate `expr` against `rule`'s shard function,
/// returning the surviving index set and whether any leaf actually
/// referenced the shard key column (`spec.md` §4.3's "NoCriteria" test).
fn eval(expr: &Expr, rule: &Rule, all: &BTreeSet<usize>) -> Result<(BTreeSet<usize>, bool), RouterError> {
    match expr {
        Expr::And(a, b) => {
            let (left, lt) = eval(a, rule, all)?;
            let (right, rt) = eval(b, rule, all)?;
            Ok((left.intersection(&right).copied().collect(), lt || rt))
        }
        Expr::Or(a, b) => {
            let (left, lt) = eval(a, rule, all)?;
            let (right, rt) = eval(b, rule, all)?;
            Ok((left.union(&right).copied().collect(), lt || rt))
        }
        Expr::Not(a) => {
            let (inner, touched) = eval(a, rule, all)?;
            Ok((all.difference(&inner).copied().collect(), touched))
        }
        Expr::Paren(a) => eval(a, rule, all),
        Expr::Eq(l, r) => leaf_eq(l, r, rule, all),
        Expr::NotEq(l, r) => leaf_neq(l, r, rule, all),
        Expr::Lt(l, r) => leaf_compare(Cmp::Lt, l, r, rule, all),
        Expr::Le(l, r) => leaf_compare(Cmp::Le, l, r, rule, all),
        Expr::Gt(l, r) => leaf_compare(Cmp::Gt, l, r, rule, all),
        Expr::Ge(l, r) => leaf_compare(Cmp::Ge, l, r, rule, all),
        Expr::In(col, values) => leaf_in(col, values, rule, all),
        Expr::Between(col, lo, hi) => leaf_between(col, lo, hi, rule, all),
        _ => Ok((all.clone(), false)),
    }
}

fn leaf_eq(l: &Expr, r: &Expr, rule: &Rule, all: &BTreeSet<usize>) -> Result<(BTreeSet<usize>, bool), RouterError> {
    let value = if is_key_column(l, rule) {
        literal_value(r)
    } else if is_key_column(r, rule) {
        literal_value(l)
    } else {
        return Ok((all.clone(), false));
    };
    let Some(value) = value else {
        return Ok((all.clone(), false));
    };
    Ok((BTreeSet::from([rule.shard.find_for_key(&value)?]), true))
}

fn leaf_neq(l: &Expr, r: &Expr, rule: &Rule, all: &BTreeSet<usize>) -> Result<(BTreeSet<usize>, bool), RouterError> {
    let value = if is_key_column(l, rule) {
        literal_value(r)
    } else if is_key_column(r, rule) {
        literal_value(l)
    } else {
        return Ok((all.clone(), false));
    };
    let Some(value) = value else {
        return Ok((all.clone(), false));
    };
    let excluded = rule.shard.find_for_key(&value)?;
    Ok((all.iter().copied().filter(|i| *i != excluded).collect(), true))
}

fn leaf_compare(
    cmp: Cmp,
    l: &Expr,
    r: &Expr,
    rule: &Rule,
    all: &BTreeSet<usize>,
) -> Result<(BTreeSet<usize>, bool), RouterError> {
    let (effective, value_expr) = if is_key_column(l, rule) {
        (cmp, r)
    } else if is_key_column(r, rule) {
        (flip(cmp), l)
    } else {
        return Ok((all.clone(), false));
    };
    let Some(value) = literal_value(value_expr) else {
        return Ok((all.clone(), false));
    };
    let indices = match effective {
        Cmp::Lt | Cmp::Le => rule.shard.find_for_range(None, Some(&value))?,
        Cmp::Gt | Cmp::Ge => rule.shard.find_for_range(Some(&value), None)?,
    };
    Ok((indices.into_iter().collect(), true))
}

fn leaf_in(col: &Expr, values: &[Expr], rule: &Rule, all: &BTreeSet<usize>) -> Result<(BTreeSet<usize>, bool), RouterError> {
    if !is_key_column(col, rule) {
        return Ok((all.clone(), false));
    }
    let mut out = BTreeSet::new();
    for v in values {
        let Some(value) = literal_value(v) else {
            return Ok((all.clone(), false));
        };
        out.insert(rule.shard.find_for_key(&value)?);
    }
    Ok((out, true))
}

fn leaf_between(
    col: &Expr,
    lo: &Expr,
    hi: &Expr,
    rule: &Rule,
    all: &BTreeSet<usize>,
) -> Result<(BTreeSet<usize>, bool), RouterError> {
    if !is_key_column(col, rule) {
        return Ok((all.clone(), false));
    }
    let (Some(lo_v), Some(hi_v)) = (literal_value(lo), literal_value(hi)) else {
        return Ok((all.clone(), false));
    };
    let indices = rule.shard.find_for_range(Some(&lo_v), Some(&hi_v))?;
    Ok((indices.into_iter().collect(), true))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::TableRef;
    use crate::config::{RulesConfig, SchemaConfig, ShardKind, ShardRuleConfig};

    fn shop_router() -> Router {
        let schema = SchemaConfig {
            db: "shop".into(),
            nodes: vec!["n1".into(), "n2".into()],
            rules: RulesConfig {
                default: "n1".into(),
                shard: vec![ShardRuleConfig {
                    table: "orders".into(),
                    key: "id".into(),
                    kind: ShardKind::Hash,
                    nodes: vec!["n1".into(), "n2".into()],
                    locations: vec![2, 2],
                    table_row_limit: None,
                }],
            },
        };
        Router::new(&schema).unwrap()
    }

    fn select_where(where_clause: Expr) -> SelectStmt {
        SelectStmt {
            comments: vec![],
            distinct: false,
            select_list: "*".into(),
            table: TableRef::new("orders"),
            where_clause: Some(where_clause),
            group_by: None,
            having: None,
            order_by: None,
            limit: None,
            lock_clause: None,
        }
    }

    #[test]
    fn s1_eq_routes_single_node() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = select_where(Expr::Eq(Box::new(Expr::column("id")), Box::new(Expr::int(7))));
        let plan = build_select(&stmt, &router, rule).unwrap();
        assert_eq!(plan.route_table_indexs, vec![3]);
        assert_eq!(plan.rewritten_sqls.get("n2").unwrap(), &vec![
            "select * from orders_0003 where id = 7".to_string()
        ]);
        assert!(!plan.rewritten_sqls.contains_key("n1"));
    }

    #[test]
    fn s1b_qualified_key_column_rewritten_to_sub_table() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = select_where(Expr::Eq(
            Box::new(Expr::Column(crate::ast::ColumnRef {
                table: Some("orders".into()),
                name: "id".into(),
            })),
            Box::new(Expr::int(7)),
        ));
        let plan = build_select(&stmt, &router, rule).unwrap();
        assert_eq!(plan.route_table_indexs, vec![3]);
        assert_eq!(plan.rewritten_sqls.get("n2").unwrap(), &vec![
            "select * from orders_0003 where orders_0003.id = 7".to_string()
        ]);
    }

    #[test]
    fn s2_in_splits_across_nodes() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = select_where(Expr::In(
            Box::new(Expr::column("id")),
            vec![Expr::int(1), Expr::int(5), Expr::int(6)],
        ));
        let plan = build_select(&stmt, &router, rule).unwrap();
        assert_eq!(plan.route_table_indexs, vec![1, 2]);
        assert_eq!(plan.route_node_indexs, vec![0, 1]);
    }

    #[test]
    fn s3_no_where_uses_default_node_unchanged() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = SelectStmt {
            where_clause: None,
            ..select_where(Expr::int(1))
        };
        let plan = build_select(&stmt, &router, rule).unwrap();
        assert_eq!(plan.rewritten_sqls.get("n1").unwrap(), &vec![
            "select * from orders".to_string()
        ]);
        assert!(plan.route_table_indexs.is_empty());
    }

    #[test]
    fn s4_update_key_rejected() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = UpdateStmt {
            comments: vec![],
            table: TableRef::new("orders"),
            set_exprs: vec![("id".into(), Expr::int(2))],
            where_clause: Some(Expr::Eq(Box::new(Expr::column("id")), Box::new(Expr::int(1)))),
            order_by: None,
            limit: None,
        };
        let err = build_update(&stmt, &router, rule).unwrap_err();
        assert_eq!(err, RouterError::UpdateKey("id".into()));
    }

    #[test]
    fn s6_insert_in_multi_rejected() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = InsertStmt {
            comments: vec![],
            table: TableRef::new("orders"),
            columns: vec!["id".into(), "val".into()],
            rows: vec![
                vec![Expr::int(1), Expr::string("a")],
                vec![Expr::int(2), Expr::string("b")],
            ],
            on_duplicate_key_update: None,
            select: None,
        };
        let err = build_insert(&stmt, rule).unwrap_err();
        assert_eq!(err, RouterError::InsertInMulti);
    }

    #[test]
    fn s5_insert_single_node_merges_rows() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = InsertStmt {
            comments: vec![],
            table: TableRef::new("orders"),
            columns: vec!["id".into(), "val".into()],
            rows: vec![
                vec![Expr::int(1), Expr::string("a")],
                vec![Expr::int(5), Expr::string("b")],
            ],
            on_duplicate_key_update: None,
            select: None,
        };
        let plan = build_insert(&stmt, rule).unwrap();
        assert_eq!(plan.route_table_indexs, vec![1]);
        assert_eq!(plan.route_node_indexs, vec![0]);
    }

    #[test]
    fn s7_default_table_unchanged() {
        let router = shop_router();
        let rule = router.get_rule("users");
        let stmt = DeleteStmt {
            comments: vec![],
            table: TableRef::new("users"),
            where_clause: Some(Expr::Eq(Box::new(Expr::column("x")), Box::new(Expr::int(1)))),
            order_by: None,
            limit: None,
        };
        let plan = build_delete(&stmt, &router, rule).unwrap();
        assert_eq!(
            plan.rewritten_sqls.get("n1").unwrap(),
            &vec!["delete from users where x = 1".to_string()]
        );
    }

    #[test]
    fn no_criteria_when_key_untouched() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = select_where(Expr::Eq(
            Box::new(Expr::column("other")),
            Box::new(Expr::int(1)),
        ));
        let err = build_select(&stmt, &router, rule).unwrap_err();
        assert_eq!(err, RouterError::NoCriteria);
    }

    #[test]
    fn select_in_insert_rejected() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let stmt = InsertStmt {
            comments: vec![],
            table: TableRef::new("orders"),
            columns: vec!["id".into()],
            rows: vec![],
            on_duplicate_key_update: None,
            select: Some(Box::new(select_where(Expr::int(1)))),
        };
        let err = build_insert(&stmt, rule).unwrap_err();
        assert_eq!(err, RouterError::SelectInInsert);
    }

    #[test]
    fn monotonicity_and_never_enlarges() {
        let router = shop_router();
        let rule = router.get_rule("orders");
        let base = select_where(Expr::In(
            Box::new(Expr::column("id")),
            vec![Expr::int(1), Expr::int(2), Expr::int(3)],
        ));
        let plan_base = build_select(&base, &router, rule).unwrap();

        let strengthened = select_where(Expr::And(
            Box::new(base.where_clause.clone().unwrap()),
            Box::new(Expr::Eq(Box::new(Expr::column("id")), Box::new(Expr::int(1)))),
        ));
        let plan_strengthened = build_select(&strengthened, &router, rule).unwrap();

        assert!(plan_strengthened.route_table_indexs.len() <= plan_base.route_table_indexs.len());
    }
}
