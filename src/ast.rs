//! The statement AST this crate's routing logic consumes.
//!
//! The SQL parser that produces this tree lives upstream of this crate
//! (see `spec.md` §6); this module only types the shape of that
//! contract — the clauses the rewriter in [`crate::plan`] must
//! preserve — and carries its own `render()` because no off-the-shelf
//! deparser understands `REPLACE` / `ON DUPLICATE KEY UPDATE`.

use std::fmt;

/// A table reference as it appears in a statement, before rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A literal value appearing in a predicate or `VALUES` row.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    String(String),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(v) => write!(f, "{v}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Null => write!(f, "null"),
        }
    }
}

/// A column reference, optionally table-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    /// Replace a `table` qualifier equal to `logical` (case-insensitive)
    /// with `physical`; leaves unqualified or differently-qualified
    /// references untouched.
    fn requalify(&self, logical: &str, physical: &str) -> ColumnRef {
        match &self.table {
            Some(t) if t.eq_ignore_ascii_case(logical) => ColumnRef {
                table: Some(physical.to_string()),
                name: self.name.clone(),
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A boolean/comparison expression tree over a `WHERE` clause or a
/// `VALUES` row. Covers exactly the shapes §4.3 of `spec.md` reasons
/// about; everything else the evaluator can't interpret is carried as
/// [`Expr::Opaque`] and rendered back verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Paren(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    NotEq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
    Column(ColumnRef),
    Literal(Literal),
    Param(usize),
    /// A parameter placeholder, function call, subquery, or anything
    /// else the renderer reproduces verbatim but the evaluator treats
    /// as an opaque leaf (conservatively routes to every sub-table).
    Opaque(String),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::new(name))
    }

    pub fn int(v: i64) -> Self {
        Expr::Literal(Literal::Integer(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(v.into()))
    }

    /// Retarget every `ColumnRef` in this tree qualified with `logical`
    /// (e.g. `orders.id`) to `physical` (e.g. `orders_0007.id`). The
    /// rewriter applies this to `WHERE`/`SET` expressions so a
    /// table-qualified shard-key reference is substituted the same way
    /// the `FROM`/`INTO`/`UPDATE` table itself is (`spec.md` §1: "every
    /// occurrence inside the statement's syntax tree").
    pub fn requalify(&self, logical: &str, physical: &str) -> Expr {
        let rq = |e: &Expr| e.requalify(logical, physical);
        match self {
            Expr::And(a, b) => Expr::And(Box::new(rq(a)), Box::new(rq(b))),
            Expr::Or(a, b) => Expr::Or(Box::new(rq(a)), Box::new(rq(b))),
            Expr::Not(a) => Expr::Not(Box::new(rq(a))),
            Expr::Paren(a) => Expr::Paren(Box::new(rq(a))),
            Expr::Eq(l, r) => Expr::Eq(Box::new(rq(l)), Box::new(rq(r))),
            Expr::NotEq(l, r) => Expr::NotEq(Box::new(rq(l)), Box::new(rq(r))),
            Expr::Lt(l, r) => Expr::Lt(Box::new(rq(l)), Box::new(rq(r))),
            Expr::Le(l, r) => Expr::Le(Box::new(rq(l)), Box::new(rq(r))),
            Expr::Gt(l, r) => Expr::Gt(Box::new(rq(l)), Box::new(rq(r))),
            Expr::Ge(l, r) => Expr::Ge(Box::new(rq(l)), Box::new(rq(r))),
            Expr::In(col, values) => {
                Expr::In(Box::new(rq(col)), values.iter().map(rq).collect())
            }
            Expr::Between(col, lo, hi) => {
                Expr::Between(Box::new(rq(col)), Box::new(rq(lo)), Box::new(rq(hi)))
            }
            Expr::Column(c) => Expr::Column(c.requalify(logical, physical)),
            Expr::Literal(_) | Expr::Param(_) | Expr::Opaque(_) => self.clone(),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every whole-identifier-qualified reference to `logical`
/// (e.g. `orders.id`) with `physical` (e.g. `orders_0007.id`) inside a
/// raw SQL fragment. Used for the clauses this crate keeps as opaque
/// text (`select_list`, `group_by`, `having`, `order_by`,
/// `on_duplicate_key_update`) rather than a structured expression tree,
/// so a qualified reference there is substituted the same as in `WHERE`.
fn rewrite_qualifier(text: &str, logical: &str, physical: &str) -> String {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = String::with_capacity(text.len());
    let mut prev_ident = false;
    let mut idx = 0;
    while idx < chars.len() {
        let (byte_pos, c) = chars[idx];
        if !prev_ident {
            if let Some(rest) = text.get(byte_pos..) {
                let matches = rest.len() > logical.len()
                    && rest.is_char_boundary(logical.len())
                    && rest.as_bytes()[logical.len()] == b'.'
                    && rest[..logical.len()].eq_ignore_ascii_case(logical);
                if matches {
                    out.push_str(physical);
                    out.push('.');
                    let target_byte = byte_pos + logical.len() + 1;
                    while idx < chars.len() && chars[idx].0 < target_byte {
                        idx += 1;
                    }
                    prev_ident = false;
                    continue;
                }
            }
        }
        out.push(c);
        prev_ident = is_ident_char(c);
        idx += 1;
    }
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(a, b) => write!(f, "{a} and {b}"),
            Expr::Or(a, b) => write!(f, "{a} or {b}"),
            Expr::Not(a) => write!(f, "not {a}"),
            Expr::Paren(a) => write!(f, "({a})"),
            Expr::Eq(l, r) => write!(f, "{l} = {r}"),
            Expr::NotEq(l, r) => write!(f, "{l} != {r}"),
            Expr::Lt(l, r) => write!(f, "{l} < {r}"),
            Expr::Le(l, r) => write!(f, "{l} <= {r}"),
            Expr::Gt(l, r) => write!(f, "{l} > {r}"),
            Expr::Ge(l, r) => write!(f, "{l} >= {r}"),
            Expr::In(col, values) => {
                write!(f, "{col} in (")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Expr::Between(col, lo, hi) => write!(f, "{col} between {lo} and {hi}"),
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(l) => write!(f, "{l}"),
            Expr::Param(n) => write!(f, "${n}"),
            Expr::Opaque(s) => write!(f, "{s}"),
        }
    }
}

fn requalify_rows(rows: &[Vec<Expr>], logical: &str, physical: &str) -> Vec<Vec<Expr>> {
    rows.iter()
        .map(|row| row.iter().map(|e| e.requalify(logical, physical)).collect())
        .collect()
}

fn render_rows(rows: &[Vec<Expr>]) -> String {
    rows.iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(|e| e.to_string()).collect();
            format!("({})", values.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT ...`
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub comments: Vec<String>,
    pub distinct: bool,
    /// Rendered select-list (`*`, `id, val`, ...); not interpreted by routing.
    pub select_list: String,
    pub table: TableRef,
    pub where_clause: Option<Expr>,
    pub group_by: Option<String>,
    pub having: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
    pub lock_clause: Option<String>,
}

impl SelectStmt {
    pub fn render(&self, physical_table: &str) -> String {
        let logical = &self.table.name;
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str(comment);
            out.push(' ');
        }
        out.push_str("select ");
        if self.distinct {
            out.push_str("distinct ");
        }
        out.push_str(&rewrite_qualifier(&self.select_list, logical, physical_table));
        out.push_str(" from ");
        out.push_str(physical_table);
        if let Some(where_clause) = &self.where_clause {
            out.push_str(" where ");
            out.push_str(&where_clause.requalify(logical, physical_table).to_string());
        }
        if let Some(group_by) = &self.group_by {
            out.push_str(" group by ");
            out.push_str(&rewrite_qualifier(group_by, logical, physical_table));
        }
        if let Some(having) = &self.having {
            out.push_str(" having ");
            out.push_str(&rewrite_qualifier(having, logical, physical_table));
        }
        if let Some(order_by) = &self.order_by {
            out.push_str(" order by ");
            out.push_str(&rewrite_qualifier(order_by, logical, physical_table));
        }
        if let Some(limit) = &self.limit {
            out.push_str(" limit ");
            out.push_str(limit);
        }
        if let Some(lock) = &self.lock_clause {
            out.push(' ');
            out.push_str(lock);
        }
        out
    }
}

/// `INSERT INTO ...`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub comments: Vec<String>,
    pub table: TableRef,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
    pub on_duplicate_key_update: Option<String>,
    /// `Some` only for the (rejected) `INSERT ... SELECT ...` shape.
    pub select: Option<Box<SelectStmt>>,
}

impl InsertStmt {
    pub fn render(&self, physical_table: &str) -> String {
        let logical = &self.table.name;
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str(comment);
            out.push(' ');
        }
        out.push_str("insert into ");
        out.push_str(physical_table);
        if !self.columns.is_empty() {
            out.push_str(" (");
            out.push_str(&self.columns.join(", "));
            out.push(')');
        }
        out.push_str(" values ");
        out.push_str(&render_rows(&requalify_rows(&self.rows, logical, physical_table)));
        if let Some(odku) = &self.on_duplicate_key_update {
            out.push_str(" on duplicate key update ");
            out.push_str(&rewrite_qualifier(odku, logical, physical_table));
        }
        out
    }
}

/// `REPLACE INTO ...`
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceStmt {
    pub comments: Vec<String>,
    pub table: TableRef,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
    /// `Some` only for the (rejected) `REPLACE ... SELECT ...` shape.
    pub select: Option<Box<SelectStmt>>,
}

impl ReplaceStmt {
    pub fn render(&self, physical_table: &str) -> String {
        let logical = &self.table.name;
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str(comment);
            out.push(' ');
        }
        out.push_str("replace into ");
        out.push_str(physical_table);
        if !self.columns.is_empty() {
            out.push_str(" (");
            out.push_str(&self.columns.join(", "));
            out.push(')');
        }
        out.push_str(" values ");
        out.push_str(&render_rows(&requalify_rows(&self.rows, logical, physical_table)));
        out
    }
}

/// `UPDATE ...`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub comments: Vec<String>,
    pub table: TableRef,
    /// `(column, assigned expression)` pairs, in source order.
    pub set_exprs: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
}

impl UpdateStmt {
    pub fn render(&self, physical_table: &str) -> String {
        let logical = &self.table.name;
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str(comment);
            out.push(' ');
        }
        out.push_str("update ");
        out.push_str(physical_table);
        out.push_str(" set ");
        let assignments: Vec<String> = self
            .set_exprs
            .iter()
            .map(|(col, expr)| format!("{col} = {}", expr.requalify(logical, physical_table)))
            .collect();
        out.push_str(&assignments.join(", "));
        if let Some(where_clause) = &self.where_clause {
            out.push_str(" where ");
            out.push_str(&where_clause.requalify(logical, physical_table).to_string());
        }
        if let Some(order_by) = &self.order_by {
            out.push_str(" order by ");
            out.push_str(order_by);
        }
        if let Some(limit) = &self.limit {
            out.push_str(" limit ");
            out.push_str(limit);
        }
        out
    }
}

/// `DELETE FROM ...`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub comments: Vec<String>,
    pub table: TableRef,
    pub where_clause: Option<Expr>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
}

impl DeleteStmt {
    pub fn render(&self, physical_table: &str) -> String {
        let logical = &self.table.name;
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str(comment);
            out.push(' ');
        }
        out.push_str("delete from ");
        out.push_str(physical_table);
        if let Some(where_clause) = &self.where_clause {
            out.push_str(" where ");
            out.push_str(&where_clause.requalify(logical, physical_table).to_string());
        }
        if let Some(order_by) = &self.order_by {
            out.push_str(" order by ");
            out.push_str(order_by);
        }
        if let Some(limit) = &self.limit {
            out.push_str(" limit ");
            out.push_str(limit);
        }
        out
    }
}

/// A parsed statement, tagged by family. Anything the upstream parser
/// hands back that isn't one of the five routable kinds is carried as
/// [`Statement::Other`] and always refused with `NoPlan`.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Replace(ReplaceStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Other(String),
}

impl Statement {
    /// The logical table this statement targets, as written by the client.
    pub fn table(&self) -> Option<&TableRef> {
        match self {
            Statement::Select(s) => Some(&s.table),
            Statement::Insert(s) => Some(&s.table),
            Statement::Replace(s) => Some(&s.table),
            Statement::Update(s) => Some(&s.table),
            Statement::Delete(s) => Some(&s.table),
            Statement::Other(_) => None,
        }
    }
}
