//! Structural cache keys.
//!
//! A key describes a statement's shape: tables, columns, operators, bind
//! names and the *types* of literals, but never literal values. Two
//! statements that differ only in literal values produce equal keys.

use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use siphasher::sip::SipHasher13;

use crate::expr::Expr;
use crate::schema::Table;
use crate::statement::Statement;

/// A structural cache key with a precomputed 64-bit fingerprint.
#[derive(Debug, Clone)]
pub struct CacheKey {
    repr: Arc<str>,
    digest: u64,
}

impl CacheKey {
    /// Creates a key from its canonical representation.
    pub fn new(repr: impl Into<Arc<str>>) -> Self {
        let repr = repr.into();
        let mut hasher = SipHasher13::new();
        hasher.write(repr.as_bytes());
        Self {
            digest: hasher.finish(),
            repr,
        }
    }

    /// Returns the canonical representation.
    pub fn repr(&self) -> &str {
        &self.repr
    }

    /// Returns the fingerprint.
    pub fn digest(&self) -> u64 {
        self.digest
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.repr == other.repr
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.digest);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.digest)
    }
}

/// Why a statement cannot be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoKeyReason {
    /// Schema-changing statement.
    Ddl,
    /// Inline literal list of arbitrary length.
    LiteralList,
    /// Custom element that declared itself unsafe to cache.
    UncacheableElement(String),
    /// Custom element that did not declare cache safety.
    UndeclaredElement(String),
    /// Custom type that declared itself unsafe to cache.
    UncacheableType(String),
    /// Custom type that did not declare cache safety.
    UndeclaredType(String),
}

impl NoKeyReason {
    /// Name of the custom construct that never declared cache safety, if
    /// that is the reason.
    pub fn undeclared(&self) -> Option<&str> {
        match self {
            NoKeyReason::UndeclaredElement(name) | NoKeyReason::UndeclaredType(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NoKeyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoKeyReason::Ddl => write!(f, "DDL statement"),
            NoKeyReason::LiteralList => write!(f, "inline literal list"),
            NoKeyReason::UncacheableElement(name) => write!(f, "element {name} is not cacheable"),
            NoKeyReason::UndeclaredElement(name) => {
                write!(f, "element {name} does not declare cache_ok")
            }
            NoKeyReason::UncacheableType(name) => write!(f, "type {name} is not cacheable"),
            NoKeyReason::UndeclaredType(name) => write!(f, "type {name} does not declare cache_ok"),
        }
    }
}

/// Result of generating a statement's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The statement has a stable structural key.
    Key(CacheKey),
    /// The statement must bypass the cache.
    NoKey(NoKeyReason),
}

/// Returns the key fragment of a single expression.
pub(crate) fn expr_key(expr: &Expr) -> Result<String, NoKeyReason> {
    let mut buf = String::new();
    write_expr(expr, &mut buf)?;
    Ok(buf)
}

impl Statement {
    /// Generates the statement's structural cache key.
    pub fn cache_key(&self) -> KeyOutcome {
        let mut buf = String::new();
        match write_statement(self, &mut buf) {
            Ok(()) => KeyOutcome::Key(CacheKey::new(buf)),
            Err(reason) => KeyOutcome::NoKey(reason),
        }
    }
}

type KeyResult = Result<(), NoKeyReason>;

fn write_statement(stmt: &Statement, buf: &mut String) -> KeyResult {
    buf.push_str(stmt.kind());
    match stmt {
        Statement::CreateTable(_) | Statement::DropTable(_) => return Err(NoKeyReason::Ddl),
        Statement::Text(clause) => {
            // Columns are part of the result metadata.
            let _ = write!(buf, "({})[{}]", clause.sql, clause.columns.join(","));
            return Ok(());
        }
        Statement::Select(select) => {
            if let Some(table) = &select.from {
                write_table(table, buf);
            }
            buf.push_str(" cols(");
            if select.columns.is_empty() {
                // `*` expands to the table's columns.
                for column in select.from.iter().flat_map(|table| table.columns()) {
                    let type_key = column.sql_type.key()?;
                    let _ = write!(buf, "*{}:{type_key},", column.name);
                }
            }
            for column in &select.columns {
                write_expr(column, buf)?;
                buf.push(',');
            }
            buf.push(')');
            if let Some(filter) = &select.filter {
                buf.push_str(" where(");
                write_expr(filter, buf)?;
                buf.push(')');
            }
            for (expr, desc) in &select.order_by {
                buf.push_str(" order(");
                write_expr(expr, buf)?;
                buf.push_str(if *desc { " desc)" } else { ")" });
            }
            if let Some(limit) = &select.limit {
                buf.push_str(" limit(");
                write_expr(limit, buf)?;
                buf.push(')');
            }
        }
        Statement::Insert(insert) => {
            write_table(&insert.table, buf);
            for (column, expr) in &insert.values {
                let _ = write!(buf, " {column}=");
                write_expr(expr, buf)?;
            }
        }
        Statement::Update(update) => {
            write_table(&update.table, buf);
            for (column, expr) in &update.assignments {
                let _ = write!(buf, " set {column}=");
                write_expr(expr, buf)?;
            }
            if let Some(filter) = &update.filter {
                buf.push_str(" where(");
                write_expr(filter, buf)?;
                buf.push(')');
            }
        }
        Statement::Delete(delete) => {
            write_table(&delete.table, buf);
            if let Some(filter) = &delete.filter {
                buf.push_str(" where(");
                write_expr(filter, buf)?;
                buf.push(')');
            }
        }
    }
    Ok(())
}

fn write_table(table: &Table, buf: &mut String) {
    match table.schema_name() {
        Some(schema) => {
            let _ = write!(buf, " table({schema}.{})", table.name());
        }
        None => {
            let _ = write!(buf, " table({})", table.name());
        }
    }
}

fn write_expr(expr: &Expr, buf: &mut String) -> KeyResult {
    match expr {
        Expr::Column(column) => {
            let type_key = column.sql_type.key()?;
            let _ = write!(buf, "col({}:{type_key})", column.name);
        }
        Expr::Literal(value) => {
            let _ = write!(buf, "lit:{}", value.type_tag());
        }
        Expr::BindParam { name, .. } => {
            let _ = write!(buf, "bind:{name}");
        }
        Expr::Binary { left, op, right } => {
            buf.push('(');
            write_expr(left, buf)?;
            let _ = write!(buf, " {op} ");
            write_expr(right, buf)?;
            buf.push(')');
        }
        Expr::Not(inner) => {
            buf.push_str("not(");
            write_expr(inner, buf)?;
            buf.push(')');
        }
        Expr::IsNull { expr, negated } => {
            buf.push_str(if *negated { "notnull(" } else { "isnull(" });
            write_expr(expr, buf)?;
            buf.push(')');
        }
        Expr::InList {
            expr,
            name,
            negated,
            ..
        } => {
            buf.push_str(if *negated { "notin(" } else { "in(" });
            write_expr(expr, buf)?;
            match name {
                Some(name) => {
                    let _ = write!(buf, ":expanding:{name})");
                }
                None => buf.push_str(":expanding)"),
            }
        }
        Expr::LiteralIn { .. } => return Err(NoKeyReason::LiteralList),
        Expr::Custom(element) => match element.cache_ok() {
            Some(true) => {
                let _ = write!(buf, "custom({})", element.cache_key());
            }
            Some(false) => {
                return Err(NoKeyReason::UncacheableElement(element.name().to_string()))
            }
            None => return Err(NoKeyReason::UndeclaredElement(element.name().to_string())),
        },
    }
    Ok(())
}
