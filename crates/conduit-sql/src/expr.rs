//! SQL expressions.
//!
//! Expressions are plain data. Literal values embedded in an expression are
//! never part of the statement's structural key; the compiler turns each of
//! them into a bound parameter.

use std::fmt;
use std::sync::Arc;

use conduit_common::Value;

use crate::types::SqlType;

/// A reference to a table column.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub sql_type: SqlType,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl BinaryOp {
    /// Returns the SQL operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Returns true for `AND` and `OR`.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A user-defined SQL construct.
///
/// As with [`crate::CustomType`], caching is opt-in: an element whose
/// `cache_ok()` is not `Some(true)` makes every statement containing it
/// uncacheable.
pub trait CustomElement: fmt::Debug + Send + Sync {
    /// Element name, used in diagnostics.
    fn name(&self) -> &str;

    /// Renders the element as SQL text.
    fn render(&self) -> String;

    /// Whether the element is safe to cache.
    fn cache_ok(&self) -> Option<bool> {
        None
    }

    /// Key fragment identifying the element's structure.
    fn cache_key(&self) -> String {
        format!("{}:{}", self.name(), self.render())
    }
}

/// A SQL expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference.
    Column(ColumnRef),

    /// Literal value, compiled as an anonymous bound parameter.
    Literal(Value),

    /// Named bound parameter. The value may be given here or at execution.
    BindParam {
        /// Parameter name.
        name: String,
        /// Value, if known when the statement is built.
        value: Option<Value>,
    },

    /// Binary operation.
    Binary {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },

    /// Logical negation.
    Not(Box<Expr>),

    /// `IS NULL` / `IS NOT NULL`.
    IsNull {
        /// Tested expression.
        expr: Box<Expr>,
        /// True for `IS NOT NULL`.
        negated: bool,
    },

    /// `IN` against a bound list, compiled to a single expanding parameter so
    /// lists of any length share one compiled form.
    InList {
        /// Tested expression.
        expr: Box<Expr>,
        /// Parameter name; anonymous lists are numbered like literals.
        name: Option<String>,
        /// List values.
        values: Vec<Value>,
        /// True for `NOT IN`.
        negated: bool,
    },

    /// `IN` against a list rendered inline. Statements containing one are
    /// never cached.
    LiteralIn {
        /// Tested expression.
        expr: Box<Expr>,
        /// List values.
        values: Vec<Value>,
        /// True for `NOT IN`.
        negated: bool,
    },

    /// User-defined construct.
    Custom(Arc<dyn CustomElement>),
}

/// Creates a literal expression.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// Creates a named bound parameter whose value is supplied at execution.
pub fn bindparam(name: impl Into<String>) -> Expr {
    Expr::BindParam {
        name: name.into(),
        value: None,
    }
}

/// Creates a named bound parameter with a value.
pub fn bindparam_with(name: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::BindParam {
        name: name.into(),
        value: Some(value.into()),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right.into()),
        }
    }

    /// `self = right`
    pub fn eq(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    /// `self != right`
    pub fn ne(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotEq, right)
    }

    /// `self < right`
    pub fn lt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    /// `self <= right`
    pub fn le(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::LtEq, right)
    }

    /// `self > right`
    pub fn gt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    /// `self >= right`
    pub fn ge(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::GtEq, right)
    }

    /// `self AND right`
    pub fn and(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    /// `self OR right`
    pub fn or(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, right)
    }

    /// `NOT self`
    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `self IN (...)` with the list bound as one expanding parameter.
    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            name: None,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// `self NOT IN (...)` with the list bound as one expanding parameter.
    pub fn not_in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            name: None,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// `self IN (...)` with the list rendered inline.
    pub fn literal_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::LiteralIn {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(value.into())
    }
}

/// String slices convert to literals, never to column references.
impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(value.into())
    }
}

impl<F: CustomElement + 'static> From<Arc<F>> for Expr {
    fn from(element: Arc<F>) -> Self {
        Expr::Custom(element)
    }
}
