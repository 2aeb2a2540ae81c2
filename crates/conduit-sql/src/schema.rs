//! Table and column metadata.

use std::sync::Arc;

use crate::error::{SqlError, SqlResult};
use crate::expr::{ColumnRef, Expr};
use crate::types::SqlType;

/// A column definition.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    pub sql_type: SqlType,
}

#[derive(Debug)]
struct TableInner {
    name: String,
    schema: Option<String>,
    columns: Vec<Column>,
}

/// A named table, optionally qualified by a schema.
///
/// Tables are cheap to clone and shared by every statement built from them.
///
/// # Example
///
/// ```rust
/// use conduit_sql::{SqlType, Table};
///
/// let users = Table::new("users")
///     .column("id", SqlType::Integer)
///     .column("name", SqlType::Text);
///
/// assert_eq!(users.columns().len(), 2);
/// assert!(users.c("name").is_ok());
/// assert!(users.c("missing").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    /// Creates a table with no columns and no schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TableInner {
                name: name.into(),
                schema: None,
                columns: Vec::new(),
            }),
        }
    }

    /// Sets the schema the table lives in.
    pub fn schema(self, schema: impl Into<String>) -> Self {
        self.rebuild(|inner| inner.schema = Some(schema.into()))
    }

    /// Adds a column.
    pub fn column(self, name: impl Into<String>, sql_type: SqlType) -> Self {
        let column = Column {
            name: name.into(),
            sql_type,
        };
        self.rebuild(|inner| inner.columns.push(column))
    }

    fn rebuild(self, f: impl FnOnce(&mut TableInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => TableInner {
                name: shared.name.clone(),
                schema: shared.schema.clone(),
                columns: shared.columns.clone(),
            },
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the schema name, if any.
    pub fn schema_name(&self) -> Option<&str> {
        self.inner.schema.as_deref()
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[Column] {
        &self.inner.columns
    }

    /// Returns an expression referencing the named column.
    pub fn c(&self, name: &str) -> SqlResult<Expr> {
        self.inner
            .columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| {
                Expr::Column(ColumnRef {
                    name: column.name.clone(),
                    sql_type: column.sql_type.clone(),
                })
            })
            .ok_or_else(|| SqlError::UnknownColumn {
                table: self.inner.name.clone(),
                column: name.to_string(),
            })
    }

    /// Returns expressions for every column, in declaration order.
    pub fn all_columns(&self) -> Vec<Expr> {
        self.inner
            .columns
            .iter()
            .map(|column| {
                Expr::Column(ColumnRef {
                    name: column.name.clone(),
                    sql_type: column.sql_type.clone(),
                })
            })
            .collect()
    }
}
