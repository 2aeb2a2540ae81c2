//! Statement constructs.
//!
//! Statements are built with the free functions [`select`], [`insert`],
//! [`update`], [`delete`], [`text`], [`create_table`] and [`drop_table`]
//! and are converted into a [`Statement`] for execution.

use conduit_common::Value;

use crate::expr::Expr;
use crate::params::{BindValue, BoundParams};
use crate::schema::Table;

/// A `SELECT` statement.
#[derive(Debug, Clone)]
pub struct Select {
    pub(crate) columns: Vec<Expr>,
    pub(crate) from: Option<Table>,
    pub(crate) filter: Option<Expr>,
    pub(crate) order_by: Vec<(Expr, bool)>,
    pub(crate) limit: Option<Expr>,
}

/// Creates a `SELECT` of the given columns.
pub fn select(columns: impl IntoIterator<Item = Expr>) -> Select {
    Select {
        columns: columns.into_iter().collect(),
        from: None,
        filter: None,
        order_by: Vec::new(),
        limit: None,
    }
}

/// Creates a `SELECT` of every column of `table`.
pub fn select_from(table: &Table) -> Select {
    select(table.all_columns()).from(table)
}

impl Select {
    /// Sets the `FROM` table.
    pub fn from(mut self, table: &Table) -> Self {
        self.from = Some(table.clone());
        self
    }

    /// Adds a `WHERE` criterion, joined to any existing one with `AND`.
    pub fn filter(mut self, criterion: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(criterion),
            None => criterion,
        });
        self
    }

    /// Adds an ascending `ORDER BY` term.
    pub fn order_by(mut self, expr: Expr) -> Self {
        self.order_by.push((expr, false));
        self
    }

    /// Adds a descending `ORDER BY` term.
    pub fn order_by_desc(mut self, expr: Expr) -> Self {
        self.order_by.push((expr, true));
        self
    }

    /// Sets `LIMIT`. The count is bound like any other literal.
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(Expr::Literal(Value::Integer(count)));
        self
    }

    /// Names of the result columns.
    ///
    /// A select without explicit columns returns every column of its
    /// `FROM` table.
    pub fn column_names(&self) -> Vec<String> {
        if self.columns.is_empty() {
            return self
                .from
                .iter()
                .flat_map(|table| table.columns())
                .map(|column| column.name.clone())
                .collect();
        }
        self.columns
            .iter()
            .enumerate()
            .map(|(i, expr)| match expr {
                Expr::Column(column) => column.name.clone(),
                _ => format!("expr_{}", i + 1),
            })
            .collect()
    }
}

/// An `INSERT` of a single row.
#[derive(Debug, Clone)]
pub struct Insert {
    pub(crate) table: Table,
    pub(crate) values: Vec<(String, Expr)>,
}

/// Creates an `INSERT` into `table`.
pub fn insert(table: &Table) -> Insert {
    Insert {
        table: table.clone(),
        values: Vec::new(),
    }
}

impl Insert {
    /// Sets the value of a column.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }
}

/// An `UPDATE` statement.
#[derive(Debug, Clone)]
pub struct Update {
    pub(crate) table: Table,
    pub(crate) assignments: Vec<(String, Expr)>,
    pub(crate) filter: Option<Expr>,
}

/// Creates an `UPDATE` of `table`.
pub fn update(table: &Table) -> Update {
    Update {
        table: table.clone(),
        assignments: Vec::new(),
        filter: None,
    }
}

impl Update {
    /// Adds a `SET` assignment.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    /// Adds a `WHERE` criterion, joined to any existing one with `AND`.
    pub fn filter(mut self, criterion: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(criterion),
            None => criterion,
        });
        self
    }
}

/// A `DELETE` statement.
#[derive(Debug, Clone)]
pub struct Delete {
    pub(crate) table: Table,
    pub(crate) filter: Option<Expr>,
}

/// Creates a `DELETE` from `table`.
pub fn delete(table: &Table) -> Delete {
    Delete {
        table: table.clone(),
        filter: None,
    }
}

impl Delete {
    /// Adds a `WHERE` criterion, joined to any existing one with `AND`.
    pub fn filter(mut self, criterion: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(criterion),
            None => criterion,
        });
        self
    }
}

/// Textual SQL with `:name` bind markers.
///
/// Unlike raw driver SQL, a text clause is compiled and cached: its key is
/// the text itself. Schema translation never applies to it.
#[derive(Debug, Clone)]
pub struct TextClause {
    pub(crate) sql: String,
    pub(crate) params: BoundParams,
    pub(crate) columns: Vec<String>,
}

/// Creates a text clause.
pub fn text(sql: impl Into<String>) -> TextClause {
    TextClause {
        sql: sql.into(),
        params: BoundParams::new(),
        columns: Vec::new(),
    }
}

impl TextClause {
    /// Binds a value to a `:name` marker.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.set(name, BindValue::Scalar(value.into()));
        self
    }

    /// Declares the result column names.
    pub fn columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.columns = names.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Any executable statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// `SELECT`
    Select(Select),
    /// `INSERT`
    Insert(Insert),
    /// `UPDATE`
    Update(Update),
    /// `DELETE`
    Delete(Delete),
    /// Textual SQL.
    Text(TextClause),
    /// `CREATE TABLE`
    CreateTable(Table),
    /// `DROP TABLE`
    DropTable(Table),
}

/// Creates a `CREATE TABLE` statement.
pub fn create_table(table: &Table) -> Statement {
    Statement::CreateTable(table.clone())
}

/// Creates a `DROP TABLE` statement.
pub fn drop_table(table: &Table) -> Statement {
    Statement::DropTable(table.clone())
}

impl Statement {
    /// Returns a short name for the statement kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::Text(_) => "text",
            Statement::CreateTable(_) => "create_table",
            Statement::DropTable(_) => "drop_table",
        }
    }

    /// Returns true for schema-changing statements.
    pub fn is_ddl(&self) -> bool {
        matches!(self, Statement::CreateTable(_) | Statement::DropTable(_))
    }

    /// Visits every top-level expression in rendering order.
    pub(crate) fn for_each_expr<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match self {
            Statement::Select(select) => {
                for expr in &select.columns {
                    f(expr);
                }
                if let Some(filter) = &select.filter {
                    f(filter);
                }
                for (expr, _) in &select.order_by {
                    f(expr);
                }
                if let Some(limit) = &select.limit {
                    f(limit);
                }
            }
            Statement::Insert(insert) => {
                for (_, expr) in &insert.values {
                    f(expr);
                }
            }
            Statement::Update(update) => {
                for (_, expr) in &update.assignments {
                    f(expr);
                }
                if let Some(filter) = &update.filter {
                    f(filter);
                }
            }
            Statement::Delete(delete) => {
                if let Some(filter) = &delete.filter {
                    f(filter);
                }
            }
            Statement::Text(_) | Statement::CreateTable(_) | Statement::DropTable(_) => {}
        }
    }

    /// Extracts the parameter values carried by the statement.
    ///
    /// Anonymous literals are numbered in rendering order, matching the
    /// names the compiler assigns, so a cached compiled form can be reused
    /// with freshly extracted values.
    pub fn params(&self) -> BoundParams {
        let mut params = match self {
            Statement::Text(clause) => clause.params.clone(),
            _ => BoundParams::new(),
        };
        let mut anon = 0;
        self.for_each_expr(&mut |expr| collect_params(expr, &mut anon, &mut params));
        params
    }
}

fn collect_params(expr: &Expr, anon: &mut usize, params: &mut BoundParams) {
    match expr {
        Expr::Literal(value) => {
            *anon += 1;
            params.set(anon_name(*anon), BindValue::Scalar(value.clone()));
        }
        Expr::BindParam { name, value } => {
            if let Some(value) = value {
                params.set(name.clone(), BindValue::Scalar(value.clone()));
            }
        }
        Expr::Binary { left, right, .. } => {
            collect_params(left, anon, params);
            collect_params(right, anon, params);
        }
        Expr::Not(inner) | Expr::IsNull { expr: inner, .. } => {
            collect_params(inner, anon, params);
        }
        Expr::InList {
            expr, name, values, ..
        } => {
            collect_params(expr, anon, params);
            let name = match name {
                Some(name) => name.clone(),
                None => {
                    *anon += 1;
                    anon_name(*anon)
                }
            };
            params.set_list(name, values.clone());
        }
        Expr::LiteralIn { expr, .. } => collect_params(expr, anon, params),
        Expr::Column(_) | Expr::Custom(_) => {}
    }
}

/// Name given to the `n`th anonymous parameter.
pub(crate) fn anon_name(n: usize) -> String {
    format!("param_{n}")
}

impl From<Select> for Statement {
    fn from(select: Select) -> Self {
        Statement::Select(select)
    }
}

impl From<Insert> for Statement {
    fn from(insert: Insert) -> Self {
        Statement::Insert(insert)
    }
}

impl From<Update> for Statement {
    fn from(update: Update) -> Self {
        Statement::Update(update)
    }
}

impl From<Delete> for Statement {
    fn from(delete: Delete) -> Self {
        Statement::Delete(delete)
    }
}

impl From<TextClause> for Statement {
    fn from(clause: TextClause) -> Self {
        Statement::Text(clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::bindparam;
    use crate::types::SqlType;

    fn users() -> Table {
        Table::new("users")
            .column("id", SqlType::Integer)
            .column("name", SqlType::Text)
    }

    #[test]
    fn test_params_in_rendering_order() {
        let users = users();
        let stmt: Statement = select_from(&users)
            .filter(users.c("id").unwrap().gt(10))
            .filter(users.c("name").unwrap().in_list(["a", "b"]))
            .limit(5)
            .into();

        let params = stmt.params();
        assert_eq!(params.get("param_1"), Some(&BindValue::Scalar(Value::Integer(10))));
        assert_eq!(
            params.get("param_2"),
            Some(&BindValue::List(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(params.get("param_3"), Some(&BindValue::Scalar(Value::Integer(5))));
    }

    #[test]
    fn test_unvalued_bindparam_not_extracted() {
        let users = users();
        let stmt: Statement = select_from(&users)
            .filter(users.c("id").unwrap().eq(bindparam("user_id")))
            .into();
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn test_text_params() {
        let stmt: Statement = text("SELECT * FROM users WHERE id = :id").bind("id", 3).into();
        assert_eq!(stmt.params().get("id"), Some(&BindValue::Scalar(Value::Integer(3))));
        assert_eq!(stmt.kind(), "text");
    }

    #[test]
    fn test_column_names() {
        let users = users();
        let query = select(vec![users.c("name").unwrap(), Expr::Literal(Value::Integer(1))]);
        assert_eq!(query.column_names(), vec!["name", "expr_2"]);
        assert!(create_table(&users).is_ddl());

        let star = select(Vec::<Expr>::new()).from(&users);
        assert_eq!(star.column_names(), vec!["id", "name"]);
    }
}
