//! Statement compilation.
//!
//! Compiling walks a statement once and produces a [`CompiledStatement`]: a
//! sequence of SQL text segments interleaved with bind slots, expanding
//! `IN` slots and table references. The compiled form carries no parameter
//! values and no schema names from a translation map, so one compiled form
//! serves every execution of the same statement shape. [`CompiledStatement::render`]
//! produces the final driver SQL for one execution.

use std::collections::HashMap;
use std::fmt;
use std::mem;

use conduit_common::Value;

use crate::error::{SqlError, SqlResult};
use crate::expr::{BinaryOp, Expr};
use crate::params::{BindValue, BoundParams};
use crate::schema::Table;
use crate::statement::{anon_name, Statement};

/// Mapping from logical schema (`None` = no schema) to the schema rendered
/// at execution time (`None` = render unqualified).
pub type SchemaTranslateMap = HashMap<Option<String>, Option<String>>;

/// Placeholder syntax understood by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamStyle {
    /// `?`
    #[default]
    Qmark,
    /// `:1`, `:2`, ...
    Numeric,
    /// `:name`
    Named,
}

impl ParamStyle {
    fn write_placeholder(&self, sql: &mut String, name: &str, position: usize) {
        match self {
            ParamStyle::Qmark => sql.push('?'),
            ParamStyle::Numeric => {
                sql.push(':');
                sql.push_str(&position.to_string());
            }
            ParamStyle::Named => {
                sql.push(':');
                sql.push_str(name);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Bind(String),
    Expanding { name: String, negated: bool },
    Table { schema: Option<String>, name: String },
}

/// A bind slot in a compiled statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSlot {
    /// Parameter name.
    pub name: String,
    /// True for an expanding `IN` list.
    pub expanding: bool,
}

/// A compiled statement: the cacheable product of compilation.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    segments: Vec<Segment>,
    binds: Vec<BindSlot>,
    columns: Vec<String>,
    returns_rows: bool,
    style: ParamStyle,
}

/// SQL and positional parameters ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    /// Driver SQL.
    pub sql: String,
    /// Parameter values in placeholder order.
    pub params: Vec<Value>,
    /// Parameter names in placeholder order.
    pub names: Vec<String>,
}

impl CompiledStatement {
    /// Returns the bind slots in placeholder order.
    pub fn binds(&self) -> &[BindSlot] {
        &self.binds
    }

    /// Returns the result column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if executing the statement produces rows.
    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }

    /// Returns the placeholder style the statement was compiled for.
    pub fn param_style(&self) -> ParamStyle {
        self.style
    }

    /// Returns true if any bind slot is an expanding list.
    pub fn has_expanding(&self) -> bool {
        self.binds.iter().any(|slot| slot.expanding)
    }

    /// Returns true if the statement renders any schema-qualifiable table.
    pub fn has_tables(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Table { .. }))
    }

    /// Renders the statement for one execution.
    ///
    /// Expanding slots become one placeholder per list element and table
    /// schemas are looked up in `schema_map` when one is given.
    pub fn render(
        &self,
        params: &BoundParams,
        schema_map: Option<&SchemaTranslateMap>,
    ) -> SqlResult<RenderedStatement> {
        let mut sql = String::new();
        let mut values = Vec::with_capacity(self.binds.len());
        let mut names = Vec::with_capacity(self.binds.len());

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Bind(name) => match params.get(name) {
                    Some(BindValue::Scalar(value)) => {
                        self.style.write_placeholder(&mut sql, name, values.len() + 1);
                        values.push(value.clone());
                        names.push(name.clone());
                    }
                    Some(BindValue::List(_)) => return Err(SqlError::ParameterKind(name.clone())),
                    None => return Err(SqlError::MissingParameter(name.clone())),
                },
                Segment::Expanding { name, negated } => {
                    let list = match params.get(name) {
                        Some(BindValue::List(list)) => list,
                        Some(BindValue::Scalar(_)) => {
                            return Err(SqlError::ParameterKind(name.clone()))
                        }
                        None => return Err(SqlError::MissingParameter(name.clone())),
                    };
                    if list.is_empty() {
                        // Empty IN matches nothing; empty NOT IN matches everything.
                        sql.push_str(if *negated {
                            " NOT IN (NULL) OR 1 = 1"
                        } else {
                            " IN (NULL) AND 1 != 1"
                        });
                        continue;
                    }
                    sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                    for (i, value) in list.iter().enumerate() {
                        if i > 0 {
                            sql.push_str(", ");
                        }
                        let element = format!("{name}_{}", i + 1);
                        self.style.write_placeholder(&mut sql, &element, values.len() + 1);
                        values.push(value.clone());
                        names.push(element);
                    }
                    sql.push(')');
                }
                Segment::Table { schema, name } => {
                    let schema = match schema_map.and_then(|map| map.get(schema)) {
                        Some(translated) => translated.as_deref(),
                        None => schema.as_deref(),
                    };
                    if let Some(schema) = schema {
                        sql.push_str(schema);
                        sql.push('.');
                    }
                    sql.push_str(name);
                }
            }
        }

        Ok(RenderedStatement {
            sql,
            params: values,
            names,
        })
    }
}

impl fmt::Display for CompiledStatement {
    /// Shows the compiled form: placeholders in the statement's style,
    /// expanding slots as `[EXPANDING_name]`, schemas untranslated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sql = String::new();
        let mut position = 0;
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Bind(name) => {
                    position += 1;
                    self.style.write_placeholder(&mut sql, name, position);
                }
                Segment::Expanding { name, negated } => {
                    let op = if *negated { "NOT IN" } else { "IN" };
                    sql.push_str(&format!(" {op} ([EXPANDING_{name}])"));
                }
                Segment::Table { schema, name } => {
                    if let Some(schema) = schema {
                        sql.push_str(schema);
                        sql.push('.');
                    }
                    sql.push_str(name);
                }
            }
        }
        f.write_str(&sql)
    }
}

/// Compiles statements for one placeholder style.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    style: ParamStyle,
}

impl Compiler {
    /// Creates a compiler.
    pub fn new(style: ParamStyle) -> Self {
        Self { style }
    }

    /// Returns the placeholder style.
    pub fn style(&self) -> ParamStyle {
        self.style
    }

    /// Compiles a statement.
    pub fn compile(&self, stmt: &Statement) -> SqlResult<CompiledStatement> {
        let mut w = Writer::default();
        let (columns, returns_rows) = match stmt {
            Statement::Select(select) => {
                w.push("SELECT ");
                if select.columns.is_empty() {
                    w.push("*");
                }
                for (i, column) in select.columns.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.expr(column)?;
                }
                if let Some(table) = &select.from {
                    w.push(" FROM ");
                    w.table(table);
                }
                if let Some(filter) = &select.filter {
                    w.push(" WHERE ");
                    w.expr(filter)?;
                }
                for (i, (expr, desc)) in select.order_by.iter().enumerate() {
                    w.push(if i == 0 { " ORDER BY " } else { ", " });
                    w.expr(expr)?;
                    if *desc {
                        w.push(" DESC");
                    }
                }
                if let Some(limit) = &select.limit {
                    w.push(" LIMIT ");
                    w.expr(limit)?;
                }
                (select.column_names(), true)
            }
            Statement::Insert(insert) => {
                if insert.values.is_empty() {
                    return Err(SqlError::Compile(format!(
                        "INSERT into '{}' has no values",
                        insert.table.name()
                    )));
                }
                w.push("INSERT INTO ");
                w.table(&insert.table);
                let names: Vec<&str> = insert.values.iter().map(|(c, _)| c.as_str()).collect();
                w.push(&format!(" ({}) VALUES (", names.join(", ")));
                for (i, (_, expr)) in insert.values.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.expr(expr)?;
                }
                w.push(")");
                (Vec::new(), false)
            }
            Statement::Update(update) => {
                if update.assignments.is_empty() {
                    return Err(SqlError::Compile(format!(
                        "UPDATE of '{}' has no assignments",
                        update.table.name()
                    )));
                }
                w.push("UPDATE ");
                w.table(&update.table);
                for (i, (column, expr)) in update.assignments.iter().enumerate() {
                    w.push(if i == 0 { " SET " } else { ", " });
                    w.push(column);
                    w.push(" = ");
                    w.expr(expr)?;
                }
                if let Some(filter) = &update.filter {
                    w.push(" WHERE ");
                    w.expr(filter)?;
                }
                (Vec::new(), false)
            }
            Statement::Delete(delete) => {
                w.push("DELETE FROM ");
                w.table(&delete.table);
                if let Some(filter) = &delete.filter {
                    w.push(" WHERE ");
                    w.expr(filter)?;
                }
                (Vec::new(), false)
            }
            Statement::Text(clause) => {
                w.text(&clause.sql);
                let returns_rows = !clause.columns.is_empty()
                    || clause
                        .sql
                        .trim_start()
                        .get(..6)
                        .is_some_and(|head| head.eq_ignore_ascii_case("select"));
                (clause.columns.clone(), returns_rows)
            }
            Statement::CreateTable(table) => {
                w.push("CREATE TABLE ");
                w.table(table);
                let columns: Vec<String> = table
                    .columns()
                    .iter()
                    .map(|column| format!("{} {}", column.name, column.sql_type.ddl()))
                    .collect();
                w.push(&format!(" ({})", columns.join(", ")));
                (Vec::new(), false)
            }
            Statement::DropTable(table) => {
                w.push("DROP TABLE ");
                w.table(table);
                (Vec::new(), false)
            }
        };

        w.flush();
        Ok(CompiledStatement {
            segments: w.segments,
            binds: w.binds,
            columns,
            returns_rows,
            style: self.style,
        })
    }
}

#[derive(Default)]
struct Writer {
    segments: Vec<Segment>,
    text: String,
    binds: Vec<BindSlot>,
    anon: usize,
}

impl Writer {
    fn push(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            self.segments.push(Segment::Text(mem::take(&mut self.text)));
        }
    }

    fn bind(&mut self, name: String) {
        self.flush();
        self.binds.push(BindSlot {
            name: name.clone(),
            expanding: false,
        });
        self.segments.push(Segment::Bind(name));
    }

    fn expanding(&mut self, name: String, negated: bool) {
        self.flush();
        self.binds.push(BindSlot {
            name: name.clone(),
            expanding: true,
        });
        self.segments.push(Segment::Expanding { name, negated });
    }

    fn table(&mut self, table: &Table) {
        self.flush();
        self.segments.push(Segment::Table {
            schema: table.schema_name().map(str::to_string),
            name: table.name().to_string(),
        });
    }

    fn next_anon(&mut self) -> String {
        self.anon += 1;
        anon_name(self.anon)
    }

    fn expr(&mut self, expr: &Expr) -> SqlResult<()> {
        match expr {
            Expr::Column(column) => self.push(&column.name),
            Expr::Literal(_) => {
                let name = self.next_anon();
                self.bind(name);
            }
            Expr::BindParam { name, .. } => self.bind(name.clone()),
            Expr::Binary { left, op, right } => {
                self.operand(left, *op)?;
                self.push(&format!(" {op} "));
                self.operand(right, *op)?;
            }
            Expr::Not(inner) => {
                self.push("NOT (");
                self.expr(inner)?;
                self.push(")");
            }
            Expr::IsNull { expr, negated } => {
                self.expr(expr)?;
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::InList {
                expr,
                name,
                negated,
                ..
            } => {
                self.push("(");
                self.expr(expr)?;
                let name = match name {
                    Some(name) => name.clone(),
                    None => self.next_anon(),
                };
                self.expanding(name, *negated);
                self.push(")");
            }
            Expr::LiteralIn {
                expr,
                values,
                negated,
            } => {
                self.push("(");
                self.expr(expr)?;
                if values.is_empty() {
                    self.push(if *negated {
                        " NOT IN (NULL) OR 1 = 1"
                    } else {
                        " IN (NULL) AND 1 != 1"
                    });
                } else {
                    let rendered: Vec<String> = values.iter().map(Value::to_sql_literal).collect();
                    self.push(if *negated { " NOT IN (" } else { " IN (" });
                    self.push(&rendered.join(", "));
                    self.push(")");
                }
                self.push(")");
            }
            Expr::Custom(element) => self.push(&element.render()),
        }
        Ok(())
    }

    /// Renders an operand, parenthesizing logical sub-expressions whose
    /// operator differs from the parent's.
    fn operand(&mut self, expr: &Expr, parent: BinaryOp) -> SqlResult<()> {
        let wrap = matches!(expr, Expr::Binary { op, .. } if op.is_logical() && *op != parent);
        if wrap {
            self.push("(");
        }
        self.expr(expr)?;
        if wrap {
            self.push(")");
        }
        Ok(())
    }

    /// Copies textual SQL, turning `:name` markers into bind slots. Quoted
    /// strings and `::` casts are left alone.
    fn text(&mut self, sql: &str) {
        let chars: Vec<char> = sql.chars().collect();
        let mut in_quote = false;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            if c == '\'' {
                in_quote = !in_quote;
            } else if !in_quote && c == ':' && next == Some(':') {
                self.text.push_str("::");
                i += 2;
                continue;
            } else if !in_quote
                && c == ':'
                && next.is_some_and(|n| n.is_ascii_alphabetic() || n == '_')
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                self.bind(name);
                i = end;
                continue;
            }
            self.text.push(c);
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::bindparam;
    use crate::statement::{create_table, delete, insert, select_from, text, update};
    use crate::types::SqlType;

    fn users() -> Table {
        Table::new("users")
            .column("id", SqlType::Integer)
            .column("name", SqlType::Text)
    }

    fn render(stmt: impl Into<Statement>) -> RenderedStatement {
        let stmt = stmt.into();
        let compiled = Compiler::default().compile(&stmt).unwrap();
        compiled.render(&stmt.params(), None).unwrap()
    }

    #[test]
    fn test_select() {
        let users = users();
        let rendered = render(
            select_from(&users)
                .filter(users.c("id").unwrap().gt(10))
                .order_by_desc(users.c("name").unwrap())
                .limit(3),
        );
        assert_eq!(
            rendered.sql,
            "SELECT id, name FROM users WHERE id > ? ORDER BY name DESC LIMIT ?"
        );
        assert_eq!(rendered.params, vec![Value::Integer(10), Value::Integer(3)]);
        assert_eq!(rendered.names, vec!["param_1", "param_2"]);
    }

    #[test]
    fn test_logical_parenthesization() {
        let users = users();
        let id = || users.c("id").unwrap();
        let rendered = render(select_from(&users).filter(id().eq(1).or(id().eq(2)).and(id().ne(3))));
        assert_eq!(
            rendered.sql,
            "SELECT id, name FROM users WHERE (id = ? OR id = ?) AND id != ?"
        );
    }

    #[test]
    fn test_dml() {
        let users = users();
        assert_eq!(
            render(insert(&users).value("id", 1).value("name", "a")).sql,
            "INSERT INTO users (id, name) VALUES (?, ?)"
        );
        assert_eq!(
            render(update(&users).set("name", "b").filter(users.c("id").unwrap().eq(1))).sql,
            "UPDATE users SET name = ? WHERE id = ?"
        );
        assert_eq!(
            render(delete(&users).filter(users.c("id").unwrap().is_null())).sql,
            "DELETE FROM users WHERE id IS NULL"
        );
        assert_eq!(
            render(create_table(&users)).sql,
            "CREATE TABLE users (id INTEGER, name TEXT)"
        );
    }

    #[test]
    fn test_expanding_in() {
        let users = users();
        let stmt: Statement = select_from(&users)
            .filter(users.c("id").unwrap().in_list([1, 2, 3]))
            .into();
        let compiled = Compiler::default().compile(&stmt).unwrap();
        assert!(compiled.has_expanding());
        assert_eq!(
            compiled.to_string(),
            "SELECT id, name FROM users WHERE (id IN ([EXPANDING_param_1]))"
        );

        let rendered = compiled.render(&stmt.params(), None).unwrap();
        assert_eq!(rendered.sql, "SELECT id, name FROM users WHERE (id IN (?, ?, ?))");
        assert_eq!(rendered.names, vec!["param_1_1", "param_1_2", "param_1_3"]);

        // Same compiled form, different list length.
        let params = BoundParams::new().with("param_1", vec![Value::Integer(9)]);
        let rendered = compiled.render(&params, None).unwrap();
        assert_eq!(rendered.sql, "SELECT id, name FROM users WHERE (id IN (?))");

        let params = BoundParams::new().with("param_1", Vec::<Value>::new());
        let rendered = compiled.render(&params, None).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT id, name FROM users WHERE (id IN (NULL) AND 1 != 1)"
        );
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn test_param_styles() {
        let users = users();
        let stmt: Statement = select_from(&users)
            .filter(users.c("id").unwrap().in_list([1, 2]))
            .filter(users.c("name").unwrap().eq(bindparam("n")))
            .into();
        let params = stmt.params().with("n", "x");

        let numeric = Compiler::new(ParamStyle::Numeric).compile(&stmt).unwrap();
        assert_eq!(
            numeric.render(&params, None).unwrap().sql,
            "SELECT id, name FROM users WHERE (id IN (:1, :2)) AND name = :3"
        );

        let named = Compiler::new(ParamStyle::Named).compile(&stmt).unwrap();
        assert_eq!(
            named.render(&params, None).unwrap().sql,
            "SELECT id, name FROM users WHERE (id IN (:param_1_1, :param_1_2)) AND name = :n"
        );
    }

    #[test]
    fn test_missing_and_mismatched_params() {
        let users = users();
        let stmt: Statement = select_from(&users)
            .filter(users.c("id").unwrap().eq(bindparam("user_id")))
            .into();
        let compiled = Compiler::default().compile(&stmt).unwrap();

        assert_eq!(
            compiled.render(&BoundParams::new(), None),
            Err(SqlError::MissingParameter("user_id".to_string()))
        );
        let params = BoundParams::new().with("user_id", vec![Value::Integer(1)]);
        assert_eq!(
            compiled.render(&params, None),
            Err(SqlError::ParameterKind("user_id".to_string()))
        );
    }

    #[test]
    fn test_schema_translation() {
        let accounts = Table::new("accounts")
            .schema("main")
            .column("id", SqlType::Integer);
        let plain = users();

        let mut map = SchemaTranslateMap::new();
        map.insert(Some("main".to_string()), Some("tenant_a".to_string()));
        map.insert(None, Some("tenant_b".to_string()));

        let stmt: Statement = select_from(&accounts).into();
        let compiled = Compiler::default().compile(&stmt).unwrap();
        assert!(compiled.has_tables());
        assert_eq!(compiled.render(&BoundParams::new(), None).unwrap().sql, "SELECT id FROM main.accounts");
        assert_eq!(
            compiled.render(&BoundParams::new(), Some(&map)).unwrap().sql,
            "SELECT id FROM tenant_a.accounts"
        );

        let stmt: Statement = select_from(&plain).into();
        let compiled = Compiler::default().compile(&stmt).unwrap();
        assert_eq!(
            compiled.render(&BoundParams::new(), Some(&map)).unwrap().sql,
            "SELECT id, name FROM tenant_b.users"
        );
    }

    #[test]
    fn test_text_markers() {
        let stmt: Statement = text("SELECT id FROM users WHERE name = :name AND note = ':skip' AND x::int > :min_id")
            .bind("name", "a")
            .bind("min_id", 4)
            .into();
        let compiled = Compiler::default().compile(&stmt).unwrap();
        assert!(compiled.returns_rows());
        assert_eq!(
            compiled.binds().iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
            vec!["name", "min_id"]
        );

        let rendered = compiled.render(&stmt.params(), None).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT id FROM users WHERE name = ? AND note = ':skip' AND x::int > ?"
        );
        assert_eq!(rendered.params, vec![Value::from("a"), Value::Integer(4)]);
    }

    #[test]
    fn test_empty_insert_rejected() {
        let stmt: Statement = insert(&users()).into();
        assert!(matches!(
            Compiler::default().compile(&stmt),
            Err(SqlError::Compile(_))
        ));
    }
}
