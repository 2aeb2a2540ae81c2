//! Statement execution against in-memory tables.

use std::cmp::Ordering;
use std::collections::HashMap;

use conduit_common::{Row, Value};

use super::parser::{Ast, CmpOp, Projection, Stmt};
use crate::error::{EngineError, EngineResult};

/// A table's column names and rows.
#[derive(Clone, Debug, Default)]
pub(crate) struct MemTable {
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Row>,
}

/// Table name to table.
pub(crate) type Tables = HashMap<String, MemTable>;

/// The materialized outcome of one statement.
#[derive(Debug, Default)]
pub(super) struct ExecResult {
    pub(super) columns: Vec<String>,
    pub(super) rows: Vec<Row>,
    pub(super) rows_affected: u64,
}

/// Row context for column references.
#[derive(Clone, Copy)]
struct Scope<'a> {
    columns: &'a [String],
    row: &'a Row,
}

/// Executes `stmt` against `tables`.
pub(super) fn execute(stmt: &Stmt, tables: &mut Tables, params: &[Value]) -> EngineResult<ExecResult> {
    match stmt {
        Stmt::CreateTable { name, columns } => {
            if tables.contains_key(name) {
                return Err(driver_error(format!("table {name} already exists")));
            }
            tables.insert(
                name.clone(),
                MemTable {
                    columns: columns.clone(),
                    rows: Vec::new(),
                },
            );
            Ok(ExecResult::default())
        }

        Stmt::DropTable { name } => {
            tables
                .remove(name)
                .ok_or_else(|| driver_error(format!("no such table: {name}")))?;
            Ok(ExecResult::default())
        }

        Stmt::Insert {
            table,
            columns,
            values,
        } => {
            let target = table_mut(tables, table)?;
            let mut row = vec![Value::Null; target.columns.len()];
            for (column, value) in columns.iter().zip(values) {
                let index = column_index(&target.columns, column)?;
                row[index] = evaluate(value, None, params)?;
            }
            target.rows.push(row);
            Ok(ExecResult {
                rows_affected: 1,
                ..Default::default()
            })
        }

        Stmt::Update {
            table,
            assignments,
            filter,
        } => {
            let target = table_mut(tables, table)?;
            let indexes = assignments
                .iter()
                .map(|(column, _)| column_index(&target.columns, column))
                .collect::<EngineResult<Vec<_>>>()?;

            let mut affected = 0;
            for i in 0..target.rows.len() {
                let scope = Scope {
                    columns: &target.columns,
                    row: &target.rows[i],
                };
                if !matches(filter.as_ref(), scope, params)? {
                    continue;
                }
                // Every assignment sees the row as it was before the update.
                let new_values = assignments
                    .iter()
                    .map(|(_, expr)| evaluate(expr, Some(scope), params))
                    .collect::<EngineResult<Vec<_>>>()?;
                for (index, value) in indexes.iter().zip(new_values) {
                    target.rows[i][*index] = value;
                }
                affected += 1;
            }
            Ok(ExecResult {
                rows_affected: affected,
                ..Default::default()
            })
        }

        Stmt::Delete { table, filter } => {
            let target = table_mut(tables, table)?;
            let mut kept = Vec::with_capacity(target.rows.len());
            let mut affected = 0;
            for row in std::mem::take(&mut target.rows) {
                let scope = Scope {
                    columns: &target.columns,
                    row: &row,
                };
                if matches(filter.as_ref(), scope, params)? {
                    affected += 1;
                } else {
                    kept.push(row);
                }
            }
            target.rows = kept;
            Ok(ExecResult {
                rows_affected: affected,
                ..Default::default()
            })
        }

        Stmt::Select {
            projection,
            from,
            filter,
            order_by,
            limit,
        } => select(tables, projection, from.as_deref(), filter.as_ref(), order_by, limit.as_ref(), params),
    }
}

fn select(
    tables: &Tables,
    projection: &Projection,
    from: Option<&str>,
    filter: Option<&Ast>,
    order_by: &[(String, bool)],
    limit: Option<&Ast>,
    params: &[Value],
) -> EngineResult<ExecResult> {
    let (source_columns, mut rows) = match from {
        Some(name) => {
            let table = tables
                .get(name)
                .ok_or_else(|| driver_error(format!("no such table: {name}")))?;
            let mut rows = Vec::new();
            for row in &table.rows {
                let scope = Scope {
                    columns: &table.columns,
                    row,
                };
                if matches(filter, scope, params)? {
                    rows.push(row.clone());
                }
            }
            (table.columns.clone(), rows)
        }
        None => (Vec::new(), vec![Vec::new()]),
    };

    if let Projection::CountAll = projection {
        return Ok(ExecResult {
            columns: vec!["count".to_string()],
            rows: vec![vec![Value::Integer(rows.len() as i64)]],
            rows_affected: 0,
        });
    }

    if !order_by.is_empty() {
        let keys = order_by
            .iter()
            .map(|(column, desc)| Ok((column_index(&source_columns, column)?, *desc)))
            .collect::<EngineResult<Vec<_>>>()?;
        rows.sort_by(|a, b| {
            for (index, desc) in &keys {
                let ordering = order_values(&a[*index], &b[*index]);
                if ordering != Ordering::Equal {
                    return if *desc { ordering.reverse() } else { ordering };
                }
            }
            Ordering::Equal
        });
    }

    if let Some(limit) = limit {
        match evaluate(limit, None, params)? {
            Value::Integer(n) if n >= 0 => rows.truncate(n as usize),
            other => return Err(driver_error(format!("invalid LIMIT {other}"))),
        }
    }

    let (columns, rows) = match projection {
        Projection::Exprs(exprs) => {
            let columns = exprs
                .iter()
                .enumerate()
                .map(|(i, expr)| match expr {
                    Ast::Column(name) => last_segment(name).to_string(),
                    _ => format!("expr_{}", i + 1),
                })
                .collect();
            let mut projected = Vec::with_capacity(rows.len());
            for row in &rows {
                let scope = Scope {
                    columns: &source_columns,
                    row,
                };
                projected.push(
                    exprs
                        .iter()
                        .map(|expr| evaluate(expr, Some(scope), params))
                        .collect::<EngineResult<Row>>()?,
                );
            }
            (columns, projected)
        }
        _ => (source_columns, rows),
    };

    Ok(ExecResult {
        columns,
        rows,
        rows_affected: 0,
    })
}

fn matches(filter: Option<&Ast>, scope: Scope<'_>, params: &[Value]) -> EngineResult<bool> {
    let Some(filter) = filter else {
        return Ok(true);
    };
    match evaluate(filter, Some(scope), params)? {
        Value::Boolean(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(driver_error(format!("filter returned non-boolean {other}"))),
    }
}

/// Evaluates an expression with SQL three-valued logic.
fn evaluate(ast: &Ast, scope: Option<Scope<'_>>, params: &[Value]) -> EngineResult<Value> {
    Ok(match ast {
        Ast::Literal(value) => value.clone(),
        Ast::Param(index) => params
            .get(*index)
            .cloned()
            .ok_or_else(|| driver_error(format!("no value for parameter {}", index + 1)))?,
        Ast::Column(name) => {
            let scope = scope.ok_or_else(|| driver_error(format!("no such column: {name}")))?;
            scope.row[column_index(scope.columns, name)?].clone()
        }
        Ast::Compare(left, op, right) => {
            let left = evaluate(left, scope, params)?;
            let right = evaluate(right, scope, params)?;
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let ordering = left
                .compare(&right)
                .ok_or_else(|| driver_error(format!("cannot compare {left} with {right}")))?;
            Value::Boolean(match op {
                CmpOp::Eq => ordering == Ordering::Equal,
                CmpOp::NotEq => ordering != Ordering::Equal,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::LtEq => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::GtEq => ordering != Ordering::Less,
            })
        }
        Ast::And(left, right) => {
            match (
                truth(evaluate(left, scope, params)?)?,
                truth(evaluate(right, scope, params)?)?,
            ) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            }
        }
        Ast::Or(left, right) => {
            match (
                truth(evaluate(left, scope, params)?)?,
                truth(evaluate(right, scope, params)?)?,
            ) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }
        }
        Ast::Not(inner) => match truth(evaluate(inner, scope, params)?)? {
            Some(b) => Value::Boolean(!b),
            None => Value::Null,
        },
        Ast::IsNull(inner, negated) => {
            Value::Boolean(evaluate(inner, scope, params)?.is_null() != *negated)
        }
        Ast::InList(inner, list, negated) => {
            let value = evaluate(inner, scope, params)?;
            let mut saw_null = value.is_null();
            let mut found = false;
            for item in list {
                let item = evaluate(item, scope, params)?;
                if item.is_null() {
                    saw_null = true;
                } else if !value.is_null() && value.compare(&item) == Some(Ordering::Equal) {
                    found = true;
                    break;
                }
            }
            match (found, saw_null) {
                (true, _) => Value::Boolean(!negated),
                (false, true) => Value::Null,
                (false, false) => Value::Boolean(*negated),
            }
        }
    })
}

fn truth(value: Value) -> EngineResult<Option<bool>> {
    match value {
        Value::Boolean(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(driver_error(format!("expected boolean, found {other}"))),
    }
}

/// Total order for sorting: nulls first, incomparable values equal.
fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn column_index(columns: &[String], name: &str) -> EngineResult<usize> {
    let wanted = last_segment(name);
    columns
        .iter()
        .position(|column| column.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| driver_error(format!("no such column: {name}")))
}

fn table_mut<'t>(tables: &'t mut Tables, name: &str) -> EngineResult<&'t mut MemTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| driver_error(format!("no such table: {name}")))
}

fn driver_error(msg: String) -> EngineError {
    EngineError::Driver(msg)
}
