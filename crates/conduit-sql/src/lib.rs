//! # conduit-sql
//!
//! Statement model and compilation for Conduit.
//!
//! This crate provides:
//!
//! - **Statements**: `SELECT`, `INSERT`, `UPDATE`, `DELETE`, text clauses and
//!   DDL, built from [`Table`]s and [`Expr`]essions
//! - **Structural keys**: a cache key per statement shape that excludes
//!   literal values, or an explicit "no key" classification
//! - **Compilation**: a reusable compiled form rendered per execution with
//!   expanding `IN` lists and schema translation
//! - **Lambda statements**: closures keyed by call site and declared captures
//!
//! ## Example
//!
//! ```rust
//! use conduit_sql::{select_from, Compiler, KeyOutcome, SqlType, Statement, Table};
//!
//! let users = Table::new("users")
//!     .column("id", SqlType::Integer)
//!     .column("name", SqlType::Text);
//!
//! let stmt: Statement = select_from(&users)
//!     .filter(users.c("id").unwrap().eq(7))
//!     .into();
//!
//! assert!(matches!(stmt.cache_key(), KeyOutcome::Key(_)));
//!
//! let compiled = Compiler::default().compile(&stmt).unwrap();
//! let rendered = compiled.render(&stmt.params(), None).unwrap();
//! assert_eq!(rendered.sql, "SELECT id, name FROM users WHERE id = ?");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod error;
pub mod expr;
pub mod key;
pub mod lambda;
pub mod params;
pub mod schema;
pub mod statement;
pub mod types;

pub use compiler::{
    BindSlot, CompiledStatement, Compiler, ParamStyle, RenderedStatement, SchemaTranslateMap,
};
pub use error::{SqlError, SqlResult};
pub use expr::{bindparam, bindparam_with, lit, BinaryOp, ColumnRef, CustomElement, Expr};
pub use key::{CacheKey, KeyOutcome, NoKeyReason};
pub use lambda::{lambda_stmt, CallSite, Capture, LambdaArgs, LambdaCache, LambdaStatement, ResolvedLambda};
pub use params::{BindValue, BoundParams};
pub use schema::{Column, Table};
pub use statement::{
    create_table, delete, drop_table, insert, select, select_from, text, update, Delete, Insert,
    Select, Statement, TextClause, Update,
};
pub use types::{CustomType, SqlType};
