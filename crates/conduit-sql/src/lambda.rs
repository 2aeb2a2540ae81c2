//! Deferred-construction ("lambda") statements.
//!
//! A lambda statement is built by a closure instead of eagerly. Its cache
//! key is derived from an explicit [`CallSite`] plus the captures the caller
//! declares, so the closure runs only when that key is new:
//!
//! - [`Capture::Literal`] values are bound parameters. Their *type* joins the
//!   key and their value is re-bound on every execution without running the
//!   closure again.
//! - [`Capture::Element`] expressions are SQL sub-constructs. Their
//!   structural key joins the key and any literals inside them are re-bound
//!   on every execution.
//! - [`Capture::Opaque`] marks anything else the closure depends on. It can
//!   never be part of a stable key, so resolving the statement fails with
//!   [`SqlError::UnstableCacheKey`] unless tracking is switched off with
//!   [`LambdaStatement::track_closure_variables`] or replaced by explicit
//!   key values with [`LambdaStatement::track_on`].
//!
//! # Example
//!
//! ```rust
//! use conduit_sql::{callsite, lambda_stmt, select_from, Capture, LambdaCache, SqlType, Table};
//!
//! let users = Table::new("users").column("id", SqlType::Integer);
//! let cache = LambdaCache::new(100);
//!
//! for id in [5, 10, 12] {
//!     let users = users.clone();
//!     let stmt = lambda_stmt(callsite!(), move |args| {
//!         Ok(select_from(&users).filter(users.c("id")?.eq(args.bind("id"))).into())
//!     })
//!     .capture("id", Capture::Literal(id.into()));
//!
//!     let resolved = cache.resolve(&stmt).unwrap();
//!     assert_eq!(resolved.built, id == 5);
//! }
//! ```

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conduit_cache::LruCache;
use conduit_common::Value;
use parking_lot::Mutex;

use crate::error::{SqlError, SqlResult};
use crate::expr::{bindparam, Expr};
use crate::key::{expr_key, CacheKey};
use crate::params::BoundParams;
use crate::statement::Statement;

/// Identifies the place in source code a lambda statement is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl CallSite {
    /// Creates a call site. Usually obtained with [`callsite!`](crate::callsite).
    pub const fn new(file: &'static str, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Expands to the [`CallSite`] of the macro invocation.
#[macro_export]
macro_rules! callsite {
    () => {
        $crate::CallSite::new(file!(), line!(), column!())
    };
}

/// A value the statement closure depends on.
#[derive(Debug, Clone)]
pub enum Capture {
    /// A literal bound as a parameter.
    Literal(Value),
    /// A SQL sub-construct.
    Element(Expr),
    /// Anything else; holds a type name for diagnostics.
    Opaque(&'static str),
}

impl Capture {
    /// Declares an opaque capture of type `T`.
    pub fn opaque<T: ?Sized>() -> Self {
        Capture::Opaque(std::any::type_name::<T>())
    }
}

/// Access to declared captures from inside the statement closure.
pub struct LambdaArgs<'a> {
    captures: &'a [(String, Capture)],
}

impl LambdaArgs<'_> {
    /// Returns a bound parameter for a literal capture.
    pub fn bind(&self, name: &str) -> Expr {
        bindparam(name)
    }

    /// Returns a captured element, with its literals turned into parameters
    /// that are re-bound on every execution.
    pub fn element(&self, name: &str) -> SqlResult<Expr> {
        self.captures
            .iter()
            .find_map(|(capture_name, capture)| match capture {
                Capture::Element(expr) if capture_name == name => {
                    let mut counter = 0;
                    Some(parameterize(expr, name, &mut counter, &mut BoundParams::new()))
                }
                _ => None,
            })
            .ok_or_else(|| SqlError::Compile(format!("no element capture named '{name}'")))
    }
}

type Builder = dyn Fn(&LambdaArgs<'_>) -> SqlResult<Statement> + Send + Sync;

/// A statement built on demand by a closure.
#[derive(Clone)]
pub struct LambdaStatement {
    callsite: CallSite,
    captures: Vec<(String, Capture)>,
    builder: Arc<Builder>,
    track_closure_variables: bool,
    track_on: Option<Vec<Value>>,
}

/// Creates a lambda statement.
pub fn lambda_stmt<F>(callsite: CallSite, builder: F) -> LambdaStatement
where
    F: Fn(&LambdaArgs<'_>) -> SqlResult<Statement> + Send + Sync + 'static,
{
    LambdaStatement {
        callsite,
        captures: Vec::new(),
        builder: Arc::new(builder),
        track_closure_variables: true,
        track_on: None,
    }
}

impl LambdaStatement {
    /// Declares a capture.
    pub fn capture(mut self, name: impl Into<String>, capture: Capture) -> Self {
        self.captures.push((name.into(), capture));
        self
    }

    /// Enables or disables tracking of captures in the cache key. With
    /// tracking off the key is the call site alone; the caller guarantees the
    /// closure builds the same structure every time.
    pub fn track_closure_variables(mut self, track: bool) -> Self {
        self.track_closure_variables = track;
        self
    }

    /// Uses exactly these values, with the call site, as the cache key.
    pub fn track_on<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.track_on = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the call site.
    pub fn callsite(&self) -> CallSite {
        self.callsite
    }

    /// Derives the lambda cache key.
    pub fn cache_key(&self) -> SqlResult<CacheKey> {
        let mut repr = format!("lambda:{}", self.callsite);

        if let Some(values) = &self.track_on {
            repr.push_str("|on");
            for value in values {
                let _ = write!(repr, "|{}:{value:?}", value.type_tag());
            }
            return Ok(CacheKey::new(repr));
        }
        if !self.track_closure_variables {
            return Ok(CacheKey::new(repr));
        }

        for (name, capture) in &self.captures {
            match capture {
                Capture::Literal(value) => {
                    let _ = write!(repr, "|{name}:lit:{}", value.type_tag());
                }
                Capture::Element(expr) => {
                    let key = expr_key(expr)
                        .map_err(|_| SqlError::UnstableCacheKey { name: name.clone() })?;
                    let _ = write!(repr, "|{name}:elem:{key}");
                }
                Capture::Opaque(_) => {
                    return Err(SqlError::UnstableCacheKey { name: name.clone() });
                }
            }
        }
        Ok(CacheKey::new(repr))
    }

    /// Parameter values carried by the captures for this execution.
    pub fn params(&self) -> BoundParams {
        let mut params = BoundParams::new();
        for (name, capture) in &self.captures {
            match capture {
                Capture::Literal(value) => params.set(name.clone(), value.clone()),
                Capture::Element(expr) => {
                    let mut counter = 0;
                    parameterize(expr, name, &mut counter, &mut params);
                }
                Capture::Opaque(_) => {}
            }
        }
        params
    }

    /// Runs the closure.
    pub fn build(&self) -> SqlResult<Statement> {
        (self.builder)(&LambdaArgs {
            captures: &self.captures,
        })
    }
}

impl fmt::Debug for LambdaStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaStatement")
            .field("callsite", &self.callsite)
            .field("captures", &self.captures)
            .field("track_closure_variables", &self.track_closure_variables)
            .field("track_on", &self.track_on)
            .finish()
    }
}

/// Rewrites the literals and bound lists of a captured element into
/// parameters named `{prefix}_{n}`, recording their current values.
fn parameterize(expr: &Expr, prefix: &str, counter: &mut usize, params: &mut BoundParams) -> Expr {
    let next_name = |counter: &mut usize| {
        *counter += 1;
        format!("{prefix}_{counter}")
    };
    match expr {
        Expr::Literal(value) => {
            let name = next_name(counter);
            params.set(name.clone(), value.clone());
            bindparam(name)
        }
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(parameterize(left, prefix, counter, params)),
            op: *op,
            right: Box::new(parameterize(right, prefix, counter, params)),
        },
        Expr::Not(inner) => Expr::Not(Box::new(parameterize(inner, prefix, counter, params))),
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(parameterize(expr, prefix, counter, params)),
            negated: *negated,
        },
        Expr::InList {
            expr,
            name,
            values,
            negated,
        } => {
            let expr = Box::new(parameterize(expr, prefix, counter, params));
            let name = match name {
                Some(name) => name.clone(),
                None => next_name(counter),
            };
            params.set_list(name.clone(), values.clone());
            Expr::InList {
                expr,
                name: Some(name),
                values: values.clone(),
                negated: *negated,
            }
        }
        other => other.clone(),
    }
}

/// A resolved lambda statement.
#[derive(Debug, Clone)]
pub struct ResolvedLambda {
    /// The built statement, shared with the lambda cache.
    pub statement: Arc<Statement>,
    /// Parameter values for this execution.
    pub params: BoundParams,
    /// True if the closure ran for this resolution.
    pub built: bool,
}

/// Second-level cache from lambda keys to built statements, so a closure
/// runs once per distinct key.
pub struct LambdaCache {
    inner: Mutex<LruCache<CacheKey, Arc<Statement>>>,
    builds: AtomicU64,
}

impl LambdaCache {
    /// Creates a cache with the given target size.
    pub fn new(target_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(target_size)),
            builds: AtomicU64::new(0),
        }
    }

    /// Resolves a lambda statement to a built statement and this execution's
    /// parameters.
    pub fn resolve(&self, lambda: &LambdaStatement) -> SqlResult<ResolvedLambda> {
        let key = lambda.cache_key()?;

        let cached = self.inner.lock().get(&key).cloned();
        let (statement, built) = match cached {
            Some(statement) => (statement, false),
            None => {
                let statement = Arc::new(lambda.build()?);
                self.builds.fetch_add(1, Ordering::Relaxed);
                self.inner.lock().insert(key, Arc::clone(&statement));
                (statement, true)
            }
        };

        let mut params = statement.params();
        params.merge(lambda.params());
        Ok(ResolvedLambda {
            statement,
            params,
            built,
        })
    }

    /// Returns how many times a closure has run.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Returns the number of cached statements.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if no statements are cached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Clears the cache.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl fmt::Debug for LambdaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaCache")
            .field("inner", &*self.inner.lock())
            .field("builds", &self.builds())
            .finish()
    }
}
