//! The statement execution pipeline.
//!
//! Turning a statement into driver SQL goes: resolve lambda statements to a
//! built statement, generate the structural key, look the key up in the
//! compiled cache (compiling on a miss), then render the compiled form with
//! this execution's parameters and schema translation map.

use std::sync::Arc;
use std::time::Instant;

use conduit_cache::CacheOutcome;
use conduit_common::{Value, DEFAULT_MAX_ROW_BUFFER};
use conduit_sql::{
    BoundParams, Delete, Insert, KeyOutcome, LambdaStatement, Select, Statement, TextClause,
    Update,
};
use tracing::{debug, info};

use crate::cursor::FetchStrategy;
use crate::driver::Driver;
use crate::engine::EngineInner;
use crate::error::EngineResult;
use crate::options::{CacheSetting, ExecutionOptions};

/// Anything a connection can execute.
#[derive(Debug, Clone)]
pub enum Executable {
    /// A statement built directly.
    Statement(Statement),
    /// A statement built on demand by a closure.
    Lambda(LambdaStatement),
}

impl From<Statement> for Executable {
    fn from(stmt: Statement) -> Self {
        Executable::Statement(stmt)
    }
}

impl From<&Statement> for Executable {
    fn from(stmt: &Statement) -> Self {
        Executable::Statement(stmt.clone())
    }
}

impl From<Select> for Executable {
    fn from(stmt: Select) -> Self {
        Executable::Statement(stmt.into())
    }
}

impl From<Insert> for Executable {
    fn from(stmt: Insert) -> Self {
        Executable::Statement(stmt.into())
    }
}

impl From<Update> for Executable {
    fn from(stmt: Update) -> Self {
        Executable::Statement(stmt.into())
    }
}

impl From<Delete> for Executable {
    fn from(stmt: Delete) -> Self {
        Executable::Statement(stmt.into())
    }
}

impl From<TextClause> for Executable {
    fn from(stmt: TextClause) -> Self {
        Executable::Statement(stmt.into())
    }
}

impl From<LambdaStatement> for Executable {
    fn from(stmt: LambdaStatement) -> Self {
        Executable::Lambda(stmt)
    }
}

impl From<&LambdaStatement> for Executable {
    fn from(stmt: &LambdaStatement) -> Self {
        Executable::Lambda(stmt.clone())
    }
}

/// Driver SQL and parameters for one execution.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
    pub(crate) outcome: CacheOutcome,
}

/// Compiles (or fetches from cache) and renders `executable`.
///
/// `params` override values extracted from the statement itself.
pub(crate) fn prepare(
    engine: &EngineInner,
    executable: Executable,
    params: BoundParams,
    options: &ExecutionOptions,
) -> EngineResult<Prepared> {
    let (statement, mut bound) = match executable {
        Executable::Statement(stmt) => {
            let extracted = stmt.params();
            (Arc::new(stmt), extracted)
        }
        Executable::Lambda(lambda) => {
            let resolved = engine.lambda_cache.resolve(&lambda)?;
            if resolved.built {
                debug!(callsite = %lambda.callsite(), "lambda statement built");
            }
            (resolved.statement, resolved.params)
        }
    };
    bound.merge(params);

    let cache = match options.get_compiled_cache() {
        Some(CacheSetting::Shared(cache)) => Some(Arc::clone(cache)),
        Some(CacheSetting::Disabled) => None,
        None => engine.compiled_cache.clone(),
    };

    let (compiled, outcome) = match cache {
        None => {
            let start = Instant::now();
            let compiled = engine.compiler.compile(&statement)?;
            (Arc::new(compiled), CacheOutcome::Disabled(start.elapsed()))
        }
        Some(cache) => match statement.cache_key() {
            KeyOutcome::Key(key) => {
                cache.get_or_compile(key, || engine.compiler.compile(&statement))?
            }
            KeyOutcome::NoKey(reason) => {
                if let Some(name) = reason.undeclared() {
                    engine.warn_undeclared(name, &reason);
                }
                let start = Instant::now();
                let compiled = engine.compiler.compile(&statement)?;
                cache.record_no_key();
                (Arc::new(compiled), CacheOutcome::NoKey(start.elapsed()))
            }
        },
    };

    let rendered = compiled.render(&bound, options.get_schema_translate_map())?;
    log_statement(engine, &rendered.sql, &rendered.params, outcome);
    Ok(Prepared {
        sql: rendered.sql,
        params: rendered.params,
        outcome,
    })
}

/// Picks the fetch strategy for a statement.
pub(crate) fn fetch_strategy(driver: &dyn Driver, options: &ExecutionOptions) -> FetchStrategy {
    if !driver.supports_streaming() {
        return FetchStrategy::Buffered;
    }
    if let Some(rows) = options.get_yield_per() {
        return FetchStrategy::Fixed(rows);
    }
    if options.get_stream_results() == Some(true) {
        return FetchStrategy::Adaptive {
            max_row_buffer: options.get_max_row_buffer().unwrap_or(DEFAULT_MAX_ROW_BUFFER),
        };
    }
    FetchStrategy::Buffered
}

pub(crate) fn log_statement(engine: &EngineInner, sql: &str, params: &[Value], outcome: CacheOutcome) {
    if engine.config.echo {
        info!(target: "conduit::engine", ?params, "{sql} {outcome}");
    } else {
        debug!(target: "conduit::engine", ?params, "{sql} {outcome}");
    }
}
