//! Result cursors.
//!
//! A [`CursorResult`] wraps a driver cursor with one of three fetch
//! strategies:
//!
//! - **Buffered**: every row is fetched when the statement executes and the
//!   driver cursor is released straight away.
//! - **Adaptive**: one row is pre-fetched, then each refill asks for five
//!   times as many rows as the last, up to `max_row_buffer`.
//! - **Fixed**: every refill asks for the same number of rows (`yield_per`).
//!
//! In every mode the driver cursor is released as soon as it reports
//! exhaustion, and immediately for statements that return no rows.

use std::collections::VecDeque;
use std::fmt;

use conduit_cache::CacheOutcome;
use conduit_common::{Row, Value, STREAM_GROWTH_FACTOR, STREAM_PREFETCH_ROWS};

use crate::driver::RawCursor;
use crate::error::{EngineError, EngineResult};

/// How rows are pulled from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Fetch everything up front.
    Buffered,
    /// Grow the batch size up to the given ceiling.
    Adaptive {
        /// Largest batch requested.
        max_row_buffer: usize,
    },
    /// Fetch fixed-size batches.
    Fixed(usize),
}

/// The result of executing a statement.
pub struct CursorResult {
    raw: Option<Box<dyn RawCursor>>,
    columns: Vec<String>,
    returns_rows: bool,
    rows_affected: u64,
    buffer: VecDeque<Row>,
    strategy: FetchStrategy,
    /// Size of the next adaptive refill.
    next_batch: usize,
    closed: bool,
    outcome: CacheOutcome,
}

impl CursorResult {
    pub(crate) fn new(
        mut raw: Box<dyn RawCursor>,
        strategy: FetchStrategy,
        outcome: CacheOutcome,
    ) -> EngineResult<Self> {
        let columns = raw.columns().to_vec();
        let returns_rows = !columns.is_empty();
        let rows_affected = raw.rows_affected();

        let mut result = Self {
            raw: None,
            columns,
            returns_rows,
            rows_affected,
            buffer: VecDeque::new(),
            strategy,
            next_batch: STREAM_PREFETCH_ROWS,
            closed: false,
            outcome,
        };

        if !returns_rows {
            raw.close();
            result.closed = true;
            return Ok(result);
        }

        match strategy {
            FetchStrategy::Buffered => {
                result.buffer = raw.fetch_all()?.into();
                raw.close();
            }
            FetchStrategy::Adaptive { .. } | FetchStrategy::Fixed(_) => {
                result.raw = Some(raw);
                result.refill()?;
            }
        }
        Ok(result)
    }

    /// Result column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if the statement produced rows.
    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }

    /// Number of rows changed by a DML statement.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// How the statement's compiled form was obtained.
    pub fn cache_outcome(&self) -> CacheOutcome {
        self.outcome
    }

    /// The fetch strategy in effect.
    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    /// Returns true once the result is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the next row, or `None` when the result is exhausted.
    pub fn fetch_one(&mut self) -> EngineResult<Option<Row>> {
        self.ensure_rows()?;
        if self.buffer.is_empty() {
            self.refill()?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Returns up to `n` rows.
    pub fn fetch_many(&mut self, n: usize) -> EngineResult<Vec<Row>> {
        self.ensure_rows()?;
        while self.buffer.len() < n && self.raw.is_some() {
            self.refill()?;
        }
        let n = n.min(self.buffer.len());
        Ok(self.buffer.drain(..n).collect())
    }

    /// Returns every remaining row.
    pub fn fetch_all(&mut self) -> EngineResult<Vec<Row>> {
        self.ensure_rows()?;
        if let Some(mut raw) = self.raw.take() {
            let rest = raw.fetch_all();
            raw.close();
            self.buffer.extend(rest?);
        }
        Ok(self.buffer.drain(..).collect())
    }

    /// Returns the first column of the first row and closes the result.
    pub fn scalar(&mut self) -> EngineResult<Option<Value>> {
        let row = self.fetch_one()?;
        self.close();
        Ok(row.and_then(|row| row.into_iter().next()))
    }

    /// Iterates over the remaining rows in groups of up to `size`.
    pub fn partitions(&mut self, size: usize) -> Partitions<'_> {
        Partitions {
            result: self,
            size: size.max(1),
        }
    }

    /// Releases the driver cursor and discards buffered rows.
    pub fn close(&mut self) {
        self.release();
        self.buffer.clear();
        self.closed = true;
    }

    fn ensure_rows(&self) -> EngineResult<()> {
        if !self.returns_rows {
            return Err(EngineError::ResourceClosed(
                "this result object does not return rows".to_string(),
            ));
        }
        if self.closed {
            return Err(EngineError::ResourceClosed(
                "this result object is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Pulls the next batch from the driver cursor, releasing it on a short
    /// batch.
    fn refill(&mut self) -> EngineResult<()> {
        let Some(raw) = self.raw.as_mut() else {
            return Ok(());
        };
        let size = match self.strategy {
            FetchStrategy::Fixed(n) => n,
            FetchStrategy::Adaptive { max_row_buffer } => {
                let size = self.next_batch.min(max_row_buffer);
                self.next_batch = size.saturating_mul(STREAM_GROWTH_FACTOR).min(max_row_buffer);
                size
            }
            FetchStrategy::Buffered => usize::MAX,
        };

        let rows = match raw.fetch_many(size) {
            Ok(rows) => rows,
            Err(e) => {
                self.release();
                return Err(e);
            }
        };
        if rows.len() < size {
            self.release();
        }
        self.buffer.extend(rows);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut raw) = self.raw.take() {
            raw.close();
        }
    }
}

impl Iterator for CursorResult {
    type Item = EngineResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed && self.buffer.is_empty() {
            return None;
        }
        self.fetch_one().transpose()
    }
}

impl Drop for CursorResult {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CursorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorResult")
            .field("columns", &self.columns)
            .field("strategy", &self.strategy)
            .field("buffered", &self.buffer.len())
            .field("cursor_open", &self.raw.is_some())
            .field("closed", &self.closed)
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Iterator over groups of rows; see [`CursorResult::partitions`].
pub struct Partitions<'r> {
    result: &'r mut CursorResult,
    size: usize,
}

impl Iterator for Partitions<'_> {
    type Item = EngineResult<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.result.fetch_many(self.size) {
            Ok(rows) if rows.is_empty() => None,
            other => Some(other),
        }
    }
}
