//! Connection pool.
//!
//! A bounded pool of physical connections. Checkouts are ownership tokens:
//! dropping a [`Checkout`] returns its connection to the pool it came from,
//! restoring the connection's default isolation level on the way in. A
//! disposed pool closes connections as they come back instead of pooling
//! them again.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_common::{IsolationLevel, PoolSettings};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::driver::{Driver, PhysicalConnection};
use crate::error::{EngineError, EngineResult};
use crate::isolation;

/// A pooled physical connection.
struct PooledConnection {
    /// Pool-assigned identifier.
    id: u64,
    /// The physical connection.
    conn: Box<dyn PhysicalConnection>,
    /// When the connection was created.
    created_at: Instant,
    /// When the connection was last returned.
    last_used: Instant,
    /// Number of times this connection has been checked out.
    use_count: u64,
    /// Isolation level the backend reported when the connection was opened.
    default_isolation: IsolationLevel,
}

impl PooledConnection {
    fn new(id: u64, mut conn: Box<dyn PhysicalConnection>) -> EngineResult<Self> {
        let default_isolation = conn.isolation_level()?;
        let now = Instant::now();
        Ok(Self {
            id,
            conn,
            created_at: now,
            last_used: now,
            use_count: 0,
            default_isolation,
        })
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn mark_used(&mut self) {
        self.last_used = Instant::now();
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections created.
    pub connections_created: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Total checkouts.
    pub checkouts: u64,
    /// Total checkins.
    pub checkins: u64,
    /// Connections discarded through invalidation.
    pub invalidated: u64,
    /// Acquisition timeouts.
    pub timeouts: u64,
    /// Current idle connections.
    pub idle_connections: usize,
    /// Current checked-out connections.
    pub checked_out: usize,
    /// Configured maximum.
    pub max_connections: usize,
    /// Whether the pool has been disposed.
    pub disposed: bool,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool size: {}  Connections in pool: {} Current Checked out connections: {}",
            self.max_connections, self.idle_connections, self.checked_out
        )
    }
}

/// Shared pool state.
struct PoolState {
    /// Idle connections, oldest first.
    idle: VecDeque<PooledConnection>,
    /// Connections currently handed out.
    checked_out: usize,
    /// Set once the pool is replaced.
    disposed: bool,
}

/// A bounded pool of physical connections.
pub struct Pool {
    driver: Arc<dyn Driver>,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    /// Signalled whenever a slot frees up.
    available: Condvar,
    stats: Mutex<PoolStats>,
    next_id: AtomicU64,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new(driver: Arc<dyn Driver>, settings: PoolSettings) -> EngineResult<Self> {
        settings.validate()?;
        Ok(Self {
            driver,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                checked_out: 0,
                disposed: false,
            }),
            available: Condvar::new(),
            stats: Mutex::new(PoolStats {
                max_connections: settings.max_connections,
                ..Default::default()
            }),
            next_id: AtomicU64::new(0),
            settings,
        })
    }

    /// Checks out a connection, waiting up to the acquire timeout.
    pub(crate) fn acquire(self: &Arc<Self>) -> EngineResult<Checkout> {
        let timeout = Duration::from_millis(self.settings.acquire_timeout_ms);
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();
        loop {
            if state.disposed {
                return Err(EngineError::PoolDisposed);
            }

            while let Some(conn) = state.idle.pop_front() {
                if conn.conn.is_closed() || conn.is_expired(self.max_lifetime()) {
                    self.close_connection(conn);
                    continue;
                }
                state.checked_out += 1;
                return Ok(self.hand_out(conn));
            }

            if state.checked_out < self.settings.max_connections {
                state.checked_out += 1;
                drop(state);
                return match self.create_connection() {
                    Ok(conn) => Ok(self.hand_out(conn)),
                    Err(e) => {
                        self.state.lock().checked_out -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                self.stats.lock().timeouts += 1;
                return Err(EngineError::PoolTimeout(self.settings.acquire_timeout_ms));
            }
        }
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.stats.lock().clone();
        let state = self.state.lock();
        stats.idle_connections = state.idle.len();
        stats.checked_out = state.checked_out;
        stats.disposed = state.disposed;
        stats
    }

    /// Returns the number of idle connections.
    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Returns the number of checked-out connections.
    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    /// Returns true once the pool has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Closes every idle connection and marks the pool disposed.
    ///
    /// Outstanding checkouts stay usable; their connections are closed when
    /// they are returned.
    pub(crate) fn dispose(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.disposed = true;
            std::mem::take(&mut state.idle)
        };
        for conn in idle {
            self.close_connection(conn);
        }
        self.available.notify_all();
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    fn max_lifetime(&self) -> Option<Duration> {
        match self.settings.max_lifetime_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn hand_out(self: &Arc<Self>, mut conn: PooledConnection) -> Checkout {
        conn.use_count += 1;
        self.stats.lock().checkouts += 1;
        debug!(id = conn.id, use_count = conn.use_count, "connection checked out");
        Checkout {
            pool: Arc::clone(self),
            conn: Some(conn),
        }
    }

    fn create_connection(&self) -> EngineResult<PooledConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = PooledConnection::new(id, self.driver.connect()?)?;
        self.stats.lock().connections_created += 1;
        debug!(id, driver = self.driver.name(), "connection created");
        Ok(conn)
    }

    /// Takes a connection back, restoring its default isolation level.
    fn checkin(&self, mut conn: PooledConnection) {
        conn.mark_used();
        self.stats.lock().checkins += 1;

        let mut keep = !conn.conn.is_closed();
        if keep {
            if let Err(e) = isolation::revert(conn.conn.as_mut(), conn.default_isolation) {
                warn!(id = conn.id, error = %e, "failed to reset connection on return; closing it");
                keep = false;
            }
        }

        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        if keep && !state.disposed && !conn.is_expired(self.max_lifetime()) {
            debug!(id = conn.id, "connection returned to pool");
            state.idle.push_back(conn);
        } else {
            drop(state);
            self.close_connection(conn);
        }
        self.available.notify_one();
    }

    /// Closes a checked-out connection instead of returning it.
    fn discard(&self, conn: PooledConnection) {
        self.stats.lock().invalidated += 1;
        {
            let mut state = self.state.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
        }
        debug!(id = conn.id, "connection invalidated");
        self.close_connection(conn);
        self.available.notify_one();
    }

    fn close_connection(&self, mut conn: PooledConnection) {
        conn.conn.close();
        self.stats.lock().connections_closed += 1;
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("driver", &self.driver.name())
            .field("max_connections", &self.settings.max_connections)
            .field("idle", &self.idle())
            .field("checked_out", &self.checked_out())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Exclusive ownership of one pooled connection.
///
/// When dropped, the connection is returned to the pool it came from.
pub(crate) struct Checkout {
    pool: Arc<Pool>,
    conn: Option<PooledConnection>,
}

impl Checkout {
    /// The physical connection.
    pub(crate) fn connection(&mut self) -> EngineResult<&mut dyn PhysicalConnection> {
        match self.conn.as_mut() {
            Some(pooled) => {
                let conn: &mut dyn PhysicalConnection = pooled.conn.as_mut();
                Ok(conn)
            }
            None => Err(EngineError::ConnectionClosed),
        }
    }

    /// Pool-assigned identifier of the physical connection.
    pub(crate) fn id(&self) -> Option<u64> {
        self.conn.as_ref().map(|pooled| pooled.id)
    }

    /// Closes the physical connection and releases its pool slot.
    pub(crate) fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("id", &self.id())
            .field("use_count", &self.conn.as_ref().map(|c| c.use_count))
            .field("last_used", &self.conn.as_ref().map(|c| c.last_used.elapsed()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use std::thread;

    fn pool(max_connections: usize, acquire_timeout_ms: u64) -> (Arc<Pool>, MemoryDriver) {
        let driver = MemoryDriver::new();
        let settings = PoolSettings {
            max_connections,
            acquire_timeout_ms,
            ..Default::default()
        };
        let pool = Pool::new(Arc::new(driver.clone()), settings).unwrap();
        (Arc::new(pool), driver)
    }

    #[test]
    fn test_checkout_returns_on_drop() {
        let (pool, _driver) = pool(2, 100);

        let checkout = pool.acquire().unwrap();
        assert_eq!(pool.checked_out(), 1);
        drop(checkout);

        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.idle(), 1);

        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), Some(1));
        let stats = pool.stats();
        assert_eq!(stats.connections_created, 1);
        assert_eq!(stats.checkouts, 2);
        assert_eq!(stats.checkins, 1);
    }

    #[test]
    fn test_acquire_timeout() {
        let (pool, _driver) = pool(1, 20);
        let _held = pool.acquire().unwrap();

        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, EngineError::PoolTimeout(20)));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[test]
    fn test_waiter_gets_returned_connection() {
        let (pool, _driver) = pool(1, 5_000);
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().map(|checkout| checkout.id()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), Some(1));
    }

    #[test]
    fn test_checkin_reverts_isolation() {
        let (pool, driver) = pool(1, 100);
        let mut checkout = pool.acquire().unwrap();
        checkout
            .connection()
            .unwrap()
            .set_isolation_level(IsolationLevel::Serializable)
            .unwrap();
        drop(checkout);

        let mut checkout = pool.acquire().unwrap();
        assert_eq!(
            checkout.connection().unwrap().isolation_level().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            driver.database().commands().last().map(String::as_str),
            Some("SET ISOLATION LEVEL READ COMMITTED")
        );
    }

    #[test]
    fn test_invalidate_discards() {
        let (pool, driver) = pool(1, 100);
        pool.acquire().unwrap().invalidate();

        let stats = pool.stats();
        assert_eq!(stats.invalidated, 1);
        assert_eq!(stats.idle_connections, 0);
        assert_eq!(driver.database().connections_closed(), 1);

        assert_eq!(pool.acquire().unwrap().id(), Some(2));
    }

    #[test]
    fn test_dispose_orphans_checkouts() {
        let (pool, driver) = pool(2, 100);
        let held = pool.acquire().unwrap();
        drop(pool.acquire().unwrap());
        assert_eq!(pool.idle(), 1);

        pool.dispose();
        assert_eq!(pool.idle(), 0);
        assert_eq!(driver.database().connections_closed(), 1);
        assert!(matches!(pool.acquire(), Err(EngineError::PoolDisposed)));

        drop(held);
        assert_eq!(pool.idle(), 0);
        assert_eq!(driver.database().connections_closed(), 2);
    }
}
