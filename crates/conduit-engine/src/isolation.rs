//! Isolation level configuration of physical connections.

use conduit_common::IsolationLevel;
use tracing::debug;

use crate::driver::{Driver, PhysicalConnection};
use crate::error::{EngineError, EngineResult};

/// Fails unless `driver` accepts `level`.
pub(crate) fn check_supported(driver: &dyn Driver, level: IsolationLevel) -> EngineResult<()> {
    if driver.supported_isolation_levels().contains(&level) {
        Ok(())
    } else {
        Err(EngineError::UnsupportedIsolationLevel {
            level,
            driver: driver.name().to_string(),
        })
    }
}

/// Sets `level` on `conn` after checking the driver supports it.
pub(crate) fn apply(
    driver: &dyn Driver,
    conn: &mut dyn PhysicalConnection,
    level: IsolationLevel,
) -> EngineResult<()> {
    check_supported(driver, level)?;
    debug!(%level, "setting isolation level");
    conn.set_isolation_level(level)
}

/// Restores `default` on `conn`. Returns true if the level had changed.
pub(crate) fn revert(conn: &mut dyn PhysicalConnection, default: IsolationLevel) -> EngineResult<bool> {
    if conn.isolation_level()? == default {
        return Ok(false);
    }
    debug!(level = %default, "restoring default isolation level");
    conn.set_isolation_level(default)?;
    Ok(true)
}
