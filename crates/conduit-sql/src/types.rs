//! Column types, including user-defined types.

use std::fmt;
use std::sync::Arc;

use crate::key::NoKeyReason;

/// A user-defined column type.
///
/// Implementations must state whether they are safe to participate in a
/// structural cache key by overriding [`CustomType::cache_ok`]. The default
/// is `None` ("undeclared"): statements using the type still execute but are
/// never cached, and a warning is logged once per type name. A wrapper type
/// does not inherit the declaration of the type it wraps.
pub trait CustomType: fmt::Debug + Send + Sync {
    /// Type name, used in diagnostics and cache keys.
    fn name(&self) -> &str;

    /// The SQL type the column is declared with.
    fn ddl(&self) -> String;

    /// Whether the type is safe to cache.
    fn cache_ok(&self) -> Option<bool> {
        None
    }

    /// Key fragment for the type's own parameters. Only consulted when
    /// `cache_ok()` returns `Some(true)`.
    fn cache_key(&self) -> String {
        self.name().to_string()
    }
}

/// The type of a column.
#[derive(Debug, Clone)]
pub enum SqlType {
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Variable-length text.
    Text,
    /// Boolean.
    Boolean,
    /// Binary data.
    Blob,
    /// User-defined type.
    Custom(Arc<dyn CustomType>),
}

impl SqlType {
    /// Returns the SQL type name used in DDL.
    pub fn ddl(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::Float => "FLOAT".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Custom(custom) => custom.ddl(),
        }
    }

    /// Returns the type's contribution to a structural key.
    pub(crate) fn key(&self) -> Result<String, NoKeyReason> {
        match self {
            SqlType::Custom(custom) => match custom.cache_ok() {
                Some(true) => Ok(format!("custom:{}", custom.cache_key())),
                Some(false) => Err(NoKeyReason::UncacheableType(custom.name().to_string())),
                None => Err(NoKeyReason::UndeclaredType(custom.name().to_string())),
            },
            builtin => Ok(builtin.ddl().to_lowercase()),
        }
    }
}
