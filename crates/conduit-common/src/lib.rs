//! # conduit-common
//!
//! Common types, constants and configuration for Conduit.
//!
//! This crate provides the foundational pieces shared by every Conduit
//! component:
//!
//! - **Types**: bindable `Value`s, result `Row`s and the `IsolationLevel` set
//! - **Constants**: cache sizing, buffering and pool defaults
//! - **Config**: serde-backed engine configuration with TOML loading
//!
//! ## Example
//!
//! ```rust
//! use conduit_common::config::EngineConfig;
//! use conduit_common::types::{IsolationLevel, Value};
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.cache.target_size, 500);
//!
//! let level: IsolationLevel = "SERIALIZABLE".parse().unwrap();
//! assert_eq!(level, IsolationLevel::Serializable);
//! assert_eq!(Value::from(5_i64).as_i64(), Some(5));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod types;

pub use config::{CacheConfig, ConfigError, EngineConfig, PoolSettings};
pub use constants::*;
pub use types::{FromValue, IsolationLevel, Row, Value};
