//! `dbsteady` - resilient database connection management
//!
//! This library owns a single long-lived database connection on behalf of an
//! application: it lazily establishes and caches the connection, shares an
//! in-flight connect attempt between concurrent callers, and re-executes
//! caller-supplied operations with capped exponential backoff when a
//! transient infrastructure failure occurs.

#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    missing_docs,
    rust_2018_idioms
)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/// Transient-failure classification
pub mod classify;
/// Configuration management
pub mod config;
pub mod connection;
/// PostgreSQL backend
pub mod database;
pub mod retry;

pub use classify::{ErrorClassifier, PgErrorClassifier};
pub use config::Config;
pub use connection::{ConnectError, ConnectionManager, ConnectionState, Connector};
pub use database::PgConnector;
pub use retry::{ExecError, RetryExecutor, RetryPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
