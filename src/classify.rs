//! Transient-failure classification
//!
//! Decides whether a failure is worth retrying. The original connectivity
//! checks are duck-typed against one driver's error shapes; here the
//! capability is a trait so the retry executor stays decoupled from any
//! specific backing store.

use std::error::Error;
use std::io;
use tokio_postgres::error::SqlState;

/// Capability for deciding whether a failure is transient.
///
/// Pure predicate, no side effects. The retry executor consults it for every
/// failure, from connect attempts and operation bodies alike.
pub trait ErrorClassifier: Send + Sync {
    /// `true` when the error is expected to resolve on retry.
    fn is_retriable(&self, error: &(dyn Error + 'static)) -> bool;
}

/// Message fragments marking a transient connectivity failure, matched
/// case-insensitively against every link of the error chain.
const TRANSIENT_MESSAGE_MARKERS: &[&str] = &[
    "not connected",
    "disconnected",
    "timed out",
    "network",
    "topology",
    "dns",
    "server selection",
];

/// Resolver failure texts as the OS reports them through `getaddrinfo`.
const RESOLVER_MESSAGE_MARKERS: &[&str] = &[
    "failed to lookup address",
    "name or service not known",
    "temporary failure in name resolution",
    "no such host",
];

/// Classifier for the PostgreSQL backend.
///
/// Walks the error source chain and reports retriable on transport-level IO
/// failures, driver-reported closed connections, connectivity-class
/// SQLSTATEs, and the known transient message markers. Everything else is
/// fatal and propagates on first occurrence without consuming a retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgErrorClassifier;

impl PgErrorClassifier {
    /// Create a classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ErrorClassifier for PgErrorClassifier {
    fn is_retriable(&self, error: &(dyn Error + 'static)) -> bool {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(link) = current {
            if let Some(io_error) = link.downcast_ref::<io::Error>() {
                if is_transient_io_kind(io_error.kind()) {
                    return true;
                }
            }
            if let Some(pg_error) = link.downcast_ref::<tokio_postgres::Error>() {
                if pg_error.is_closed() {
                    return true;
                }
                if pg_error.code().is_some_and(is_transient_sql_state) {
                    return true;
                }
            }
            if message_marks_transient(&link.to_string()) {
                return true;
            }
            current = link.source();
        }
        false
    }
}

fn is_transient_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

fn is_transient_sql_state(state: &SqlState) -> bool {
    [
        SqlState::CONNECTION_EXCEPTION,
        SqlState::CONNECTION_DOES_NOT_EXIST,
        SqlState::CONNECTION_FAILURE,
        SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION,
        SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION,
        SqlState::CANNOT_CONNECT_NOW,
        SqlState::ADMIN_SHUTDOWN,
        SqlState::CRASH_SHUTDOWN,
        SqlState::TOO_MANY_CONNECTIONS,
    ]
    .contains(state)
}

fn message_marks_transient(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_MESSAGE_MARKERS
        .iter()
        .chain(RESOLVER_MESSAGE_MARKERS)
        .any(|marker| lowered.contains(marker))
}
