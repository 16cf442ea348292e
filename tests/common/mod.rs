//! Shared test utilities for dbsteady integration tests
#![allow(dead_code)]

use dbsteady::{ConnectError, Connector};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install a subscriber once so failing tests print their trace output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An error the classifier treats as transient.
pub fn transient_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connection timed out")
}

/// An error the classifier treats as fatal.
pub fn fatal_error() -> io::Error {
    io::Error::other("validation failed")
}

/// Connection handle handed out by [`MockConnector`]; `id` identifies which
/// connect attempt produced it (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockHandle {
    pub id: u32,
}

/// Scripted driver for exercising the connection manager without a server.
///
/// Clones share state, so tests keep a clone for counters after handing one
/// to the manager.
#[derive(Clone)]
pub struct MockConnector {
    connect_calls: Arc<AtomicU32>,
    close_calls: Arc<AtomicU32>,
    failing_connects: Arc<AtomicU32>,
    always_fail: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    connect_delay: Duration,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            connect_calls: Arc::new(AtomicU32::new(0)),
            close_calls: Arc::new(AtomicU32::new(0)),
            failing_connects: Arc::new(AtomicU32::new(0)),
            always_fail: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(true)),
            connect_delay: Duration::ZERO,
        }
    }

    /// Make every connect attempt take this long before settling.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Fail the next `count` connect attempts, then succeed again.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Fail every connect attempt until switched back off.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Control what `is_ready` reports for every outstanding handle.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    type Handle = MockHandle;

    fn connect(&self) -> impl Future<Output = Result<MockHandle, ConnectError>> + Send {
        let state = self.clone();
        async move {
            let id = state.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !state.connect_delay.is_zero() {
                tokio::time::sleep(state.connect_delay).await;
            }
            if state.take_failure() {
                Err(ConnectError::new(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "mock connect timed out",
                )))
            } else {
                Ok(MockHandle { id })
            }
        }
    }

    fn is_ready(&self, _handle: &MockHandle) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn close(&self, _handle: MockHandle) -> impl Future<Output = ()> + Send {
        let close_calls = Arc::clone(&self.close_calls);
        async move {
            close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}
