//! Database connection lifecycle management
//!
//! Owns the single long-lived connection handle: lazy establishment, reuse
//! while ready, single-flight sharing of an in-flight connect attempt,
//! invalidation of stale handles, and best-effort shutdown.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Driver seam: how the manager opens, probes, and closes connections.
///
/// One implementation exists per backing store; tests supply mocks.
pub trait Connector: Send + Sync + 'static {
    /// Live connection handle produced by a successful connect.
    type Handle: Clone + Send + Sync + 'static;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Handle, ConnectError>> + Send;

    /// Whether the handle is still usable for queries.
    fn is_ready(&self, handle: &Self::Handle) -> bool;

    /// Close the handle. Closing an already-closed handle must be a no-op.
    fn close(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;
}

/// Failure to establish a connection.
///
/// Cloneable so every caller joined on the same connect attempt observes the
/// same outcome; the driver's error stays reachable through [`source`].
///
/// [`source`]: std::error::Error::source
#[derive(Debug, Clone)]
pub struct ConnectError {
    source: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl ConnectError {
    /// Wrap a driver error.
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    /// The underlying driver error.
    #[must_use]
    pub fn get_ref(&self) -> &(dyn std::error::Error + 'static) {
        self.source.as_ref()
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to establish database connection: {}", self.source)
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.get_ref())
    }
}

/// Observable readiness of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A cached handle exists and reports ready
    Ready,
    /// No usable handle yet, but a connect attempt is in flight
    Connecting,
    /// No usable handle and no attempt in flight
    Disconnected,
}

type PendingConnect<H> = Shared<BoxFuture<'static, Result<H, ConnectError>>>;

struct CacheSlot<H> {
    connection: Option<H>,
    pending: Option<PendingConnect<H>>,
}

impl<H> CacheSlot<H> {
    const fn empty() -> Self {
        Self {
            connection: None,
            pending: None,
        }
    }
}

/// Owns the cached connection handle and the in-flight connect attempt.
///
/// Construct one per process at startup and share it by reference; every
/// consumer goes through [`ensure_connected`] rather than holding its own
/// handle.
///
/// [`ensure_connected`]: ConnectionManager::ensure_connected
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    slot: Mutex<CacheSlot<C::Handle>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager with an empty cache slot.
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            slot: Mutex::new(CacheSlot::empty()),
        }
    }

    /// Return a live, ready connection handle, establishing one if needed.
    ///
    /// A cached handle that still reports ready is returned as-is. Callers
    /// that arrive while a connect attempt is in flight join that attempt
    /// instead of opening a second connection. A joined attempt that fails is
    /// not propagated; the caller falls through to a fresh attempt. Only the
    /// caller that initiated an attempt propagates its failure.
    pub async fn ensure_connected(&self) -> Result<C::Handle, ConnectError> {
        loop {
            let (attempt, initiated) = {
                let mut slot = self.lock_slot();
                if let Some(handle) = slot.connection.clone() {
                    if self.connector.is_ready(&handle) {
                        debug!("reusing cached database connection");
                        return Ok(handle);
                    }
                    warn!("cached database connection is no longer ready, discarding");
                    slot.connection = None;
                    slot.pending = None;
                }
                match slot.pending.clone() {
                    Some(pending) => (pending, false),
                    None => {
                        debug!("opening database connection");
                        let connector = Arc::clone(&self.connector);
                        let pending = async move { connector.connect().await }.boxed().shared();
                        slot.pending = Some(pending.clone());
                        (pending, true)
                    }
                }
            };

            match attempt.await {
                Ok(handle) => {
                    let mut slot = self.lock_slot();
                    slot.connection = Some(handle.clone());
                    slot.pending = None;
                    if initiated {
                        info!("database connection established");
                    }
                    return Ok(handle);
                }
                Err(error) if initiated => {
                    self.lock_slot().pending = None;
                    return Err(error);
                }
                Err(error) => {
                    // Joined attempt failed; clear it and try fresh rather
                    // than propagating someone else's failure. May race a
                    // newer attempt into a redundant connect, which the
                    // driver tolerates.
                    debug!(error = %error, "joined connect attempt failed, falling through");
                    self.lock_slot().pending = None;
                }
            }
        }
    }

    /// Discard the cached handle so the next attempt reconnects.
    pub fn invalidate(&self) {
        let mut slot = self.lock_slot();
        slot.connection = None;
        slot.pending = None;
    }

    /// Best-effort shutdown of the managed connection.
    ///
    /// Intended for one-off maintenance work outside the long-lived request
    /// cycle. Closing when nothing is open is a no-op; calling twice closes
    /// once.
    pub async fn disconnect(&self) {
        let handle = {
            let mut slot = self.lock_slot();
            slot.pending = None;
            slot.connection.take()
        };
        if let Some(handle) = handle {
            self.connector.close(handle).await;
            info!("database connection closed");
        }
    }

    /// Snapshot of the manager's readiness.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        let slot = self.lock_slot();
        if let Some(handle) = slot.connection.as_ref() {
            if self.connector.is_ready(handle) {
                return ConnectionState::Ready;
            }
        }
        if slot.pending.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, CacheSlot<C::Handle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
