//! Registry of live client connections, used to drive graceful shutdown.
//!
//! Grounded on the original C `client_registry`: a bounded table of live
//! file descriptors, a condition signalled whenever the table becomes
//! empty, and a `shutdown_all` that half-closes every live connection's
//! read side so each session thread observes EOF and exits on its own.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

/// Small monotonically increasing handle identifying a session, standing
/// in for the original source's raw file descriptor.
pub type ConnId = u64;

/// Errors raised by the connection registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry is at capacity.
    #[error("connection registry is at capacity")]
    OutOfCapacity,
}

/// Bounded table of live connections plus the id allocator for new ones.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<ConnId, TcpStream>>,
    empty: Condvar,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry bounded to `max_connections` simultaneous
    /// sessions.
    pub fn new(max_connections: usize) -> Self {
        ConnectionRegistry {
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
            empty: Condvar::new(),
            max_connections,
        }
    }

    /// Register a freshly accepted connection, returning the id assigned
    /// to it. The registry keeps its own clone of the stream so it can
    /// half-close it during shutdown; the caller keeps the original for
    /// reading and writing.
    pub fn register(&self, stream: &TcpStream) -> Result<ConnId, RegistryError> {
        let mut live = self.live.lock().unwrap();
        if live.len() >= self.max_connections {
            return Err(RegistryError::OutOfCapacity);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let clone = stream.try_clone().map_err(|_| RegistryError::OutOfCapacity)?;
        live.insert(id, clone);
        debug!(conn_id = id, live = live.len(), "connection registered");
        Ok(id)
    }

    /// Remove a connection from the registry. Idempotent: unregistering
    /// an id that is no longer present is a no-op. Wakes any waiter in
    /// [`Self::wait_for_empty`] once the table transitions to zero.
    pub fn unregister(&self, id: ConnId) {
        let mut live = self.live.lock().unwrap();
        live.remove(&id);
        debug!(conn_id = id, live = live.len(), "connection unregistered");
        if live.is_empty() {
            self.empty.notify_all();
        }
    }

    /// Block until the registry transitions to empty.
    pub fn wait_for_empty(&self) {
        let live = self.live.lock().unwrap();
        let _guard = self
            .empty
            .wait_while(live, |live| !live.is_empty())
            .unwrap();
    }

    /// Half-close the read side of every live connection, so each session
    /// thread blocked in a `recv` observes EOF and terminates on its own.
    pub fn shutdown_all(&self) {
        let live = self.live.lock().unwrap();
        for (id, stream) in live.iter() {
            if let Err(err) = stream.shutdown(Shutdown::Read) {
                warn!(conn_id = id, %err, "failed to half-close connection during shutdown");
            }
        }
    }

    /// Number of currently live connections.
    pub fn len(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Whether the registry currently holds no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(1024)
    }
}
