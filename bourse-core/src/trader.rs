//! Fixed-capacity registry of logged-in traders.
//!
//! A trader is identified by the pair (connection id, name). Reference
//! counting is `Arc`'s own strong-count rather than a hand-rolled
//! counter: an order holds one clone of `Arc<Trader>` for as long as it
//! is live, the session holds another for as long as it is logged in, and
//! the trader is freed automatically once the last clone is dropped. The
//! `trader_ref`/`trader_unref` helpers below exist only to log the
//! advisory reason string at the call sites the original C source names,
//! not to maintain the count themselves.

use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::trace;

use crate::account::{Account, AccountError, AccountStore};
use crate::protocol::{self, FrameType, StatusInfo};
use crate::registry::ConnId;

/// Default bound on the number of simultaneously logged-in traders,
/// matching the original C source's fixed-size `allTraders` array.
pub const DEFAULT_MAX_TRADERS: usize = 1024;

/// Errors raised while logging a trader in.
#[derive(Debug, Error)]
pub enum TraderError {
    /// The registry is at capacity.
    #[error("trader registry is at capacity")]
    OutOfCapacity,
    /// The name is already logged in on a different connection.
    #[error("{0} is already logged in on another connection")]
    AlreadyLoggedIn(String),
    /// The backing account could not be created.
    #[error(transparent)]
    Account(#[from] AccountError),
    /// Cloning the connection's write half failed.
    #[error("failed to clone connection: {0}")]
    Io(#[from] io::Error),
}

/// A logged-in trader: a connection, a claimed name, and the account it
/// is bound to.
pub struct Trader {
    pub conn_id: ConnId,
    pub name: String,
    pub account: Arc<Account>,
    writer: Mutex<TcpStream>,
}

impl Trader {
    /// Send a single frame to this trader, serialised against any other
    /// frame addressed to the same connection.
    pub fn send_packet(&self, frame_type: FrameType, payload: &[u8]) -> Result<(), protocol::ProtocolError> {
        let mut writer = self.writer.lock().unwrap();
        protocol::send(&mut *writer, frame_type, payload)
    }

    /// Send an `ACK` carrying a status snapshot.
    pub fn send_ack(&self, status: StatusInfo) -> Result<(), protocol::ProtocolError> {
        self.send_packet(FrameType::Ack, &status.to_bytes())
    }

    /// Send an empty `NACK`.
    pub fn send_nack(&self) -> Result<(), protocol::ProtocolError> {
        self.send_packet(FrameType::Nack, &[])
    }
}

/// Clone the `Arc<Trader>` handle, logging why. Equivalent to the
/// original `trader_ref`: the returned clone is the new reference.
pub fn trader_ref(trader: &Arc<Trader>, reason: &str) -> Arc<Trader> {
    trace!(trader = %trader.name, %reason, "trader ref");
    Arc::clone(trader)
}

/// Drop an `Arc<Trader>` handle, logging why. Equivalent to the original
/// `trader_unref`.
pub fn trader_unref(trader: Arc<Trader>, reason: &str) {
    trace!(trader = %trader.name, %reason, "trader unref");
    drop(trader);
}

/// Registry of currently logged-in traders, keyed by connection id.
pub struct TraderRegistry {
    directory: Mutex<HashMap<ConnId, Arc<Trader>>>,
    max_traders: usize,
}

impl TraderRegistry {
    /// Create an empty registry bounded to `max_traders` simultaneous logins.
    pub fn new(max_traders: usize) -> Self {
        TraderRegistry {
            directory: Mutex::new(HashMap::new()),
            max_traders,
        }
    }

    /// Log a connection in under `name`, creating its backing account on
    /// first use. Fails if the registry is full or `name` is already
    /// logged in on a different connection.
    pub fn login(
        &self,
        conn_id: ConnId,
        name: &str,
        stream: &TcpStream,
        accounts: &AccountStore,
    ) -> Result<Arc<Trader>, TraderError> {
        let mut directory = self.directory.lock().unwrap();

        if let Some(existing) = directory.values().find(|t| t.name == name) {
            if existing.conn_id != conn_id {
                return Err(TraderError::AlreadyLoggedIn(name.to_string()));
            }
            return Ok(Arc::clone(existing));
        }
        if directory.len() >= self.max_traders {
            return Err(TraderError::OutOfCapacity);
        }

        let account = accounts.lookup(name)?;
        let writer = stream.try_clone()?;
        let trader = Arc::new(Trader {
            conn_id,
            name: name.to_string(),
            account,
            writer: Mutex::new(writer),
        });
        directory.insert(conn_id, Arc::clone(&trader));
        Ok(trader)
    }

    /// Release the session's reference to a trader. The trader handle
    /// (and its account) remain valid until the last clone held by a live
    /// order is also dropped.
    pub fn logout(&self, conn_id: ConnId) {
        let mut directory = self.directory.lock().unwrap();
        if let Some(trader) = directory.remove(&conn_id) {
            trader_unref(trader, "logout");
        }
    }

    /// Send a frame to every currently logged-in trader. Per-trader send
    /// errors are swallowed so one bad peer cannot stall the broadcast.
    pub fn broadcast(&self, frame_type: FrameType, payload: &[u8]) {
        let directory = self.directory.lock().unwrap();
        for trader in directory.values() {
            if let Err(err) = trader.send_packet(frame_type, payload) {
                tracing::warn!(trader = %trader.name, %err, "broadcast send failed");
            }
        }
    }
}

impl Default for TraderRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRADERS)
    }
}
