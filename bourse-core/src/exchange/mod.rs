//! The exchange: a single order book guarded by a lock, a matchmaker
//! thread that drains it, and the funds/inventory movements that back
//! posting, cancelling, and settling orders.
//!
//! Lock order is fixed at (1) the book lock, acquired only inside the
//! methods here, below (2) the trader/account directory locks and (3)
//! per-entity locks acquired by callers before reaching this module —
//! nothing in this module ever calls back into the trader registry or
//! account store while holding the book lock.

pub mod book;
mod error;
pub mod matching;

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

pub use book::{Order, OrderBook, Side, Trade};
pub use error::ExchangeError;

use tracing::debug;

use crate::protocol::{FrameType, NotifyInfo};
use crate::trader::{Trader, TraderRegistry};

/// The exchange for a single symbol: one order book plus the signalling
/// state that drives its matchmaker thread.
pub struct Exchange {
    book: Mutex<OrderBook>,
    activity: Mutex<bool>,
    activity_cv: Condvar,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
    stopped: Mutex<bool>,
    stopped_cv: Condvar,
}

impl Exchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Exchange {
            book: Mutex::new(OrderBook::new()),
            activity: Mutex::new(false),
            activity_cv: Condvar::new(),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
            stopped: Mutex::new(false),
            stopped_cv: Condvar::new(),
        })
    }

    /// Start the matchmaker thread. Returns its join handle so the
    /// caller can wait on it during shutdown.
    pub fn spawn_matchmaker(self: &Arc<Self>, traders: Arc<TraderRegistry>) -> JoinHandle<()> {
        let exchange = Arc::clone(self);
        thread::Builder::new()
            .name("matchmaker".into())
            .spawn(move || matching::run(exchange, traders))
            .expect("failed to spawn matchmaker thread")
    }

    fn signal_activity(&self) {
        let mut activity = self.activity.lock().unwrap();
        *activity = true;
        self.activity_cv.notify_one();
    }

    /// Block until either new activity is signalled or shutdown begins.
    /// Returns `true` if woken by shutdown.
    pub(crate) fn wait_for_activity_or_shutdown(&self) -> bool {
        let mut activity = self.activity.lock().unwrap();
        while !*activity {
            if *self.shutdown.lock().unwrap() {
                return true;
            }
            let (guard, timeout) = self
                .activity_cv
                .wait_timeout(activity, std::time::Duration::from_millis(50))
                .unwrap();
            activity = guard;
            if timeout.timed_out() && *self.shutdown.lock().unwrap() {
                return true;
            }
        }
        *activity = false;
        false
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.lock().unwrap()
    }

    pub(crate) fn ack_matchmaker_stopped(&self) {
        let mut stopped = self.stopped.lock().unwrap();
        *stopped = true;
        self.stopped_cv.notify_all();
    }

    /// Post a buy order, reserving `quantity * price` from the trader's
    /// balance up front.
    pub fn post_buy(&self, trader: &Arc<Trader>, quantity: u32, price: u32, traders: &TraderRegistry) -> Result<u32, ExchangeError> {
        if quantity == 0 || price == 0 {
            return Err(ExchangeError::InvalidOrder);
        }
        let cost = checked_value(quantity, price)?;
        trader.account.decrease_balance(cost)?;

        let id = {
            let mut book = self.book.lock().unwrap();
            book.post_buy(Arc::clone(trader), quantity, price)
        };
        self.signal_activity();
        self.broadcast_posted(traders, id, 0, quantity, price);
        debug!(trader = %trader.name, quantity, price, order_id = id, "buy posted");
        Ok(id)
    }

    /// Post a sell order, reserving `quantity` from the trader's
    /// inventory up front.
    pub fn post_sell(&self, trader: &Arc<Trader>, quantity: u32, price: u32, traders: &TraderRegistry) -> Result<u32, ExchangeError> {
        if quantity == 0 || price == 0 {
            return Err(ExchangeError::InvalidOrder);
        }
        checked_value(quantity, price)?;
        trader.account.decrease_inventory(quantity)?;

        let id = {
            let mut book = self.book.lock().unwrap();
            book.post_sell(Arc::clone(trader), quantity, price)
        };
        self.signal_activity();
        self.broadcast_posted(traders, 0, id, quantity, price);
        debug!(trader = %trader.name, quantity, price, order_id = id, "sell posted");
        Ok(id)
    }

    /// Cancel a live order owned by `trader`, refunding whatever was
    /// reserved for its unfilled remainder.
    pub fn cancel(&self, trader: &Arc<Trader>, order_id: u32, traders: &TraderRegistry) -> Result<(), ExchangeError> {
        let order = {
            let mut book = self.book.lock().unwrap();
            book.cancel(order_id, trader.conn_id)?
        };

        match order.side {
            Side::Buy => trader.account.increase_balance(order.quantity * order.price),
            Side::Sell => trader.account.increase_inventory(order.quantity),
        }

        let (buyer, seller) = match order.side {
            Side::Buy => (order.id, 0),
            Side::Sell => (0, order.id),
        };
        let payload = NotifyInfo {
            buyer,
            seller,
            quantity: order.quantity,
            price: order.price,
        }
        .to_bytes();
        traders.broadcast(FrameType::Canceled, &payload);
        debug!(trader = %trader.name, order_id, "order cancelled");
        Ok(())
    }

    fn broadcast_posted(
        &self,
        traders: &TraderRegistry,
        buyer_order_id: u32,
        seller_order_id: u32,
        quantity: u32,
        price: u32,
    ) {
        let payload = NotifyInfo {
            buyer: buyer_order_id,
            seller: seller_order_id,
            quantity,
            price,
        }
        .to_bytes();
        traders.broadcast(FrameType::Posted, &payload);
    }

    /// Snapshot of `(highest_bid, lowest_ask, last)` for `STATUS_INFO`.
    pub fn status(&self) -> (u32, u32, u32) {
        let book = self.book.lock().unwrap();
        let ask = if book.lowest_ask == u32::MAX { 0 } else { book.lowest_ask };
        (book.highest_bid, ask, book.last)
    }

    /// Signal the matchmaker to stop after draining the book, and block
    /// until it has.
    pub fn finalize(&self) {
        {
            let mut shutdown = self.shutdown.lock().unwrap();
            *shutdown = true;
        }
        self.shutdown_cv.notify_all();
        self.activity_cv.notify_all();

        let stopped = self.stopped.lock().unwrap();
        let _guard = self.stopped_cv.wait_while(stopped, |s| !*s).unwrap();
    }
}

fn checked_value(quantity: u32, price: u32) -> Result<u32, ExchangeError> {
    (quantity as u64)
        .checked_mul(price as u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(ExchangeError::Overflow)
}
