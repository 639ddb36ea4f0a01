//! The matchmaker: a dedicated thread that drains all currently
//! crossable orders off the book and settles each trade.
//!
//! Grounded on the original C matchmaking thread, which slept on a
//! semaphore posted by every `post_buy`/`post_sell`/`cancel`, woke to
//! walk the book once, and went back to sleep. The semaphore here is a
//! `(Mutex<bool>, Condvar)` pending-activity flag owned by [`Exchange`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::exchange::book::Trade;
use crate::exchange::Exchange;
use crate::protocol::{FrameType, NotifyInfo};
use crate::trader::TraderRegistry;

/// Body of the matchmaker thread: wait for activity, drain all crossable
/// orders, settle and broadcast each trade, repeat until told to stop.
pub fn run(exchange: Arc<Exchange>, traders: Arc<TraderRegistry>) {
    loop {
        if exchange.wait_for_activity_or_shutdown() {
            debug!("matchmaker: shutdown signalled, draining remaining crosses");
        }

        loop {
            let trade = {
                let mut book = exchange.book.lock().unwrap();
                book.match_one()
            };
            match trade {
                Some(trade) => settle(&trade, &traders),
                None => break,
            }
        }

        if exchange.is_shutting_down() {
            debug!("matchmaker: exiting");
            exchange.ack_matchmaker_stopped();
            return;
        }
    }
}

fn settle(trade: &Trade, traders: &TraderRegistry) {
    trade.seller.account.increase_balance(trade.price * trade.quantity);
    trade.buyer.account.increase_inventory(trade.quantity);
    if trade.buyer_refund > 0 {
        trade.buyer.account.increase_balance(trade.buyer_refund);
    }

    debug!(
        buyer = %trade.buyer.name,
        seller = %trade.seller.name,
        quantity = trade.quantity,
        price = trade.price,
        "trade settled"
    );

    let notify = NotifyInfo {
        buyer: trade.buyer_order_id,
        seller: trade.seller_order_id,
        quantity: trade.quantity,
        price: trade.price,
    };
    let payload = notify.to_bytes();

    if let Err(err) = trade.buyer.send_packet(FrameType::Bought, &payload) {
        warn!(trader = %trade.buyer.name, %err, "failed to notify buyer");
    }
    if let Err(err) = trade.seller.send_packet(FrameType::Sold, &payload) {
        warn!(trader = %trade.seller.name, %err, "failed to notify seller");
    }
    traders.broadcast(FrameType::Traded, &payload);
}
