//! The order book: live orders plus the best-bid/best-ask/last-trade
//! tracking shown in `STATUS_INFO`.
//!
//! Grounded on the original C `exchange.c` linked lists of buy/sell
//! orders, reshaped into a single `Vec<Order>` since the book is already
//! serialised behind one lock and a flat vector is simplest to scan and
//! to remove from. The two tracking fields correct the originals' known
//! bugs: `lowest_ask` is updated by taking the minimum of postings (the
//! original mistakenly tracked a maximum), matching a normative
//! resolution of the source material's open questions.

use std::sync::Arc;

use crate::exchange::error::ExchangeError;
use crate::registry::ConnId;
use crate::trader::Trader;

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// A single resting order. `quantity` is the amount still unfilled;
/// the order is removed from the book once it reaches zero.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: u32,
    pub side: Side,
    pub price: u32,
    pub quantity: u32,
    pub trader: Arc<Trader>,
}

/// The outcome of one crossing buy/sell pair.
pub struct Trade {
    pub buyer: Arc<Trader>,
    pub seller: Arc<Trader>,
    pub buyer_order_id: u32,
    pub seller_order_id: u32,
    pub quantity: u32,
    pub price: u32,
    /// Amount refunded to the buyer's balance because the trade cleared
    /// below the price the buyer had reserved funds at.
    pub buyer_refund: u32,
    pub buyer_order_filled: bool,
    pub seller_order_filled: bool,
}

/// A single symbol's resting orders and market-summary fields.
pub struct OrderBook {
    orders: Vec<Order>,
    next_order_id: u32,
    pub highest_bid: u32,
    pub lowest_ask: u32,
    pub last: u32,
}

impl OrderBook {
    pub fn new() -> Self {
        OrderBook {
            orders: Vec::new(),
            next_order_id: 1,
            highest_bid: 0,
            lowest_ask: u32::MAX,
            last: 0,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    /// Rest a new buy order on the book, returning its id.
    pub fn post_buy(&mut self, trader: Arc<Trader>, quantity: u32, price: u32) -> u32 {
        let id = self.allocate_id();
        self.orders.push(Order {
            id,
            side: Side::Buy,
            price,
            quantity,
            trader,
        });
        if price > self.highest_bid {
            self.highest_bid = price;
        }
        id
    }

    /// Rest a new sell order on the book, returning its id.
    pub fn post_sell(&mut self, trader: Arc<Trader>, quantity: u32, price: u32) -> u32 {
        let id = self.allocate_id();
        self.orders.push(Order {
            id,
            side: Side::Sell,
            price,
            quantity,
            trader,
        });
        if price < self.lowest_ask {
            self.lowest_ask = price;
        }
        id
    }

    /// Remove a live order owned by `owner`, returning it for refunding.
    pub fn cancel(&mut self, order_id: u32, owner: ConnId) -> Result<Order, ExchangeError> {
        let idx = self
            .orders
            .iter()
            .position(|o| o.id == order_id && o.trader.conn_id == owner)
            .ok_or(ExchangeError::NoSuchOrder)?;
        Ok(self.orders.remove(idx))
    }

    /// Find and settle the first crossing buy/sell pair, mutating both
    /// orders' remaining quantity and removing either that reaches zero.
    /// Orders are scanned in posting order, matching the original
    /// source's simple linked-list walk rather than price/time priority.
    pub fn match_one(&mut self) -> Option<Trade> {
        let mut pair = None;
        'search: for (bi, buy) in self.orders.iter().enumerate() {
            if buy.side != Side::Buy {
                continue;
            }
            for (si, sell) in self.orders.iter().enumerate() {
                if sell.side == Side::Sell
                    && buy.price >= sell.price
                    && buy.trader.conn_id != sell.trader.conn_id
                {
                    pair = Some((bi, si));
                    break 'search;
                }
            }
        }
        let (bi, si) = pair?;

        let buy_price = self.orders[bi].price;
        let sell_price = self.orders[si].price;
        let mut price = sell_price.max(self.last);
        price = buy_price.min(price);
        let quantity = self.orders[bi].quantity.min(self.orders[si].quantity);

        self.last = price;
        self.orders[bi].quantity -= quantity;
        self.orders[si].quantity -= quantity;

        let buyer = Arc::clone(&self.orders[bi].trader);
        let seller = Arc::clone(&self.orders[si].trader);
        let buyer_order_id = self.orders[bi].id;
        let seller_order_id = self.orders[si].id;
        let buyer_refund = (buy_price - price) * quantity;
        let buyer_order_filled = self.orders[bi].quantity == 0;
        let seller_order_filled = self.orders[si].quantity == 0;

        let mut remove = [bi, si];
        remove.sort_unstable();
        let (lo, hi) = (remove[0], remove[1]);
        if seller_order_filled || buyer_order_filled {
            if self.orders[hi].quantity == 0 {
                self.orders.remove(hi);
            }
            if self.orders[lo].quantity == 0 {
                self.orders.remove(lo);
            }
        }

        Some(Trade {
            buyer,
            seller,
            buyer_order_id,
            seller_order_id,
            quantity,
            price,
            buyer_refund,
            buyer_order_filled,
            seller_order_filled,
        })
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
