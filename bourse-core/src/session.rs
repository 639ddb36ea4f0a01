//! Per-connection client session: the `UNAUTH`/`AUTH` state machine that
//! reads frames off one socket and dispatches them against the account,
//! trader registry and exchange.
//!
//! Grounded on the original C `server.c`'s per-client thread: a read
//! loop that dispatches on frame type, replies `ACK`/`NACK`, and on
//! disconnect logs the trader out and unregisters the connection before
//! the thread exits.

use std::net::TcpStream;
use std::sync::Arc;

use tracing::{info, warn};

use crate::account::AccountStore;
use crate::exchange::Exchange;
use crate::protocol::{self, FrameHeader, FrameType, StatusInfo};
use crate::registry::{ConnId, ConnectionRegistry};
use crate::trader::{Trader, TraderRegistry};

/// Run one client's session to completion. Returns once the peer
/// disconnects or sends a frame this server cannot parse.
pub fn run(
    stream: TcpStream,
    conn_id: ConnId,
    exchange: Arc<Exchange>,
    traders: Arc<TraderRegistry>,
    accounts: Arc<AccountStore>,
    connections: Arc<ConnectionRegistry>,
) {
    let mut reader = &stream;
    let mut prelogin_writer = match stream.try_clone() {
        Ok(w) => w,
        Err(err) => {
            warn!(conn_id, %err, "failed to clone connection for replies");
            connections.unregister(conn_id);
            return;
        }
    };

    let mut trader: Option<Arc<Trader>> = None;

    loop {
        let frame = match protocol::recv(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                warn!(conn_id, %err, "session terminated by protocol error");
                break;
            }
        };
        let (header, payload) = frame;

        let frame_type = match header.frame_type() {
            Ok(t) => t,
            Err(_) => {
                reply_nack(&trader, &mut prelogin_writer, conn_id);
                continue;
            }
        };

        dispatch(
            frame_type,
            &header,
            &payload,
            conn_id,
            &mut trader,
            &mut prelogin_writer,
            &exchange,
            &traders,
            &accounts,
        );
    }

    if let Some(trader) = trader.take() {
        info!(conn_id, trader = %trader.name, "trader logged out on disconnect");
        traders.logout(trader.conn_id);
    }
    connections.unregister(conn_id);
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    frame_type: FrameType,
    _header: &FrameHeader,
    payload: &[u8],
    conn_id: ConnId,
    trader: &mut Option<Arc<Trader>>,
    prelogin_writer: &mut TcpStream,
    exchange: &Arc<Exchange>,
    traders: &Arc<TraderRegistry>,
    accounts: &Arc<AccountStore>,
) {
    match frame_type {
        FrameType::Login => {
            if trader.is_some() {
                reply_nack(&*trader, prelogin_writer, conn_id);
                return;
            }
            let name = String::from_utf8_lossy(payload).trim_end_matches('\0').to_string();
            match traders.login(conn_id, &name, &*prelogin_writer, accounts) {
                Ok(t) => {
                    info!(conn_id, trader = %t.name, "trader logged in");
                    let status = status_for(&t, exchange, 0);
                    let _ = t.send_ack(status);
                    *trader = Some(t);
                }
                Err(err) => {
                    warn!(conn_id, name, %err, "login rejected");
                    reply_nack(&*trader, prelogin_writer, conn_id);
                }
            }
        }
        other => {
            let Some(active) = trader.as_ref() else {
                reply_nack(&*trader, prelogin_writer, conn_id);
                return;
            };
            handle_authenticated(other, payload, active, exchange, traders);
        }
    }
}

fn handle_authenticated(
    frame_type: FrameType,
    payload: &[u8],
    trader: &Arc<Trader>,
    exchange: &Arc<Exchange>,
    traders: &Arc<TraderRegistry>,
) {
    let result: Result<StatusInfo, &'static str> = match frame_type {
        FrameType::Status => Ok(status_for(trader, exchange, 0)),
        FrameType::Deposit => match protocol::read_funds_info(payload) {
            Ok(amount) => {
                trader.account.increase_balance(amount);
                Ok(status_for(trader, exchange, 0))
            }
            Err(_) => Err("malformed deposit"),
        },
        FrameType::Withdraw => match protocol::read_funds_info(payload) {
            Ok(amount) => match trader.account.decrease_balance(amount) {
                Ok(()) => Ok(status_for(trader, exchange, 0)),
                Err(_) => Err("withdraw rejected"),
            },
            Err(_) => Err("malformed withdraw"),
        },
        FrameType::Escrow => match protocol::read_escrow_info(payload) {
            Ok(qty) => {
                trader.account.increase_inventory(qty);
                Ok(status_for(trader, exchange, 0))
            }
            Err(_) => Err("malformed escrow"),
        },
        FrameType::Release => match protocol::read_escrow_info(payload) {
            Ok(qty) => match trader.account.decrease_inventory(qty) {
                Ok(()) => Ok(status_for(trader, exchange, 0)),
                Err(_) => Err("release rejected"),
            },
            Err(_) => Err("malformed release"),
        },
        FrameType::Buy => match protocol::read_order_info(payload) {
            Ok((qty, price)) => match exchange.post_buy(trader, qty, price, traders) {
                Ok(id) => Ok(status_for(trader, exchange, id)),
                Err(_) => Err("buy rejected"),
            },
            Err(_) => Err("malformed buy"),
        },
        FrameType::Sell => match protocol::read_order_info(payload) {
            Ok((qty, price)) => match exchange.post_sell(trader, qty, price, traders) {
                Ok(id) => Ok(status_for(trader, exchange, id)),
                Err(_) => Err("sell rejected"),
            },
            Err(_) => Err("malformed sell"),
        },
        FrameType::Cancel => match protocol::read_cancel_info(payload) {
            Ok(order_id) => match exchange.cancel(trader, order_id, traders) {
                Ok(()) => Ok(status_for(trader, exchange, order_id)),
                Err(_) => Err("cancel rejected"),
            },
            Err(_) => Err("malformed cancel"),
        },
        _ => Err("unexpected frame type from client"),
    };

    match result {
        Ok(status) => {
            let _ = trader.send_ack(status);
        }
        Err(reason) => {
            warn!(trader = %trader.name, reason, "request rejected");
            let _ = trader.send_nack();
        }
    }
}

fn status_for(trader: &Trader, exchange: &Exchange, orderid: u32) -> StatusInfo {
    let (balance, inventory) = trader.account.snapshot();
    let (bid, ask, last) = exchange.status();
    StatusInfo {
        orderid,
        quantity: 0,
        inventory,
        balance,
        bid,
        ask,
        last,
    }
}

fn reply_nack(trader: &Option<Arc<Trader>>, prelogin_writer: &mut TcpStream, conn_id: ConnId) {
    let outcome = match trader {
        Some(t) => t.send_nack(),
        None => protocol::send(prelogin_writer, FrameType::Nack, &[]),
    };
    if let Err(err) = outcome {
        warn!(conn_id, %err, "failed to send NACK");
    }
}
