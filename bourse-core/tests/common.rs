//! Shared harness for the end-to-end scenario tests: spins up a real
//! server (accept loop, matchmaker, all registries) bound to an
//! ephemeral port, and gives each test plain `TcpStream` handles to
//! speak the wire protocol against.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use bourse_core::account::AccountStore;
use bourse_core::exchange::Exchange;
use bourse_core::protocol::{self, FrameType, StatusInfo};
use bourse_core::registry::ConnectionRegistry;
use bourse_core::session;
use bourse_core::trader::TraderRegistry;

pub struct TestServer {
    pub addr: SocketAddr,
    pub exchange: Arc<Exchange>,
    pub connections: Arc<ConnectionRegistry>,
}

pub fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let accounts = Arc::new(AccountStore::new(64));
    let traders = Arc::new(TraderRegistry::new(64));
    let connections = Arc::new(ConnectionRegistry::new(64));
    let exchange = Exchange::new();
    exchange.spawn_matchmaker(Arc::clone(&traders));

    {
        let exchange = Arc::clone(&exchange);
        let traders = Arc::clone(&traders);
        let accounts = Arc::clone(&accounts);
        let connections = Arc::clone(&connections);
        thread::spawn(move || {
            for incoming in listener.incoming() {
                let stream = match incoming {
                    Ok(stream) => stream,
                    Err(_) => continue,
                };
                let conn_id = match connections.register(&stream) {
                    Ok(id) => id,
                    Err(_) => continue,
                };
                let exchange = Arc::clone(&exchange);
                let traders = Arc::clone(&traders);
                let accounts = Arc::clone(&accounts);
                let connections = Arc::clone(&connections);
                thread::spawn(move || {
                    session::run(stream, conn_id, exchange, traders, accounts, connections)
                });
            }
        });
    }

    TestServer {
        addr,
        exchange,
        connections,
    }
}

/// Connect and log in under `name`, returning the open stream and the
/// status the login `ACK` carried.
pub fn login(addr: SocketAddr, name: &str) -> (TcpStream, StatusInfo) {
    let mut stream = TcpStream::connect(addr).unwrap();
    protocol::send(&mut stream, FrameType::Login, name.as_bytes()).unwrap();
    let (frame_type, payload) = recv_reply(&mut stream);
    assert_eq!(frame_type, FrameType::Ack);
    (stream, StatusInfo::from_bytes(&payload).unwrap())
}

pub fn recv_frame(stream: &mut TcpStream) -> (FrameType, Vec<u8>) {
    let (header, payload) = protocol::recv(stream).unwrap().unwrap();
    (header.frame_type().unwrap(), payload)
}

fn is_broadcast(frame_type: FrameType) -> bool {
    matches!(
        frame_type,
        FrameType::Posted | FrameType::Canceled | FrameType::Bought | FrameType::Sold | FrameType::Traded
    )
}

/// Read the `ACK`/`NACK` reply to the request just sent, discarding any
/// interleaved broadcast notifications ahead of it — the matchmaker and
/// other traders' session threads can write to this socket concurrently
/// with the server computing this reply.
pub fn recv_reply(stream: &mut TcpStream) -> (FrameType, Vec<u8>) {
    for _ in 0..16 {
        let (frame_type, payload) = recv_frame(stream);
        if !is_broadcast(frame_type) {
            return (frame_type, payload);
        }
    }
    panic!("did not see a reply within 16 reads");
}

/// Read frames until one of type `wanted` arrives, discarding any other
/// interleaved broadcast notifications.
pub fn recv_until(stream: &mut TcpStream, wanted: FrameType) -> Vec<u8> {
    for _ in 0..16 {
        let (frame_type, payload) = recv_frame(stream);
        if frame_type == wanted {
            return payload;
        }
    }
    panic!("did not see a {wanted:?} frame within 16 reads");
}

pub fn deposit(stream: &mut TcpStream, amount: u32) -> StatusInfo {
    protocol::send(stream, FrameType::Deposit, &amount.to_be_bytes()).unwrap();
    let (frame_type, payload) = recv_reply(stream);
    assert_eq!(frame_type, FrameType::Ack);
    StatusInfo::from_bytes(&payload).unwrap()
}

pub fn escrow(stream: &mut TcpStream, quantity: u32) -> StatusInfo {
    protocol::send(stream, FrameType::Escrow, &quantity.to_be_bytes()).unwrap();
    let (frame_type, payload) = recv_reply(stream);
    assert_eq!(frame_type, FrameType::Ack);
    StatusInfo::from_bytes(&payload).unwrap()
}

pub fn buy(stream: &mut TcpStream, quantity: u32, price: u32) -> (FrameType, StatusInfo) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&quantity.to_be_bytes());
    payload.extend_from_slice(&price.to_be_bytes());
    protocol::send(stream, FrameType::Buy, &payload).unwrap();
    let (frame_type, reply) = recv_reply(stream);
    (frame_type, StatusInfo::from_bytes(&reply).unwrap_or_default())
}

pub fn sell(stream: &mut TcpStream, quantity: u32, price: u32) -> (FrameType, StatusInfo) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&quantity.to_be_bytes());
    payload.extend_from_slice(&price.to_be_bytes());
    protocol::send(stream, FrameType::Sell, &payload).unwrap();
    let (frame_type, reply) = recv_reply(stream);
    (frame_type, StatusInfo::from_bytes(&reply).unwrap_or_default())
}

pub fn cancel(stream: &mut TcpStream, order_id: u32) -> FrameType {
    protocol::send(stream, FrameType::Cancel, &order_id.to_be_bytes()).unwrap();
    recv_reply(stream).0
}

pub fn status(stream: &mut TcpStream) -> StatusInfo {
    protocol::send(stream, FrameType::Status, &[]).unwrap();
    let (frame_type, payload) = recv_reply(stream);
    assert_eq!(frame_type, FrameType::Ack);
    StatusInfo::from_bytes(&payload).unwrap()
}
