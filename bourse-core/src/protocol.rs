//! Binary wire protocol: a fixed 16-byte header followed by an optional
//! payload, all multi-byte integers in network byte order.
//!
//! Mirrors the framing used by the original C `proto_send_packet` /
//! `proto_recv_packet`: the sender stamps its own wall-clock at transmit
//! time; the frame carries no length-prefixed string fields beyond the
//! raw `LOGIN` name.

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Size in bytes of the fixed frame header on the wire.
pub const HEADER_LEN: usize = 16;

/// Errors that can occur while framing or deframing the wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The peer closed the connection mid-frame (after the header had
    /// started but before it, or its payload, fully arrived).
    #[error("connection closed mid-frame")]
    Truncated,
    /// The header named a frame type this server does not understand.
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
}

/// The type of a framed packet. Discriminants are part of the wire
/// contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Client -> server: authenticate with a claimed name.
    Login = 0,
    /// Client -> server: request current account/market status.
    Status = 1,
    /// Client -> server: increase account balance.
    Deposit = 2,
    /// Client -> server: decrease account balance.
    Withdraw = 3,
    /// Client -> server: increase account inventory.
    Escrow = 4,
    /// Client -> server: decrease account inventory.
    Release = 5,
    /// Client -> server: post a buy order.
    Buy = 6,
    /// Client -> server: post a sell order.
    Sell = 7,
    /// Client -> server: cancel a live order.
    Cancel = 8,
    /// Server -> client: request accepted.
    Ack = 9,
    /// Server -> client: request rejected.
    Nack = 10,
    /// Server -> all: a new order was posted.
    Posted = 11,
    /// Server -> all: an order was cancelled.
    Canceled = 12,
    /// Server -> buyer: this trader's buy order was (partially) filled.
    Bought = 13,
    /// Server -> seller: this trader's sell order was (partially) filled.
    Sold = 14,
    /// Server -> all: a trade occurred.
    Traded = 15,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use FrameType::*;
        Ok(match value {
            0 => Login,
            1 => Status,
            2 => Deposit,
            3 => Withdraw,
            4 => Escrow,
            5 => Release,
            6 => Buy,
            7 => Sell,
            8 => Cancel,
            9 => Ack,
            10 => Nack,
            11 => Posted,
            12 => Canceled,
            13 => Bought,
            14 => Sold,
            15 => Traded,
            other => return Err(ProtocolError::UnknownFrameType(other)),
        })
    }
}

/// The fixed-size frame header. The last four bytes are reserved for
/// future extension and are always zero on transmit.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub frame_type: u8,
    pub size: u16,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl FrameHeader {
    fn new(frame_type: FrameType, size: u16) -> Self {
        FrameHeader {
            frame_type: frame_type as u8,
            size,
            timestamp_sec: 0,
            timestamp_nsec: 0,
        }
    }

    fn stamp_now(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.timestamp_sec = now.as_secs() as u32;
        self.timestamp_nsec = now.subsec_nanos();
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.frame_type;
        buf[1] = 0; // pad
        buf[2..4].copy_from_slice(&self.size.to_be_bytes());
        buf[4..8].copy_from_slice(&0u32.to_be_bytes()); // reserved
        buf[8..12].copy_from_slice(&self.timestamp_sec.to_be_bytes());
        buf[12..16].copy_from_slice(&self.timestamp_nsec.to_be_bytes());
        buf
    }

    fn from_bytes(buf: [u8; HEADER_LEN]) -> Self {
        FrameHeader {
            frame_type: buf[0],
            size: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp_sec: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            timestamp_nsec: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    pub fn frame_type(&self) -> Result<FrameType, ProtocolError> {
        FrameType::try_from(self.frame_type)
    }
}

/// Send a framed packet, stamping the header with the current wall-clock
/// time. Fails if the underlying write is short or errored.
pub fn send(stream: &mut impl Write, frame_type: FrameType, payload: &[u8]) -> Result<(), ProtocolError> {
    let mut header = FrameHeader::new(frame_type, payload.len() as u16);
    header.stamp_now();
    stream.write_all(&header.to_bytes())?;
    if !payload.is_empty() {
        stream.write_all(payload)?;
    }
    Ok(())
}

/// Receive a framed packet, blocking until one is available.
///
/// Returns `Ok(None)` if the peer closed the connection before any header
/// bytes arrived (a clean EOF, which ends the session normally). Any
/// other short read is a [`ProtocolError::Truncated`].
pub fn recv(stream: &mut impl Read) -> Result<Option<(FrameHeader, Vec<u8>)>, ProtocolError> {
    let mut header_buf = [0u8; HEADER_LEN];
    let mut read = 0;
    while read < HEADER_LEN {
        let n = stream.read(&mut header_buf[read..])?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated);
        }
        read += n;
    }
    let header = FrameHeader::from_bytes(header_buf);
    let mut payload = vec![0u8; header.size as usize];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ProtocolError::Truncated
            } else {
                ProtocolError::Io(e)
            }
        })?;
    }
    Ok(Some((header, payload)))
}

/// `STATUS_INFO` payload carried by `ACK` responses.
///
/// Field order on the wire: `orderid, quantity, inventory, balance, bid,
/// ask, last`, each a big-endian `u32`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusInfo {
    pub orderid: u32,
    pub quantity: u32,
    pub inventory: u32,
    pub balance: u32,
    pub bid: u32,
    pub ask: u32,
    pub last: u32,
}

impl StatusInfo {
    pub const LEN: usize = 28;

    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        for field in [
            self.orderid,
            self.quantity,
            self.inventory,
            self.balance,
            self.bid,
            self.ask,
            self.last,
        ] {
            buf.extend_from_slice(&field.to_be_bytes());
        }
        buf
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(StatusInfo {
            orderid: read_u32(payload, 0).ok_or(ProtocolError::Truncated)?,
            quantity: read_u32(payload, 4).ok_or(ProtocolError::Truncated)?,
            inventory: read_u32(payload, 8).ok_or(ProtocolError::Truncated)?,
            balance: read_u32(payload, 12).ok_or(ProtocolError::Truncated)?,
            bid: read_u32(payload, 16).ok_or(ProtocolError::Truncated)?,
            ask: read_u32(payload, 20).ok_or(ProtocolError::Truncated)?,
            last: read_u32(payload, 24).ok_or(ProtocolError::Truncated)?,
        })
    }
}

/// `NOTIFY_INFO` payload carried by `POSTED`/`CANCELED`/`BOUGHT`/`SOLD`/`TRADED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyInfo {
    pub buyer: u32,
    pub seller: u32,
    pub quantity: u32,
    pub price: u32,
}

impl NotifyInfo {
    pub const LEN: usize = 16;

    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        for field in [self.buyer, self.seller, self.quantity, self.price] {
            buf.extend_from_slice(&field.to_be_bytes());
        }
        buf
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(NotifyInfo {
            buyer: read_u32(payload, 0).ok_or(ProtocolError::Truncated)?,
            seller: read_u32(payload, 4).ok_or(ProtocolError::Truncated)?,
            quantity: read_u32(payload, 8).ok_or(ProtocolError::Truncated)?,
            price: read_u32(payload, 12).ok_or(ProtocolError::Truncated)?,
        })
    }
}

fn read_u32(payload: &[u8], offset: usize) -> Option<u32> {
    payload
        .get(offset..offset + 4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

/// `DEPOSIT`/`WITHDRAW` payload: a single funds amount.
pub fn read_funds_info(payload: &[u8]) -> Result<u32, ProtocolError> {
    read_u32(payload, 0).ok_or(ProtocolError::Truncated)
}

/// `ESCROW`/`RELEASE` payload: a single inventory quantity.
pub fn read_escrow_info(payload: &[u8]) -> Result<u32, ProtocolError> {
    read_u32(payload, 0).ok_or(ProtocolError::Truncated)
}

/// `BUY`/`SELL` payload: quantity followed by price.
pub fn read_order_info(payload: &[u8]) -> Result<(u32, u32), ProtocolError> {
    let quantity = read_u32(payload, 0).ok_or(ProtocolError::Truncated)?;
    let price = read_u32(payload, 4).ok_or(ProtocolError::Truncated)?;
    Ok((quantity, price))
}

/// `CANCEL` payload: the order id to cancel.
pub fn read_cancel_info(payload: &[u8]) -> Result<u32, ProtocolError> {
    read_u32(payload, 0).ok_or(ProtocolError::Truncated)
}
