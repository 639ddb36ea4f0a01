//! Core of a concurrent "bourse" exchange server: accounts, traders, the
//! order book and its matchmaker, the binary wire protocol, and the
//! registries that coordinate client sessions and graceful shutdown.

pub mod account;
pub mod exchange;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod trader;

pub mod prelude {
    pub use super::account::*;
    pub use super::exchange::*;
    pub use super::protocol::*;
    pub use super::registry::*;
    pub use super::session::*;
    pub use super::trader::*;
}
