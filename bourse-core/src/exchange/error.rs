use thiserror::Error;

use crate::account::AccountError;

/// Errors raised while posting, cancelling, or settling orders.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The backing account rejected a funds or inventory movement.
    #[error(transparent)]
    Account(#[from] AccountError),
    /// The order id does not exist, or does not belong to the caller.
    #[error("no such order")]
    NoSuchOrder,
    /// `quantity * price` does not fit in a 32-bit amount.
    #[error("order value overflows a 32-bit amount")]
    Overflow,
    /// Quantity or price was zero.
    #[error("order quantity and price must both be positive")]
    InvalidOrder,
}
