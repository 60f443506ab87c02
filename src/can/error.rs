//! Error types for the CAN link layer.

use thiserror::Error;

/// Errors surfaced by the underlying CAN driver. All of these are fatal for
/// the job that owns the link.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("Bus Off")]
    BusOff,
    #[error("TX Queue Full")]
    TxQueueFull,
    #[error("TX Timeout")]
    TxTimeout,
    #[error("Driver Error: {0}")]
    Driver(String),
}
