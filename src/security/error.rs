//! Error types for the security access algorithms.

use thiserror::Error;

use crate::security::Zone;

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("No seed-to-key profile for zone {zone:?} level {level:#04x}")]
    UnknownProfile { zone: Zone, level: u8 },
    #[error("Crypto Failure")]
    CryptoFailure,
}
