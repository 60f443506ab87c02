//! Generic CAN types and traits

pub mod async_can;
pub mod error;
pub mod virtual_can;

use std::fmt;

pub use async_can::AsyncCanAdapter;
pub use error::Error;
pub use virtual_can::{VirtualCan, VirtualCanPeer};

/// Valid CAN / CAN-FD frame lengths, indexed by DLC.
pub static DLC_TO_LEN: &[usize] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Arbitration ID. Standard IDs are 11 bits, extended IDs are 29 bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Identifier {
    Standard(u32),
    Extended(u32),
}

impl From<u32> for Identifier {
    fn from(id: u32) -> Identifier {
        if id <= 0x7ff {
            Identifier::Standard(id)
        } else {
            Identifier::Extended(id)
        }
    }
}

impl From<Identifier> for u32 {
    fn from(id: Identifier) -> u32 {
        match id {
            Identifier::Standard(id) => id,
            Identifier::Extended(id) => id,
        }
    }
}

/// A CAN frame
#[derive(Clone, PartialEq)]
pub struct Frame {
    /// Arbitration ID
    pub id: Identifier,
    /// Frame Data
    pub data: Vec<u8>,
    /// Whether the frame is an echo of a frame sent out by this adapter
    pub loopback: bool,
    /// CAN-FD Frame
    pub fd: bool,
    /// Bit Rate Switch requested (CAN-FD only)
    pub brs: bool,
}
impl Unpin for Frame {}

impl Frame {
    pub fn new(id: Identifier, data: &[u8]) -> Result<Frame, crate::error::Error> {
        if !DLC_TO_LEN.contains(&data.len()) {
            return Err(crate::error::Error::MalformedFrame);
        }

        Ok(Frame {
            id,
            data: data.to_vec(),
            loopback: false,
            fd: data.len() > 8,
            brs: false,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("data", &hex::encode(&self.data))
            .field("loopback", &self.loopback)
            .field("fd", &self.fd)
            .finish()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// What the underlying driver can do. ISO-TP uses this to select frame sizing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub fd: bool,
    pub max_payload: usize,
}

/// Trait for a blocking CAN adapter. The adapter is expected to echo
/// completed transmits back through [`CanAdapter::recv`] with the `loopback`
/// flag set, in transmit order.
pub trait CanAdapter {
    fn send(&mut self, frames: &[Frame]) -> crate::Result<()>;
    fn recv(&mut self) -> crate::Result<Vec<Frame>>;
    fn capabilities(&self) -> Capabilities;
}
