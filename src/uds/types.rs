//! Types used in the UDS protocol.

use std::time::Duration;

use crate::uds::constants::SessionType;
use crate::uds::error::Error;

/// Struct returned by DiagnosticSessionControl (0x10)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SessionParameterRecord {
    /// Performance requirement for the server (i.e. the ECU) to start with the response message after the reception of a request message.
    pub p2_server_max: Duration,
    /// Performance requirement for the server (i.e. the ECU) to start with the response message after the transmission of a "ResponsePending" message.
    pub p2_star_server_max: Duration,
}

impl SessionParameterRecord {
    /// Parse the four timing bytes of a session control response. P2 is in
    /// milliseconds, P2* in 10 millisecond units.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let p2 = u16::from_be_bytes([data[0], data[1]]) as u64;
        let p2_star = u16::from_be_bytes([data[2], data[3]]) as u64;
        Some(Self {
            p2_server_max: Duration::from_millis(p2),
            p2_star_server_max: Duration::from_millis(p2_star * 10),
        })
    }
}

/// Client-side session state: active session, unlocked security level and
/// the response deadlines currently in force.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UdsSession {
    pub session_type: SessionType,
    /// Request-seed level that was successfully unlocked, if any.
    pub security_level: Option<u8>,
    pub p2_timeout: Duration,
    pub p2_star_timeout: Duration,
}

impl Default for UdsSession {
    fn default() -> Self {
        Self {
            session_type: SessionType::Default,
            security_level: None,
            p2_timeout: Duration::from_secs(5),
            p2_star_timeout: Duration::from_secs(5),
        }
    }
}

/// A SecurityAccess level pair: the odd request-seed level and the even
/// send-key level right above it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SecurityLevel(pub u8);

impl SecurityLevel {
    pub fn seed(self) -> u8 {
        self.0
    }

    pub fn key(self) -> u8 {
        self.0 + 1
    }
}

/// Fallback when the RequestDownload response cannot be parsed:
/// 0xFFA minus the two bytes reserved for SID and block sequence counter.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 0xffa - 2;

/// Decoded RequestDownload (0x34) positive response.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RequestDownloadResponse {
    /// Usable payload bytes per TransferData request. This is the announced
    /// maxNumberOfBlockLength minus the two bytes of protocol overhead.
    pub max_block_size: usize,
}

impl RequestDownloadResponse {
    /// Parse the response payload following the echoed SID. The high nibble
    /// of the lengthFormatIdentifier gives the size of the big-endian
    /// maxNumberOfBlockLength that follows.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidResponseLength);
        }

        let length = (data[0] >> 4) as usize;
        if length == 0 || length > 8 || data.len() < 1 + length {
            return Err(Error::InvalidResponseLength);
        }

        let mut mbl: u64 = 0;
        for byte in &data[1..1 + length] {
            mbl = mbl << 8 | *byte as u64;
        }

        Ok(Self {
            max_block_size: (mbl as usize).saturating_sub(2),
        })
    }
}
