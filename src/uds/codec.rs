//! Codec table mapping Data Identifiers to their on-wire encoding.

use std::collections::HashMap;

use crate::uds::constants::did;
use crate::uds::error::Error;

/// How the payload of a Data Identifier is encoded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DidCodec {
    /// Two byte big-endian unsigned, the fallback for unknown identifiers.
    U16BigEndian,
    /// Opaque bytes of a fixed length.
    Fixed(usize),
}

/// A decoded Data Identifier payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DidValue {
    U16(u16),
    Bytes(Vec<u8>),
}

impl DidValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DidValue::U16(_) => &[],
            DidValue::Bytes(bytes) => bytes,
        }
    }
}

impl DidCodec {
    /// Expected payload length, if the codec is fixed-size.
    pub fn length(&self) -> Option<usize> {
        match self {
            DidCodec::U16BigEndian => Some(2),
            DidCodec::Fixed(len) => Some(*len),
        }
    }

    pub fn encode(&self, did: u16, value: &DidValue) -> Result<Vec<u8>, Error> {
        match (self, value) {
            (DidCodec::U16BigEndian, DidValue::U16(v)) => Ok(v.to_be_bytes().to_vec()),
            (DidCodec::Fixed(len), DidValue::Bytes(bytes)) => {
                if bytes.len() != *len {
                    return Err(Error::CodecLength {
                        did,
                        expected: *len,
                        actual: bytes.len(),
                    });
                }
                Ok(bytes.clone())
            }
            _ => Err(Error::CodecLength {
                did,
                expected: self.length().unwrap_or(0),
                actual: value.as_bytes().len(),
            }),
        }
    }

    pub fn decode(&self, did: u16, data: &[u8]) -> Result<DidValue, Error> {
        match self {
            DidCodec::U16BigEndian => {
                if data.len() != 2 {
                    return Err(Error::CodecLength {
                        did,
                        expected: 2,
                        actual: data.len(),
                    });
                }
                Ok(DidValue::U16(u16::from_be_bytes([data[0], data[1]])))
            }
            DidCodec::Fixed(len) => {
                if data.len() != *len {
                    return Err(Error::CodecLength {
                        did,
                        expected: *len,
                        actual: data.len(),
                    });
                }
                Ok(DidValue::Bytes(data.to_vec()))
            }
        }
    }
}

/// Read-only after construction; consulted by ReadDataByIdentifier and
/// WriteDataByIdentifier.
#[derive(Debug, Clone, Default)]
pub struct DidCodecTable {
    codecs: HashMap<u16, DidCodec>,
}

impl DidCodecTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier table of the ZCU bootloader.
    pub fn zcu() -> Self {
        let mut table = Self::new();
        table.insert(did::ECU_VERSION, DidCodec::Fixed(30));
        table.insert(did::FINGERPRINT, DidCodec::Fixed(9));
        table.insert(did::TESTER_FINGERPRINT, DidCodec::Fixed(19));
        table.insert(did::PROGRAMMING_STATUS, DidCodec::Fixed(1));
        table.insert(did::BOOT_VALIDATION, DidCodec::Fixed(32));
        table.insert(did::SECURITY_LOG, DidCodec::Fixed(32));
        table
    }

    pub fn insert(&mut self, did: u16, codec: DidCodec) {
        self.codecs.insert(did, codec);
    }

    /// Codec for the given identifier, falling back to the default
    /// two byte big-endian unsigned.
    pub fn get(&self, did: u16) -> DidCodec {
        self.codecs
            .get(&did)
            .copied()
            .unwrap_or(DidCodec::U16BigEndian)
    }
}
