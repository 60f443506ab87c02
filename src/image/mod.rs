//! Firmware image loading: Intel HEX payloads and their RSA signature
//! sidecars.
//!
//! The parser yields one contiguous byte sequence spanning the file's
//! `[min_addr, max_addr]` range, with gaps filled. Signatures live next to
//! the image with the same stem and an `.rsa` extension, as an ASCII hex
//! dump that decodes to exactly 512 bytes.

pub mod error;

use std::path::Path;

pub use error::Error;

/// Length of the RSA signature blob posted after each transferred image.
pub const SIGNATURE_LEN: usize = 512;

/// Fill value for address gaps between HEX records.
const FILL_BYTE: u8 = 0xff;

/// A parsed firmware image plus its optional signature.
#[derive(Debug, Clone)]
pub struct FlashImage {
    pub start_address: u32,
    pub data: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

impl FlashImage {
    /// Parse Intel HEX text into a contiguous image.
    pub fn from_hex_str(text: &str) -> Result<Self, Error> {
        let mut records: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut base: u32 = 0;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record = line
                .strip_prefix(':')
                .ok_or(Error::InvalidRecord(line_no))?;
            let bytes = hex::decode(record).map_err(|_| Error::InvalidRecord(line_no))?;
            if bytes.len() < 5 {
                return Err(Error::InvalidRecord(line_no));
            }

            let count = bytes[0] as usize;
            if bytes.len() != count + 5 {
                return Err(Error::InvalidRecord(line_no));
            }

            let sum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            if sum != 0 {
                return Err(Error::Checksum(line_no));
            }

            let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
            let payload = &bytes[4..4 + count];

            match bytes[3] {
                // Data
                0x00 => records.push((base + offset, payload.to_vec())),
                // End of file
                0x01 => break,
                // Extended segment address
                0x02 => {
                    if count != 2 {
                        return Err(Error::InvalidRecord(line_no));
                    }
                    base = (u16::from_be_bytes([payload[0], payload[1]]) as u32) << 4;
                }
                // Extended linear address
                0x04 => {
                    if count != 2 {
                        return Err(Error::InvalidRecord(line_no));
                    }
                    base = (u16::from_be_bytes([payload[0], payload[1]]) as u32) << 16;
                }
                // Start addresses carry no image data
                0x03 | 0x05 => {}
                _ => return Err(Error::InvalidRecord(line_no)),
            }
        }

        let start_address = records
            .iter()
            .map(|(addr, _)| *addr)
            .min()
            .ok_or(Error::Empty)?;
        let end_address = records
            .iter()
            .map(|(addr, data)| *addr + data.len() as u32)
            .max()
            .unwrap();

        let mut data = vec![FILL_BYTE; (end_address - start_address) as usize];
        for (addr, payload) in records {
            let offset = (addr - start_address) as usize;
            data[offset..offset + payload.len()].copy_from_slice(&payload);
        }

        Ok(Self {
            start_address,
            data,
            signature: None,
        })
    }

    pub fn from_hex_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_hex_str(&text)
    }

    /// Load an image together with its `.rsa` sidecar. A missing sidecar is
    /// an error unless `allow_unsigned` is set, in which case a 512 byte
    /// 0xAA placeholder is used so unsigned bench builds can be exercised.
    pub fn load(hex_path: &Path, allow_unsigned: bool) -> Result<Self, Error> {
        let mut image = Self::from_hex_file(hex_path)?;
        let sidecar = hex_path.with_extension("rsa");
        image.signature = Some(load_signature(&sidecar, allow_unsigned)?);
        Ok(image)
    }

    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }

    /// Start address and length of the flash region this image occupies.
    pub fn region(&self) -> (u32, u32) {
        (self.start_address, self.length())
    }
}

/// Decode signature sidecar text: an ASCII hex dump, optionally with `0x`
/// prefixes, commas or whitespace between bytes.
pub fn parse_signature_text(text: &str) -> Result<Vec<u8>, Error> {
    let cleaned: String = text
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();

    let signature = hex::decode(&cleaned).map_err(|_| Error::SignatureMalformed(0))?;
    if signature.len() != SIGNATURE_LEN {
        return Err(Error::SignatureMalformed(signature.len()));
    }
    Ok(signature)
}

/// Placeholder signature injected for unsigned bench builds.
pub fn placeholder_signature() -> Vec<u8> {
    vec![0xaa; SIGNATURE_LEN]
}

pub fn load_signature(path: &Path, allow_unsigned: bool) -> Result<Vec<u8>, Error> {
    if !path.exists() {
        return if allow_unsigned {
            Ok(placeholder_signature())
        } else {
            Err(Error::SignatureMissing(path.to_path_buf()))
        };
    }

    let text = std::fs::read_to_string(path)?;
    parse_signature_text(&text)
}
