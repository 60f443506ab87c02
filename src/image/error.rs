//! Error types for firmware image loading.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error reading image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid Intel HEX record at line {0}")]
    InvalidRecord(usize),
    #[error("Intel HEX checksum mismatch at line {0}")]
    Checksum(usize),
    #[error("HEX file contains no data records")]
    Empty,
    #[error("Signature file missing: {0}")]
    SignatureMissing(PathBuf),
    #[error("Signature must decode to 512 bytes, got {0}")]
    SignatureMalformed(usize),
}
