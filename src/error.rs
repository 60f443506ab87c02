//! Contains the main error type for the library.

use thiserror::Error;

/// The main error type for the library. Each module has its own error type
/// that is contained by this error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not Found")]
    NotFound,
    #[error("Malformed Frame")]
    MalformedFrame,
    #[error("Timeout")]
    Timeout,
    #[error("Disconnected")]
    Disconnected,
    #[error("Interrupted")]
    Interrupted,

    #[error(transparent)]
    LinkError(#[from] crate::can::Error),
    #[error(transparent)]
    IsoTpError(#[from] crate::isotp::Error),
    #[error(transparent)]
    UDSError(#[from] crate::uds::Error),
    #[error(transparent)]
    SecurityError(#[from] crate::security::Error),
    #[error(transparent)]
    ImageError(#[from] crate::image::Error),
    #[error(transparent)]
    FlashError(#[from] crate::flash::Error),
    #[error(transparent)]
    ConfigError(#[from] crate::cli::ConfigError),
}
