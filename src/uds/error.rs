//! Error types for the UDS Client.
use thiserror::Error;

/// Negative Response Codes returned by ECU as defined in ISO 14229
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum NegativeResponseCode {
    GeneralReject = 0x10,
    ServiceNotSupported = 0x11,
    SubFunctionNotSupported = 0x12,
    IncorrectMessageLengthOrInvalidFormat = 0x13,
    ResponseTooLong = 0x14,
    BusyRepeatRequest = 0x21,
    ConditionsNotCorrect = 0x22,
    RequestSequenceError = 0x24,
    NoResponseFromSubnetComponent = 0x25,
    FailurePreventsExecutionOfRequestedAction = 0x26,
    RequestOutOfRange = 0x31,
    SecurityAccessDenied = 0x33,
    InvalidKey = 0x35,
    ExceedNumberOfAttempts = 0x36,
    RequiredTimeDelayNotExpired = 0x37,
    UploadDownloadNotAccepted = 0x70,
    TransferDataSuspended = 0x71,
    GeneralProgrammingFailure = 0x72,
    WrongBlockSequenceCounter = 0x73,
    RequestCorrectlyReceivedResponsePending = 0x78,
    SubFunctionNotSupportedInActiveSession = 0x7e,
    ServiceNotSupportedInActiveSession = 0x7f,

    NonStandard(u8),
}

impl From<u8> for NegativeResponseCode {
    fn from(val: u8) -> NegativeResponseCode {
        match val {
            0x10 => NegativeResponseCode::GeneralReject,
            0x11 => NegativeResponseCode::ServiceNotSupported,
            0x12 => NegativeResponseCode::SubFunctionNotSupported,
            0x13 => NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            0x14 => NegativeResponseCode::ResponseTooLong,
            0x21 => NegativeResponseCode::BusyRepeatRequest,
            0x22 => NegativeResponseCode::ConditionsNotCorrect,
            0x24 => NegativeResponseCode::RequestSequenceError,
            0x25 => NegativeResponseCode::NoResponseFromSubnetComponent,
            0x26 => NegativeResponseCode::FailurePreventsExecutionOfRequestedAction,
            0x31 => NegativeResponseCode::RequestOutOfRange,
            0x33 => NegativeResponseCode::SecurityAccessDenied,
            0x35 => NegativeResponseCode::InvalidKey,
            0x36 => NegativeResponseCode::ExceedNumberOfAttempts,
            0x37 => NegativeResponseCode::RequiredTimeDelayNotExpired,
            0x70 => NegativeResponseCode::UploadDownloadNotAccepted,
            0x71 => NegativeResponseCode::TransferDataSuspended,
            0x72 => NegativeResponseCode::GeneralProgrammingFailure,
            0x73 => NegativeResponseCode::WrongBlockSequenceCounter,
            0x78 => NegativeResponseCode::RequestCorrectlyReceivedResponsePending,
            0x7e => NegativeResponseCode::SubFunctionNotSupportedInActiveSession,
            0x7f => NegativeResponseCode::ServiceNotSupportedInActiveSession,
            _ => NegativeResponseCode::NonStandard(val),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Negative Response to {sid:#04x}: {nrc:?}")]
    NegativeResponse { sid: u8, nrc: NegativeResponseCode },
    #[error("Invalid Response Service ID: {0:#04x}")]
    InvalidServiceId(u8),
    #[error("Invalid Response Sub Function ID: {0:#04x}")]
    InvalidSubFunction(u8),
    #[error("Invalid Response Data Identifier: {0:#06x}")]
    InvalidDataIdentifier(u16),
    #[error("Invalid Response Routine Identifier: {0:#06x}")]
    InvalidRoutineIdentifier(u16),
    #[error("Invalid Block Sequence Counter: {0:#04x}")]
    InvalidBlockSequenceCounter(u8),
    #[error("Invalid Response Length")]
    InvalidResponseLength,
    #[error("No response within P2/P2* budget")]
    Timeout,
    #[error("Too many responsePending replies")]
    ResponsePendingLimit,
    #[error("Codec length mismatch for DID {did:#06x}: expected {expected}, got {actual}")]
    CodecLength {
        did: u16,
        expected: usize,
        actual: usize,
    },
}
