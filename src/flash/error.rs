//! Error types for the flashing orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Step {index} ({name}) failed: {cause}")]
    StepFailed {
        index: usize,
        name: &'static str,
        cause: Box<crate::error::Error>,
    },
    #[error("Memory erase rejected by ECU")]
    EraseRejected,
    #[error("Unexpected erase response: {0}")]
    EraseResponseMalformed(String),
    #[error("Image carries no signature")]
    SignatureMissing,
    #[error("Calibration images required but not provided")]
    CalibrationImageMissing,
}
