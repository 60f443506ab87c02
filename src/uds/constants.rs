//! Service identifiers, sub-functions and the well-known identifiers of the
//! ZCU bootloader protocol.

use strum_macros::FromRepr;

/// Request SIDs used by this client, as defined in ISO 14229.
#[derive(Debug, PartialEq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum ServiceIdentifier {
    DiagnosticSessionControl = 0x10,
    EcuReset = 0x11,
    ClearDiagnosticInformation = 0x14,
    ReadDataByIdentifier = 0x22,
    SecurityAccess = 0x27,
    CommunicationControl = 0x28,
    WriteDataByIdentifier = 0x2e,
    RoutineControl = 0x31,
    RequestDownload = 0x34,
    TransferData = 0x36,
    RequestTransferExit = 0x37,
    TesterPresent = 0x3e,
    NegativeResponse = 0x7f,
    ControlDTCSetting = 0x85,
}

/// Added to the request SID in a positive response.
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Sub-function bit that asks the server not to send a positive response.
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

#[derive(Debug, PartialEq, Eq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum SessionType {
    Default = 0x01,
    Programming = 0x02,
    Extended = 0x03,
    /// Combined programming session used by the ZCU bootloader.
    ProgrammingExtended = 0x70,
}

#[derive(Debug, PartialEq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum ResetType {
    HardReset = 0x01,
    KeyOffOnReset = 0x02,
    SoftReset = 0x03,
}

#[derive(Debug, PartialEq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum RoutineControlType {
    Start = 0x01,
    Stop = 0x02,
    RequestResults = 0x03,
}

#[derive(Debug, PartialEq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum CommunicationControlType {
    EnableRxAndTx = 0x00,
    EnableRxDisableTx = 0x01,
    DisableRxEnableTx = 0x02,
    DisableRxAndTx = 0x03,
}

#[derive(Debug, PartialEq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum DtcSettingType {
    On = 0x01,
    Off = 0x02,
}

/// Routine identifiers of the ZCU bootloader.
pub mod routine {
    /// Pre-programming conditions check, run in the extended session.
    pub const CHECK_PROGRAMMING_PRECONDITIONS: u16 = 0x0203;
    /// Disables the bootloader's consistency check during bench flashing.
    pub const INTEGRITY_CHECK_BYPASS: u16 = 0x55b0;
    /// Arms the bootloader for the download phase.
    pub const PROGRAMMING_MODE_ENABLE: u16 = 0x55b1;
    /// Verifies the 512 byte RSA signature of the previously transferred block.
    pub const VERIFY_SIGNATURE: u16 = 0xdd02;
    /// Erases the flash region given as ALFID + address + size.
    pub const ERASE_MEMORY: u16 = 0xff00;
    /// Final consistency check after all blocks are flashed.
    pub const CHECK_PROGRAMMING_DEPENDENCIES: u16 = 0xff01;
}

/// Data identifiers of the ZCU bootloader.
pub mod did {
    /// Software version string, 30 bytes.
    pub const ECU_VERSION: u16 = 0x7705;
    /// Programming attempt fingerprint, 9 bytes.
    pub const FINGERPRINT: u16 = 0xf15a;
    /// Tester identification written before download, 19 bytes.
    pub const TESTER_FINGERPRINT: u16 = 0xf184;
    /// Single status byte read back before the download phase.
    pub const PROGRAMMING_STATUS: u16 = 0xf0f0;
    /// Boot validation record, 32 bytes.
    pub const BOOT_VALIDATION: u16 = 0x4611;
    /// Security event log, 32 bytes.
    pub const SECURITY_LOG: u16 = 0x5558;
}
