//! Unified Diagnostic Services (UDS) Client, implements ISO 14229
//! ## Example
//! ```no_run
//! async fn uds_example() -> zcuflash::Result<()> {
//!     let (link, _peer) = zcuflash::can::VirtualCan::pair();
//!     let adapter = zcuflash::can::AsyncCanAdapter::new(link);
//!     let config = zcuflash::isotp::IsoTpConfig::new(0x736.into(), 0x7b6.into());
//!     let isotp = zcuflash::isotp::IsoTpAdapter::new(&adapter, config);
//!     let uds = zcuflash::uds::UDSClient::new(&isotp);
//!
//!     uds.tester_present().await?;
//!     let version = uds.read_data_by_identifier(zcuflash::uds::constants::did::ECU_VERSION).await?;
//!     println!("ECU version: {}", hex::encode(version));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod constants;
pub mod error;
pub mod types;

use std::sync::Mutex;
use std::time::Duration;

use crate::isotp::IsoTpAdapter;
use crate::uds::codec::{DidCodecTable, DidValue};
use crate::uds::constants::{
    CommunicationControlType, DtcSettingType, ResetType, RoutineControlType, ServiceIdentifier,
    SessionType, POSITIVE_RESPONSE_OFFSET, SUPPRESS_POSITIVE_RESPONSE,
};
pub use crate::uds::error::{Error, NegativeResponseCode};
use crate::uds::types::{
    RequestDownloadResponse, SessionParameterRecord, UdsSession, DEFAULT_MAX_BLOCK_SIZE,
};

use tracing::debug;

/// Address and length format identifier used by the ZCU bootloader for
/// RequestDownload and memory erase: 4 byte address, 4 byte size.
pub const ALFID_4_4: u8 = 0x44;

/// UDS Client. Wraps an [`IsoTpAdapter`] to provide a simple interface for
/// making UDS calls. Requests on one client are strictly serialized, there
/// is a single in-flight request per endpoint.
pub struct UDSClient<'a> {
    adapter: &'a IsoTpAdapter<'a>,
    codecs: DidCodecTable,
    /// Upper bound on consecutive 0x78 responsePending replies.
    max_response_pending: usize,
    session: Mutex<UdsSession>,
    in_flight: tokio::sync::Mutex<()>,
}

impl<'a> UDSClient<'a> {
    pub fn new(adapter: &'a IsoTpAdapter) -> Self {
        Self {
            adapter,
            codecs: DidCodecTable::new(),
            max_response_pending: 10,
            session: Mutex::new(UdsSession::default()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the DID codec table. The table is read-only afterwards.
    pub fn with_codecs(mut self, codecs: DidCodecTable) -> Self {
        self.codecs = codecs;
        self
    }

    /// Bound the number of consecutive 0x78 responsePending replies that
    /// are absorbed before giving up.
    pub fn with_max_response_pending(mut self, bound: usize) -> Self {
        self.max_response_pending = bound;
        self
    }

    pub fn with_timing(self, p2_timeout: Duration, p2_star_timeout: Duration) -> Self {
        {
            let mut session = self.session.lock().unwrap();
            session.p2_timeout = p2_timeout;
            session.p2_star_timeout = p2_star_timeout;
        }
        self
    }

    /// Snapshot of the current session state.
    pub fn session(&self) -> UdsSession {
        *self.session.lock().unwrap()
    }

    /// Send a raw request without waiting for any response. Used for
    /// functional broadcasts and suppressed-response requests.
    pub async fn send_raw(&self, request: &[u8]) -> crate::Result<()> {
        let _guard = self.in_flight.lock().await;
        debug!("TX {}", hex::encode(request));
        self.adapter.send(request).await
    }

    /// Send a raw request and wait for the positive response, transparently
    /// absorbing 0x78 responsePending replies. Returns the full response
    /// including the echoed service id.
    pub async fn request_raw(&self, request: &[u8]) -> crate::Result<Vec<u8>> {
        if request.is_empty() {
            return Err(Error::InvalidResponseLength.into());
        }

        let _guard = self.in_flight.lock().await;

        let (p2, p2_star) = {
            let session = self.session.lock().unwrap();
            (session.p2_timeout, session.p2_star_timeout)
        };

        // Subscribe before sending so a fast response cannot be missed.
        let mut receiver = self.adapter.receiver();

        debug!("TX {}", hex::encode(request));
        self.adapter.send(request).await?;

        let mut wait = p2;
        let mut pending = 0;

        loop {
            let response = match receiver.recv_within(wait).await {
                Ok(response) => response,
                Err(crate::error::Error::Timeout) => return Err(Error::Timeout.into()),
                Err(e) => return Err(e),
            };
            debug!("RX {}", hex::encode(&response));

            if response.is_empty() {
                return Err(Error::InvalidResponseLength.into());
            }

            if response[0] == ServiceIdentifier::NegativeResponse as u8 {
                if response.len() < 3 {
                    return Err(Error::InvalidResponseLength.into());
                }
                let nrc: NegativeResponseCode = response[2].into();

                if nrc == NegativeResponseCode::RequestCorrectlyReceivedResponsePending {
                    pending += 1;
                    if pending > self.max_response_pending {
                        return Err(Error::ResponsePendingLimit.into());
                    }
                    wait = p2_star;
                    continue;
                }

                return Err(Error::NegativeResponse {
                    sid: response[1],
                    nrc,
                }
                .into());
            }

            if response[0] != request[0] | POSITIVE_RESPONSE_OFFSET {
                return Err(Error::InvalidServiceId(response[0]).into());
            }

            return Ok(response);
        }
    }

    /// Helper function to make custom UDS requests. This function will
    /// verify the ECU responds with the correct service identifier and sub
    /// function, handle negative responses, and will return the response
    /// data after the echoes.
    pub async fn request(
        &self,
        sid: ServiceIdentifier,
        sub_function: Option<u8>,
        data: Option<&[u8]>,
    ) -> crate::Result<Vec<u8>> {
        let mut request: Vec<u8> = vec![sid as u8];

        if let Some(sub_function) = sub_function {
            request.push(sub_function);
        }

        if let Some(data) = data {
            request.extend(data);
        }

        let response = self.request_raw(&request).await?;

        if let Some(sub_function) = sub_function {
            if response.len() < 2 {
                return Err(Error::InvalidResponseLength.into());
            }
            if response[1] != sub_function & !SUPPRESS_POSITIVE_RESPONSE {
                return Err(Error::InvalidSubFunction(response[1]).into());
            }
        }

        let start: usize = if sub_function.is_some() { 2 } else { 1 };
        Ok(response[start..].to_vec())
    }

    /// 0x10 - Diagnostic Session Control. Updates the client's session
    /// state, including the P2/P2* deadlines the ECU announces.
    pub async fn diagnostic_session_control(
        &self,
        session_type: SessionType,
    ) -> crate::Result<Option<SessionParameterRecord>> {
        let resp = self
            .request(
                ServiceIdentifier::DiagnosticSessionControl,
                Some(session_type as u8),
                None,
            )
            .await?;

        let record = SessionParameterRecord::parse(&resp);

        let mut session = self.session.lock().unwrap();
        session.session_type = session_type;
        // Leaving the session locks security again.
        session.security_level = None;
        if let Some(record) = record {
            session.p2_timeout = record.p2_server_max;
            session.p2_star_timeout = record.p2_star_server_max;
        }

        Ok(record)
    }

    /// 0x11 - ECU Reset
    pub async fn ecu_reset(&self, reset_type: ResetType) -> crate::Result<()> {
        self.request(ServiceIdentifier::EcuReset, Some(reset_type as u8), None)
            .await?;
        Ok(())
    }

    /// 0x14 - Clear Diagnostic Information. The group is sent as a three
    /// byte big-endian value, 0xFFFFFF clears everything.
    pub async fn clear_diagnostic_information(&self, group: u32) -> crate::Result<()> {
        let group = group.to_be_bytes();
        self.request(
            ServiceIdentifier::ClearDiagnosticInformation,
            None,
            Some(&group[1..4]),
        )
        .await?;
        Ok(())
    }

    /// 0x22 - Read Data By Identifier. Returns the raw payload following
    /// the echoed identifier. Reading multiple identifiers is not supported.
    pub async fn read_data_by_identifier(&self, data_identifier: u16) -> crate::Result<Vec<u8>> {
        let did = data_identifier.to_be_bytes();
        let resp = self
            .request(ServiceIdentifier::ReadDataByIdentifier, None, Some(&did))
            .await?;

        if resp.len() < 2 {
            return Err(Error::InvalidResponseLength.into());
        }

        let did = u16::from_be_bytes([resp[0], resp[1]]);
        if did != data_identifier {
            return Err(Error::InvalidDataIdentifier(did).into());
        }

        Ok(resp[2..].to_vec())
    }

    /// 0x22 - Read Data By Identifier, decoded through the codec table.
    pub async fn read_data_by_identifier_decoded(
        &self,
        data_identifier: u16,
    ) -> crate::Result<DidValue> {
        let data = self.read_data_by_identifier(data_identifier).await?;
        let value = self.codecs.get(data_identifier).decode(data_identifier, &data)?;
        Ok(value)
    }

    /// 0x2E - Write Data By Identifier. The value is encoded through the
    /// codec table, which also validates fixed lengths.
    pub async fn write_data_by_identifier(
        &self,
        data_identifier: u16,
        value: &DidValue,
    ) -> crate::Result<()> {
        let encoded = self
            .codecs
            .get(data_identifier)
            .encode(data_identifier, value)?;

        let mut data = data_identifier.to_be_bytes().to_vec();
        data.extend(encoded);

        let resp = self
            .request(ServiceIdentifier::WriteDataByIdentifier, None, Some(&data))
            .await?;

        if resp.len() < 2 {
            return Err(Error::InvalidResponseLength.into());
        }
        let did = u16::from_be_bytes([resp[0], resp[1]]);
        if did != data_identifier {
            return Err(Error::InvalidDataIdentifier(did).into());
        }

        Ok(())
    }

    /// 0x27 - Security Access, request seed half. The level is odd.
    pub async fn request_seed(&self, level: u8) -> crate::Result<Vec<u8>> {
        self.request(ServiceIdentifier::SecurityAccess, Some(level), None)
            .await
    }

    /// 0x27 - Security Access, send key half. The level is the even number
    /// right above the seed level.
    pub async fn send_key(&self, level: u8, key: &[u8]) -> crate::Result<()> {
        self.request(ServiceIdentifier::SecurityAccess, Some(level), Some(key))
            .await?;

        let mut session = self.session.lock().unwrap();
        session.security_level = Some(level - 1);
        Ok(())
    }

    /// 0x28 - Communication Control
    pub async fn communication_control(
        &self,
        control_type: CommunicationControlType,
        communication_type: u8,
    ) -> crate::Result<()> {
        self.request(
            ServiceIdentifier::CommunicationControl,
            Some(control_type as u8),
            Some(&[communication_type]),
        )
        .await?;
        Ok(())
    }

    /// 0x31 - Routine Control. Verifies the routine identifier echo and
    /// returns the routine status record.
    pub async fn routine_control(
        &self,
        control_type: RoutineControlType,
        routine_id: u16,
        data: Option<&[u8]>,
    ) -> crate::Result<Vec<u8>> {
        let mut payload = routine_id.to_be_bytes().to_vec();
        if let Some(data) = data {
            payload.extend(data);
        }

        let resp = self
            .request(
                ServiceIdentifier::RoutineControl,
                Some(control_type as u8),
                Some(&payload),
            )
            .await?;

        if resp.len() < 2 {
            return Err(Error::InvalidResponseLength.into());
        }
        let rid = u16::from_be_bytes([resp[0], resp[1]]);
        if rid != routine_id {
            return Err(Error::InvalidRoutineIdentifier(rid).into());
        }

        Ok(resp[2..].to_vec())
    }

    /// 0x34 - Request Download for a 4 byte address / 4 byte size memory
    /// region. Returns the usable block size for the following TransferData
    /// requests, i.e. the announced maxNumberOfBlockLength minus two.
    pub async fn request_download(&self, address: u32, size: u32) -> crate::Result<usize> {
        let mut data = vec![0x00, ALFID_4_4];
        data.extend(address.to_be_bytes());
        data.extend(size.to_be_bytes());

        let resp = self
            .request(ServiceIdentifier::RequestDownload, None, Some(&data))
            .await?;

        let max_block_size = match RequestDownloadResponse::parse(&resp) {
            Ok(decoded) => decoded.max_block_size,
            Err(_) => {
                debug!("could not parse maxNumberOfBlockLength, using default");
                DEFAULT_MAX_BLOCK_SIZE
            }
        };

        Ok(max_block_size)
    }

    /// 0x36 - Transfer Data. The block sequence counter starts at 1 for the
    /// first block after RequestDownload and wraps 0xFF to 0x00.
    pub async fn transfer_data(&self, sequence: u8, data: &[u8]) -> crate::Result<Vec<u8>> {
        let mut request = vec![ServiceIdentifier::TransferData as u8, sequence];
        request.extend(data);

        let resp = self.request_raw(&request).await?;
        if resp.len() < 2 {
            return Err(Error::InvalidResponseLength.into());
        }
        if resp[1] != sequence {
            return Err(Error::InvalidBlockSequenceCounter(resp[1]).into());
        }

        Ok(resp[2..].to_vec())
    }

    /// 0x37 - Request Transfer Exit
    pub async fn request_transfer_exit(&self) -> crate::Result<()> {
        self.request(ServiceIdentifier::RequestTransferExit, None, None)
            .await?;
        Ok(())
    }

    /// 0x3E - Tester Present
    pub async fn tester_present(&self) -> crate::Result<()> {
        self.request(ServiceIdentifier::TesterPresent, Some(0), None)
            .await?;
        Ok(())
    }

    /// 0x3E - Tester Present with suppressPosRspMsgIndication set. Fire and
    /// forget, used by the keep-alive task.
    pub async fn tester_present_suppressed(&self) -> crate::Result<()> {
        self.send_raw(&[
            ServiceIdentifier::TesterPresent as u8,
            SUPPRESS_POSITIVE_RESPONSE,
        ])
        .await
    }

    /// 0x85 - Control DTC Setting
    pub async fn control_dtc_setting(&self, setting: DtcSettingType) -> crate::Result<()> {
        self.request(ServiceIdentifier::ControlDTCSetting, Some(setting as u8), None)
            .await?;
        Ok(())
    }
}
