//! Flashing orchestrator: drives the full SBL + APP (+ CAL) reflash
//! sequence over a pair of UDS clients.
//!
//! The sequence is a linear state machine. Every step emits a trace line,
//! the step index is monotonic on success, and the first failure aborts the
//! job with the step index and name attached. There is no automatic retry
//! and no recovery from a half-flashed ECU.

pub mod error;
pub mod job;

use std::sync::Arc;
use std::time::Duration;

use crate::image::FlashImage;
use crate::security::{self, Zone};
use crate::uds::codec::DidValue;
use crate::uds::constants::{did, routine, DtcSettingType, ResetType, RoutineControlType, SessionType};
use crate::uds::types::SecurityLevel;
use crate::uds::UDSClient;

pub use error::Error;
pub use job::{zone_addresses, JobController, ZoneAddresses};

use tracing::{debug, info};

/// Security access level used by the ZCU bootloader before download.
const UNLOCK_LEVEL: SecurityLevel = SecurityLevel(0x11);

/// Tester identification written to 0xF184 before the download phase.
const TESTER_FINGERPRINT: [u8; 19] = [
    0x19, 0x05, 0x0e, 0x4f, 0x54, 0x41, 0x30, 0x30, 0x31, 0x20, 0x20, 0x20, 0x20, 0x20, 0x20,
    0x20, 0x20, 0x20, 0x20,
];

/// Emitted at every step boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StepTrace {
    pub index: usize,
    pub name: &'static str,
}

pub type TraceHandler = Arc<dyn Fn(&StepTrace) + Send + Sync>;

/// Everything needed to reflash one ECU.
pub struct FlashJob {
    pub zone: Zone,
    pub sbl: FlashImage,
    pub app: FlashImage,
    pub cal1: Option<FlashImage>,
    pub cal2: Option<FlashImage>,
    /// Flash CAL1/CAL2 between the SBL and the application.
    pub cal_is_must: bool,
    /// How long to wait for the ECU to come back after the post-flash reset.
    pub reset_settle: Duration,
    pub trace: Option<TraceHandler>,
}

impl FlashJob {
    pub fn new(zone: Zone, sbl: FlashImage, app: FlashImage) -> Self {
        Self {
            zone,
            sbl,
            app,
            cal1: None,
            cal2: None,
            cal_is_must: false,
            reset_settle: Duration::from_secs(3),
            trace: None,
        }
    }
}

impl std::fmt::Debug for FlashJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashJob")
            .field("zone", &self.zone)
            .field("sbl", &self.sbl)
            .field("app", &self.app)
            .field("cal1", &self.cal1)
            .field("cal2", &self.cal2)
            .field("cal_is_must", &self.cal_is_must)
            .field("reset_settle", &self.reset_settle)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

/// Offsets and lengths of the TransferData blocks for an image of `length`
/// bytes at a negotiated block size. At least one block is produced.
pub fn block_layout(length: usize, max_block_size: usize) -> impl Iterator<Item = (usize, usize)> {
    let max_block_size = max_block_size.max(1);
    let total = (length / max_block_size + usize::from(length % max_block_size != 0)).max(1);

    (0..total).map(move |index| {
        let offset = index * max_block_size;
        (offset, max_block_size.min(length - offset))
    })
}

/// Step names for one image's download phase.
struct DownloadSteps {
    request: &'static str,
    transfer: &'static str,
    exit: &'static str,
    signature: &'static str,
}

/// One run of the reflash sequence against a physical client and the
/// functional broadcast client.
pub struct FlashSequence<'a> {
    client: &'a UDSClient<'a>,
    broadcast: &'a UDSClient<'a>,
    job: &'a FlashJob,
    /// Negotiated by the most recent RequestDownload.
    max_block_size: usize,
    step: usize,
    current: &'static str,
}

impl<'a> FlashSequence<'a> {
    pub fn new(client: &'a UDSClient<'a>, broadcast: &'a UDSClient<'a>, job: &'a FlashJob) -> Self {
        Self {
            client,
            broadcast,
            job,
            max_block_size: 0,
            step: 0,
            current: "",
        }
    }

    /// Index of the last step that was started.
    pub fn step_index(&self) -> usize {
        self.step
    }

    fn begin(&mut self, name: &'static str) {
        self.step += 1;
        self.current = name;
        info!(step = self.step, name, "flash step");
        if let Some(trace) = &self.job.trace {
            trace(&StepTrace {
                index: self.step,
                name,
            });
        }
    }

    fn failed(&self, cause: crate::error::Error) -> crate::error::Error {
        Error::StepFailed {
            index: self.step,
            name: self.current,
            cause: Box::new(cause),
        }
        .into()
    }

    /// Run the complete sequence. On failure the error carries the index
    /// and name of the step that aborted the job.
    pub async fn run(&mut self) -> crate::Result<()> {
        let job = self.job;

        self.begin("enter_default_session");
        self.client
            .diagnostic_session_control(SessionType::Default)
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("broadcast_extended_session");
        self.broadcast
            .send_raw(&[0x10, 0x83])
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("check_programming_preconditions");
        self.client
            .routine_control(
                RoutineControlType::Start,
                routine::CHECK_PROGRAMMING_PRECONDITIONS,
                None,
            )
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("broadcast_dtc_setting_off");
        self.broadcast
            .send_raw(&[0x85, 0x82])
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("broadcast_communication_off");
        self.broadcast
            .send_raw(&[0x28, 0x83, 0x03])
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("enter_programming_session");
        self.client
            .diagnostic_session_control(SessionType::ProgrammingExtended)
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("bypass_integrity_check");
        self.client
            .routine_control(
                RoutineControlType::Start,
                routine::INTEGRITY_CHECK_BYPASS,
                Some(&[0x00]),
            )
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("enable_programming_mode");
        self.client
            .routine_control(
                RoutineControlType::Start,
                routine::PROGRAMMING_MODE_ENABLE,
                Some(&[0x01]),
            )
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("security_access");
        self.unlock().await?;

        self.begin("read_programming_status");
        self.client
            .read_data_by_identifier(did::PROGRAMMING_STATUS)
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("write_tester_fingerprint");
        self.client
            .write_data_by_identifier(
                did::TESTER_FINGERPRINT,
                &DidValue::Bytes(TESTER_FINGERPRINT.to_vec()),
            )
            .await
            .map_err(|e| self.failed(e))?;

        // Secondary bootloader goes to RAM, no erase.
        self.download_image(
            &job.sbl,
            DownloadSteps {
                request: "request_sbl_download",
                transfer: "transfer_sbl",
                exit: "sbl_transfer_exit",
                signature: "post_sbl_signature",
            },
        )
        .await?;

        if job.cal_is_must {
            let cal1 = job
                .cal1
                .as_ref()
                .ok_or_else(|| self.failed(Error::CalibrationImageMissing.into()))?;
            self.erase_and_download(
                cal1,
                "erase_cal1",
                DownloadSteps {
                    request: "request_cal1_download",
                    transfer: "transfer_cal1",
                    exit: "cal1_transfer_exit",
                    signature: "post_cal1_signature",
                },
            )
            .await?;

            let cal2 = job
                .cal2
                .as_ref()
                .ok_or_else(|| self.failed(Error::CalibrationImageMissing.into()))?;
            self.erase_and_download(
                cal2,
                "erase_cal2",
                DownloadSteps {
                    request: "request_cal2_download",
                    transfer: "transfer_cal2",
                    exit: "cal2_transfer_exit",
                    signature: "post_cal2_signature",
                },
            )
            .await?;
        }

        self.erase_and_download(
            &job.app,
            "erase_application",
            DownloadSteps {
                request: "request_app_download",
                transfer: "transfer_app",
                exit: "app_transfer_exit",
                signature: "post_app_signature",
            },
        )
        .await?;

        self.begin("finalize_programming");
        self.client
            .routine_control(
                RoutineControlType::Start,
                routine::CHECK_PROGRAMMING_DEPENDENCIES,
                None,
            )
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("broadcast_communication_on");
        self.broadcast
            .send_raw(&[0x28, 0x80, 0x03])
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("ecu_reset");
        self.client
            .ecu_reset(ResetType::HardReset)
            .await
            .map_err(|e| self.failed(e))?;
        tokio::time::sleep(job.reset_settle).await;

        self.begin("enter_extended_session");
        self.client
            .diagnostic_session_control(SessionType::Extended)
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("clear_dtc");
        self.client
            .clear_diagnostic_information(0xffffff)
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("broadcast_dtc_setting_on");
        self.broadcast
            .send_raw(&[0x85, DtcSettingType::On as u8])
            .await
            .map_err(|e| self.failed(e))?;

        self.begin("leave_diagnostic_session");
        self.client
            .send_raw(&[0x10, 0x81])
            .await
            .map_err(|e| self.failed(e))?;

        info!("flash sequence completed");
        Ok(())
    }

    async fn unlock(&mut self) -> crate::Result<()> {
        let seed = self
            .client
            .request_seed(UNLOCK_LEVEL.seed())
            .await
            .map_err(|e| self.failed(e))?;

        let key = security::compute_key(self.job.zone, UNLOCK_LEVEL.seed(), &seed)
            .map_err(|e| self.failed(e.into()))?;

        self.client
            .send_key(UNLOCK_LEVEL.key(), &key)
            .await
            .map_err(|e| self.failed(e))?;

        Ok(())
    }

    /// Erase a flash region, then download an image into it.
    async fn erase_and_download(
        &mut self,
        image: &FlashImage,
        erase_step: &'static str,
        steps: DownloadSteps,
    ) -> crate::Result<()> {
        self.begin(erase_step);
        let (address, size) = image.region();
        self.erase_region(address, size)
            .await
            .map_err(|e| self.failed(e))?;

        self.download_image(image, steps).await
    }

    /// RequestDownload, stream the image in blocks, exit and post the
    /// signature.
    async fn download_image(&mut self, image: &FlashImage, steps: DownloadSteps) -> crate::Result<()> {
        self.begin(steps.request);
        let (address, size) = image.region();
        self.max_block_size = self
            .client
            .request_download(address, size)
            .await
            .map_err(|e| self.failed(e))?;

        self.begin(steps.transfer);
        self.transfer_image(image).await.map_err(|e| self.failed(e))?;

        self.begin(steps.exit);
        self.client
            .request_transfer_exit()
            .await
            .map_err(|e| self.failed(e))?;

        self.begin(steps.signature);
        let signature = image
            .signature
            .as_deref()
            .ok_or_else(|| self.failed(Error::SignatureMissing.into()))?;
        self.client
            .routine_control(
                RoutineControlType::Start,
                routine::VERIFY_SIGNATURE,
                Some(signature),
            )
            .await
            .map_err(|e| self.failed(e))?;

        Ok(())
    }

    async fn transfer_image(&self, image: &FlashImage) -> crate::Result<()> {
        let max_block_size = self.max_block_size.max(1);
        let total = (image.data.len() / max_block_size
            + usize::from(image.data.len() % max_block_size != 0))
        .max(1);

        info!(
            length = image.data.len(),
            blocks = total,
            max_block_size,
            "transferring image"
        );

        // Sequence counter starts at 1 and wraps 0xFF to 0x00.
        let mut sequence: u8 = 1;
        for (index, (offset, len)) in block_layout(image.data.len(), max_block_size).enumerate() {
            let block = &image.data[offset..offset + len];
            debug!(
                "transferring block {}/{}, sequence {:#04x}, length {:#06x}",
                index + 1,
                total,
                sequence,
                block.len()
            );
            self.client.transfer_data(sequence, block).await?;
            sequence = sequence.wrapping_add(1);
        }

        Ok(())
    }

    /// Start the erase routine for a region and decode the status record.
    /// The ECU may answer 0x78 responsePending first, which the client
    /// absorbs within the P2* budget.
    async fn erase_region(&self, address: u32, size: u32) -> crate::Result<()> {
        let mut data = vec![crate::uds::ALFID_4_4];
        data.extend(address.to_be_bytes());
        data.extend(size.to_be_bytes());

        let status = self
            .client
            .routine_control(RoutineControlType::Start, routine::ERASE_MEMORY, Some(&data))
            .await?;

        match status.first() {
            Some(0x00) => Ok(()),
            Some(0x01) => Err(Error::EraseRejected.into()),
            _ => Err(Error::EraseResponseMalformed(hex::encode(&status)).into()),
        }
    }
}
