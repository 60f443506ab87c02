//! Job controller: wires a CAN link to the ISO-TP endpoints and UDS
//! clients, runs the orchestrator and keeps the TesterPresent heartbeat
//! alive while no flash is in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::can::{AsyncCanAdapter, Capabilities};
use crate::flash::{FlashJob, FlashSequence};
use crate::isotp::{IsoTpAdapter, IsoTpConfig};
use crate::security::Zone;
use crate::uds::codec::DidCodecTable;
use crate::uds::UDSClient;

use tracing::{error, info, warn};

/// Functional broadcast addresses shared by all zones.
pub const FUNCTIONAL_TX_ID: u32 = 0x7df;
pub const FUNCTIONAL_RX_ID: u32 = 0x7de;

/// Heartbeat period of the TesterPresent keep-alive.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(3);

/// Physical diagnostic addresses of a zone.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ZoneAddresses {
    pub tx_id: u32,
    pub rx_id: u32,
}

pub fn zone_addresses(zone: Zone) -> ZoneAddresses {
    match zone {
        Zone::Rzcu => ZoneAddresses {
            tx_id: 0x736,
            rx_id: 0x7b6,
        },
        Zone::Lzcu => ZoneAddresses {
            tx_id: 0x734,
            rx_id: 0x7b4,
        },
    }
}

/// ISO-TP endpoint configuration matched to what the link can carry.
fn endpoint_config(tx_id: u32, rx_id: u32, capabilities: Capabilities) -> IsoTpConfig {
    if capabilities.fd {
        IsoTpConfig::new_fd(tx_id.into(), rx_id.into())
    } else {
        IsoTpConfig::new(tx_id.into(), rx_id.into())
    }
}

/// Owns the CAN link and the keep-alive gate for the lifetime of a job.
/// Endpoints and clients are built per run and released when it returns,
/// on every exit path.
pub struct JobController {
    adapter: AsyncCanAdapter,
    is_flashing: Arc<AtomicBool>,
    keep_alive_period: Duration,
}

impl JobController {
    pub fn new(adapter: AsyncCanAdapter) -> Self {
        Self {
            adapter,
            is_flashing: Arc::new(AtomicBool::new(false)),
            keep_alive_period: KEEP_ALIVE_PERIOD,
        }
    }

    pub fn with_keep_alive_period(mut self, period: Duration) -> Self {
        self.keep_alive_period = period;
        self
    }

    /// Gate observed by the keep-alive heartbeat. While true, no
    /// TesterPresent is sent.
    pub fn keep_alive_gate(&self) -> Arc<AtomicBool> {
        self.is_flashing.clone()
    }

    pub fn adapter(&self) -> &AsyncCanAdapter {
        &self.adapter
    }

    /// Run one reflash job to completion. The keep-alive heartbeat runs
    /// alongside the orchestrator but stays silent while `is_flashing` is
    /// set, which it is for the whole sequence.
    pub async fn execute(&self, job: &FlashJob) -> crate::Result<()> {
        let addresses = zone_addresses(job.zone);
        let capabilities = self.adapter.capabilities();

        let physical = IsoTpAdapter::new(
            &self.adapter,
            endpoint_config(addresses.tx_id, addresses.rx_id, capabilities),
        );
        let functional = IsoTpAdapter::new(
            &self.adapter,
            endpoint_config(FUNCTIONAL_TX_ID, FUNCTIONAL_RX_ID, capabilities),
        );

        let client = UDSClient::new(&physical).with_codecs(DidCodecTable::zcu());
        let broadcast = UDSClient::new(&functional);

        info!(
            zone = ?job.zone,
            tx_id = addresses.tx_id,
            rx_id = addresses.rx_id,
            "starting flash job"
        );

        self.is_flashing.store(true, Ordering::SeqCst);

        let mut sequence = FlashSequence::new(&client, &broadcast, job);
        let result = tokio::select! {
            result = sequence.run() => result,
            _ = self.serve_keep_alive(&broadcast) => unreachable!(),
        };

        self.is_flashing.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => info!("flash job finished"),
            Err(e) => error!("flash job failed: {}", e),
        }

        result
    }

    /// Periodic TesterPresent on the functional address. Failures are
    /// logged and discarded, the heartbeat never fails a job. Runs forever,
    /// callers drop the future to stop it.
    pub async fn serve_keep_alive(&self, broadcast: &UDSClient<'_>) {
        let mut interval = tokio::time::interval(self.keep_alive_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick is immediate.
        interval.tick().await;

        loop {
            interval.tick().await;
            if self.is_flashing.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = broadcast.tester_present_suppressed().await {
                warn!("keep-alive failed: {}", e);
            }
        }
    }

    /// Map a job result to a process exit code.
    pub fn exit_code(result: &crate::Result<()>) -> i32 {
        match result {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}
