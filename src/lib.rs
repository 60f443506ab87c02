//! # The zcuflash Crate
//! Tester-side UDS-over-CAN reflashing toolchain for zone controllers. The
//! crate layers an async ISO-TP transport (ISO 15765-2) and a UDS client
//! (ISO 14229) over any CAN adapter, and drives the complete Secondary
//! Bootloader + Application (+ Calibration) reflash sequence on top.
//!
//! ## UDS Example
//!
//! Wrap a CAN adapter for ISO-TP, then create a UDS client on the
//! endpoint. All methods are fully async.
//!
//! ```no_run
//! async fn uds_example() -> zcuflash::Result<()> {
//!     let (link, _peer) = zcuflash::can::VirtualCan::pair();
//!     let adapter = zcuflash::can::AsyncCanAdapter::new(link);
//!
//!     let config = zcuflash::isotp::IsoTpConfig::new(0x736.into(), 0x7b6.into());
//!     let isotp = zcuflash::isotp::IsoTpAdapter::new(&adapter, config);
//!     let uds = zcuflash::uds::UDSClient::new(&isotp);
//!
//!     uds.tester_present().await?;
//!     let version = uds
//!         .read_data_by_identifier(zcuflash::uds::constants::did::ECU_VERSION)
//!         .await?;
//!     println!("ECU version: {}", hex::encode(version));
//!     Ok(())
//! }
//! ```
//!
//! ## Flashing Example
//!
//! A [`flash::FlashJob`] bundles the target zone and the parsed images; the
//! [`flash::JobController`] wires the endpoints and runs the sequence.
//!
//! ```no_run
//! async fn flash_example(job: zcuflash::flash::FlashJob) -> zcuflash::Result<()> {
//!     let (link, _peer) = zcuflash::can::VirtualCan::pair();
//!     let adapter = zcuflash::can::AsyncCanAdapter::new(link);
//!     let controller = zcuflash::flash::JobController::new(adapter);
//!     controller.execute(&job).await
//! }
//! ```

pub mod can;
pub mod cli;
mod error;
pub mod flash;
pub mod image;
pub mod isotp;
pub mod security;
pub mod uds;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
