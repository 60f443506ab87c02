//! Command line surface of the flashing tool.

use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use crate::can::{AsyncCanAdapter, VirtualCan};
use crate::flash::FlashJob;
use crate::image::FlashImage;
use crate::security::Zone;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown zone type: {0}")]
    BadZone(String),
    #[error("File not found: {0}")]
    MissingFile(PathBuf),
    #[error("--cal1-file and --cal2-file are required with --cal-is-must")]
    CalFilesRequired,
    #[error("No CAN hardware driver available for channel {0}")]
    NoDriver(u32),
}

fn parse_zone(value: &str) -> Result<Zone, ConfigError> {
    match value.to_ascii_uppercase().as_str() {
        "RZCU" => Ok(Zone::Rzcu),
        "LZCU" => Ok(Zone::Lzcu),
        other => Err(ConfigError::BadZone(other.to_string())),
    }
}

/// Reflash a zone controller over CAN.
#[derive(Parser, Debug)]
#[command(name = "zcuflash", version, about)]
pub struct Cli {
    /// Application name registered with the CAN driver.
    #[arg(long, default_value = "CANalyzer")]
    pub app_name: String,

    /// Driver-specific channel index. Channel 0 selects the in-process
    /// virtual link for bench use without hardware.
    #[arg(long, default_value_t = 1)]
    pub channel: u32,

    /// Target node: RZCU or LZCU.
    #[arg(long = "zone-type", value_parser = parse_zone, default_value = "RZCU")]
    pub zone_type: Zone,

    /// Path to the Secondary Bootloader HEX file.
    #[arg(long)]
    pub sbl_file: PathBuf,

    /// Path to the Application HEX file.
    #[arg(long)]
    pub app_file: PathBuf,

    /// Path to the first calibration HEX file.
    #[arg(long)]
    pub cal1_file: Option<PathBuf>,

    /// Path to the second calibration HEX file.
    #[arg(long)]
    pub cal2_file: Option<PathBuf>,

    /// Flash the calibration images between SBL and application.
    #[arg(long)]
    pub cal_is_must: bool,

    /// Accept images without an .rsa sidecar and post a placeholder
    /// signature instead. Bench use only.
    #[arg(long)]
    pub allow_unsigned: bool,
}

impl Cli {
    fn load_image(&self, path: &Path) -> crate::Result<FlashImage> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()).into());
        }
        Ok(FlashImage::load(path, self.allow_unsigned)?)
    }

    /// Load all images and assemble the flash job.
    pub fn build_job(&self) -> crate::Result<FlashJob> {
        let sbl = self.load_image(&self.sbl_file)?;
        let app = self.load_image(&self.app_file)?;

        let mut job = FlashJob::new(self.zone_type, sbl, app);
        job.cal_is_must = self.cal_is_must;

        if self.cal_is_must {
            let cal1 = self.cal1_file.as_ref().ok_or(ConfigError::CalFilesRequired)?;
            let cal2 = self.cal2_file.as_ref().ok_or(ConfigError::CalFilesRequired)?;
            job.cal1 = Some(self.load_image(cal1)?);
            job.cal2 = Some(self.load_image(cal2)?);
        }

        Ok(job)
    }

    /// Open the CAN link for the configured channel. Hardware drivers are
    /// external collaborators, the binary only ships the virtual link.
    pub fn open_link(&self) -> crate::Result<AsyncCanAdapter> {
        if self.channel == 0 {
            let (link, peer) = VirtualCan::pair();
            // Keep the bus side alive, dropping frames like an empty bench.
            std::thread::spawn(move || peer.drain());
            return Ok(AsyncCanAdapter::new(link));
        }

        Err(ConfigError::NoDriver(self.channel).into())
    }
}
