//! Acton SpectraPro 300i Monochromator Driver
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 9600, 8N1, `\r` write terminator, no read terminator
//! - Replies echo the command, then carry the data tokens, and end with the
//!   acknowledgement `ok`; the driver accumulates reads until it sees it
//! - Commands: `?NM` read position | `<nm> NM` blocking move |
//!   `MONO-?DONE` busy flag | `?NM/MIN` / `<v> NM/MIN` scan speed |
//!   `?GRATINGS` / `<n> GRATING` turret introspection/selection
//!
//! A move is a single blocking query: the controller holds the reply until
//! the grating arrives, so the driver raises its timeout to 600 s for the
//! duration instead of polling. The controller applies its own backlash
//! correction on negative moves and re-calibrates itself after a power
//! cycle; no position persistence is needed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mono_driver_princeton::SpectraProFactory;
//! use mono_core::driver::DriverFactory;
//!
//! registry.register_factory(Box::new(SpectraProFactory));
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB2"
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use mono_core::capabilities::{DeviceCategory, GratingDrive, GratingInfo, GratingSelect};
use mono_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use mono_core::error::MonoError;
use mono_core::serial::{open_serial_async, wrap_shared_unbuffered, SharedPortUnbuffered};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

const BAUD_RATE: u32 = 9600;

/// Every reply ends with this acknowledgement.
const ACK: &str = "ok";
/// The active grating line in a `?GRATINGS` reply carries this marker.
const ACTIVE_GRATING_MARKER: char = '\u{1a}';

const STATUS_READY_TOKEN: &str = "1";
const STATUS_BUSY_TOKEN: &str = "0";

const DEFAULT_DELAY_MS: u64 = 300;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
/// Timeout for operations that block until the mechanics finish
/// (moves at slow scan speeds, grating changes).
const LONG_OP_TIMEOUT_MS: u64 = 600_000;

const DEFAULT_SPEED_NM_PER_MIN: f64 = 1000.0;

// =============================================================================
// SpectraProFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the SpectraPro driver
#[derive(Debug, Clone, Deserialize)]
pub struct SpectraProConfig {
    /// Serial port path (e.g., "/dev/ttyUSB2")
    pub port: String,
    /// Scan speed written at activation in nm/min (default: 1000)
    #[serde(default)]
    pub speed_nm_per_min: Option<f64>,
    /// Optional inter-command delay in milliseconds (default: 300)
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Optional response timeout in milliseconds (default: 2000)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

/// Factory for creating SpectraPro driver instances.
pub struct SpectraProFactory;

/// Static capabilities for the SpectraPro 300i
static SPECTRAPRO_CAPABILITIES: &[Capability] =
    &[Capability::GratingDrive, Capability::GratingSelect];

impl DriverFactory for SpectraProFactory {
    fn driver_type(&self) -> &'static str {
        "spectrapro"
    }

    fn name(&self) -> &'static str {
        "Princeton Instruments SpectraPro 300i"
    }

    fn capabilities(&self) -> &'static [Capability] {
        SPECTRAPRO_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: SpectraProConfig = config.clone().try_into()?;
        if cfg.port.is_empty() {
            return Err(anyhow!("SpectraPro port path must not be empty"));
        }
        if let Some(speed) = cfg.speed_nm_per_min {
            if speed <= 0.0 {
                return Err(anyhow!(
                    "SpectraPro scan speed must be positive, got {}",
                    speed
                ));
            }
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: SpectraProConfig = config.try_into().context("Invalid SpectraPro config")?;

            let port = open_serial_async(&cfg.port, BAUD_RATE, "SpectraPro").await?;
            let driver = Arc::new(
                SpectraProDriver::with_port(wrap_shared_unbuffered(Box::new(port))).with_timing(
                    Duration::from_millis(cfg.delay_ms.unwrap_or(DEFAULT_DELAY_MS)),
                    cfg.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
            );

            driver
                .write_speed_nm_per_min(cfg.speed_nm_per_min.unwrap_or(DEFAULT_SPEED_NM_PER_MIN))
                .await?;
            tracing::info!(port = %cfg.port, "SpectraPro activated");

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Monochromator)
                .with_grating_drive(driver.clone())
                .with_grating_select(driver)
                .with_metadata(DeviceMetadata {
                    position_units: Some("nm".to_string()),
                    ..Default::default()
                }))
        })
    }
}

// =============================================================================
// SpectraProDriver
// =============================================================================

/// Driver for the Acton SpectraPro 300i monochromator.
///
/// Implements GratingDrive and GratingSelect. The port mutex serializes all
/// transactions; the response timeout is mutable state (pyvisa style) that
/// blocking operations raise to 600 s and restore afterward.
pub struct SpectraProDriver {
    /// Serial port protected by Mutex for exclusive access
    port: SharedPortUnbuffered,
    /// Delay after every write and every completed reply
    delay: Duration,
    /// Current response timeout in ms
    timeout_ms: AtomicU64,
    /// Timeout restored after long operations
    default_timeout_ms: u64,
}

impl SpectraProDriver {
    /// Create a driver over an already-open port.
    pub fn with_port(port: SharedPortUnbuffered) -> Self {
        Self {
            port,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            timeout_ms: AtomicU64::new(DEFAULT_READ_TIMEOUT_MS),
            default_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }

    /// Override the protocol timing.
    pub fn with_timing(mut self, delay: Duration, read_timeout_ms: u64) -> Self {
        self.delay = delay;
        self.timeout_ms = AtomicU64::new(read_timeout_ms);
        self.default_timeout_ms = read_timeout_ms;
        self
    }

    /// Currently configured response timeout in ms.
    pub fn current_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::SeqCst)
    }

    fn set_timeout_ms(&self, ms: u64) {
        self.timeout_ms.store(ms, Ordering::SeqCst);
    }

    /// Send a command and accumulate the reply until the `ok`
    /// acknowledgement arrives.
    async fn query(&self, command: &str) -> Result<String> {
        let mut guard = self.port.lock().await;

        guard
            .write_all(format!("{}\r", command).as_bytes())
            .await
            .context("SpectraPro write failed")?;
        guard.flush().await.context("SpectraPro flush failed")?;
        tokio::time::sleep(self.delay).await;

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.current_timeout_ms());
        let mut response = Vec::with_capacity(64);
        let mut buf = [0u8; 64];

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(MonoError::Instrument(format!(
                    "SpectraPro reply to {:?} timed out",
                    command
                ))
                .into());
            }

            match tokio::time::timeout(deadline - now, guard.read(&mut buf)).await {
                Ok(Ok(0)) => return Err(MonoError::SerialUnexpectedEof.into()),
                Ok(Ok(n)) => {
                    response.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&response);
                    if text.trim_end().ends_with(ACK) {
                        break;
                    }
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Ok(Err(e)) => {
                    return Err(anyhow::Error::from(e).context("SpectraPro read failed"))
                }
                Err(_) => {
                    return Err(MonoError::Instrument(format!(
                        "SpectraPro reply to {:?} timed out",
                        command
                    ))
                    .into())
                }
            }
        }
        tokio::time::sleep(self.delay).await;

        Ok(String::from_utf8_lossy(&response).to_string())
    }

    /// Run a query with the timeout raised for a mechanics-bound operation,
    /// restoring the default afterward.
    async fn query_long(&self, command: &str) -> Result<String> {
        self.set_timeout_ms(LONG_OP_TIMEOUT_MS);
        let result = self.query(command).await;
        self.set_timeout_ms(self.default_timeout_ms);
        result
    }

    /// Replies echo the command first; the value is the second token.
    fn second_token(response: &str) -> Result<&str> {
        response
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("SpectraPro response too short: {:?}", response))
    }

    /// Read the grating position in nm. Resolution is 0.01 nm.
    pub async fn read_position_nm(&self) -> Result<f64> {
        let response = self.query("?NM").await?;
        Self::second_token(&response)?
            .parse::<f64>()
            .with_context(|| format!("Failed to parse SpectraPro position from {:?}", response))
    }

    /// Query the motor-done flag: `1` ready, `0` busy.
    pub async fn is_busy(&self) -> Result<bool> {
        let response = self.query("MONO-?DONE").await?;
        match Self::second_token(&response)? {
            STATUS_READY_TOKEN => Ok(false),
            STATUS_BUSY_TOKEN => Ok(true),
            other => Err(MonoError::UnknownStatus {
                device: "spectrapro",
                token: other.to_string(),
            }
            .into()),
        }
    }

    /// Move the grating to the requested wavelength.
    ///
    /// A single blocking query: the controller holds the reply until the
    /// grating arrives, applying its own backlash correction on negative
    /// moves, so there is no pre-positioning and no busy-polling here. The
    /// timeout is raised to 600 s for the duration to survive slow scan
    /// speeds.
    #[instrument(skip(self), err)]
    pub async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()> {
        self.query_long(&format!("{} NM", wavelength_nm)).await?;
        Ok(())
    }

    /// Read the scan speed in nm/min.
    pub async fn read_speed_nm_per_min(&self) -> Result<f64> {
        let response = self.query("?NM/MIN").await?;
        Self::second_token(&response)?
            .parse::<f64>()
            .with_context(|| format!("Failed to parse SpectraPro speed from {:?}", response))
    }

    /// Set the scan speed in nm/min.
    pub async fn write_speed_nm_per_min(&self, speed: f64) -> Result<()> {
        self.query(&format!("{} NM/MIN", speed)).await?;
        Ok(())
    }

    /// Read the turret listing and return the active grating.
    ///
    /// The reply lists every installed grating on its own line; the active
    /// one carries a `\u{1a}` marker.
    pub async fn read_grating(&self) -> Result<GratingInfo> {
        let response = self.query("?GRATINGS").await?;

        let line = response
            .lines()
            .find(|line| line.contains(ACTIVE_GRATING_MARKER))
            .ok_or_else(|| anyhow!("No active grating marker in {:?}", response))?;

        let cleaned = line.replace(ACTIVE_GRATING_MARKER, " ");
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        let number = tokens
            .first()
            .and_then(|t| t.parse::<u8>().ok())
            .ok_or_else(|| anyhow!("Failed to parse grating number from {:?}", line))?;
        let lines_per_mm = tokens
            .get(1)
            .and_then(|t| t.parse::<u32>().ok())
            .ok_or_else(|| anyhow!("Failed to parse groove density from {:?}", line))?;
        let blaze = tokens
            .get(4)
            .map(|t| t.trim_end_matches(|c: char| c.is_ascii_alphabetic()))
            .unwrap_or("?");

        Ok(GratingInfo {
            number,
            lines_per_mm,
            description: format!(
                "Grating {} lines/mm, blazed for {} nm",
                lines_per_mm, blaze
            ),
        })
    }

    /// Select a grating on the turret. Swapping gratings is slow, so the
    /// query runs under the raised timeout.
    #[instrument(skip(self), err)]
    pub async fn set_grating(&self, grating_number: u8) -> Result<()> {
        self.query_long(&format!("{} GRATING", grating_number))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GratingDrive for SpectraProDriver {
    async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()> {
        SpectraProDriver::move_to_nm(self, wavelength_nm).await
    }

    async fn read_position_nm(&self) -> Result<f64> {
        SpectraProDriver::read_position_nm(self).await
    }

    async fn is_busy(&self) -> Result<bool> {
        SpectraProDriver::is_busy(self).await
    }
}

#[async_trait]
impl GratingSelect for SpectraProDriver {
    async fn set_grating(&self, grating_number: u8) -> Result<()> {
        SpectraProDriver::set_grating(self, grating_number).await
    }

    async fn read_grating(&self) -> Result<GratingInfo> {
        SpectraProDriver::read_grating(self).await
    }
}
