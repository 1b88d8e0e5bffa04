//! Jobin Yvon HR640 Monochromator Driver
//!
//! Protocol Overview:
//! - Format: framed binary byte sequences over RS-232
//! - Baud: 4800, 8N1, no read/write termination
//! - Frame: `[0x3A, 0x02, opcode, payload_len, payload..., 0x3A]`
//! - Reply: the controller answers every frame with a frame of equal length;
//!   query frames carry `0x3F` placeholder bytes where the reply carries data
//! - Positions: angstrom×10 packed into 3 bytes, least-significant place
//!   first on the wire
//!
//! The controller needs a settling delay after every single byte written and
//! after every read; writing faster corrupts framing. It also has no
//! non-volatile memory, so the absolute grating position is persisted to a
//! text file (see [`crate::calibration`]) and loaded back into the device at
//! activation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mono_driver_horiba::Hr640Factory;
//! use mono_core::driver::DriverFactory;
//!
//! registry.register_factory(Box::new(Hr640Factory));
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//!     calibration_file = "/var/lib/mono/spectralink.cal"
//!     position_file = "/var/lib/mono/spectralink.pos"
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use crate::calibration::{CalibrationCurve, PositionFile};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use mono_core::capabilities::{DeviceCategory, GratingDrive};
use mono_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use mono_core::error::MonoError;
use mono_core::serial::{open_serial_async, wrap_shared_unbuffered, SharedPortUnbuffered};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

const BAUD_RATE: u32 = 4800;

// Frame markers and opcodes
const FRAME_MARKER: u8 = 0x3A;
const FRAME_PREFIX: u8 = 0x02;
const QUERY_PLACEHOLDER: u8 = 0x3F;
const OP_LOAD_ABSOLUTE: u8 = 65;
const OP_LOAD_TARGET: u8 = 84;
const OP_READ_ABSOLUTE: u8 = 97;
const OP_READ_TARGET: u8 = 116;
const OP_GO: u8 = 71;
const OP_LOAD_SPEED: u8 = 83;
const OP_READ_SPEED: u8 = 115;

/// Busy query frame; the 6-byte reply carries the status at offset 4.
const BUSY_QUERY_FRAME: [u8; 6] = [FRAME_MARKER, FRAME_PREFIX, 0x00, 0x00, QUERY_PLACEHOLDER, FRAME_MARKER];
const STATUS_READY: u8 = b'b';
const STATUS_BUSY: u8 = b'B';

/// Resolution of the 3-byte wire encoding, in nm.
const POSITION_QUANTUM_NM: f64 = 0.001;
/// Offset of the intermediate target when approaching from above, in nm.
const BACKLASH_PREMOVE_NM: f64 = 0.5;
/// Default scan speed bytes loaded at activation.
const DEFAULT_SPEED_BYTES: [u8; 2] = [60, 0];
/// Unrecognized status replies tolerated per busy-poll before failing.
const UNKNOWN_STATUS_RETRIES: u32 = 3;

const DEFAULT_DELAY_MS: u64 = 100;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// Wire encoding
// =============================================================================

/// Pack a wavelength in nm into the controller's 3-byte position encoding.
///
/// The value is scaled to angstrom×10 (`nm * 1000`), decomposed into
/// base-65536/256/1 place values, and byte-reversed for wire order.
pub fn encode_nm(wavelength_nm: f64) -> [u8; 3] {
    let w = wavelength_nm * 1000.0;
    let high = (w / 65536.0).floor();
    let mid = ((w - high * 65536.0) / 256.0).floor();
    let low = (w - high * 65536.0 - mid * 256.0).floor();
    [low as u8, mid as u8, high as u8]
}

/// Unpack the controller's 3-byte position encoding into nm.
pub fn decode_bytes(bytes: [u8; 3]) -> f64 {
    let [low, mid, high] = bytes;
    (f64::from(high) * 65536.0 + f64::from(mid) * 256.0 + f64::from(low)) / 1000.0
}

fn command_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![FRAME_MARKER, FRAME_PREFIX, opcode, payload.len() as u8];
    frame.extend_from_slice(payload);
    frame.push(FRAME_MARKER);
    frame
}

fn query_frame(opcode: u8, reply_payload_len: usize) -> Vec<u8> {
    command_frame(opcode, &vec![QUERY_PLACEHOLDER; reply_payload_len])
}

// =============================================================================
// Hr640Factory - DriverFactory implementation
// =============================================================================

/// Configuration for the HR640 driver
#[derive(Debug, Clone, Deserialize)]
pub struct Hr640Config {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Calibration file holding the cubic coefficients
    pub calibration_file: PathBuf,
    /// Position file holding the persisted absolute position
    pub position_file: PathBuf,
    /// Optional inter-byte delay in milliseconds (default: 100)
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Optional reply read timeout in milliseconds (default: 2000)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Optional busy-poll wait bound in seconds (default: 600)
    #[serde(default)]
    pub busy_timeout_secs: Option<u64>,
}

/// Factory for creating HR640 driver instances.
pub struct Hr640Factory;

/// Static capabilities for the HR640
static HR640_CAPABILITIES: &[Capability] = &[Capability::GratingDrive];

impl DriverFactory for Hr640Factory {
    fn driver_type(&self) -> &'static str {
        "hr640"
    }

    fn name(&self) -> &'static str {
        "Jobin Yvon HR640 Monochromator"
    }

    fn capabilities(&self) -> &'static [Capability] {
        HR640_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Hr640Config = config.clone().try_into()?;
        if cfg.port.is_empty() {
            return Err(anyhow!("HR640 port path must not be empty"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Hr640Config = config.try_into().context("Invalid HR640 config")?;

            // Calibration problems abort activation before the port is touched
            let curve = CalibrationCurve::load(&cfg.calibration_file)?;
            let position_file = PositionFile::new(&cfg.position_file);
            let persisted_nm = position_file.load_nm()?;

            let port = open_serial_async(&cfg.port, BAUD_RATE, "HR640").await?;
            let shared = wrap_shared_unbuffered(Box::new(port));

            let driver = Hr640Driver::with_port(shared, curve, position_file).with_timing(
                Duration::from_millis(cfg.delay_ms.unwrap_or(DEFAULT_DELAY_MS)),
                Duration::from_millis(cfg.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS)),
                Duration::from_secs(cfg.busy_timeout_secs.unwrap_or(DEFAULT_BUSY_TIMEOUT_SECS)),
            );

            // The controller wakes with undefined RAM: restore scan speed and
            // the persisted absolute position before anyone moves it.
            driver.load_speed_bytes(DEFAULT_SPEED_BYTES).await?;
            driver.load_position_nm(persisted_nm).await?;
            tracing::info!(
                port = %cfg.port,
                position_nm = persisted_nm,
                "HR640 activated from persisted position"
            );

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Monochromator)
                .with_grating_drive(Arc::new(driver))
                .with_metadata(DeviceMetadata {
                    position_units: Some("nm".to_string()),
                    ..Default::default()
                }))
        })
    }
}

// =============================================================================
// Hr640Driver
// =============================================================================

/// Driver for the Jobin Yvon HR640 monochromator controller.
///
/// Owns the serial port, the session's calibration curve, and the position
/// file. All protocol operations hold the port mutex for their full duration,
/// so at most one command is in flight per device.
pub struct Hr640Driver {
    /// Serial port protected by Mutex for exclusive access
    port: SharedPortUnbuffered,
    /// Settling delay after every byte written and every reply read
    delay: Duration,
    /// Reply read timeout
    read_timeout: Duration,
    /// Upper bound on a single busy-poll wait
    busy_timeout: Duration,
    /// Cubic calibration, loaded once at activation
    curve: CalibrationCurve,
    /// Persisted absolute position, rewritten after every move
    position_file: PositionFile,
}

impl Hr640Driver {
    /// Create a driver over an already-open port.
    pub fn with_port(
        port: SharedPortUnbuffered,
        curve: CalibrationCurve,
        position_file: PositionFile,
    ) -> Self {
        Self {
            port,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
            curve,
            position_file,
        }
    }

    /// Override the protocol timing (inter-byte delay, reply timeout,
    /// busy-poll bound).
    pub fn with_timing(
        mut self,
        delay: Duration,
        read_timeout: Duration,
        busy_timeout: Duration,
    ) -> Self {
        self.delay = delay;
        self.read_timeout = read_timeout;
        self.busy_timeout = busy_timeout;
        self
    }

    /// The calibration curve loaded for this session.
    pub fn calibration(&self) -> &CalibrationCurve {
        &self.curve
    }

    /// Write a frame one byte at a time with the mandated settling delay,
    /// then read the equal-length reply.
    async fn transaction(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.port.lock().await;

        for &byte in frame {
            guard
                .write_all(&[byte])
                .await
                .context("HR640 write failed")?;
            guard.flush().await.context("HR640 flush failed")?;
            tokio::time::sleep(self.delay).await;
        }

        let mut reply = vec![0u8; frame.len()];
        tokio::time::timeout(self.read_timeout, guard.read_exact(&mut reply))
            .await
            .map_err(|_| MonoError::Instrument("HR640 reply timed out".to_string()))?
            .context("HR640 read failed")?;
        tokio::time::sleep(self.delay).await;

        Ok(reply)
    }

    /// Read the absolute position as raw wire bytes.
    pub async fn read_position_bytes(&self) -> Result<[u8; 3]> {
        let reply = self.transaction(&query_frame(OP_READ_ABSOLUTE, 3)).await?;
        Ok([reply[4], reply[5], reply[6]])
    }

    /// Read the absolute position in nm.
    pub async fn read_position_nm(&self) -> Result<f64> {
        Ok(decode_bytes(self.read_position_bytes().await?))
    }

    /// Read the loaded target position as raw wire bytes.
    pub async fn read_target_bytes(&self) -> Result<[u8; 3]> {
        let reply = self.transaction(&query_frame(OP_READ_TARGET, 3)).await?;
        Ok([reply[4], reply[5], reply[6]])
    }

    /// Read the loaded target position in nm.
    pub async fn read_target_nm(&self) -> Result<f64> {
        Ok(decode_bytes(self.read_target_bytes().await?))
    }

    /// Read the scan speed bytes.
    pub async fn read_speed_bytes(&self) -> Result<[u8; 2]> {
        let reply = self.transaction(&query_frame(OP_READ_SPEED, 2)).await?;
        Ok([reply[4], reply[5]])
    }

    /// Query the controller status byte.
    ///
    /// Lowercase `b` means ready, uppercase `B` means busy; anything else is
    /// an unrecognized-status fault.
    pub async fn is_busy(&self) -> Result<bool> {
        let reply = self.transaction(&BUSY_QUERY_FRAME).await?;
        match reply[4] {
            STATUS_READY => Ok(false),
            STATUS_BUSY => Ok(true),
            raw => Err(MonoError::UnknownStatus {
                device: "hr640",
                token: format!("{:#04x}", raw),
            }
            .into()),
        }
    }

    /// Load an absolute position from raw wire bytes.
    pub async fn load_position_bytes(&self, bytes: [u8; 3]) -> Result<()> {
        self.transaction(&command_frame(OP_LOAD_ABSOLUTE, &bytes))
            .await?;
        Ok(())
    }

    /// Load an absolute position in nm, telling the controller where the
    /// grating currently stands.
    pub async fn load_position_nm(&self, wavelength_nm: f64) -> Result<()> {
        self.load_position_bytes(encode_nm(wavelength_nm)).await
    }

    /// Load a target position from raw wire bytes.
    pub async fn load_target_bytes(&self, bytes: [u8; 3]) -> Result<()> {
        self.transaction(&command_frame(OP_LOAD_TARGET, &bytes))
            .await?;
        Ok(())
    }

    /// Load a target position in nm. Motion starts on [`Self::go`].
    pub async fn load_target_nm(&self, wavelength_nm: f64) -> Result<()> {
        self.load_target_bytes(encode_nm(wavelength_nm)).await
    }

    /// Load the scan speed. The default `[60, 0]` suits a full-range scan.
    pub async fn load_speed_bytes(&self, speed: [u8; 2]) -> Result<()> {
        self.transaction(&command_frame(OP_LOAD_SPEED, &speed))
            .await?;
        Ok(())
    }

    /// Start moving to the loaded target. Returns as soon as the command is
    /// acknowledged.
    pub async fn go(&self) -> Result<()> {
        self.transaction(&command_frame(OP_GO, &[])).await?;
        Ok(())
    }

    /// Start moving to the loaded target and poll until the controller
    /// reports ready.
    #[instrument(skip(self), err)]
    pub async fn go_busy(&self) -> Result<()> {
        self.go().await?;
        self.wait_ready().await
    }

    /// Poll the busy status until ready, bounded by the configured wait.
    ///
    /// An unrecognized status byte is retried a fixed number of times before
    /// the fault propagates; any other error propagates immediately.
    async fn wait_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.busy_timeout;
        let mut unknown_statuses = 0u32;

        loop {
            match self.is_busy().await {
                Ok(false) => return Ok(()),
                Ok(true) => {
                    unknown_statuses = 0;
                }
                Err(err) => {
                    if !matches!(
                        err.downcast_ref::<MonoError>(),
                        Some(MonoError::UnknownStatus { .. })
                    ) {
                        return Err(err);
                    }
                    unknown_statuses += 1;
                    if unknown_statuses >= UNKNOWN_STATUS_RETRIES {
                        return Err(err);
                    }
                    tracing::warn!(
                        error = %err,
                        attempt = unknown_statuses,
                        "HR640 unrecognized status byte, retrying"
                    );
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(MonoError::BusyTimeout { device: "hr640" }.into());
            }
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Move the grating to the requested wavelength and persist the new
    /// position.
    ///
    /// The target is inverse-calibrated to a raw grating position first;
    /// comparison against the current reading happens in raw units. A target
    /// below the current position is approached via an intermediate target
    /// 0.5 nm below it, so the drive train always finishes a move travelling
    /// upward. A target equal to the current position issues no commands.
    #[instrument(skip(self), err)]
    pub async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()> {
        let raw_target = self.curve.wavelength_to_position_nm(wavelength_nm)?;
        let current = self.read_position_nm().await?;

        if (raw_target - current).abs() < POSITION_QUANTUM_NM {
            tracing::info!(wavelength_nm, "HR640 already at target, nothing to do");
            return Ok(());
        }

        if raw_target < current {
            self.load_target_nm(raw_target - BACKLASH_PREMOVE_NM).await?;
            self.go_busy().await?;
        }
        self.load_target_nm(raw_target).await?;
        self.go_busy().await?;

        self.position_file.save_nm(raw_target)?;
        Ok(())
    }
}

#[async_trait]
impl GratingDrive for Hr640Driver {
    async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()> {
        Hr640Driver::move_to_nm(self, wavelength_nm).await
    }

    async fn read_position_nm(&self) -> Result<f64> {
        Hr640Driver::read_position_nm(self).await
    }

    async fn is_busy(&self) -> Result<bool> {
        Hr640Driver::is_busy(self).await
    }
}
