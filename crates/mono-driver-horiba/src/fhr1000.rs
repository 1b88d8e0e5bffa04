//! HORIBA Jobin Yvon FHR1000 Monochromator Driver
//!
//! Works for any TRIAX-family controller speaking the same grammar.
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 19200, 8N1, `\r` write and read terminators
//! - Every reply opens with the confirmation marker `o`; moves answer with a
//!   single unterminated marker byte that must be drained
//! - Commands: `Z62,0` read position | `Z61,0,<nm>` move | `E` busy byte |
//!   `j0,0` read slit steps | `k0,0,<steps>` relative slit move | `A` full
//!   auto-initialize
//!
//! The manual recommends 0.3 s between transactions; the driver sleeps that
//! delay after every write and every read. Slit positions are expressed in
//! motor steps internally, 1 step = 2 µm.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mono_driver_horiba::Fhr1000Factory;
//! use mono_core::driver::DriverFactory;
//!
//! registry.register_factory(Box::new(Fhr1000Factory));
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB1"
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use mono_core::capabilities::{DeviceCategory, GratingDrive, SlitControl};
use mono_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use mono_core::error::MonoError;
use mono_core::serial::{open_serial_async, wrap_shared, SharedPort};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

const BAUD_RATE: u32 = 19200;

const RESPONSE_MARKER: char = 'o';
const STATUS_READY: u8 = b'z';
const STATUS_BUSY: u8 = b'q';

/// Pre-position offset for decreasing moves, in nm.
const BACKLASH_PREMOVE_NM: f64 = 5.0;

/// Slit geometry: one motor step widens the gap by 2 µm.
const UM_PER_SLIT_STEP: f64 = 2.0;
/// Backlash offset applied when closing the slit, in steps.
const SLIT_BACKLASH_STEPS: i64 = 50;
/// Mechanical slit range, in µm.
const SLIT_MIN_UM: f64 = 0.0;
const SLIT_MAX_UM: f64 = 2000.0;
/// Below this width a closing move runs fully closed first.
const SLIT_DIRECT_CLOSE_LIMIT_UM: f64 = 100.0;

/// Unrecognized status replies tolerated per busy-poll before failing.
const UNKNOWN_STATUS_RETRIES: u32 = 3;

const DEFAULT_DELAY_MS: u64 = 300;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 600;
/// The `A` auto-initialize can take over a minute.
const INIT_TIMEOUT_MS: u64 = 100_000;

// =============================================================================
// Fhr1000Factory - DriverFactory implementation
// =============================================================================

/// Configuration for the FHR1000 driver
#[derive(Debug, Clone, Deserialize)]
pub struct Fhr1000Config {
    /// Serial port path (e.g., "/dev/ttyUSB1")
    pub port: String,
    /// Optional inter-command delay in milliseconds (default: 300)
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Optional response timeout in milliseconds (default: 2000)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Optional busy-poll wait bound in seconds (default: 600)
    #[serde(default)]
    pub busy_timeout_secs: Option<u64>,
}

/// Factory for creating FHR1000 driver instances.
pub struct Fhr1000Factory;

/// Static capabilities for the FHR1000
static FHR1000_CAPABILITIES: &[Capability] =
    &[Capability::GratingDrive, Capability::SlitControl];

impl DriverFactory for Fhr1000Factory {
    fn driver_type(&self) -> &'static str {
        "fhr1000"
    }

    fn name(&self) -> &'static str {
        "HORIBA Jobin Yvon FHR1000 Monochromator"
    }

    fn capabilities(&self) -> &'static [Capability] {
        FHR1000_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Fhr1000Config = config.clone().try_into()?;
        if cfg.port.is_empty() {
            return Err(anyhow!("FHR1000 port path must not be empty"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Fhr1000Config = config.try_into().context("Invalid FHR1000 config")?;

            let port = open_serial_async(&cfg.port, BAUD_RATE, "FHR1000").await?;
            let driver = Arc::new(
                Fhr1000Driver::with_port(wrap_shared(Box::new(port))).with_timing(
                    Duration::from_millis(cfg.delay_ms.unwrap_or(DEFAULT_DELAY_MS)),
                    cfg.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                    Duration::from_secs(cfg.busy_timeout_secs.unwrap_or(DEFAULT_BUSY_TIMEOUT_SECS)),
                ),
            );
            tracing::info!(port = %cfg.port, "FHR1000 activated");

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Monochromator)
                .with_grating_drive(driver.clone())
                .with_slit_control(driver)
                .with_metadata(DeviceMetadata {
                    position_units: Some("nm".to_string()),
                    ..Default::default()
                }))
        })
    }
}

// =============================================================================
// Fhr1000Driver
// =============================================================================

/// Driver for the HORIBA Jobin Yvon FHR1000 monochromator.
///
/// Implements GratingDrive and SlitControl. The port mutex serializes all
/// transactions; the response timeout is mutable state (pyvisa style) so long
/// operations can raise it and restore the default afterward.
pub struct Fhr1000Driver {
    /// Serial port protected by Mutex for exclusive access
    port: SharedPort,
    /// Delay after every write and every read
    delay: Duration,
    /// Current response timeout in ms (raised for auto-initialize)
    timeout_ms: AtomicU64,
    /// Timeout restored after long operations
    default_timeout_ms: u64,
    /// Upper bound on a single busy-poll wait
    busy_timeout: Duration,
}

impl Fhr1000Driver {
    /// Create a driver over an already-open port.
    pub fn with_port(port: SharedPort) -> Self {
        Self {
            port,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            timeout_ms: AtomicU64::new(DEFAULT_READ_TIMEOUT_MS),
            default_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
        }
    }

    /// Override the protocol timing.
    pub fn with_timing(
        mut self,
        delay: Duration,
        read_timeout_ms: u64,
        busy_timeout: Duration,
    ) -> Self {
        self.delay = delay;
        self.timeout_ms = AtomicU64::new(read_timeout_ms);
        self.default_timeout_ms = read_timeout_ms;
        self.busy_timeout = busy_timeout;
        self
    }

    /// Currently configured response timeout in ms.
    pub fn current_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::SeqCst)
    }

    fn set_timeout_ms(&self, ms: u64) {
        self.timeout_ms.store(ms, Ordering::SeqCst);
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.current_timeout_ms())
    }

    /// Send a query and read its `\r`-terminated reply.
    async fn query(&self, command: &str) -> Result<String> {
        let mut port = self.port.lock().await;

        let cmd = format!("{}\r", command);
        let writer = port.get_mut();
        writer
            .write_all(cmd.as_bytes())
            .await
            .context("FHR1000 write failed")?;
        writer.flush().await.context("FHR1000 flush failed")?;
        tokio::time::sleep(self.delay).await;

        let mut reply = Vec::new();
        let n = tokio::time::timeout(self.read_timeout(), port.read_until(b'\r', &mut reply))
            .await
            .map_err(|_| MonoError::Instrument(format!("FHR1000 reply to {:?} timed out", command)))?
            .context("FHR1000 read failed")?;
        if n == 0 {
            return Err(MonoError::SerialUnexpectedEof.into());
        }
        tokio::time::sleep(self.delay).await;

        Ok(String::from_utf8_lossy(&reply)
            .trim_end_matches('\r')
            .to_string())
    }

    /// Send a command whose reply is a fixed number of unterminated bytes,
    /// and drain them.
    async fn command_drain(&self, command: &str, reply_len: usize) -> Result<Vec<u8>> {
        let mut port = self.port.lock().await;

        let cmd = format!("{}\r", command);
        let writer = port.get_mut();
        writer
            .write_all(cmd.as_bytes())
            .await
            .context("FHR1000 write failed")?;
        writer.flush().await.context("FHR1000 flush failed")?;
        tokio::time::sleep(self.delay).await;

        let mut reply = vec![0u8; reply_len];
        tokio::time::timeout(self.read_timeout(), port.read_exact(&mut reply))
            .await
            .map_err(|_| MonoError::Instrument(format!("FHR1000 reply to {:?} timed out", command)))?
            .context("FHR1000 read failed")?;
        tokio::time::sleep(self.delay).await;

        Ok(reply)
    }

    /// Strip the confirmation marker and parse the numeric remainder.
    fn parse_marked_float(response: &str) -> Result<f64> {
        let value = response.strip_prefix(RESPONSE_MARKER).ok_or_else(|| {
            MonoError::Instrument(format!(
                "FHR1000 response missing confirmation marker: {:?}",
                response
            ))
        })?;
        value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Failed to parse FHR1000 value {:?}", value))
    }

    /// Full auto-initialize (`A`). Takes over a minute; the timeout is raised
    /// to 100 s for the duration and restored afterward.
    #[instrument(skip(self), err)]
    pub async fn initialize(&self) -> Result<()> {
        self.set_timeout_ms(INIT_TIMEOUT_MS);
        let result = self.command_drain("A", 1).await;
        self.set_timeout_ms(self.default_timeout_ms);
        result.map(|_| ())
    }

    /// Read the grating position in nm.
    pub async fn read_position_nm(&self) -> Result<f64> {
        let response = self.query("Z62,0").await?;
        Self::parse_marked_float(&response)
    }

    /// Query the motor status byte: `z` ready, `q` busy.
    pub async fn is_busy(&self) -> Result<bool> {
        let reply = self.command_drain("E", 2).await?;
        match reply[1] {
            STATUS_READY => Ok(false),
            STATUS_BUSY => Ok(true),
            raw => Err(MonoError::UnknownStatus {
                device: "fhr1000",
                token: (raw as char).to_string(),
            }
            .into()),
        }
    }

    /// Issue a move and poll the motors until they report ready.
    pub async fn goto_position_nm_busy(&self, wavelength_nm: f64) -> Result<()> {
        self.command_drain(&format!("Z61,0,{}", wavelength_nm), 1)
            .await?;
        self.wait_ready().await
    }

    /// Poll the busy status until ready, bounded by the configured wait.
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
                        "FHR1000 unrecognized status byte, retrying"
                    );
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(MonoError::BusyTimeout { device: "fhr1000" }.into());
            }
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Move the grating to the requested wavelength with backlash
    /// compensation.
    ///
    /// A decreasing move pre-positions 5 nm below the target so the final
    /// approach always travels upward; an increasing move goes directly. The
    /// current position is compared at the controller's 0.01 nm display
    /// resolution, and a request equal to it issues no move.
    #[instrument(skip(self), err)]
    pub async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()> {
        let current_nm = (self.read_position_nm().await? * 100.0).round() / 100.0;

        if current_nm < wavelength_nm {
            self.goto_position_nm_busy(wavelength_nm).await?;
        } else if current_nm > wavelength_nm {
            self.goto_position_nm_busy(wavelength_nm - BACKLASH_PREMOVE_NM)
                .await?;
            self.goto_position_nm_busy(wavelength_nm).await?;
        } else {
            tracing::info!(wavelength_nm, "FHR1000 already at target, no move issued");
        }
        Ok(())
    }

    /// Read the slit position in motor steps.
    pub async fn read_slit_steps(&self) -> Result<f64> {
        let response = self.query("j0,0").await?;
        Self::parse_marked_float(&response)
    }

    /// Read the slit width in µm (1 step = 2 µm).
    pub async fn read_slit_um(&self) -> Result<f64> {
        Ok(self.read_slit_steps().await? * UM_PER_SLIT_STEP)
    }

    /// Relative slit move in steps: positive opens, negative closes.
    /// Polls the motors until the move completes.
    pub async fn move_slit_relative_steps(&self, steps: i64) -> Result<()> {
        self.command_drain(&format!("k0,0,{}", steps), 1).await?;
        self.wait_ready().await
    }

    /// Move the slit to an absolute width in µm.
    ///
    /// Closing moves carry a 50-step backlash offset: stop short of the
    /// target and approach it opening. Closing below 100 µm runs fully
    /// closed first and opens back out. Requests outside [0, 2000] µm are
    /// rejected without touching the hardware.
    #[instrument(skip(self), err)]
    pub async fn move_slit_absolute_um(&self, requested_um: f64) -> Result<()> {
        if !(SLIT_MIN_UM..=SLIT_MAX_UM).contains(&requested_um) {
            tracing::warn!(
                requested_um,
                "slit width outside the 0-2000 um range, request dropped"
            );
            return Err(MonoError::SlitOutOfRange { requested_um }.into());
        }

        let current_um = self.read_slit_steps().await? * UM_PER_SLIT_STEP;
        let delta_steps = ((requested_um - current_um) / UM_PER_SLIT_STEP).round() as i64;

        if requested_um > current_um {
            self.move_slit_relative_steps(delta_steps).await?;
        } else if current_um > requested_um && requested_um >= SLIT_DIRECT_CLOSE_LIMIT_UM {
            self.move_slit_relative_steps(delta_steps - SLIT_BACKLASH_STEPS)
                .await?;
            self.move_slit_relative_steps(SLIT_BACKLASH_STEPS).await?;
        } else if current_um > requested_um {
            self.move_slit_relative_steps(-((current_um / UM_PER_SLIT_STEP).round() as i64))
                .await?;
            self.move_slit_relative_steps((requested_um / UM_PER_SLIT_STEP).round() as i64)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl GratingDrive for Fhr1000Driver {
    async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()> {
        Fhr1000Driver::move_to_nm(self, wavelength_nm).await
    }

    async fn read_position_nm(&self) -> Result<f64> {
        Fhr1000Driver::read_position_nm(self).await
    }

    async fn is_busy(&self) -> Result<bool> {
        Fhr1000Driver::is_busy(self).await
    }
}

#[async_trait]
impl SlitControl for Fhr1000Driver {
    async fn read_slit_um(&self) -> Result<f64> {
        Fhr1000Driver::read_slit_um(self).await
    }

    async fn move_slit_absolute_um(&self, width_um: f64) -> Result<()> {
        Fhr1000Driver::move_slit_absolute_um(self, width_um).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::io::DuplexStream;

    #[test]
    fn test_factory_driver_type() {
        let factory = Fhr1000Factory;
        assert_eq!(factory.driver_type(), "fhr1000");
        assert_eq!(factory.name(), "HORIBA Jobin Yvon FHR1000 Monochromator");
    }

    #[test]
    fn test_factory_capabilities() {
        let factory = Fhr1000Factory;
        let caps = factory.capabilities();
        assert!(caps.contains(&Capability::GratingDrive));
        assert!(caps.contains(&Capability::SlitControl));
    }

    #[tokio::test]
    async fn test_factory_validate_config() {
        let factory = Fhr1000Factory;

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
        });
        assert!(factory.validate(&valid).is_ok());

        let missing_port = toml::Value::Table(toml::toml! {
            delay_ms = 300
        });
        assert!(factory.validate(&missing_port).is_err());
    }

    #[test]
    fn test_parse_marked_float() {
        assert_eq!(
            Fhr1000Driver::parse_marked_float("o546.074").unwrap(),
            546.074
        );
        assert!(Fhr1000Driver::parse_marked_float("546.074").is_err());
        assert!(Fhr1000Driver::parse_marked_float("oz").is_err());
    }

    // =========================================================================
    // Mock controller
    // =========================================================================

    #[derive(Default)]
    struct MockState {
        position_nm: f64,
        slit_steps: i64,
        commands: Vec<String>,
        busy_replies_per_move: usize,
        busy_replies_left: usize,
        status_override: Option<u8>,
    }

    async fn serve_fhr1000(mut port: DuplexStream, state: Arc<StdMutex<MockState>>) {
        let mut line = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if port.read_exact(&mut byte).await.is_err() {
                return;
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
                continue;
            }
            let cmd = String::from_utf8(std::mem::take(&mut line)).unwrap();

            let reply: Vec<u8> = {
                let mut st = state.lock().unwrap();
                st.commands.push(cmd.clone());
                if cmd == "Z62,0" {
                    format!("o{}\r", st.position_nm).into_bytes()
                } else if let Some(value) = cmd.strip_prefix("Z61,0,") {
                    st.position_nm = value.parse().unwrap();
                    st.busy_replies_left = st.busy_replies_per_move;
                    b"o".to_vec()
                } else if cmd == "E" {
                    let status = if let Some(s) = st.status_override {
                        s
                    } else if st.busy_replies_left > 0 {
                        st.busy_replies_left -= 1;
                        STATUS_BUSY
                    } else {
                        STATUS_READY
                    };
                    vec![b'o', status]
                } else if cmd == "j0,0" {
                    format!("o{}\r", st.slit_steps).into_bytes()
                } else if let Some(value) = cmd.strip_prefix("k0,0,") {
                    st.slit_steps += value.parse::<i64>().unwrap();
                    st.busy_replies_left = st.busy_replies_per_move;
                    b"o".to_vec()
                } else if cmd == "A" {
                    b"o".to_vec()
                } else {
                    panic!("mock FHR1000 got unexpected command {:?}", cmd);
                }
            };

            if port.write_all(&reply).await.is_err() {
                return;
            }
        }
    }

    fn spawn_mock(
        position_nm: f64,
        slit_steps: i64,
    ) -> (Fhr1000Driver, Arc<StdMutex<MockState>>) {
        let (device, host) = tokio::io::duplex(1024);
        let state = Arc::new(StdMutex::new(MockState {
            position_nm,
            slit_steps,
            busy_replies_per_move: 1,
            ..Default::default()
        }));
        tokio::spawn(serve_fhr1000(host, state.clone()));

        let driver = Fhr1000Driver::with_port(wrap_shared(Box::new(device))).with_timing(
            Duration::from_millis(10),
            2_000,
            Duration::from_secs(2),
        );

        (driver, state)
    }

    fn moves(state: &Arc<StdMutex<MockState>>) -> Vec<f64> {
        state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter_map(|c| c.strip_prefix("Z61,0,"))
            .map(|v| v.parse().unwrap())
            .collect()
    }

    fn slit_moves(state: &Arc<StdMutex<MockState>>) -> Vec<i64> {
        state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter_map(|c| c.strip_prefix("k0,0,"))
            .map(|v| v.parse().unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_position_strips_marker() {
        let (driver, _state) = spawn_mock(546.074, 0);
        assert_eq!(driver.read_position_nm().await.unwrap(), 546.074);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_down_prepositions_5nm_below() {
        let (driver, state) = spawn_mock(510.0, 0);

        driver.move_to_nm(500.0).await.unwrap();

        assert_eq!(moves(&state), vec![495.0, 500.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_up_is_single_command() {
        let (driver, state) = spawn_mock(490.0, 0);

        driver.move_to_nm(500.0).await.unwrap();

        assert_eq!(moves(&state), vec![500.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_current_position_is_noop() {
        let (driver, state) = spawn_mock(500.0, 0);

        driver.move_to_nm(500.0).await.unwrap();

        assert!(moves(&state).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_busy_byte_faults_after_bounded_retries() {
        let (driver, state) = spawn_mock(510.0, 0);
        state.lock().unwrap().status_override = Some(b'w');

        let err = driver.move_to_nm(500.0).await.unwrap_err();
        match err.downcast_ref::<MonoError>() {
            Some(MonoError::UnknownStatus { device, token }) => {
                assert_eq!(*device, "fhr1000");
                assert_eq!(token, "w");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slit_request_outside_range_is_dropped() {
        let (driver, state) = spawn_mock(500.0, 100);

        let err = driver.move_slit_absolute_um(2500.0).await.unwrap_err();
        match err.downcast_ref::<MonoError>() {
            Some(MonoError::SlitOutOfRange { requested_um }) => assert_eq!(*requested_um, 2500.0),
            other => panic!("unexpected error: {:?}", other),
        }
        // No hardware action at all
        assert!(state.lock().unwrap().commands.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slit_opening_is_direct() {
        // 100 steps = 200 um, opening to 500 um
        let (driver, state) = spawn_mock(500.0, 100);

        driver.move_slit_absolute_um(500.0).await.unwrap();

        assert_eq!(slit_moves(&state), vec![150]);
        assert_eq!(state.lock().unwrap().slit_steps, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slit_closing_stops_short_then_opens() {
        // 250 steps = 500 um, closing to 300 um
        let (driver, state) = spawn_mock(500.0, 250);

        driver.move_slit_absolute_um(300.0).await.unwrap();

        assert_eq!(slit_moves(&state), vec![-150, 50]);
        assert_eq!(state.lock().unwrap().slit_steps, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slit_closing_below_100um_runs_closed_first() {
        // 250 steps = 500 um, closing to 50 um
        let (driver, state) = spawn_mock(500.0, 250);

        driver.move_slit_absolute_um(50.0).await.unwrap();

        assert_eq!(slit_moves(&state), vec![-250, 25]);
        assert_eq!(state.lock().unwrap().slit_steps, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_restores_timeout() {
        let (driver, state) = spawn_mock(500.0, 0);

        driver.initialize().await.unwrap();

        assert_eq!(driver.current_timeout_ms(), 2_000);
        assert_eq!(state.lock().unwrap().commands, vec!["A".to_string()]);
    }
}
