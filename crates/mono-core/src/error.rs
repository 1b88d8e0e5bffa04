//! Custom error types for the monochromator stack.
//!
//! This module defines the primary error type, [`MonoError`], shared by the
//! driver crates. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify the failures a serial instrument stack
//! produces, from connection and framing problems to calibration issues.
//!
//! ## Error Categories
//!
//! 1. **Connection errors**: `Io`, `SerialPortNotConnected`,
//!    `SerialUnexpectedEof`. A port that fails to open aborts driver
//!    activation; no driver value exists with an unset handle.
//! 2. **Protocol faults**: `UnknownStatus` (the device answered a busy query
//!    with a byte/token outside its documented alphabet) and `BusyTimeout`
//!    (the device never reported ready within the configured wait). Both are
//!    bounded conditions: polling loops retry an unrecognized status a fixed
//!    number of times and always run against a deadline.
//! 3. **Calibration errors**: `CalibrationParse` (fewer than 4 coefficients
//!    in the calibration file, aborts activation) and
//!    `CalibrationConvergence` (the inverse root-finder gave up before
//!    reaching tolerance, surfaced before any move command is issued).
//! 4. **Range errors**: `SlitOutOfRange`, where the request is logged and dropped
//!    with no hardware action.
//!
//! Driver code propagates these through `anyhow::Result` with `?`; call
//! sites that need to react to a specific class downcast with
//! `err.downcast_ref::<MonoError>()`.

use thiserror::Error;

/// Convenience alias for results using the typed error.
pub type MonoResult<T> = std::result::Result<T, MonoError>;

/// Primary error type for the monochromator control stack.
#[derive(Error, Debug)]
pub enum MonoError {
    /// Configuration values parsed but failed semantic validation
    /// (missing driver `type` field, empty port path, bad file path).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed (serial port open/read/write, file I/O).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument-level error: command failure, malformed response,
    /// response timeout.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Serial port is not connected.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Serial port reached end-of-file unexpectedly: the device disconnected
    /// or was powered off mid-communication.
    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    /// A busy query returned a status byte/token outside the device's
    /// documented alphabet. Polling loops retry this a bounded number of
    /// times before letting it propagate.
    #[error("Device '{device}' returned unrecognized status {token:?}")]
    UnknownStatus {
        device: &'static str,
        token: String,
    },

    /// The device never reported ready within the configured busy-poll wait.
    #[error("Device '{device}' still busy after the configured wait")]
    BusyTimeout { device: &'static str },

    /// The calibration file held fewer than the required 4 numeric
    /// coefficients (or a position file was malformed). Aborts activation.
    #[error("Calibration parse error: {0}")]
    CalibrationParse(String),

    /// The inverse calibration root-finder failed to converge for the
    /// requested target.
    #[error("Calibration inverse failed to converge for {target_nm} nm after {iterations} iterations")]
    CalibrationConvergence { target_nm: f64, iterations: u32 },

    /// Slit width request outside the mechanical [0, 2000] µm range.
    /// The command is dropped; no hardware action is taken.
    #[error("Requested slit width {requested_um} um outside the 0-2000 um range")]
    SlitOutOfRange { requested_um: f64 },

    /// The device behind a facade does not implement the requested
    /// capability (e.g. slit control on a controller without motorized
    /// slits).
    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonoError::Instrument("no response to position query".to_string());
        assert_eq!(
            err.to_string(),
            "Instrument error: no response to position query"
        );
    }

    #[test]
    fn test_unknown_status_display() {
        let err = MonoError::UnknownStatus {
            device: "hr640",
            token: "0x7f".to_string(),
        };
        assert!(err.to_string().contains("hr640"));
        assert!(err.to_string().contains("0x7f"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = MonoError::BusyTimeout { device: "fhr1000" }.into();
        match err.downcast_ref::<MonoError>() {
            Some(MonoError::BusyTimeout { device }) => assert_eq!(*device, "fhr1000"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_convergence_error_carries_target() {
        let err = MonoError::CalibrationConvergence {
            target_nm: 9999.0,
            iterations: 64,
        };
        assert!(err.to_string().contains("9999"));
        assert!(err.to_string().contains("64"));
    }
}
