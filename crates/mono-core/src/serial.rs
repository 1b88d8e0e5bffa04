//! Serial Port Abstractions for Driver Crates
//!
//! Shared types and utilities for async serial communication, used by the
//! monochromator driver crates without duplicating definitions.
//!
//! # Feature Flag
//!
//! This module requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! mono-core = { path = "../mono-core", features = ["serial"] }
//! ```
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`SharedPort`]: mutex-guarded port with buffered reading, for the
//!   `\r`-terminated ASCII grammars (`read_until` needs a BufReader)
//! - [`SharedPortUnbuffered`]: mutex-guarded port without buffering, for the
//!   byte-framed binary protocol where reads are exact counts
//!
//! The mutex is what enforces the one-in-flight-command-per-device contract:
//! every protocol transaction holds the port guard from first byte written to
//! last byte read.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

// =============================================================================
// Type Aliases
// =============================================================================

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
///
/// The `BufReader` wrapper enables `read_line()`/`read_until()` for
/// line-delimited ASCII protocols.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Thread-safe shared serial port without buffering.
///
/// Use this for binary protocols where the driver reads exact byte counts
/// and buffering would only obscure framing.
pub type SharedPortUnbuffered = Arc<Mutex<DynSerial>>;

// =============================================================================
// Helper Functions
// =============================================================================

/// Create a SharedPort from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Create a SharedPortUnbuffered from a type-erased serial port.
pub fn wrap_shared_unbuffered(port: DynSerial) -> SharedPortUnbuffered {
    Arc::new(Mutex::new(port))
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Wraps the serial port opening in `spawn_blocking` to avoid blocking the
/// async runtime during port initialization. Standard settings are applied:
/// 8N1, no flow control (all three monochromator controllers use these).
///
/// # Parameters
///
/// - `port_path`: path to the serial port (e.g., "/dev/ttyUSB0")
/// - `baud_rate`: baud rate (4800 for the HR640, 19200 for the FHR1000,
///   9600 for the SpectraPro)
/// - `device_name`: human-readable device name for error messages
///
/// # Errors
///
/// Returns an error if the port cannot be opened; driver factories propagate
/// this so that no driver value exists without an open connection.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards data until no more is immediately available. Useful for
/// clearing a half-read reply before sending the next command after a fault.
///
/// Returns the total number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF or no more data
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No data available, done
                break;
            }
            Ok(Err(_)) => break, // Real I/O error, abort drain
            Err(_) => break,     // Timeout, no more immediate data
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_shared_port_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));

        // A '\r'-terminated reply, as the FHR1000 sends
        host.write_all(b"o546.074\r").await.unwrap();

        let mut guard = port.lock().await;
        let mut reply = Vec::new();
        guard.read_until(b'\r', &mut reply).await.unwrap();

        assert_eq!(reply, b"o546.074\r");
    }

    #[tokio::test]
    async fn test_shared_port_unbuffered_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPortUnbuffered = wrap_shared_unbuffered(Box::new(device));

        // An exact-count binary reply, as the HR640 sends
        host.write_all(&[0x3A, 0x02, 0, 0, b'b', 0x3A]).await.unwrap();

        let mut guard = port.lock().await;
        let mut buf = [0u8; 6];
        guard.read_exact(&mut buf).await.unwrap();

        assert_eq!(buf[4], b'b');
    }

    #[tokio::test]
    async fn test_shared_port_clone() {
        // SharedPort clones refer to the same underlying port
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));
        let port_clone = port.clone();

        host.write_all(b"ok\r").await.unwrap();

        let mut guard = port_clone.lock().await;
        let mut reply = Vec::new();
        guard.read_until(b'\r', &mut reply).await.unwrap();

        assert_eq!(reply, b"ok\r");
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 16);
    }
}
