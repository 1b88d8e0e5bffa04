//! Atomic Hardware Capabilities
//!
//! This module defines the fine-grained capability traits a monochromator
//! controller can implement. Instead of one monolithic `Spectrometer` trait,
//! devices implement the capabilities they actually support:
//!
//! - Every controller implements [`GratingDrive`] (move the grating, read
//!   its position, query busy state).
//! - A controller with motorized entrance slits adds [`SlitControl`].
//! - A controller with a grating turret adds [`GratingSelect`].
//!
//! This approach enables:
//! - Hardware-agnostic logic code (functions work with trait bounds)
//! - Clear contracts (traits are small and focused)
//! - Easy testing (mock individual capabilities)
//!
//! # Design
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for state

use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Device Category
// =============================================================================

/// Device category for classification and UI grouping.
///
/// Drivers set their category in [`crate::driver::DeviceComponents`]; consumer
/// code may use it to group devices in status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceCategory {
    /// Scanning monochromators and spectrographs
    Monochromator,
    /// Devices that don't fit other categories
    #[default]
    Other,
}

impl DeviceCategory {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Monochromator => "Monochromators",
            Self::Other => "Other",
        }
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Grating Position Control
///
/// The one contract every monochromator controller shares: move the grating
/// to a target wavelength and report its position.
///
/// # Contract
/// - Wavelengths are in nanometers throughout.
/// - `move_to_nm` does not return until the motion is complete, whatever the
///   completion mechanism is for the device (busy-polling or a query that
///   blocks until arrival). It applies the device's backlash-compensation
///   policy internally.
/// - `move_to_nm` to the current position is a no-op and issues no commands.
/// - `read_position_nm` returns the device's position in its native frame;
///   for a calibrated controller this is the raw grating position, not the
///   calibrated wavelength.
/// - There is no stop/abort: once a move is issued the caller waits for
///   completion.
///
/// # Thread Safety
/// - All methods take `&self`; one command is in flight per device at a time,
///   enforced by the implementation's port mutex.
#[async_trait]
pub trait GratingDrive: Send + Sync {
    /// Move the grating to the target wavelength and wait for completion.
    async fn move_to_nm(&self, wavelength_nm: f64) -> Result<()>;

    /// Read the current grating position in nanometers.
    async fn read_position_nm(&self) -> Result<f64>;

    /// Query whether the drive motors are currently busy.
    ///
    /// Returns an error if the device answers with a status outside its
    /// documented alphabet.
    async fn is_busy(&self) -> Result<bool>;
}

/// Capability: Entrance Slit Control
///
/// Controllers with motorized slits. Widths are in micrometers; the
/// mechanical range is [0, 2000] µm and requests outside it are rejected
/// without hardware action.
#[async_trait]
pub trait SlitControl: Send + Sync {
    /// Read the current slit width in micrometers.
    async fn read_slit_um(&self) -> Result<f64>;

    /// Move the slit to an absolute width in micrometers.
    ///
    /// Applies the device's backlash policy when closing. Completes before
    /// returning.
    async fn move_slit_absolute_um(&self, width_um: f64) -> Result<()>;
}

/// Description of one grating on a turret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GratingInfo {
    /// Grating number as reported by the controller (1-based).
    pub number: u8,
    /// Groove density in lines/mm.
    pub lines_per_mm: u32,
    /// Human-readable summary (groove density and blaze wavelength).
    pub description: String,
}

/// Capability: Grating Turret Selection
///
/// Controllers carrying more than one grating. Switching gratings is a long
/// operation; implementations raise their timeout for it.
#[async_trait]
pub trait GratingSelect: Send + Sync {
    /// Select the grating with the given number.
    async fn set_grating(&self, grating_number: u8) -> Result<()>;

    /// Read which grating is currently active.
    async fn read_grating(&self) -> Result<GratingInfo>;
}
