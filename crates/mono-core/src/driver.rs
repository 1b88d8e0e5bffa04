//! Driver Factory and Component Types
//!
//! This module provides the plugin API for configuration-selected drivers.
//! Each driver crate implements [`DriverFactory`] and is registered with a
//! registry at startup; device instances are then built from TOML
//! configuration tables whose `type` field selects the factory.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              Composition Root                            │
//! │  registry.register_factory(Box::new(Hr640Factory));      │
//! │  registry.register_factory(Box::new(Fhr1000Factory));    │
//! │  registry.register_factory(Box::new(SpectraProFactory)); │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              DriverFactory::build()                      │
//! │  Parses TOML config, opens the serial port, loads        │
//! │  calibration, returns capability trait objects           │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::capabilities::{DeviceCategory, GratingDrive, GratingSelect, SlitControl};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
///
/// Mirrors the capability traits as an enum for easy matching and listing
/// without checking each trait object individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can move the grating and report its position
    /// Corresponds to [`crate::capabilities::GratingDrive`]
    GratingDrive,

    /// Has motorized entrance slits
    /// Corresponds to [`crate::capabilities::SlitControl`]
    SlitControl,

    /// Has a selectable grating turret
    /// Corresponds to [`crate::capabilities::GratingSelect`]
    GratingSelect,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::GratingDrive => "Grating Drive",
            Self::SlitControl => "Slit Control",
            Self::GratingSelect => "Grating Select",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// A factory returns a `DeviceComponents` holding the capabilities its device
/// implements. Storing each capability separately avoids runtime downcasting
/// and lets drivers implement only what the hardware supports.
#[derive(Default)]
pub struct DeviceComponents {
    /// Device category for grouping
    pub category: Option<DeviceCategory>,

    /// GratingDrive implementation (every monochromator)
    pub grating_drive: Option<Arc<dyn GratingDrive>>,

    /// SlitControl implementation (controllers with motorized slits)
    pub slit_control: Option<Arc<dyn SlitControl>>,

    /// GratingSelect implementation (controllers with a turret)
    pub grating_select: Option<Arc<dyn GratingSelect>>,

    /// Capability-specific metadata (units, ranges)
    pub metadata: DeviceMetadata,
}

impl std::fmt::Debug for DeviceComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceComponents")
            .field("category", &self.category)
            .field("grating_drive", &self.grating_drive.is_some())
            .field("slit_control", &self.slit_control.is_some())
            .field("grating_select", &self.grating_select.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.grating_drive.is_some() {
            caps.push(Capability::GratingDrive);
        }
        if self.slit_control.is_some() {
            caps.push(Capability::SlitControl);
        }
        if self.grating_select.is_some() {
            caps.push(Capability::GratingSelect);
        }

        caps
    }

    // Builder methods

    /// Set device category
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Set GratingDrive implementation
    pub fn with_grating_drive(mut self, g: Arc<dyn GratingDrive>) -> Self {
        self.grating_drive = Some(g);
        self
    }

    /// Set SlitControl implementation
    pub fn with_slit_control(mut self, s: Arc<dyn SlitControl>) -> Self {
        self.slit_control = Some(s);
        self
    }

    /// Set GratingSelect implementation
    pub fn with_grating_select(mut self, g: Arc<dyn GratingSelect>) -> Self {
        self.grating_select = Some(g);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// =============================================================================
// Device Metadata
// =============================================================================

/// Capability-specific metadata for a device.
///
/// Holds information about device capabilities that isn't captured in the
/// trait objects themselves.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    /// Position units (always "nm" for the drivers in this workspace)
    pub position_units: Option<String>,

    /// Minimum addressable wavelength in nm
    pub min_wavelength_nm: Option<f64>,

    /// Maximum addressable wavelength in nm
    pub max_wavelength_nm: Option<f64>,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// Each driver crate implements this trait. The factory is responsible for:
///
/// 1. Declaring what driver type it handles (matching the TOML `type` field)
/// 2. Validating configuration before instantiation
/// 3. Asynchronously opening the connection and returning capabilities
///
/// # Lifetime
///
/// Factories are registered once at startup and live for the program's
/// lifetime; they must be `Send + Sync + 'static`.
///
/// # Error Handling
///
/// Both `validate()` and `build()` return `Result`. Build errors include
/// serial-port open failures and calibration-file problems; a device whose
/// connection cannot be opened is never constructed.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in the TOML config `type` field.
    ///
    /// ```toml
    /// [devices.spectrometer]
    /// type = "hr640"  # matches driver_type() returning "hr640"
    /// ```
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    ///
    /// Example: "Jobin Yvon HR640 Monochromator"
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    ///
    /// Called before `build()` to provide early error feedback. Should check
    /// that all required fields exist and have valid types.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// This method should:
    /// 1. Parse the configuration
    /// 2. Open the serial connection (and load calibration where applicable)
    /// 3. Return DeviceComponents with all implemented capabilities
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}
