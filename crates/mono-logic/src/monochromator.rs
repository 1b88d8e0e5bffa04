//! Monochromator facade for external callers.
//!
//! GUIs and scan sequencers talk to this one surface regardless of which
//! controller sits behind it. A move delegates to the driver (which applies
//! its own backlash policy and completes the motion) and then re-reads the
//! position, handing callers the device's answer rather than the request:
//! what a display should show is where the grating actually stopped.

use anyhow::Result;
use mono_core::capabilities::{GratingDrive, GratingInfo, GratingSelect, SlitControl};
use mono_core::driver::DeviceComponents;
use mono_core::error::MonoError;
use std::sync::Arc;

/// One logical monochromator, backed by whichever driver the configuration
/// selected.
pub struct Monochromator {
    grating: Arc<dyn GratingDrive>,
    slit: Option<Arc<dyn SlitControl>>,
    turret: Option<Arc<dyn GratingSelect>>,
}

impl std::fmt::Debug for Monochromator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monochromator")
            .field("slit", &self.slit.is_some())
            .field("turret", &self.turret.is_some())
            .finish()
    }
}

impl Monochromator {
    /// Wrap the components a driver factory built.
    ///
    /// Fails if the device exposes no grating drive; every monochromator
    /// must be able to move.
    pub fn from_components(components: DeviceComponents) -> Result<Self> {
        let grating = components.grating_drive.ok_or_else(|| {
            MonoError::Configuration("device exposes no grating drive".to_string())
        })?;

        Ok(Self {
            grating,
            slit: components.slit_control,
            turret: components.grating_select,
        })
    }

    /// Move the grating to the target wavelength and return the re-read
    /// position in nm.
    pub async fn move_to_nm(&self, target_nm: f64) -> Result<f64> {
        self.grating.move_to_nm(target_nm).await?;
        self.grating.read_position_nm().await
    }

    /// Read the current grating position in nm.
    pub async fn read_position_nm(&self) -> Result<f64> {
        self.grating.read_position_nm().await
    }

    /// Query whether the drive motors are busy.
    pub async fn is_busy(&self) -> Result<bool> {
        self.grating.is_busy().await
    }

    /// Whether the device has motorized slits.
    pub fn has_slit_control(&self) -> bool {
        self.slit.is_some()
    }

    /// Whether the device has a selectable grating turret.
    pub fn has_grating_select(&self) -> bool {
        self.turret.is_some()
    }

    /// Read the slit width in µm.
    pub async fn read_slit_um(&self) -> Result<f64> {
        match &self.slit {
            Some(slit) => slit.read_slit_um().await,
            None => Err(MonoError::OperationNotSupported("slit control".to_string()).into()),
        }
    }

    /// Move the slit to an absolute width in µm.
    pub async fn move_slit_um(&self, width_um: f64) -> Result<()> {
        match &self.slit {
            Some(slit) => slit.move_slit_absolute_um(width_um).await,
            None => Err(MonoError::OperationNotSupported("slit control".to_string()).into()),
        }
    }

    /// Select a grating on the turret.
    pub async fn set_grating(&self, grating_number: u8) -> Result<()> {
        match &self.turret {
            Some(turret) => turret.set_grating(grating_number).await,
            None => Err(MonoError::OperationNotSupported("grating select".to_string()).into()),
        }
    }

    /// Read which grating is active.
    pub async fn read_grating(&self) -> Result<GratingInfo> {
        match &self.turret {
            Some(turret) => turret.read_grating().await,
            None => Err(MonoError::OperationNotSupported("grating select".to_string()).into()),
        }
    }
}
