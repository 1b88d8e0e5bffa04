//! Jobin Yvon / HORIBA monochromator drivers for mono-rs.
//!
//! This crate provides drivers for two grating controllers:
//! - HR640 (binary byte-framed protocol, RS-232 at 4800 baud). The
//!   controller has no non-volatile memory, so the absolute grating position
//!   and the cubic wavelength calibration live in flat text files handled by
//!   the [`calibration`] module.
//! - FHR1000 / TRIAX family (ASCII command protocol, RS-232 at 19200 baud),
//!   including motorized entrance slit control.
//!
//! # Usage
//!
//! Register the factories with your device registry:
//!
//! ```rust,ignore
//! use mono_driver_horiba::{Fhr1000Factory, Hr640Factory};
//!
//! registry.register_factory(Box::new(Hr640Factory));
//! registry.register_factory(Box::new(Fhr1000Factory));
//! ```

pub mod calibration;
pub mod fhr1000;
pub mod hr640;

pub use calibration::{CalibrationCurve, PositionFile};
pub use fhr1000::{Fhr1000Config, Fhr1000Driver, Fhr1000Factory};
pub use hr640::{Hr640Config, Hr640Driver, Hr640Factory};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Hr640Factory>());
    std::hint::black_box(std::any::TypeId::of::<Fhr1000Factory>());
}
