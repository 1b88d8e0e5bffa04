//! Princeton Instruments monochromator drivers for mono-rs.
//!
//! This crate provides a driver for the Acton SpectraPro 300i scanning
//! monochromator (applicable to the SpectraPro serial grammar generally).
//! The controller auto-calibrates after a power cycle and performs its own
//! backlash correction on negative moves, so the driver is considerably
//! simpler than its Jobin Yvon counterparts.
//!
//! # Usage
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use mono_driver_princeton::SpectraProFactory;
//!
//! registry.register_factory(Box::new(SpectraProFactory));
//! ```

pub mod spectrapro;

pub use spectrapro::{SpectraProConfig, SpectraProDriver, SpectraProFactory};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factory is
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<SpectraProFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
