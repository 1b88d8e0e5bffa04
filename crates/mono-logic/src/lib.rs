//! `mono-logic`
//!
//! Logic layer tying the monochromator drivers to external callers.
//!
//! Two pieces live here:
//! - [`registry::DriverRegistry`]: configuration-time driver selection. The
//!   composition root registers the factories it links, then builds devices
//!   from TOML tables whose `type` field names the driver.
//! - [`monochromator::Monochromator`]: the facade external callers (GUIs,
//!   scan sequencers) talk to. One surface for all three controllers:
//!   move, read position, busy query, and the optional slit/turret
//!   operations where the hardware has them.

pub mod monochromator;
pub mod registry;

pub use monochromator::Monochromator;
pub use registry::DriverRegistry;
