//! `mono-core`
//!
//! Core trait definitions and types for the monochromator control stack.
//!
//! This crate provides the building blocks shared by the instrument driver
//! crates: the capability traits a monochromator controller can implement,
//! the [`driver::DriverFactory`] plugin API used to instantiate drivers from
//! configuration, the [`error::MonoError`] taxonomy, and async serial-port
//! abstractions (behind the `serial` feature).
//!
//! ## Architecture
//!
//! - **Capability traits** ([`capabilities`]): fine-grained contracts such as
//!   [`capabilities::GratingDrive`] (move the grating, read its position,
//!   query busy state) that generic code programs against.
//! - **Driver factories** ([`driver`]): each driver crate exposes a factory
//!   that validates a TOML configuration table and builds a
//!   [`driver::DeviceComponents`] bag of capability trait objects.
//! - **Serial abstractions** ([`serial`]): shared port types for both the
//!   byte-framed binary protocol and the line-oriented ASCII grammars.

pub mod capabilities;
pub mod driver;
pub mod error;
#[cfg(feature = "serial")]
pub mod serial;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::{MonoError, MonoResult};
