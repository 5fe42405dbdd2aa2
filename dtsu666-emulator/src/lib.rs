//! Emulator of a DTSU666 three-phase power meter on a Modbus RTU line, based on [tokio-modbus](https://github.com/slowtec/tokio-modbus).
//!
//! A controller (e.g. a PV inverter) that expects a real meter on its RS-485 bus reads the holding
//! registers of a [`meter::Meter`], while the measurements themselves are injected from an external
//! telemetry feed through [`telemetry::Binding`]s.
//!
//! ## Overview
//!
//! - [`catalog::Catalog`] is the fixed register map: 16-bit words and 32-bit floats stored high word first,
//! - [`registers::Registers`] is the live register image allocated from the catalog,
//! - [`planner::plan_section`] splits an address range into gap-free reads of at most 16 registers,
//! - [`meter::Meter`] is either a bus master refreshing its image from a real meter through a
//!   [`transport::Transport`], or a slave served to the bus by a [`server::MeterService`] whose
//!   [`admission::AdmissionPolicy`] only admits holding register reads.
//!
//! ## Features
//!
//! - `serial` - open serial lines with [tokio-serial](https://docs.rs/tokio-serial),
//! - `server` - serve meters on an RTU line.
//!
//! Both are enabled by default.

/// Inbound request admission
pub mod admission;
/// Register map of the emulated meter
pub mod catalog;
/// Utilities for encoding from and decoding to Modbus registers
pub mod codec;
/// Emulator settings
pub mod config;
pub mod error;
/// The meter adapter
pub mod meter;
/// Read planning over the register map
pub mod planner;
/// Raw register image
pub mod registers;
/// Modbus service to answer bus masters
#[cfg(feature = "server")]
pub mod server;
/// JSON telemetry to register binding
pub mod telemetry;
/// Bus master transport
pub mod transport;

pub use error::{Error, Result};
pub use meter::{Meter, Role};
