#![cfg_attr(docsrs, feature(doc_cfg))]
//! # armbms_lib
//!
//! This crate turns the serial telemetry stream of a multi-arm battery rig
//! into a shared table of latest readings and republishes it over Modbus TCP
//! and SNMP.
//!
//! Data flows one way: bytes are cut into frames by the
//! [`assembler::FrameAssembler`], applied to a [`store::TelemetryStore`] by the
//! [`decoder::FrameDecoder`] and read back by the [`registers::RegisterMapper`]
//! and [`oid::OidMapper`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `armbms-gateway` executable.
//!
//! ### Byte source Features
//! - `serialport`: Enables the **blocking** serial source using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** serial source using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `bin-dependencies`: Enables all features required by the `armbms-gateway` binary executable.

/// Contains error types for the library.
mod error;
/// Wire format of the serial link.
pub mod protocol;

/// Byte stream to frame reassembly.
pub mod assembler;
/// Applies frames to the store.
pub mod decoder;
/// Serial ingestion threads.
pub mod ingest;
/// SOC / SOH estimation.
pub mod metrics;
/// OID tree over the store.
pub mod oid;
/// Register layout and Modbus TCP codec.
pub mod registers;
/// Modbus TCP and SNMP listeners.
pub mod server;
/// SNMPv2c codec and agent.
pub mod snmp;
/// Latest reading per arm, row and data type.
pub mod store;

pub use error::Error;

/// Blocking serial byte source.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous serial byte source.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
