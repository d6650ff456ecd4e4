//! Core protocol engines for a NATO STANAG 5066 subnetwork daemon: the
//! client-facing SIS primitive protocol (Annex A), the peer-facing DTS
//! data-transfer protocol (Annex C), and the shared PDU pool / read / write
//! substrate that couples them.
//!
//! This crate is transport-agnostic: it knows how to decode and encode wire
//! bytes and how to drive the ARQ/Non-ARQ state machines, but binding
//! sockets, reading CLI arguments, and writing a PID file belong to the
//! `sis066d` binary.

pub mod address;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod crc;
pub mod decode;
pub mod dts;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod pdu;
pub mod peer;
pub mod pool;
pub mod read_engine;
pub mod sap;
pub mod sis;
pub mod write_engine;

pub use error::{Result, Sis066Error};
