//! Spot Exchange Engine
//!
//! An in-process spot trading engine: limit order submission, price-time
//! priority matching, atomic settlement with maker and taker fees, and a
//! per-user balance ledger that records every funds movement.
//!
//! The crate exposes:
//! - `config`: Runtime configuration loaded from a toml file
//! - `engine`: The trading engine itself, usable as a library
//! - `metrics`: Prometheus collectors for the service binary
//! - `server`: Service wiring, metrics exporter and demo traffic

pub mod config;
pub mod engine;
pub mod metrics;
pub mod server;
