//! Trading Engine Module
//!
//! This module contains the core components of the exchange system:
//! - `clock`: Monotonic wall-clock timestamps for rows and events
//! - `entry`: Asset, market, order, trade, balance and ledger definitions
//! - `errors`: Engine failure taxonomy
//! - `events`: Outbound event feed and sink implementations
//! - `exchange`: Facade wiring the components into one engine
//! - `matchlogic`: Price-time priority matching
//! - `money`: Quantization and fee arithmetic
//! - `settlement`: Balance movements for executed trades
//! - `spot`: Order lifecycle, market registry and wallet operations
//! - `store`: Storage interface and in-memory backend

pub mod clock;
pub mod entry;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod matchlogic;
pub mod money;
pub mod settlement;
pub mod spot;
pub mod store;

pub use exchange::{EngineConfig, Exchange};
