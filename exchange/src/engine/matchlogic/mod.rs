//! Match Logic Module
//!
//! This module implements the core order matching logic for the trading
//! engine. It pairs an incoming order against resting counter-orders by
//! price-time priority, executing one trade per store transaction.

pub mod matcher;

pub use matcher::Matcher;
