//! Spot Market Module
//!
//! This module provides functionality for spot market trading:
//! - `order_processor`: validates, reserves, matches and cancels orders
//! - `market_manager`: manages assets, markets and their configurations
//! - `wallet`: funding operations on user balances
//!
//! Together these components handle all spot market operations.

pub mod market_manager;
pub mod order_processor;
pub mod wallet;

pub use market_manager::MarketManager;
pub use order_processor::OrderProcessor;
pub use wallet::WalletService;
