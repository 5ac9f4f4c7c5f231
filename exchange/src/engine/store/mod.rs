//! Storage Layer
//!
//! The durable relations (orders, trades, balances, ledger) live behind the
//! `Store` trait so matching and settlement never touch a concrete engine.
//! Mutations go through `StoreTxn`: rows written inside a transaction must
//! first be locked through it, writes stay buffered until `commit`, and
//! dropping an uncommitted transaction rolls everything back.

pub mod lock_table;
pub mod memory;

pub use memory::MemoryStore;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::engine::entry::{Balance, LedgerEntry, Order, OrderSide, Trade};

pub type UserId = u64;
pub type OrderId = u64;

/// Identity of one lockable row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Order(OrderId),
    Balance(UserId, String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The bounded lock wait elapsed; the transaction should roll back
    #[error("timed out waiting for row lock {0:?}")]
    LockTimeout(RowKey),

    /// A write was attempted on a row this transaction never locked
    #[error("row {0:?} is not locked by this transaction")]
    LockDiscipline(RowKey),

    #[error("order {0} does not exist")]
    MissingOrder(OrderId),
}

/// Shared handle to the durable relations.
///
/// The plain read methods return committed state without taking row locks;
/// they serve queries and advisory scans. Any read that feeds a decision
/// must instead go through a transaction's locked reads.
pub trait Store: Send + Sync {
    fn begin(&self) -> Box<dyn StoreTxn + '_>;

    fn order(&self, id: OrderId) -> Option<Order>;
    fn open_orders(&self, user_id: UserId) -> Vec<Order>;
    fn user_orders(&self, user_id: UserId, limit: usize) -> Vec<Order>;

    /// Best-ranked resting counter-order for an incoming limit, by strict
    /// price priority with FIFO tie-break, or `None` when nothing crosses
    fn first_match_candidate(
        &self,
        symbol: &str,
        counter_side: OrderSide,
        limit_price: Decimal,
    ) -> Option<OrderId>;

    /// Aggregated resting quantity per price level; bids descending,
    /// asks ascending
    fn depth(&self, symbol: &str, side: OrderSide, levels: usize) -> Vec<(Decimal, Decimal)>;

    fn trades_by_symbol(&self, symbol: &str, limit: usize) -> Vec<Trade>;
    fn trades_for_order(&self, order_id: OrderId) -> Vec<Trade>;

    fn balance(&self, user_id: UserId, asset: &str) -> Balance;
    fn balances(&self, user_id: UserId) -> Vec<Balance>;
    fn ledger(&self, user_id: UserId, limit: usize) -> Vec<LedgerEntry>;
}

/// One transactional scope over the store.
///
/// `lock_*` acquire the row's exclusive lock (reentrant within the same
/// transaction, bounded wait) and return the row as this transaction sees
/// it: its own buffered writes first, committed state otherwise. A missing
/// balance row reads as zeros.
pub trait StoreTxn {
    fn lock_order(&mut self, id: OrderId) -> Result<Order, StoreError>;
    fn lock_balance(&mut self, user_id: UserId, asset: &str) -> Result<Balance, StoreError>;

    /// Assigns the next order id, locks the new row, and buffers the insert
    fn insert_order(&mut self, order: Order) -> Result<Order, StoreError>;
    fn update_order(&mut self, order: &Order) -> Result<(), StoreError>;
    fn update_balance(&mut self, balance: &Balance) -> Result<(), StoreError>;

    /// Assigns the next trade id and buffers the append
    fn insert_trade(&mut self, trade: Trade) -> Result<Trade, StoreError>;
    fn append_ledger(&mut self, entry: LedgerEntry) -> Result<(), StoreError>;

    /// Applies all buffered writes atomically and releases the row locks
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
