pub mod asset;
pub mod balance;
pub mod order;
pub mod trade;

pub use asset::{Asset, Market};
pub use balance::{Balance, LedgerEntry, LedgerKind};
pub use order::{Order, OrderSide, OrderStatus};
pub use trade::Trade;
