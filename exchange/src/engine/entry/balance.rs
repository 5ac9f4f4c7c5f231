//! Balances and the Audit Ledger
//!
//! A balance row tracks the spendable and reserved funds of one user in one
//! asset. Every operation that changes `available + locked` appends a
//! ledger entry in the same transaction; the ledger is append-only and
//! exists for audit, the balance row itself is authoritative.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::engine::errors::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: u64,
    pub asset: String,
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn new(user_id: u64, asset: &str) -> Self {
        Self {
            user_id,
            asset: asset.to_string(),
            available: dec!(0),
            locked: dec!(0),
        }
    }

    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }

    /// Adds funds to `available`
    pub fn credit(&mut self, amount: Decimal) {
        self.available += amount;
    }

    /// Removes funds from `available`, failing when they are not there
    pub fn debit(&mut self, amount: Decimal) -> Result<(), EngineError> {
        if self.available < amount {
            return Err(self.insufficient(amount));
        }
        self.available -= amount;
        Ok(())
    }

    /// Moves funds from `available` to `locked` (order reservation)
    pub fn lock(&mut self, amount: Decimal) -> Result<(), EngineError> {
        if self.available < amount {
            return Err(self.insufficient(amount));
        }
        self.available -= amount;
        self.locked += amount;
        Ok(())
    }

    /// Moves funds from `locked` back to `available` (reservation release)
    pub fn unlock(&mut self, amount: Decimal) -> Result<(), EngineError> {
        if self.locked < amount {
            return Err(EngineError::Internal(format!(
                "unlock of {} {} exceeds locked {} for user {}",
                amount, self.asset, self.locked, self.user_id
            )));
        }
        self.locked -= amount;
        self.available += amount;
        Ok(())
    }

    /// Consumes reserved funds during settlement
    pub fn spend_locked(&mut self, amount: Decimal) -> Result<(), EngineError> {
        if self.locked < amount {
            return Err(EngineError::Internal(format!(
                "spend of {} {} exceeds locked {} for user {}",
                amount, self.asset, self.locked, self.user_id
            )));
        }
        self.locked -= amount;
        Ok(())
    }

    fn insufficient(&self, required: Decimal) -> EngineError {
        EngineError::InsufficientFunds {
            asset: self.asset.clone(),
            required,
            available: self.available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerKind {
    Lock,
    Unlock,
    Trade,
    Fee,
    Deposit,
    Withdraw,
    Initial,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Lock => "LOCK",
            LedgerKind::Unlock => "UNLOCK",
            LedgerKind::Trade => "TRADE",
            LedgerKind::Fee => "FEE",
            LedgerKind::Deposit => "DEPOSIT",
            LedgerKind::Withdraw => "WITHDRAW",
            LedgerKind::Initial => "INITIAL",
        }
    }
}

/// One immutable audit record of a signed balance change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub user_id: u64,
    pub asset: String,
    pub delta: Decimal,
    pub kind: LedgerKind,
    pub meta: serde_json::Value,
    pub created_at: i64,
}

impl LedgerEntry {
    pub fn new(
        user_id: u64,
        asset: &str,
        delta: Decimal,
        kind: LedgerKind,
        meta: serde_json::Value,
        created_at: i64,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            asset: asset.to_string(),
            delta,
            kind,
            meta,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_and_unlock() {
        let mut bal = Balance::new(1, "USDT");
        bal.credit(dec!(100));

        bal.lock(dec!(40)).unwrap();
        assert_eq!(bal.available, dec!(60));
        assert_eq!(bal.locked, dec!(40));
        assert_eq!(bal.total(), dec!(100));

        bal.unlock(dec!(10)).unwrap();
        assert_eq!(bal.available, dec!(70));
        assert_eq!(bal.locked, dec!(30));
    }

    #[test]
    fn test_lock_rejects_shortfall() {
        let mut bal = Balance::new(1, "USDT");
        bal.credit(dec!(5));
        let err = bal.lock(dec!(10)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(bal.available, dec!(5));
        assert_eq!(bal.locked, dec!(0));
    }

    #[test]
    fn test_spend_locked_guards_reserved() {
        let mut bal = Balance::new(1, "BTC");
        bal.credit(dec!(1));
        bal.lock(dec!(1)).unwrap();

        bal.spend_locked(dec!(0.4)).unwrap();
        assert_eq!(bal.locked, dec!(0.6));
        assert_eq!(bal.total(), dec!(0.6));

        assert!(bal.spend_locked(dec!(1)).is_err());
    }

    #[test]
    fn test_debit_requires_available() {
        let mut bal = Balance::new(1, "USDT");
        bal.credit(dec!(20));
        bal.debit(dec!(15)).unwrap();
        assert_eq!(bal.available, dec!(5));
        assert!(bal.debit(dec!(6)).is_err());
    }
}
