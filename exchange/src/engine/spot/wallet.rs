//! Wallet Module
//!
//! Funding operations on user balances: deposits, withdrawals, and the
//! one-time initial credit given to new accounts. These touch `available`
//! only, never `locked`, and each writes its own ledger entry. Funding
//! emits no events; only trading activity is broadcast.

use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::engine::clock::EngineClock;
use crate::engine::entry::{Balance, LedgerEntry, LedgerKind};
use crate::engine::errors::EngineError;
use crate::engine::spot::MarketManager;
use crate::engine::store::Store;

/// Quote amount credited to every new account
pub const INITIAL_QUOTE_BALANCE: Decimal = dec!(10000);

pub struct WalletService {
    store: Arc<dyn Store>,
    clock: Arc<EngineClock>,
    markets: Arc<RwLock<MarketManager>>,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<EngineClock>,
        markets: Arc<RwLock<MarketManager>>,
    ) -> Self {
        Self {
            store,
            clock,
            markets,
        }
    }

    /// Credits `amount` to the user's available balance
    ///
    /// # Arguments
    /// * `user_id` - Account to credit
    /// * `asset` - Registered asset code
    /// * `amount` - Positive amount, taken at face value without quantization
    ///
    /// # Returns
    /// The balance row after the credit
    pub fn deposit(
        &self,
        user_id: u64,
        asset: &str,
        amount: Decimal,
    ) -> Result<Balance, EngineError> {
        self.check_asset(asset)?;
        check_positive(amount)?;
        let now = self.clock.now_ms();
        let mut txn = self.store.begin();
        let mut row = txn.lock_balance(user_id, asset)?;
        row.credit(amount);
        txn.update_balance(&row)?;
        txn.append_ledger(LedgerEntry::new(
            user_id,
            asset,
            amount,
            LedgerKind::Deposit,
            json!({ "amount": amount.to_string() }),
            now,
        ))?;
        txn.commit()?;
        log::info!("deposit user {} {} {}", user_id, amount, asset);
        Ok(row)
    }

    /// Debits `amount` from the user's available balance
    ///
    /// # Returns
    /// * `Ok(Balance)` - The balance row after the debit
    /// * `Err(EngineError::InsufficientFunds)` - If `available` is short;
    ///   locked funds cannot be withdrawn
    pub fn withdraw(
        &self,
        user_id: u64,
        asset: &str,
        amount: Decimal,
    ) -> Result<Balance, EngineError> {
        self.check_asset(asset)?;
        check_positive(amount)?;
        let now = self.clock.now_ms();
        let mut txn = self.store.begin();
        let mut row = txn.lock_balance(user_id, asset)?;
        row.debit(amount)?;
        txn.update_balance(&row)?;
        txn.append_ledger(LedgerEntry::new(
            user_id,
            asset,
            -amount,
            LedgerKind::Withdraw,
            json!({ "amount": amount.to_string() }),
            now,
        ))?;
        txn.commit()?;
        log::info!("withdraw user {} {} {}", user_id, amount, asset);
        Ok(row)
    }

    /// Seeds a fresh account with its starting balance, recorded under the
    /// INITIAL ledger kind so it is distinguishable from deposits
    pub fn credit_initial(
        &self,
        user_id: u64,
        asset: &str,
        amount: Decimal,
    ) -> Result<Balance, EngineError> {
        self.check_asset(asset)?;
        check_positive(amount)?;
        let now = self.clock.now_ms();
        let mut txn = self.store.begin();
        let mut row = txn.lock_balance(user_id, asset)?;
        row.credit(amount);
        txn.update_balance(&row)?;
        txn.append_ledger(LedgerEntry::new(
            user_id,
            asset,
            amount,
            LedgerKind::Initial,
            json!({ "initial_balance": amount.to_string() }),
            now,
        ))?;
        txn.commit()?;
        Ok(row)
    }

    fn check_asset(&self, asset: &str) -> Result<(), EngineError> {
        if self.markets.read().unwrap().asset(asset).is_none() {
            return Err(EngineError::Validation(format!("unknown asset {}", asset)));
        }
        Ok(())
    }
}

fn check_positive(amount: Decimal) -> Result<(), EngineError> {
    if amount <= dec!(0) {
        return Err(EngineError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
