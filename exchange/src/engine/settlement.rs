//! Trade Settlement
//!
//! Applies the balance movements of one executed trade inside the caller's
//! transaction: the buyer receives the base asset and consumes its quote
//! reservation, the seller delivers the base asset and receives the quote
//! proceeds net of fee. The fee itself is recorded only as a ledger entry,
//! never credited to a balance.
//!
//! A buy reservation is sized against the order's own limit price, so fills
//! at a better price and cost truncation both consume less than was locked.
//! The unconsumed part is released the moment the order completes.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::engine::entry::{Asset, LedgerEntry, LedgerKind, Order, Trade};
use crate::engine::errors::EngineError;
use crate::engine::money::FeePolicy;
use crate::engine::store::{Store, StoreTxn};

pub struct SettleCtx<'a> {
    pub store: &'a dyn Store,
    pub base: &'a Asset,
    pub quote: &'a Asset,
    pub fees: &'a FeePolicy,
}

/// Settles one trade. `buy` and `sell` carry the fill already applied, and
/// every balance row touched here must already be locked by `txn`.
pub fn settle(
    txn: &mut dyn StoreTxn,
    ctx: &SettleCtx<'_>,
    trade: &Trade,
    buy: &Order,
    sell: &Order,
) -> Result<(), EngineError> {
    let amount = ctx.base.quantize(trade.amount);
    let cost = ctx.quote.quantize(trade.total_amount());
    let fee = ctx.fees.fee_on(cost, ctx.quote.precision);
    let now = trade.created_at;

    // buyer receives the base asset
    let mut row = txn.lock_balance(buy.user_id, &ctx.base.code)?;
    row.credit(amount);
    txn.update_balance(&row)?;
    txn.append_ledger(LedgerEntry::new(
        buy.user_id,
        &ctx.base.code,
        amount,
        LedgerKind::Trade,
        json!({ "trade_id": trade.id, "order_id": buy.id }),
        now,
    ))?;

    // buyer consumes cost plus fee out of its reservation; the LOCK entry
    // written at submission already accounts for this outflow
    let mut row = txn.lock_balance(buy.user_id, &ctx.quote.code)?;
    row.spend_locked(cost + fee)?;
    txn.update_balance(&row)?;
    if buy.is_filled() {
        release_buy_surplus(txn, ctx, trade, buy, cost + fee)?;
    }

    // seller delivers the base asset out of its reservation
    let mut row = txn.lock_balance(sell.user_id, &ctx.base.code)?;
    row.spend_locked(amount)?;
    txn.update_balance(&row)?;
    if sell.is_filled() {
        release_sell_leftover(txn, ctx, sell, now)?;
    }

    // seller receives the proceeds net of fee
    let mut row = txn.lock_balance(sell.user_id, &ctx.quote.code)?;
    row.credit(cost - fee);
    txn.update_balance(&row)?;
    txn.append_ledger(LedgerEntry::new(
        sell.user_id,
        &ctx.quote.code,
        cost - fee,
        LedgerKind::Trade,
        json!({ "trade_id": trade.id, "order_id": sell.id }),
        now,
    ))?;
    txn.append_ledger(LedgerEntry::new(
        sell.user_id,
        &ctx.quote.code,
        -fee,
        LedgerKind::Fee,
        json!({ "trade_id": trade.id }),
        now,
    ))?;

    Ok(())
}

/// Unlocks whatever the original buy reservation still holds beyond the
/// quote spent across all of the order's fills, this trade included.
fn release_buy_surplus(
    txn: &mut dyn StoreTxn,
    ctx: &SettleCtx<'_>,
    trade: &Trade,
    buy: &Order,
    current_spend: Decimal,
) -> Result<(), EngineError> {
    let reserved = ctx
        .fees
        .buy_reservation(buy.price, buy.amount, ctx.quote.precision);
    // earlier fills are committed; the triggering trade is still buffered
    let mut consumed = current_spend;
    for past in ctx.store.trades_for_order(buy.id) {
        let cost = ctx.quote.quantize(past.total_amount());
        consumed += cost + ctx.fees.fee_on(cost, ctx.quote.precision);
    }
    let surplus = reserved - consumed;
    if surplus > dec!(0) {
        let mut row = txn.lock_balance(buy.user_id, &ctx.quote.code)?;
        row.unlock(surplus)?;
        txn.update_balance(&row)?;
        txn.append_ledger(LedgerEntry::new(
            buy.user_id,
            &ctx.quote.code,
            surplus,
            LedgerKind::Unlock,
            json!({ "order_id": buy.id }),
            trade.created_at,
        ))?;
    }
    Ok(())
}

// Sell reservations equal the order amount exactly, so a completed sell
// normally leaves nothing locked; any residue is returned here.
fn release_sell_leftover(
    txn: &mut dyn StoreTxn,
    ctx: &SettleCtx<'_>,
    sell: &Order,
    now: i64,
) -> Result<(), EngineError> {
    let leftover = sell.amount - sell.filled_amount;
    if leftover > dec!(0) {
        let mut row = txn.lock_balance(sell.user_id, &ctx.base.code)?;
        row.unlock(leftover)?;
        txn.update_balance(&row)?;
        txn.append_ledger(LedgerEntry::new(
            sell.user_id,
            &ctx.base.code,
            leftover,
            LedgerKind::Unlock,
            json!({ "order_id": sell.id }),
            now,
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::OrderSide;
    use crate::engine::store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn assets() -> (Asset, Asset) {
        (
            Asset::new("BTC", "Bitcoin", 8),
            Asset::new("USDT", "Tether", 2),
        )
    }

    fn seed_balance(store: &MemoryStore, user: u64, asset: &str, available: Decimal, locked: Decimal) {
        let mut txn = store.begin();
        let mut row = txn.lock_balance(user, asset).unwrap();
        row.available = available;
        row.locked = locked;
        txn.update_balance(&row).unwrap();
        txn.commit().unwrap();
    }

    fn filled_order(user: u64, side: OrderSide, price: Decimal, amount: Decimal, filled: Decimal) -> Order {
        let mut order = Order::new(user, "BTCUSDT", side, price, amount, 1);
        order.id = match side {
            OrderSide::Buy => 1,
            OrderSide::Sell => 2,
        };
        order.filled_amount = filled;
        order.update_status();
        order
    }

    fn run_settle(store: &MemoryStore, trade: &Trade, buy: &Order, sell: &Order) {
        let (base, quote) = assets();
        let fees = FeePolicy::new(dec!(0.001));
        let ctx = SettleCtx {
            store,
            base: &base,
            quote: &quote,
            fees: &fees,
        };
        let mut txn = store.begin();
        for user in [buy.user_id, sell.user_id] {
            txn.lock_balance(user, "BTC").unwrap();
            txn.lock_balance(user, "USDT").unwrap();
        }
        settle(txn.as_mut(), &ctx, trade, buy, sell).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_four_legs_at_equal_price() {
        let store = MemoryStore::new(Duration::from_millis(100));
        seed_balance(&store, 2, "USDT", dec!(4995), dec!(5005));
        seed_balance(&store, 1, "BTC", dec!(0), dec!(1));

        let buy = filled_order(2, OrderSide::Buy, dec!(10000), dec!(0.5), dec!(0.5));
        let sell = filled_order(1, OrderSide::Sell, dec!(10000), dec!(1), dec!(0.5));
        let trade = Trade::new("BTCUSDT", dec!(10000), dec!(0.5), buy.id, sell.id, OrderSide::Buy, 7);
        run_settle(&store, &trade, &buy, &sell);

        let buyer_base = store.balance(2, "BTC");
        assert_eq!(buyer_base.available, dec!(0.5));
        let buyer_quote = store.balance(2, "USDT");
        assert_eq!(buyer_quote.locked, dec!(0));
        assert_eq!(buyer_quote.available, dec!(4995));
        let seller_base = store.balance(1, "BTC");
        assert_eq!(seller_base.locked, dec!(0.5));
        let seller_quote = store.balance(1, "USDT");
        assert_eq!(seller_quote.available, dec!(4995));

        let seller_ledger = store.ledger(1, 10);
        let kinds: Vec<&str> = seller_ledger.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["FEE", "TRADE"]);
        assert_eq!(seller_ledger[0].delta, dec!(-5));
        assert_eq!(seller_ledger[1].delta, dec!(4995));
    }

    #[test]
    fn test_buy_surplus_released_on_completion() {
        let store = MemoryStore::new(Duration::from_millis(100));
        // reserved against limit 10000, filled at 9999
        seed_balance(&store, 2, "USDT", dec!(0), dec!(10010));
        seed_balance(&store, 1, "BTC", dec!(0), dec!(1));

        let buy = filled_order(2, OrderSide::Buy, dec!(10000), dec!(1), dec!(1));
        let sell = filled_order(1, OrderSide::Sell, dec!(9999), dec!(1), dec!(1));
        let trade = Trade::new("BTCUSDT", dec!(9999), dec!(1), buy.id, sell.id, OrderSide::Buy, 7);
        run_settle(&store, &trade, &buy, &sell);

        // spent 9999 + 9.99 in fees, reservation was 10010
        let buyer_quote = store.balance(2, "USDT");
        assert_eq!(buyer_quote.locked, dec!(0));
        assert_eq!(buyer_quote.available, dec!(1.01));

        let unlocks: Vec<Decimal> = store
            .ledger(2, 10)
            .into_iter()
            .filter(|e| e.kind == LedgerKind::Unlock)
            .map(|e| e.delta)
            .collect();
        assert_eq!(unlocks, vec![dec!(1.01)]);
    }

    #[test]
    fn test_partial_fill_holds_reservation() {
        let store = MemoryStore::new(Duration::from_millis(100));
        seed_balance(&store, 2, "USDT", dec!(0), dec!(10010));
        seed_balance(&store, 1, "BTC", dec!(0), dec!(0.4));

        let buy = filled_order(2, OrderSide::Buy, dec!(10000), dec!(1), dec!(0.4));
        let sell = filled_order(1, OrderSide::Sell, dec!(10000), dec!(0.4), dec!(0.4));
        let trade = Trade::new("BTCUSDT", dec!(10000), dec!(0.4), buy.id, sell.id, OrderSide::Buy, 7);
        run_settle(&store, &trade, &buy, &sell);

        // 4000 cost + 4 fee consumed, the rest stays locked for the remainder
        let buyer_quote = store.balance(2, "USDT");
        assert_eq!(buyer_quote.locked, dec!(6006));
        assert!(store
            .ledger(2, 10)
            .iter()
            .all(|e| e.kind != LedgerKind::Unlock));
    }

    #[test]
    fn test_self_trade_settles_on_one_balance_pair() {
        let store = MemoryStore::new(Duration::from_millis(100));
        seed_balance(&store, 9, "USDT", dec!(0), dec!(5005));
        seed_balance(&store, 9, "BTC", dec!(0), dec!(0.5));

        let buy = filled_order(9, OrderSide::Buy, dec!(10000), dec!(0.5), dec!(0.5));
        let sell = filled_order(9, OrderSide::Sell, dec!(10000), dec!(0.5), dec!(0.5));
        let trade = Trade::new("BTCUSDT", dec!(10000), dec!(0.5), buy.id, sell.id, OrderSide::Buy, 7);
        run_settle(&store, &trade, &buy, &sell);

        // both legs land on the same rows without losing either update
        let base = store.balance(9, "BTC");
        assert_eq!(base.available, dec!(0.5));
        assert_eq!(base.locked, dec!(0));
        let quote = store.balance(9, "USDT");
        assert_eq!(quote.available, dec!(4995));
        assert_eq!(quote.locked, dec!(0));
    }
}
