use crate::engine::clock::EngineClock;
use crate::engine::entry::{Asset, Order, OrderSide, Trade};
use crate::engine::errors::EngineError;
use crate::engine::events::{Event, EventSink};
use crate::engine::money::FeePolicy;
use crate::engine::settlement::{settle, SettleCtx};
use crate::engine::store::{Store, StoreError};

enum TradeOutcome {
    /// One trade executed and committed
    Traded,
    /// The scanned candidate was consumed or canceled before we locked it
    Stale,
    /// Nothing left to do for this taker
    Done,
}

/// Matches one incoming order against the book, one trade per transaction.
///
/// Each round re-scans committed state for the best crossing counter-order,
/// locks rows in the fixed order (taker balances, taker order, counter
/// order, counter balances) and settles the fill before committing. A trade
/// that committed stays committed even if a later round fails.
pub struct Matcher<'a> {
    pub store: &'a dyn Store,
    pub clock: &'a EngineClock,
    pub events: &'a dyn EventSink,
    pub base: &'a Asset,
    pub quote: &'a Asset,
    pub fees: &'a FeePolicy,
    pub retries: u32,
    pub book_depth: usize,
}

impl Matcher<'_> {
    /// Runs the taker to completion: until its remainder no longer crosses,
    /// it is fully filled, or a concurrent cancel closed it. Returns the
    /// number of trades executed.
    pub fn run(&self, taker_id: u64) -> Result<u64, EngineError> {
        let mut executed = 0;
        loop {
            match self.next_trade(taker_id)? {
                TradeOutcome::Traded => executed += 1,
                TradeOutcome::Stale => {}
                TradeOutcome::Done => break,
            }
        }
        Ok(executed)
    }

    fn next_trade(&self, taker_id: u64) -> Result<TradeOutcome, EngineError> {
        let mut attempts = 0;
        loop {
            match self.try_trade(taker_id) {
                Err(EngineError::Store(StoreError::LockTimeout(key))) => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(EngineError::Transient(format!(
                            "matching order {} gave up after {} lock waits on {:?}",
                            taker_id, attempts, key
                        )));
                    }
                    log::warn!(
                        "matching order {}: lock wait on {:?}, attempt {}/{}",
                        taker_id,
                        key,
                        attempts,
                        self.retries
                    );
                }
                other => return other,
            }
        }
    }

    fn try_trade(&self, taker_id: u64) -> Result<TradeOutcome, EngineError> {
        // unlocked peek so the common no-match case takes no row locks
        let head = self
            .store
            .order(taker_id)
            .ok_or_else(|| EngineError::Internal(format!("order {} missing from store", taker_id)))?;
        if !head.is_open() {
            return Ok(TradeOutcome::Done);
        }
        let candidate = match self
            .store
            .first_match_candidate(&head.symbol, head.side.opposite(), head.price)
        {
            Some(id) => id,
            None => return Ok(TradeOutcome::Done),
        };

        let mut txn = self.store.begin();
        let mut assets = [self.base.code.as_str(), self.quote.code.as_str()];
        assets.sort_unstable();
        for asset in assets {
            txn.lock_balance(head.user_id, asset)?;
        }

        let mut taker = txn.lock_order(taker_id)?;
        if !taker.is_open() {
            return Ok(TradeOutcome::Done);
        }
        let mut counter = match txn.lock_order(candidate) {
            Ok(order) => order,
            Err(StoreError::MissingOrder(_)) => return Ok(TradeOutcome::Stale),
            Err(err) => return Err(err.into()),
        };
        if !counter.is_open() || !crosses(&taker, &counter) {
            return Ok(TradeOutcome::Stale);
        }
        for asset in assets {
            txn.lock_balance(counter.user_id, asset)?;
        }

        let fill = taker.remaining().min(counter.remaining());
        let price = counter.price;
        let now = self.clock.now_ms();
        taker.filled_amount += fill;
        taker.update_status();
        counter.filled_amount += fill;
        counter.update_status();

        let (buy, sell) = if taker.side == OrderSide::Buy {
            (&taker, &counter)
        } else {
            (&counter, &taker)
        };
        let trade = txn.insert_trade(Trade::new(
            &taker.symbol,
            price,
            fill,
            buy.id,
            sell.id,
            taker.side,
            now,
        ))?;
        txn.update_order(&taker)?;
        txn.update_order(&counter)?;

        let ctx = SettleCtx {
            store: self.store,
            base: self.base,
            quote: self.quote,
            fees: self.fees,
        };
        settle(txn.as_mut(), &ctx, &trade, buy, sell)?;
        txn.commit()?;

        log::debug!(
            "trade {} {} {}@{} taker {} maker {}",
            trade.id,
            trade.symbol,
            trade.amount,
            trade.price,
            taker_id,
            candidate
        );
        self.publish_trade(&trade, buy.user_id, sell.user_id);
        Ok(TradeOutcome::Traded)
    }

    fn publish_trade(&self, trade: &Trade, buyer: u64, seller: u64) {
        for (user, asset) in [
            (buyer, &self.base.code),
            (buyer, &self.quote.code),
            (seller, &self.base.code),
            (seller, &self.quote.code),
        ] {
            let row = self.store.balance(user, asset);
            self.events.publish(Event::balance_update(&row));
        }
        self.events.publish(Event::trade_new(
            &trade.symbol,
            trade.price,
            trade.amount,
            trade.taker_side,
            trade.created_at,
        ));
        self.events
            .publish(Event::ticker(&trade.symbol, trade.price, trade.created_at));
        publish_book(
            self.store,
            self.events,
            &trade.symbol,
            self.book_depth,
            self.clock.now_ms(),
        );
    }
}

fn crosses(taker: &Order, counter: &Order) -> bool {
    match taker.side {
        OrderSide::Buy => counter.price <= taker.price,
        OrderSide::Sell => counter.price >= taker.price,
    }
}

/// Snapshots both sides of the book and publishes the aggregated view.
pub fn publish_book(
    store: &dyn Store,
    events: &dyn EventSink,
    symbol: &str,
    levels: usize,
    ts: i64,
) {
    let bids = store.depth(symbol, OrderSide::Buy, levels);
    let asks = store.depth(symbol, OrderSide::Sell, levels);
    events.publish(Event::orderbook(symbol, bids, asks, ts));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{ChannelSink, NullSink};
    use crate::engine::store::MemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        store: MemoryStore,
        clock: EngineClock,
        base: Asset,
        quote: Asset,
        fees: FeePolicy,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(Duration::from_millis(200)),
                clock: EngineClock::new(),
                base: Asset::new("BTC", "Bitcoin", 8),
                quote: Asset::new("USDT", "Tether", 2),
                fees: FeePolicy::new(dec!(0.001)),
            }
        }

        fn matcher<'a>(&'a self, events: &'a dyn EventSink) -> Matcher<'a> {
            Matcher {
                store: &self.store,
                clock: &self.clock,
                events,
                base: &self.base,
                quote: &self.quote,
                fees: &self.fees,
                retries: 3,
                book_depth: 50,
            }
        }

        fn seed_balance(&self, user: u64, asset: &str, available: Decimal, locked: Decimal) {
            let mut txn = self.store.begin();
            let mut row = txn.lock_balance(user, asset).unwrap();
            row.available = available;
            row.locked = locked;
            txn.update_balance(&row).unwrap();
            txn.commit().unwrap();
        }

        fn rest_order(
            &self,
            user: u64,
            side: OrderSide,
            price: Decimal,
            amount: Decimal,
            ts: i64,
        ) -> Order {
            let mut txn = self.store.begin();
            let order = txn
                .insert_order(Order::new(user, "BTCUSDT", side, price, amount, ts))
                .unwrap();
            txn.commit().unwrap();
            order
        }
    }

    #[test]
    fn test_taker_fills_against_resting_sell() {
        let fx = Fixture::new();
        fx.seed_balance(1, "BTC", dec!(0), dec!(1));
        fx.seed_balance(2, "USDT", dec!(4995), dec!(5005));
        fx.rest_order(1, OrderSide::Sell, dec!(10000), dec!(1), 1);
        let buy = fx.rest_order(2, OrderSide::Buy, dec!(10000), dec!(0.5), 2);

        let executed = fx.matcher(&NullSink).run(buy.id).unwrap();
        assert_eq!(executed, 1);

        let buy_after = fx.store.order(buy.id).unwrap();
        assert!(buy_after.is_filled());
        assert_eq!(fx.store.balance(2, "BTC").available, dec!(0.5));
        assert_eq!(fx.store.balance(2, "USDT").locked, dec!(0));
        assert_eq!(fx.store.balance(1, "USDT").available, dec!(4995));

        let trades = fx.store.trades_by_symbol("BTCUSDT", 10);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(10000));
        assert_eq!(trades[0].amount, dec!(0.5));
        assert_eq!(trades[0].taker_side, OrderSide::Buy);
    }

    #[test]
    fn test_taker_walks_book_cheapest_first() {
        let fx = Fixture::new();
        fx.seed_balance(1, "BTC", dec!(0), dec!(1));
        fx.seed_balance(3, "BTC", dec!(0), dec!(1));
        // reserved for 2 BTC at limit 10000
        fx.seed_balance(2, "USDT", dec!(0), dec!(20020));
        fx.rest_order(1, OrderSide::Sell, dec!(10000), dec!(1), 1);
        fx.rest_order(3, OrderSide::Sell, dec!(9999), dec!(1), 2);
        let buy = fx.rest_order(2, OrderSide::Buy, dec!(10000), dec!(2), 3);

        let executed = fx.matcher(&NullSink).run(buy.id).unwrap();
        assert_eq!(executed, 2);

        // newest first, so the later fill at 10000 leads
        let trades = fx.store.trades_by_symbol("BTCUSDT", 10);
        assert_eq!(trades[0].price, dec!(10000));
        assert_eq!(trades[1].price, dec!(9999));

        // the cheaper fill's surplus came back when the taker completed
        let quote = fx.store.balance(2, "USDT");
        assert_eq!(quote.locked, dec!(0));
        assert_eq!(quote.available, dec!(1.01));
    }

    #[test]
    fn test_no_trade_when_prices_do_not_cross() {
        let fx = Fixture::new();
        fx.seed_balance(1, "BTC", dec!(0), dec!(1));
        fx.seed_balance(2, "USDT", dec!(0), dec!(2702.7));
        fx.rest_order(1, OrderSide::Sell, dec!(10000), dec!(1), 1);
        let buy = fx.rest_order(2, OrderSide::Buy, dec!(9000), dec!(0.3), 2);

        let executed = fx.matcher(&NullSink).run(buy.id).unwrap();
        assert_eq!(executed, 0);
        assert_eq!(fx.store.order(buy.id).unwrap().status, crate::engine::entry::OrderStatus::Open);
        assert_eq!(fx.store.balance(2, "USDT").locked, dec!(2702.7));
    }

    #[test]
    fn test_partial_fill_leaves_taker_resting() {
        let fx = Fixture::new();
        fx.seed_balance(1, "BTC", dec!(0), dec!(0.4));
        fx.seed_balance(2, "USDT", dec!(0), dec!(10010));
        fx.rest_order(1, OrderSide::Sell, dec!(10000), dec!(0.4), 1);
        let buy = fx.rest_order(2, OrderSide::Buy, dec!(10000), dec!(1), 2);

        let executed = fx.matcher(&NullSink).run(buy.id).unwrap();
        assert_eq!(executed, 1);

        let buy_after = fx.store.order(buy.id).unwrap();
        assert_eq!(buy_after.status, crate::engine::entry::OrderStatus::PartiallyFilled);
        assert_eq!(buy_after.remaining(), dec!(0.6));
        // 4004 consumed, the remainder stays reserved
        assert_eq!(fx.store.balance(2, "USDT").locked, dec!(6006));
    }

    #[test]
    fn test_same_user_orders_may_match() {
        let fx = Fixture::new();
        fx.seed_balance(9, "BTC", dec!(0), dec!(0.5));
        fx.seed_balance(9, "USDT", dec!(0), dec!(5005));
        fx.rest_order(9, OrderSide::Sell, dec!(10000), dec!(0.5), 1);
        let buy = fx.rest_order(9, OrderSide::Buy, dec!(10000), dec!(0.5), 2);

        let executed = fx.matcher(&NullSink).run(buy.id).unwrap();
        assert_eq!(executed, 1);
        let base = fx.store.balance(9, "BTC");
        assert_eq!(base.available, dec!(0.5));
        assert_eq!(base.locked, dec!(0));
    }

    #[test]
    fn test_events_published_in_order_per_trade() {
        let fx = Fixture::new();
        fx.seed_balance(1, "BTC", dec!(0), dec!(1));
        fx.seed_balance(2, "USDT", dec!(0), dec!(5005));
        fx.rest_order(1, OrderSide::Sell, dec!(10000), dec!(1), 1);
        let buy = fx.rest_order(2, OrderSide::Buy, dec!(10000), dec!(0.5), 2);

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = ChannelSink::new(tx);
        fx.matcher(&sink).run(buy.id).unwrap();

        let names: Vec<&'static str> = rx.try_iter().map(|event| event.name()).collect();
        assert_eq!(
            names,
            vec![
                "balance:update",
                "balance:update",
                "balance:update",
                "balance:update",
                "trade:new",
                "ticker:update",
                "orderbook:update",
            ]
        );
    }
}
