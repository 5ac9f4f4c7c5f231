use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rust_decimal::Decimal;

use super::lock_table::LockTable;
use super::{OrderId, RowKey, Store, StoreError, StoreTxn, UserId};
use crate::engine::entry::{Balance, LedgerEntry, Order, OrderSide, Trade};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    trades: Vec<Trade>,
    balances: HashMap<(UserId, String), Balance>,
    ledger: Vec<LedgerEntry>,
    ledger_seq: u64,
}

/// In-memory store: four relations behind one mutex, a row lock table, and
/// sequence counters for ids. Transactions buffer their writes and apply
/// them in one step at commit, so plain reads never observe half of a
/// settlement.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    locks: LockTable,
    order_seq: AtomicU64,
    trade_seq: AtomicU64,
    txn_seq: AtomicU64,
    lock_wait: Duration,
}

impl MemoryStore {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            locks: LockTable::new(),
            order_seq: AtomicU64::new(0),
            trade_seq: AtomicU64::new(0),
            txn_seq: AtomicU64::new(0),
            lock_wait,
        }
    }
}

pub struct MemTxn<'a> {
    store: &'a MemoryStore,
    txn_id: u64,
    held: Vec<RowKey>,
    orders: HashMap<OrderId, Order>,
    balances: HashMap<(UserId, String), Balance>,
    trades: Vec<Trade>,
    ledger: Vec<LedgerEntry>,
}

impl MemTxn<'_> {
    fn acquire(&mut self, key: &RowKey) -> Result<bool, StoreError> {
        let newly = self
            .store
            .locks
            .acquire(key, self.txn_id, self.store.lock_wait)?;
        if newly {
            self.held.push(key.clone());
        }
        Ok(newly)
    }

    fn holds(&self, key: &RowKey) -> bool {
        self.held.iter().any(|held| held == key)
    }

    fn release_all(&mut self) {
        for key in self.held.drain(..) {
            self.store.locks.release(&key, self.txn_id);
        }
    }
}

impl StoreTxn for MemTxn<'_> {
    fn lock_order(&mut self, id: OrderId) -> Result<Order, StoreError> {
        let key = RowKey::Order(id);
        let newly = self.acquire(&key)?;
        if let Some(order) = self.orders.get(&id) {
            return Ok(order.clone());
        }
        let committed = self.store.tables.lock().unwrap().orders.get(&id).cloned();
        match committed {
            Some(order) => Ok(order),
            None => {
                if newly {
                    self.store.locks.release(&key, self.txn_id);
                    self.held.retain(|held| held != &key);
                }
                Err(StoreError::MissingOrder(id))
            }
        }
    }

    fn lock_balance(&mut self, user_id: UserId, asset: &str) -> Result<Balance, StoreError> {
        let key = RowKey::Balance(user_id, asset.to_string());
        self.acquire(&key)?;
        let map_key = (user_id, asset.to_string());
        if let Some(balance) = self.balances.get(&map_key) {
            return Ok(balance.clone());
        }
        let committed = self
            .store
            .tables
            .lock()
            .unwrap()
            .balances
            .get(&map_key)
            .cloned();
        Ok(committed.unwrap_or_else(|| Balance::new(user_id, asset)))
    }

    fn insert_order(&mut self, mut order: Order) -> Result<Order, StoreError> {
        order.id = self.store.order_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let key = RowKey::Order(order.id);
        self.acquire(&key)?;
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let key = RowKey::Order(order.id);
        if !self.holds(&key) {
            return Err(StoreError::LockDiscipline(key));
        }
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn update_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        let key = RowKey::Balance(balance.user_id, balance.asset.clone());
        if !self.holds(&key) {
            return Err(StoreError::LockDiscipline(key));
        }
        self.balances
            .insert((balance.user_id, balance.asset.clone()), balance.clone());
        Ok(())
    }

    fn insert_trade(&mut self, mut trade: Trade) -> Result<Trade, StoreError> {
        trade.id = self.store.trade_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.trades.push(trade.clone());
        Ok(trade)
    }

    fn append_ledger(&mut self, entry: LedgerEntry) -> Result<(), StoreError> {
        self.ledger.push(entry);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        {
            let mut tables = self.store.tables.lock().unwrap();
            for (id, order) in self.orders.drain() {
                tables.orders.insert(id, order);
            }
            for (key, balance) in self.balances.drain() {
                tables.balances.insert(key, balance);
            }
            tables.trades.append(&mut self.trades);
            for mut entry in self.ledger.drain(..) {
                tables.ledger_seq += 1;
                entry.id = tables.ledger_seq;
                tables.ledger.push(entry);
            }
        }
        self.release_all();
        Ok(())
    }
}

impl Drop for MemTxn<'_> {
    // dropping without commit discards the buffers: rollback
    fn drop(&mut self) {
        self.release_all();
    }
}

fn ranks_before(a: &Order, b: &Order, counter_side: OrderSide) -> bool {
    let by_price = match counter_side {
        OrderSide::Sell => a.price.cmp(&b.price),
        OrderSide::Buy => b.price.cmp(&a.price),
    };
    by_price
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
        .is_lt()
}

impl Store for MemoryStore {
    fn begin(&self) -> Box<dyn StoreTxn + '_> {
        Box::new(MemTxn {
            store: self,
            txn_id: self.txn_seq.fetch_add(1, Ordering::Relaxed) + 1,
            held: Vec::new(),
            orders: HashMap::new(),
            balances: HashMap::new(),
            trades: Vec::new(),
            ledger: Vec::new(),
        })
    }

    fn order(&self, id: OrderId) -> Option<Order> {
        self.tables.lock().unwrap().orders.get(&id).cloned()
    }

    fn open_orders(&self, user_id: UserId) -> Vec<Order> {
        let tables = self.tables.lock().unwrap();
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.is_open())
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }

    fn user_orders(&self, user_id: UserId, limit: usize) -> Vec<Order> {
        let tables = self.tables.lock().unwrap();
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.truncate(limit);
        orders
    }

    fn first_match_candidate(
        &self,
        symbol: &str,
        counter_side: OrderSide,
        limit_price: Decimal,
    ) -> Option<OrderId> {
        let tables = self.tables.lock().unwrap();
        let mut best: Option<&Order> = None;
        for order in tables.orders.values() {
            if order.symbol != symbol || order.side != counter_side || !order.is_open() {
                continue;
            }
            let crosses = match counter_side {
                OrderSide::Sell => order.price <= limit_price,
                OrderSide::Buy => order.price >= limit_price,
            };
            if !crosses {
                continue;
            }
            best = match best {
                Some(current) if !ranks_before(order, current, counter_side) => Some(current),
                _ => Some(order),
            };
        }
        best.map(|o| o.id)
    }

    fn depth(&self, symbol: &str, side: OrderSide, levels: usize) -> Vec<(Decimal, Decimal)> {
        let tables = self.tables.lock().unwrap();
        let mut agg: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for order in tables.orders.values() {
            if order.symbol == symbol && order.side == side && order.is_open() {
                *agg.entry(order.price).or_default() += order.remaining();
            }
        }
        match side {
            OrderSide::Buy => agg.into_iter().rev().take(levels).collect(),
            OrderSide::Sell => agg.into_iter().take(levels).collect(),
        }
    }

    fn trades_by_symbol(&self, symbol: &str, limit: usize) -> Vec<Trade> {
        let tables = self.tables.lock().unwrap();
        tables
            .trades
            .iter()
            .rev()
            .filter(|t| t.symbol == symbol)
            .take(limit)
            .cloned()
            .collect()
    }

    fn trades_for_order(&self, order_id: OrderId) -> Vec<Trade> {
        let tables = self.tables.lock().unwrap();
        tables
            .trades
            .iter()
            .filter(|t| t.buy_order_id == order_id || t.sell_order_id == order_id)
            .cloned()
            .collect()
    }

    fn balance(&self, user_id: UserId, asset: &str) -> Balance {
        self.tables
            .lock()
            .unwrap()
            .balances
            .get(&(user_id, asset.to_string()))
            .cloned()
            .unwrap_or_else(|| Balance::new(user_id, asset))
    }

    fn balances(&self, user_id: UserId) -> Vec<Balance> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Balance> = tables
            .balances
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.asset.cmp(&b.asset));
        rows
    }

    fn ledger(&self, user_id: UserId, limit: usize) -> Vec<LedgerEntry> {
        let tables = self.tables.lock().unwrap();
        tables
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::{LedgerKind, OrderStatus};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn store() -> MemoryStore {
        MemoryStore::new(Duration::from_millis(200))
    }

    fn seed_order(
        store: &MemoryStore,
        user_id: u64,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
        created_at: i64,
    ) -> Order {
        let mut txn = store.begin();
        let order = txn
            .insert_order(Order::new(user_id, "BTCUSDT", side, price, amount, created_at))
            .unwrap();
        txn.commit().unwrap();
        order
    }

    #[test]
    fn test_insert_visible_only_after_commit() {
        let store = store();
        let mut txn = store.begin();
        let order = txn
            .insert_order(Order::new(1, "BTCUSDT", OrderSide::Buy, dec!(100), dec!(1), 5))
            .unwrap();
        assert!(order.id > 0);
        assert!(store.order(order.id).is_none());
        txn.commit().unwrap();
        assert_eq!(store.order(order.id).unwrap().price, dec!(100));
    }

    #[test]
    fn test_rollback_discards_writes_and_releases_locks() {
        let store = store();
        let order = seed_order(&store, 1, OrderSide::Buy, dec!(100), dec!(1), 5);

        {
            let mut txn = store.begin();
            let mut row = txn.lock_order(order.id).unwrap();
            row.status = OrderStatus::Canceled;
            txn.update_order(&row).unwrap();
            let mut bal = txn.lock_balance(1, "USDT").unwrap();
            bal.credit(dec!(50));
            txn.update_balance(&bal).unwrap();
            // dropped without commit
        }

        assert_eq!(store.order(order.id).unwrap().status, OrderStatus::Open);
        assert_eq!(store.balance(1, "USDT").available, dec!(0));

        // rows are lockable again
        let mut txn = store.begin();
        assert!(txn.lock_order(order.id).is_ok());
        assert!(txn.lock_balance(1, "USDT").is_ok());
    }

    #[test]
    fn test_update_without_lock_is_rejected() {
        let store = store();
        let order = seed_order(&store, 1, OrderSide::Buy, dec!(100), dec!(1), 5);

        let mut txn = store.begin();
        let mut row = store.order(order.id).unwrap();
        row.status = OrderStatus::Canceled;
        let err = txn.update_order(&row).unwrap_err();
        assert_eq!(err, StoreError::LockDiscipline(RowKey::Order(order.id)));
    }

    #[test]
    fn test_lock_missing_order() {
        let store = store();
        let mut txn = store.begin();
        assert_eq!(
            txn.lock_order(99).unwrap_err(),
            StoreError::MissingOrder(99)
        );
        // the phantom key is not kept locked
        let mut other = store.begin();
        assert_eq!(
            other.lock_order(99).unwrap_err(),
            StoreError::MissingOrder(99)
        );
    }

    #[test]
    fn test_lock_balance_defaults_to_zero_row() {
        let store = store();
        let mut txn = store.begin();
        let bal = txn.lock_balance(7, "BTC").unwrap();
        assert_eq!(bal.available, dec!(0));
        assert_eq!(bal.locked, dec!(0));
        assert_eq!(bal.user_id, 7);
    }

    #[test]
    fn test_candidate_price_priority_for_buy_taker() {
        let store = store();
        seed_order(&store, 1, OrderSide::Sell, dec!(10000), dec!(1), 10);
        let cheap = seed_order(&store, 2, OrderSide::Sell, dec!(9999), dec!(1), 20);
        seed_order(&store, 3, OrderSide::Sell, dec!(10001), dec!(1), 5);

        // the cheapest crossing ask wins even though it arrived later
        let best = store.first_match_candidate("BTCUSDT", OrderSide::Sell, dec!(10000));
        assert_eq!(best, Some(cheap.id));

        // nothing crosses below every ask
        assert_eq!(
            store.first_match_candidate("BTCUSDT", OrderSide::Sell, dec!(9000)),
            None
        );
    }

    #[test]
    fn test_candidate_time_priority_breaks_price_tie() {
        let store = store();
        let older = seed_order(&store, 1, OrderSide::Sell, dec!(10000), dec!(1), 10);
        seed_order(&store, 2, OrderSide::Sell, dec!(10000), dec!(1), 20);

        let best = store.first_match_candidate("BTCUSDT", OrderSide::Sell, dec!(10000));
        assert_eq!(best, Some(older.id));
    }

    #[test]
    fn test_candidate_highest_bid_for_sell_taker() {
        let store = store();
        seed_order(&store, 1, OrderSide::Buy, dec!(9998), dec!(1), 10);
        let top = seed_order(&store, 2, OrderSide::Buy, dec!(10000), dec!(1), 20);

        let best = store.first_match_candidate("BTCUSDT", OrderSide::Buy, dec!(9990));
        assert_eq!(best, Some(top.id));
    }

    #[test]
    fn test_depth_aggregates_and_orders_levels() {
        let store = store();
        seed_order(&store, 1, OrderSide::Buy, dec!(9999), dec!(1), 1);
        seed_order(&store, 2, OrderSide::Buy, dec!(9999), dec!(0.5), 2);
        seed_order(&store, 3, OrderSide::Buy, dec!(9998), dec!(2), 3);
        seed_order(&store, 4, OrderSide::Sell, dec!(10001), dec!(1), 4);
        seed_order(&store, 5, OrderSide::Sell, dec!(10002), dec!(3), 5);

        let bids = store.depth("BTCUSDT", OrderSide::Buy, 50);
        assert_eq!(bids, vec![(dec!(9999), dec!(1.5)), (dec!(9998), dec!(2))]);

        let asks = store.depth("BTCUSDT", OrderSide::Sell, 1);
        assert_eq!(asks, vec![(dec!(10001), dec!(1))]);
    }

    #[test]
    fn test_row_lock_blocks_second_transaction() {
        let store = Arc::new(store());
        let mut txn = store.begin();
        let mut bal = txn.lock_balance(1, "USDT").unwrap();
        bal.credit(dec!(100));
        txn.update_balance(&bal).unwrap();

        let waiter = {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut txn = store.begin();
                let bal = txn.lock_balance(1, "USDT").unwrap();
                bal.available
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        txn.commit().unwrap();
        // the blocked reader observes the committed value, never the buffer
        assert_eq!(waiter.join().unwrap(), dec!(100));
    }

    #[test]
    fn test_ledger_ids_follow_commit_order() {
        let store = store();
        for i in 0..3 {
            let mut txn = store.begin();
            let mut bal = txn.lock_balance(1, "USDT").unwrap();
            bal.credit(dec!(1));
            txn.update_balance(&bal).unwrap();
            txn.append_ledger(LedgerEntry::new(
                1,
                "USDT",
                dec!(1),
                LedgerKind::Deposit,
                serde_json::json!({}),
                i,
            ))
            .unwrap();
            txn.commit().unwrap();
        }
        let entries = store.ledger(1, 10);
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_trades_by_symbol_newest_first() {
        let store = store();
        for i in 0..4 {
            let mut txn = store.begin();
            txn.insert_trade(Trade::new(
                "BTCUSDT",
                dec!(100) + Decimal::from(i),
                dec!(1),
                1,
                2,
                OrderSide::Buy,
                i,
            ))
            .unwrap();
            txn.commit().unwrap();
        }
        let trades = store.trades_by_symbol("BTCUSDT", 2);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, dec!(103));
        assert_eq!(trades[1].price, dec!(102));
    }
}
