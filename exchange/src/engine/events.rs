//! Outward Event Stream
//!
//! The engine pushes one event per occurrence to an `EventSink`; the
//! real-time fan-out layer consuming them is out of scope. Payload shapes
//! and names are part of the external contract, with decimal values
//! rendered as strings.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::engine::entry::{Balance, Order, OrderSide};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeed {
    pub symbol: String,
    pub price: String,
    pub amount: String,
    pub taker_side: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickerFeed {
    pub symbol: String,
    pub price: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookFeed {
    pub symbol: String,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFeed {
    pub order_id: u64,
    pub status: String,
    pub filled_amount: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceFeed {
    pub asset: String,
    pub available: String,
    pub locked: String,
}

#[derive(Debug, Clone)]
pub enum Event {
    TradeNew(TradeFeed),
    TickerUpdate(TickerFeed),
    OrderbookUpdate(BookFeed),
    OrderUpdate { user_id: u64, feed: OrderFeed },
    BalanceUpdate { user_id: u64, feed: BalanceFeed },
}

impl Event {
    pub fn trade_new(
        symbol: &str,
        price: Decimal,
        amount: Decimal,
        taker_side: OrderSide,
        ts: i64,
    ) -> Event {
        Event::TradeNew(TradeFeed {
            symbol: symbol.to_string(),
            price: price.to_string(),
            amount: amount.to_string(),
            taker_side: taker_side.as_str().to_string(),
            ts,
        })
    }

    pub fn ticker(symbol: &str, price: Decimal, ts: i64) -> Event {
        Event::TickerUpdate(TickerFeed {
            symbol: symbol.to_string(),
            price: price.to_string(),
            ts,
        })
    }

    pub fn orderbook(
        symbol: &str,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
        ts: i64,
    ) -> Event {
        let render = |levels: Vec<(Decimal, Decimal)>| {
            levels
                .into_iter()
                .map(|(price, qty)| (price.to_string(), qty.to_string()))
                .collect()
        };
        Event::OrderbookUpdate(BookFeed {
            symbol: symbol.to_string(),
            bids: render(bids),
            asks: render(asks),
            ts,
        })
    }

    pub fn order_update(order: &Order) -> Event {
        Event::OrderUpdate {
            user_id: order.user_id,
            feed: OrderFeed {
                order_id: order.id,
                status: order.status.as_str().to_string(),
                filled_amount: order.filled_amount.to_string(),
            },
        }
    }

    pub fn balance_update(balance: &Balance) -> Event {
        Event::BalanceUpdate {
            user_id: balance.user_id,
            feed: BalanceFeed {
                asset: balance.asset.clone(),
                available: balance.available.to_string(),
                locked: balance.locked.to_string(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::TradeNew(_) => "trade:new",
            Event::TickerUpdate(_) => "ticker:update",
            Event::OrderbookUpdate(_) => "orderbook:update",
            Event::OrderUpdate { .. } => "order:update",
            Event::BalanceUpdate { .. } => "balance:update",
        }
    }

    /// User the event is addressed to; `None` for market-wide broadcasts
    pub fn user_id(&self) -> Option<u64> {
        match self {
            Event::OrderUpdate { user_id, .. } | Event::BalanceUpdate { user_id, .. } => {
                Some(*user_id)
            }
            _ => None,
        }
    }

    pub fn payload(&self) -> Value {
        let value = match self {
            Event::TradeNew(feed) => serde_json::to_value(feed),
            Event::TickerUpdate(feed) => serde_json::to_value(feed),
            Event::OrderbookUpdate(feed) => serde_json::to_value(feed),
            Event::OrderUpdate { feed, .. } => serde_json::to_value(feed),
            Event::BalanceUpdate { feed, .. } => serde_json::to_value(feed),
        };
        value.unwrap_or(Value::Null)
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Logs every event at debug level
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: Event) {
        log::debug!("event {} {}", event.name(), event.payload());
    }
}

/// Forwards events to a channel consumed elsewhere
pub struct ChannelSink {
    tx: std::sync::mpsc::Sender<Event>,
}

impl ChannelSink {
    pub fn new(tx: std::sync::mpsc::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Discards events; used by load generators
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_feed_field_names() {
        let event = Event::trade_new("BTCUSDT", dec!(10000), dec!(0.5), OrderSide::Buy, 42);
        assert_eq!(event.name(), "trade:new");
        let payload = event.payload();
        assert_eq!(payload["symbol"], "BTCUSDT");
        assert_eq!(payload["price"], "10000");
        assert_eq!(payload["amount"], "0.5");
        assert_eq!(payload["takerSide"], "buy");
        assert_eq!(payload["ts"], 42);
    }

    #[test]
    fn test_orderbook_pairs_render_as_strings() {
        let event = Event::orderbook(
            "BTCUSDT",
            vec![(dec!(9999), dec!(1.5))],
            vec![(dec!(10001), dec!(2))],
            7,
        );
        let payload = event.payload();
        assert_eq!(payload["bids"][0][0], "9999");
        assert_eq!(payload["bids"][0][1], "1.5");
        assert_eq!(payload["asks"][0][0], "10001");
    }

    #[test]
    fn test_order_update_addressing() {
        let mut order = crate::engine::entry::Order::new(
            9,
            "BTCUSDT",
            OrderSide::Sell,
            dec!(100),
            dec!(1),
            0,
        );
        order.id = 77;
        let event = Event::order_update(&order);
        assert_eq!(event.user_id(), Some(9));
        let payload = event.payload();
        assert_eq!(payload["orderId"], 77);
        assert_eq!(payload["status"], "open");
        assert_eq!(payload["filledAmount"], "0");
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.publish(Event::ticker("BTCUSDT", dec!(10000), 1));
        let got = rx.recv().unwrap();
        assert_eq!(got.name(), "ticker:update");
    }
}
