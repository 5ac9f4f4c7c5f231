use crate::config;
use crate::engine::entry::{Asset, Market, OrderSide};
use crate::engine::events::LogSink;
use crate::engine::spot::wallet::INITIAL_QUOTE_BALANCE;
use crate::engine::{EngineConfig, Exchange};
use crate::metrics;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use once_cell::sync::OnceCell;
use prometheus::{Encoder, TextEncoder};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Mutex;

static INSTANCE: OnceCell<Mutex<Server>> = OnceCell::new();
pub fn instance() -> &'static Mutex<Server> {
    INSTANCE.get_or_init(|| Mutex::new(Server::builder()))
}

pub struct Server {
    pub(crate) exchange: Arc<Exchange>,
}

impl Server {
    fn builder() -> Self {
        let cfg = config::instance().lock().unwrap().clone();
        let engine_config = EngineConfig {
            fee_rate: cfg.engine.fee_rate,
            lock_wait_ms: cfg.engine.lock_wait_ms,
            match_retries: cfg.engine.match_retries,
            book_depth: cfg.engine.book_depth,
        };
        let exchange = Arc::new(Exchange::new(&engine_config, Arc::new(LogSink)));
        Server { exchange }
    }

    pub async fn start(&mut self) {
        self.start_metrics_server().await;
        self.seed_data().await;
        self.demo_data().await;
    }

    pub fn stop(&mut self) {
        log::info!("server stop");
    }

    async fn start_metrics_server(&mut self) {
        let addr = config::instance()
            .lock()
            .unwrap()
            .metrics_addr
            .as_str()
            .parse()
            .unwrap();
        let make_svc = make_service_fn(move |_| {
            let registry = metrics::REGISTRY_INSTANCE.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |_: Request<Body>| {
                    let registry = registry.clone();
                    async move {
                        let encoder = TextEncoder::new();
                        let metric_families = registry.gather();
                        let mut buffer = Vec::new();
                        encoder.encode(&metric_families, &mut buffer).unwrap();
                        Ok::<_, hyper::Error>(Response::new(Body::from(buffer)))
                    }
                }))
            }
        });
        metrics::init_registry();
        let server = hyper::Server::bind(&addr).serve(make_svc);
        tokio::spawn(async move {
            tokio::pin!(server);
            server.await.unwrap()
        });
        log::info!("metrics server started on {}", addr);
    }

    /// Registers configured assets and markets and funds the demo accounts
    async fn seed_data(&mut self) {
        let cfg = config::instance().lock().unwrap().clone();
        for a in &cfg.assets {
            if let Err(e) = self
                .exchange
                .add_asset(Asset::new(&a.code, &a.name, a.precision))
            {
                log::warn!("asset {} not registered: {}", a.code, e);
            }
        }
        for m in &cfg.markets {
            if let Err(e) = self
                .exchange
                .add_market(Market::new(&m.symbol, &m.base, &m.quote))
            {
                log::warn!("market {} not registered: {}", m.symbol, e);
            }
        }

        let mut quotes: Vec<&str> = cfg.markets.iter().map(|m| m.quote.as_str()).collect();
        quotes.sort_unstable();
        quotes.dedup();
        let mut bases: Vec<&str> = cfg.markets.iter().map(|m| m.base.as_str()).collect();
        bases.sort_unstable();
        bases.dedup();
        for user_id in 1..=cfg.demo_users {
            for quote in &quotes {
                if let Err(e) = self
                    .exchange
                    .credit_initial(user_id, quote, INITIAL_QUOTE_BALANCE)
                {
                    log::warn!("user {} not funded in {}: {}", user_id, quote, e);
                }
            }
            for base in &bases {
                if let Err(e) = self.exchange.deposit(user_id, base, dec!(10)) {
                    log::warn!("user {} not funded in {}: {}", user_id, base, e);
                }
            }
        }
        log::info!(
            "seeded {} users across {} markets",
            cfg.demo_users,
            cfg.markets.len()
        );
    }

    /// Feeds the engine a stream of random orders so a bare deployment
    /// has live books, trades and metrics to look at
    async fn demo_data(&self) {
        let cfg = config::instance().lock().unwrap().clone();
        if !cfg.demo || cfg.markets.is_empty() {
            return;
        }

        let exchange = self.exchange.clone();
        let users = cfg.demo_users.max(2);
        let symbols: Vec<String> = cfg.markets.iter().map(|m| m.symbol.clone()).collect();
        let interval = cfg.demo_interval_ms;
        tokio::spawn(async move {
            let mut counter: u64 = 0;
            loop {
                let (user_id, symbol, side, price, amount) = {
                    let mut rng = rand::thread_rng();
                    let user_id = rng.gen_range(1..=users);
                    let symbol = symbols[rng.gen_range(0..symbols.len())].clone();
                    let side = if rng.gen_bool(0.5) {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    };
                    let price = dec!(9900) + Decimal::from(rng.gen_range(0..200u32));
                    let amount = Decimal::new(rng.gen_range(1..50), 2);
                    (user_id, symbol, side, price, amount)
                };
                match exchange.submit_limit_order(user_id, &symbol, side, price, amount) {
                    Ok(order) => log::info!(
                        "demo order {}: user {} {} {:?} {}@{} -> {:?}",
                        counter,
                        user_id,
                        symbol,
                        side,
                        amount,
                        price,
                        order.status
                    ),
                    Err(e) => log::warn!("demo order rejected: {}", e),
                }
                counter += 1;
                if counter % 10 == 0 {
                    if let Some(order) = exchange.open_orders(user_id).into_iter().next() {
                        let _ = exchange.cancel_order(user_id, order.id);
                    }
                }
                tokio::time::sleep(tokio::time::Duration::from_millis(interval)).await;
            }
        });
    }
}
