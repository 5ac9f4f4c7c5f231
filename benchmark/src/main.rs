use clap::Parser;
use hdrhistogram::Histogram;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use exchange::engine::entry::{Asset, LedgerKind, Market, OrderSide};
use exchange::engine::events::NullSink;
use exchange::engine::{EngineConfig, Exchange};
use exchange::metrics::TRADE_COUNTER_VEC;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent clients
    #[arg(short, long, default_value = "4")]
    concurrency: usize,

    /// Pause between orders in ms, 0 runs flat out
    #[arg(short, long, default_value = "0")]
    interval: u64,

    /// Duration of the benchmark in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Number of trading accounts
    #[arg(short, long, default_value = "8")]
    users: u64,
}

const SYMBOL: &str = "BTCUSDT";

fn setup_market(users: u64) -> Exchange {
    let exchange = Exchange::new(&EngineConfig::default(), Arc::new(NullSink));
    exchange
        .add_asset(Asset::new("BTC", "Bitcoin", 8))
        .expect("asset");
    exchange
        .add_asset(Asset::new("USDT", "Tether", 2))
        .expect("asset");
    exchange
        .add_market(Market::new(SYMBOL, "BTC", "USDT"))
        .expect("market");
    for user_id in 1..=users {
        exchange
            .credit_initial(user_id, "USDT", dec!(1000000))
            .expect("funding");
        exchange.deposit(user_id, "BTC", dec!(100)).expect("funding");
    }
    exchange
}

fn main() {
    let args = Args::parse();

    let exchange = Arc::new(setup_market(args.users));
    let histogram = Arc::new(Mutex::new(Histogram::<u64>::new(3).unwrap()));
    let total_requests = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    println!(
        "Starting benchmark with {} concurrent clients, {} accounts, target interval: {} ms",
        args.concurrency, args.users, args.interval
    );

    let mut handles = vec![];
    for _ in 0..args.concurrency {
        let exchange = exchange.clone();
        let histogram = histogram.clone();
        let total_requests = total_requests.clone();
        let rejected = rejected.clone();
        let stop = stop.clone();
        let users = args.users;
        let interval = args.interval;

        let handle = std::thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut counter: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                let user_id = rng.gen_range(1..=users);
                let side = if rng.gen_bool(0.5) {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                };
                let price = dec!(9900) + Decimal::from(rng.gen_range(0..200u32));
                let amount = Decimal::new(rng.gen_range(1..50), 3);

                let start = Instant::now();
                match exchange.submit_limit_order(user_id, SYMBOL, side, price, amount) {
                    Ok(_) => {
                        let duration = start.elapsed();
                        let mut hist = histogram.lock().unwrap();
                        hist.record((duration.as_micros() as u64).max(1)).unwrap();
                        total_requests.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }

                counter += 1;
                if counter % 20 == 0 {
                    if let Some(order) = exchange.open_orders(user_id).into_iter().next() {
                        let _ = exchange.cancel_order(user_id, order.id);
                    }
                }
                if interval > 0 {
                    std::thread::sleep(Duration::from_millis(interval));
                }
            }
        });

        handles.push(handle);
    }

    std::thread::sleep(Duration::from_secs(args.duration));
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }

    let total = total_requests.load(Ordering::Relaxed);
    let hist = histogram.lock().unwrap();
    let trades = TRADE_COUNTER_VEC.with_label_values(&[SYMBOL]).get();

    println!("\nBenchmark Results:");
    println!("Total Orders: {}", total);
    println!("Rejected Orders: {}", rejected.load(Ordering::Relaxed));
    println!("Executed Trades: {}", trades);
    println!("Average TPS: {:.2}", total as f64 / args.duration as f64);
    println!("\nLatency Distribution (microseconds):");
    println!("p50: {}", hist.value_at_percentile(50.0));
    println!("p90: {}", hist.value_at_percentile(90.0));
    println!("p95: {}", hist.value_at_percentile(95.0));
    println!("p99: {}", hist.value_at_percentile(99.0));
    println!("p99.9: {}", hist.value_at_percentile(99.9));

    audit_ledger(&exchange, args.users);
}

/// Closes every open order, then checks each balance against the sum of
/// its ledger deltas. Both sides of every trade and every reservation
/// must have landed in the ledger for this to come out even.
fn audit_ledger(exchange: &Exchange, users: u64) {
    for user_id in 1..=users {
        for order in exchange.open_orders(user_id) {
            let _ = exchange.cancel_order(user_id, order.id);
        }
    }

    let mut clean = true;
    for user_id in 1..=users {
        for balance in exchange.balances(user_id) {
            let expected: Decimal = exchange
                .ledger(user_id, usize::MAX)
                .iter()
                .filter(|e| e.asset == balance.asset && e.kind != LedgerKind::Fee)
                .map(|e| e.delta)
                .sum();
            if balance.total() != expected {
                println!(
                    "Ledger mismatch: user {} {} holds {} but ledger sums to {}",
                    user_id,
                    balance.asset,
                    balance.total(),
                    expected
                );
                clean = false;
            }
        }
    }
    println!(
        "\nLedger audit: {}",
        if clean { "OK" } else { "FAILED" }
    );
}
