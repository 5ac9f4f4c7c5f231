use log::warn;
use once_cell::sync::OnceCell;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_derive::Deserialize;
use std::sync::Mutex;

static INSTANCE: OnceCell<Mutex<RuntimeConfig>> = OnceCell::new();

pub fn instance() -> &'static Mutex<RuntimeConfig> {
    INSTANCE.get_or_init(|| Mutex::new(RuntimeConfig::new()))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetConfig {
    pub code: String,
    pub name: String,
    pub precision: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    pub symbol: String,
    pub base: String,
    pub quote: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    pub fee_rate: Decimal,
    pub lock_wait_ms: u64,
    pub match_retries: u32,
    pub book_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    pub metrics_addr: String,
    pub demo: bool,
    pub demo_users: u64,
    pub demo_interval_ms: u64,
    pub engine: EngineSection,
    pub assets: Vec<AssetConfig>,
    pub markets: Vec<MarketConfig>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig {
            metrics_addr: "0.0.0.0:4010".to_string(),
            demo: false,
            demo_users: 4,
            demo_interval_ms: 1000,
            engine: EngineSection {
                fee_rate: dec!(0.001),
                lock_wait_ms: 500,
                match_retries: 3,
                book_depth: 50,
            },
            assets: Vec::new(),
            markets: Vec::new(),
        }
    }

    pub fn from_toml(path: &str) -> Option<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file, {:?}",
                    e
                );
                return Some(RuntimeConfig::new());
            }
        };
        let config: RuntimeConfig = match toml::from_str(&contents) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file, {:?}",
                    e
                );
                return Some(RuntimeConfig::new());
            }
        };
        instance().lock().unwrap().clone_from(&config);
        Some(config)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
