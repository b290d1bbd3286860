//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::Money;
use messaging::{ConsumerConfig, DispatcherConfig, RetryPolicy};
use orders::InMemoryProductCatalog;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `ORDERS_DATABASE_URL`, `PAYMENTS_DATABASE_URL`: PostgreSQL for both
///   services when both are set, in-memory stores otherwise
/// - `DISPATCH_INTERVAL_MS`, `DISPATCH_BATCH_SIZE`: outbox dispatcher tuning
/// - `CONSUMER_LANES`, `CONSUMER_MAX_ATTEMPTS`: consumer tuning (no attempt limit when unset)
/// - `CATALOG_PRODUCTS`: `SKU=cents` pairs separated by commas
///
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub orders_database_url: Option<String>,
    pub payments_database_url: Option<String>,
    pub dispatch_interval: Duration,
    pub dispatch_batch_size: usize,
    pub consumer_lanes: usize,
    /// Unset retries transient failures until shutdown.
    pub consumer_max_attempts: Option<u32>,
    pub catalog: Vec<(String, Money)>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses `SKU-001=1000,SKU-002=250`. Malformed pairs are skipped.
fn parse_catalog(value: &str) -> Vec<(String, Money)> {
    value
        .split(',')
        .filter_map(|pair| {
            let (sku, cents) = pair.split_once('=')?;
            let cents: i64 = cents.trim().parse().ok()?;
            let sku = sku.trim();
            (!sku.is_empty() && cents >= 0).then(|| (sku.to_string(), Money::from_cents(cents)))
        })
        .collect()
}

fn default_catalog() -> Vec<(String, Money)> {
    vec![
        ("SKU-001".to_string(), Money::from_cents(1000)),
        ("SKU-002".to_string(), Money::from_cents(250)),
        ("SKU-003".to_string(), Money::from_cents(4999)),
    ]
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            orders_database_url: std::env::var("ORDERS_DATABASE_URL").ok(),
            payments_database_url: std::env::var("PAYMENTS_DATABASE_URL").ok(),
            dispatch_interval: Duration::from_millis(env_or(
                "DISPATCH_INTERVAL_MS",
                defaults.dispatch_interval.as_millis() as u64,
            )),
            dispatch_batch_size: env_or("DISPATCH_BATCH_SIZE", defaults.dispatch_batch_size),
            consumer_lanes: env_or("CONSUMER_LANES", defaults.consumer_lanes),
            consumer_max_attempts: std::env::var("CONSUMER_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(defaults.consumer_max_attempts),
            catalog: std::env::var("CATALOG_PRODUCTS")
                .map(|v| parse_catalog(&v))
                .unwrap_or(defaults.catalog),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Both database URLs, if PostgreSQL is configured for both services.
    pub fn database_urls(&self) -> Option<(&str, &str)> {
        match (&self.orders_database_url, &self.payments_database_url) {
            (Some(orders), Some(payments)) => Some((orders, payments)),
            _ => None,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.dispatch_batch_size.max(1),
            poll_interval: self.dispatch_interval,
            ..DispatcherConfig::default()
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            lanes: self.consumer_lanes.max(1),
            retry: RetryPolicy {
                max_attempts: self.consumer_max_attempts.map(|n| n.max(1)),
                ..RetryPolicy::default()
            },
            ..ConsumerConfig::default()
        }
    }

    /// Builds the product catalog the order service prices against.
    pub fn product_catalog(&self) -> InMemoryProductCatalog {
        InMemoryProductCatalog::with_products(self.catalog.iter().cloned())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            orders_database_url: None,
            payments_database_url: None,
            dispatch_interval: Duration::from_millis(500),
            dispatch_batch_size: 100,
            consumer_lanes: 4,
            consumer_max_attempts: None,
            catalog: default_catalog(),
        }
    }
}
