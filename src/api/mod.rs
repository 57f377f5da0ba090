//! Exchange clients: the venue-independent trait the replication pipeline
//! talks to, and the Binance and Kraken REST implementations.

mod binance;
mod error;
mod kraken;
mod retry;
#[cfg(test)]
pub mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use secrecy::SecretString;

use crate::models::{Order, OrderSnapshot, OrderSpec};

pub use binance::{BinanceClient, BinanceMarket};
pub use error::ExchangeError;
pub use kraken::KrakenClient;
pub use retry::{with_retry, RetryPolicy};

/// One trading account on one venue.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Stable identifier of the account behind this client; two clients for
    /// the same account report the same value.
    fn account_id(&self) -> &str;

    /// Most recent closed orders of the account, keyed by order id.
    ///
    /// Transient failures are retried internally under the client's
    /// [`RetryPolicy`]; anything else is returned immediately.
    async fn list_closed_orders(&self) -> Result<OrderSnapshot, ExchangeError>;

    /// Submit an order. Never retried.
    async fn place_order(&self, spec: &OrderSpec) -> Result<Order, ExchangeError>;
}

/// Supported trading venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Venue {
    /// Binance USD-M perpetual futures
    BinanceFutures,
    /// Binance spot
    BinanceSpot,
    /// Kraken spot
    Kraken,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::BinanceFutures => write!(f, "binance-futures"),
            Venue::BinanceSpot => write!(f, "binance-spot"),
            Venue::Kraken => write!(f, "kraken"),
        }
    }
}

impl Venue {
    /// Binance lists orders per symbol, so at least one must be watched.
    pub fn requires_symbols(&self) -> bool {
        !matches!(self, Venue::Kraken)
    }
}

/// API key pair for one account. The secret is only exposed to request
/// signing.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: SecretString,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into().trim().to_string();
        let api_secret = api_secret.into().trim().to_string();
        if api_key.is_empty() || api_secret.is_empty() {
            bail!("API key and secret must both be non-empty");
        }
        Ok(Self {
            api_key,
            api_secret: SecretString::from(api_secret),
        })
    }

    pub fn api_secret(&self) -> &SecretString {
        &self.api_secret
    }

    /// Short, non-secret key prefix used to tell accounts apart in logs.
    pub fn fingerprint(&self) -> String {
        self.api_key.chars().take(8).collect()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &format!("{}...", self.fingerprint()))
            .field("api_secret", &"***")
            .finish()
    }
}

/// Transport settings shared by every client of one process.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub testnet: bool,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// How many recent orders to fetch per poll and symbol
    pub fetch_limit: u32,
    /// Instruments whose orders are polled; Kraken polls every pair when empty
    pub symbols: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            testnet: false,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            fetch_limit: 20,
            symbols: Vec::new(),
        }
    }
}

/// Build a client for `venue`.
pub fn connect(
    venue: Venue,
    credentials: Credentials,
    settings: &ClientSettings,
) -> Result<Arc<dyn ExchangeClient>> {
    let client: Arc<dyn ExchangeClient> = match venue {
        Venue::BinanceFutures => Arc::new(BinanceClient::new(
            BinanceMarket::UsdmFutures,
            credentials,
            settings,
        )?),
        Venue::BinanceSpot => Arc::new(BinanceClient::new(BinanceMarket::Spot, credentials, settings)?),
        Venue::Kraken => Arc::new(KrakenClient::new(credentials, settings)?),
    };
    Ok(client)
}
