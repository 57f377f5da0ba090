//! Binance REST client (USD-M futures and spot) for closed-order polling and
//! order placement.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::try_join_all;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::models::{Order, OrderSide, OrderSnapshot, OrderSpec, OrderStatus, OrderType};

use super::{with_retry, ClientSettings, Credentials, ExchangeClient, ExchangeError, RetryPolicy};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

/// Which Binance order API a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    UsdmFutures,
    Spot,
}

impl BinanceMarket {
    fn base_url(&self, testnet: bool) -> &'static str {
        match (self, testnet) {
            (BinanceMarket::UsdmFutures, false) => "https://fapi.binance.com",
            (BinanceMarket::UsdmFutures, true) => "https://testnet.binancefuture.com",
            (BinanceMarket::Spot, false) => "https://api.binance.com",
            (BinanceMarket::Spot, true) => "https://testnet.binance.vision",
        }
    }

    fn all_orders_path(&self) -> &'static str {
        match self {
            BinanceMarket::UsdmFutures => "/fapi/v1/allOrders",
            BinanceMarket::Spot => "/api/v3/allOrders",
        }
    }

    fn order_path(&self) -> &'static str {
        match self {
            BinanceMarket::UsdmFutures => "/fapi/v1/order",
            BinanceMarket::Spot => "/api/v3/order",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BinanceMarket::UsdmFutures => "binance-futures",
            BinanceMarket::Spot => "binance-spot",
        }
    }
}

/// Order as returned by `allOrders` and `order` on both markets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrder {
    symbol: String,
    order_id: u64,
    client_order_id: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    orig_qty: String,
    #[serde(default)]
    executed_qty: String,
    /// Futures only
    #[serde(default)]
    avg_price: Option<String>,
    /// Spot only
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    transact_time: Option<i64>,
}

/// Error body: `{"code": -2010, "msg": "..."}`.
#[derive(Debug, Deserialize)]
struct BinanceApiError {
    code: i64,
    msg: String,
}

/// Authenticated Binance client bound to one account.
pub struct BinanceClient {
    http: Client,
    market: BinanceMarket,
    base_url: String,
    credentials: Credentials,
    account_id: String,
    retry: RetryPolicy,
    fetch_limit: u32,
    symbols: Vec<String>,
}

impl BinanceClient {
    /// Create a new client. Orders are listed per watched symbol; Binance
    /// requires a symbol on `allOrders`.
    pub fn new(
        market: BinanceMarket,
        credentials: Credentials,
        settings: &ClientSettings,
    ) -> Result<Self> {
        if settings.symbols.is_empty() {
            bail!("At least one symbol to watch is required for {}", market.label());
        }

        let http = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.request_timeout.min(Duration::from_secs(5)))
            .build()
            .context("Failed to create HTTP client")?;

        let account_id = format!("{}:{}", market.label(), credentials.fingerprint());

        Ok(Self {
            http,
            market,
            base_url: market.base_url(settings.testnet).to_string(),
            credentials,
            account_id,
            retry: settings.retry.clone(),
            fetch_limit: settings.fetch_limit.clamp(1, 1000),
            symbols: settings.symbols.clone(),
        })
    }

    /// Sign a query string and return the hex-encoded HMAC-SHA256.
    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let secret = self.credentials.api_secret().expose_secret();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        parts.push(format!("recvWindow={}", RECV_WINDOW_MS));
        parts.push(format!("timestamp={}", Utc::now().timestamp_millis()));

        let query = parts.join("&");
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params)?);

        debug!(method = %method, path = path, account = %self.account_id, "Binance request");

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;

        if !content_type.contains("json") {
            if status.is_success() || status.is_server_error() {
                return Err(ExchangeError::UnexpectedContentType {
                    status: status.as_u16(),
                    content_type,
                });
            }
            return Err(ExchangeError::from_status(status, &body));
        }

        if !status.is_success() {
            return Err(match serde_json::from_str::<BinanceApiError>(&body) {
                Ok(err) => classify_api_error(err.code, err.msg),
                Err(_) => ExchangeError::from_status(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    async fn fetch_symbol_orders(&self, symbol: &str) -> Result<Vec<BinanceOrder>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("limit", self.fetch_limit.to_string()),
        ];
        let params = &params;
        let path = self.market.all_orders_path();
        with_retry(&self.retry, "allOrders", move || {
            self.signed_request(Method::GET, path, params)
        })
        .await
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn list_closed_orders(&self) -> Result<OrderSnapshot, ExchangeError> {
        let batches = try_join_all(self.symbols.iter().map(|s| self.fetch_symbol_orders(s))).await?;

        let snapshot: OrderSnapshot = batches
            .into_iter()
            .flatten()
            .filter_map(to_order)
            .filter(Order::is_closed)
            .collect();

        debug!(
            account = %self.account_id,
            closed = snapshot.len(),
            "Fetched closed orders"
        );

        Ok(snapshot)
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<Order, ExchangeError> {
        let mut params = vec![
            ("symbol", spec.symbol.clone()),
            ("side", spec.side.as_str().to_string()),
            ("type", spec.order_type.as_str().to_string()),
            ("quantity", spec.quantity.normalize().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if let Some(price) = spec.price {
            params.push(("price", price.normalize().to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if let Some(id) = &spec.client_order_id {
            params.push(("newClientOrderId", id.clone()));
        }

        let placed: BinanceOrder = self
            .signed_request(Method::POST, self.market.order_path(), &params)
            .await?;

        to_order(placed).ok_or_else(|| {
            ExchangeError::Parse("Order response has an unknown side".to_string())
        })
    }
}

/// Map a venue order into the shared model.
///
/// Orders with an unknown side are dropped; an unparseable quantity is kept
/// as `None` so the order still takes part in diffing.
fn to_order(raw: BinanceOrder) -> Option<Order> {
    let Some(side) = OrderSide::parse(&raw.side) else {
        warn!(order_id = raw.order_id, side = %raw.side, "Unknown order side");
        return None;
    };

    let executed = parse_decimal(&raw.executed_qty);
    let quantity = match executed {
        Some(q) if q > Decimal::ZERO => Some(q),
        _ => parse_decimal(&raw.orig_qty),
    };
    if quantity.is_none() {
        warn!(
            order_id = raw.order_id,
            orig_qty = %raw.orig_qty,
            executed_qty = %raw.executed_qty,
            "Unparseable order quantity"
        );
    }

    let average_price = raw
        .avg_price
        .as_deref()
        .and_then(parse_decimal)
        .or_else(|| {
            let quote = raw.cummulative_quote_qty.as_deref().and_then(parse_decimal)?;
            let qty = executed.filter(|q| !q.is_zero())?;
            Some(quote / qty)
        })
        .filter(|p| *p > Decimal::ZERO);
    let price = parse_decimal(&raw.price).filter(|p| *p > Decimal::ZERO);

    let status = match raw.status.as_str() {
        "FILLED" => OrderStatus::Closed,
        "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => OrderStatus::Open,
        _ => OrderStatus::Canceled,
    };

    let updated_at = raw
        .update_time
        .or(raw.transact_time)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Some(Order {
        id: raw.client_order_id,
        client_order_id: None,
        symbol: raw.symbol,
        side,
        order_type: OrderType::parse(&raw.order_type),
        quantity,
        price,
        average_price,
        status,
        updated_at,
    })
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    s.trim().parse::<Decimal>().ok()
}

/// Classify a Binance error code.
fn classify_api_error(code: i64, message: String) -> ExchangeError {
    match code {
        // Disconnected, too many requests, backend timeout, server busy
        -1000 | -1001 | -1003 | -1007 | -1008 | -1015 | -1016 => {
            ExchangeError::Unavailable(format!("{}: {}", code, message))
        }
        -2010 | -2018 | -2019 => ExchangeError::InsufficientBalance(message),
        -1002 | -1021 | -1022 | -2014 | -2015 => ExchangeError::Auth(message),
        -1013 | -1102..=-1100 | -1106 | -1111 | -1112 | -1116 | -1117 | -2027 | -4003
        | -4164 => ExchangeError::Rejected(message),
        _ => ExchangeError::Api { code, message },
    }
}
