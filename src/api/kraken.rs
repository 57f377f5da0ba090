//! Kraken spot REST client for closed-order polling and order placement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, warn};

use crate::models::{Order, OrderSide, OrderSnapshot, OrderSpec, OrderStatus, OrderType};

use super::{with_retry, ClientSettings, Credentials, ExchangeClient, ExchangeError, RetryPolicy};

type HmacSha512 = Hmac<Sha512>;

const BASE_URL: &str = "https://api.kraken.com";
const CLOSED_ORDERS_PATH: &str = "/0/private/ClosedOrders";
const ADD_ORDER_PATH: &str = "/0/private/AddOrder";

/// Every private response: `{"error": [...], "result": {...}}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ClosedOrdersResult {
    #[serde(default)]
    closed: HashMap<String, KrakenOrder>,
}

#[derive(Debug, Deserialize)]
struct KrakenOrder {
    status: String,
    #[serde(default)]
    cl_ord_id: Option<String>,
    #[serde(default)]
    closetm: Option<f64>,
    descr: KrakenOrderDescr,
    #[serde(default)]
    vol: String,
    #[serde(default)]
    vol_exec: String,
    /// Average fill price
    #[serde(default)]
    price: String,
}

#[derive(Debug, Deserialize)]
struct KrakenOrderDescr {
    pair: String,
    #[serde(rename = "type")]
    side: String,
    ordertype: String,
    /// Limit price; "0" for market orders
    #[serde(default)]
    price: String,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    txid: Vec<String>,
}

/// Authenticated Kraken client bound to one account.
pub struct KrakenClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
    account_id: String,
    retry: RetryPolicy,
    /// Pairs to keep; empty keeps every pair
    pairs: Vec<String>,
    last_nonce: AtomicU64,
}

impl KrakenClient {
    pub fn new(credentials: Credentials, settings: &ClientSettings) -> Result<Self> {
        if settings.testnet {
            bail!("Kraken has no spot testnet");
        }
        STANDARD
            .decode(credentials.api_secret().expose_secret())
            .context("Kraken API secret is not valid base64")?;

        let http = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.request_timeout.min(Duration::from_secs(5)))
            .build()
            .context("Failed to create HTTP client")?;

        let account_id = format!("kraken:{}", credentials.fingerprint());

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            credentials,
            account_id,
            retry: settings.retry.clone(),
            pairs: settings.symbols.clone(),
            last_nonce: AtomicU64::new(0),
        })
    }

    /// Millisecond nonce, strictly increasing across concurrent requests.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// `API-Sign`: base64(HMAC-SHA512(path + SHA256(nonce + body), secret)).
    fn sign(&self, path: &str, nonce: u64, body: &str) -> Result<String, ExchangeError> {
        let secret = STANDARD
            .decode(self.credentials.api_secret().expose_secret())
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;

        let digest = Sha256::new()
            .chain_update(nonce.to_string())
            .chain_update(body)
            .finalize();

        let mut mac =
            HmacSha512::new_from_slice(&secret).map_err(|e| ExchangeError::Auth(e.to_string()))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn private_request<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let nonce = self.next_nonce();
        let body = form_body(nonce, &params);
        let signature = self.sign(path, nonce, &body)?;

        debug!(path = path, account = %self.account_id, "Kraken request");

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
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

        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => unwrap_envelope(envelope),
            Err(_) if !status.is_success() => Err(ExchangeError::from_status(status, &body)),
            Err(e) => Err(ExchangeError::Parse(e.to_string())),
        }
    }

    fn watches(&self, pair: &str) -> bool {
        self.pairs.is_empty() || self.pairs.iter().any(|p| p.eq_ignore_ascii_case(pair))
    }
}

#[async_trait]
impl ExchangeClient for KrakenClient {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn list_closed_orders(&self) -> Result<OrderSnapshot, ExchangeError> {
        let result: ClosedOrdersResult = with_retry(&self.retry, "ClosedOrders", || {
            self.private_request(CLOSED_ORDERS_PATH, Vec::new())
        })
        .await?;

        let snapshot: OrderSnapshot = result
            .closed
            .into_iter()
            .filter_map(|(txid, raw)| to_order(txid, raw))
            .filter(|o| o.is_closed() && self.watches(&o.symbol))
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
            ("ordertype", spec.order_type.as_str().to_lowercase()),
            ("pair", spec.symbol.clone()),
            ("type", spec.side.as_str().to_lowercase()),
            ("volume", spec.quantity.normalize().to_string()),
        ];
        if let Some(price) = spec.price {
            params.push(("price", price.normalize().to_string()));
        }
        if let Some(id) = &spec.client_order_id {
            params.push(("cl_ord_id", id.clone()));
        }

        let placed: AddOrderResult = self.private_request(ADD_ORDER_PATH, params).await?;
        placed_order(spec, placed)
    }
}

/// `nonce` first, then the parameters in the given order.
fn form_body(nonce: u64, params: &[(&str, String)]) -> String {
    std::iter::once(format!("nonce={}", nonce))
        .chain(params.iter().map(|(k, v)| format!("{}={}", k, v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, ExchangeError> {
    if let Some(first) = envelope.error.into_iter().next() {
        return Err(classify_api_error(first));
    }
    envelope
        .result
        .ok_or_else(|| ExchangeError::Parse("Response has neither error nor result".to_string()))
}

/// Map a closed-orders entry into the shared model. Orders with an unknown
/// side are dropped.
fn to_order(txid: String, raw: KrakenOrder) -> Option<Order> {
    let Some(side) = OrderSide::parse(&raw.descr.side) else {
        warn!(order_id = %txid, side = %raw.descr.side, "Unknown order side");
        return None;
    };

    let executed = parse_decimal(&raw.vol_exec);
    let quantity = match executed {
        Some(q) if q > Decimal::ZERO => Some(q),
        _ => parse_decimal(&raw.vol),
    };
    if quantity.is_none() {
        warn!(order_id = %txid, vol = %raw.vol, vol_exec = %raw.vol_exec, "Unparseable order quantity");
    }

    let status = match raw.status.as_str() {
        "closed" => OrderStatus::Closed,
        "pending" | "open" => OrderStatus::Open,
        _ => OrderStatus::Canceled,
    };

    let updated_at = raw
        .closetm
        .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single());

    Some(Order {
        id: txid,
        client_order_id: raw.cl_ord_id.filter(|id| !id.is_empty()),
        symbol: raw.descr.pair,
        side,
        order_type: OrderType::parse(&raw.descr.ordertype),
        quantity,
        price: parse_decimal(&raw.descr.price).filter(|p| *p > Decimal::ZERO),
        average_price: parse_decimal(&raw.price).filter(|p| *p > Decimal::ZERO),
        status,
        updated_at,
    })
}

fn placed_order(spec: &OrderSpec, placed: AddOrderResult) -> Result<Order, ExchangeError> {
    let Some(txid) = placed.txid.into_iter().next() else {
        return Err(ExchangeError::Parse("AddOrder returned no txid".to_string()));
    };

    Ok(Order {
        id: txid,
        client_order_id: spec.client_order_id.clone(),
        symbol: spec.symbol.clone(),
        side: spec.side,
        order_type: spec.order_type.clone(),
        quantity: Some(spec.quantity),
        price: spec.price,
        average_price: None,
        status: OrderStatus::Open,
        updated_at: None,
    })
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    s.trim().parse::<Decimal>().ok()
}

/// Classify a Kraken error string (`"<category>:<message>"`).
fn classify_api_error(error: String) -> ExchangeError {
    match error.as_str() {
        "EService:Unavailable"
        | "EService:Busy"
        | "EGeneral:Internal error"
        | "EAPI:Rate limit exceeded" => ExchangeError::Unavailable(error),
        "EAPI:Invalid key" | "EAPI:Invalid signature" | "EAPI:Invalid nonce" => {
            ExchangeError::Auth(error)
        }
        "EOrder:Insufficient funds" => ExchangeError::InsufficientBalance(error),
        "EOrder:Order minimum not met" | "EGeneral:Invalid arguments" => {
            ExchangeError::Rejected(error)
        }
        _ => ExchangeError::Api {
            code: 0,
            message: error,
        },
    }
}
