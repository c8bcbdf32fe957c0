//! Kraken private REST client.
//!
//! Implements the hedge-venue contract over Kraken's authenticated
//! endpoints: AddOrder, QueryOrders, CancelOrder. Requests are signed
//! with the API-Sign scheme (HMAC-SHA512 over path ∥ SHA256(nonce ∥
//! postdata), base64-decoded secret). Transport errors retry with
//! exponential backoff; venue-reported errors fail immediately.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::KrakenConfig;
use crate::engine::hedge::{
    AddOrderRequest, HedgeOrderInfo, HedgeOrderStatus, HedgeOrderType, HedgeVenue,
};
use crate::models::Side;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 250;

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KrakenOrder {
    status: String,
    vol_exec: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct CancelOrderResult {
    count: u32,
}

pub struct KrakenClient {
    http: Client,
    config: KrakenConfig,
}

impl KrakenClient {
    pub fn new(config: KrakenConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("truex-mm/0.1")
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }

    /// API-Sign header for a private endpoint.
    fn sign(&self, path: &str, nonce: &str, postdata: &str) -> Result<String> {
        let secret = BASE64
            .decode(&self.config.api_secret)
            .context("Kraken API secret is not valid base64")?;
        let mut sha = Sha256::new();
        sha.update(nonce.as_bytes());
        sha.update(postdata.as_bytes());
        let digest = sha.finalize();

        let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
            .map_err(|_| anyhow::anyhow!("invalid Kraken API secret length"))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// POSTs a signed private call and unwraps the {error, result}
    /// envelope. Each attempt gets a fresh nonce; the venue rejects
    /// replayed ones.
    async fn private_call<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let path = format!("/0/private/{}", endpoint);
        let url = format!("{}{}", self.config.base_url, path);

        let mut backoff = INITIAL_BACKOFF_MS;
        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            let nonce = chrono::Utc::now().timestamp_millis().to_string();
            let postdata = std::iter::once(format!("nonce={}", nonce))
                .chain(params.iter().map(|(k, v)| format!("{}={}", k, v)))
                .collect::<Vec<_>>()
                .join("&");
            let signature = self.sign(&path, &nonce, &postdata)?;
            let response = self
                .http
                .post(&url)
                .header("API-Key", &self.config.api_key)
                .header("API-Sign", &signature)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(postdata)
                .send()
                .await;
            match response {
                Ok(resp) => {
                    let envelope: KrakenResponse<T> = resp
                        .json()
                        .await
                        .with_context(|| format!("failed to parse {} response", endpoint))?;
                    if !envelope.error.is_empty() {
                        bail!("Kraken {} error: {}", endpoint, envelope.error.join(", "));
                    }
                    return envelope
                        .result
                        .ok_or_else(|| anyhow::anyhow!("Kraken {} returned no result", endpoint));
                }
                Err(e) => {
                    warn!(endpoint, attempt = attempt + 1, "Kraken request failed: {}", e);
                    last_error = Some(e);
                }
            }
            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(5_000);
            }
        }
        bail!(
            "Kraken {} failed after {} attempts: {}",
            endpoint,
            MAX_RETRIES,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )
    }
}

fn side_param(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn parse_status(status: &str) -> Result<HedgeOrderStatus> {
    match status {
        "open" | "pending" => Ok(HedgeOrderStatus::Open),
        "closed" => Ok(HedgeOrderStatus::Closed),
        "canceled" => Ok(HedgeOrderStatus::Canceled),
        "expired" => Ok(HedgeOrderStatus::Expired),
        other => bail!("unknown Kraken order status: {}", other),
    }
}

#[async_trait]
impl HedgeVenue for KrakenClient {
    async fn add_order(&self, request: AddOrderRequest) -> Result<String> {
        let ordertype = match request.order_type {
            HedgeOrderType::Limit => "limit",
            HedgeOrderType::Market => "market",
        };
        let mut params = vec![
            ("pair", request.pair.clone()),
            ("type", side_param(request.side).to_string()),
            ("ordertype", ordertype.to_string()),
            ("volume", format!("{}", request.volume)),
        ];
        if let Some(price) = request.price {
            params.push(("price", format!("{}", price)));
        }
        let result: AddOrderResult = self.private_call("AddOrder", params).await?;
        let txid = result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("AddOrder returned no txid"))?;
        debug!(txid = %txid, "Kraken order accepted");
        Ok(txid)
    }

    async fn query_order(&self, txid: &str) -> Result<HedgeOrderInfo> {
        let params = vec![("txid", txid.to_string())];
        let result: HashMap<String, KrakenOrder> =
            self.private_call("QueryOrders", params).await?;
        let order = result
            .get(txid)
            .ok_or_else(|| anyhow::anyhow!("QueryOrders has no entry for {}", txid))?;
        Ok(HedgeOrderInfo {
            status: parse_status(&order.status)?,
            vol_exec: order.vol_exec.parse().unwrap_or(0.0),
            price: order.price.parse().unwrap_or(0.0),
        })
    }

    async fn cancel_order(&self, txid: &str) -> Result<u32> {
        let params = vec![("txid", txid.to_string())];
        let result: CancelOrderResult = self.private_call("CancelOrder", params).await?;
        Ok(result.count)
    }
}
