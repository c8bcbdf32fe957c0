//! Paper hedge venue for dry runs.
//!
//! Accepts every order and reports it filled on the first status poll:
//! limit orders at their limit price, market orders at the last price
//! seen. No capital moves; the executor and accounting paths run
//! exactly as they would against the live venue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::engine::hedge::{
    AddOrderRequest, HedgeOrderInfo, HedgeOrderStatus, HedgeOrderType, HedgeVenue,
};

#[derive(Debug, Clone)]
struct PaperOrder {
    fill_price: f64,
    volume: f64,
    canceled: bool,
}

#[derive(Default)]
pub struct PaperVenue {
    orders: Mutex<HashMap<String, PaperOrder>>,
    last_price: Mutex<Option<f64>>,
    next_id: AtomicU64,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HedgeVenue for PaperVenue {
    async fn add_order(&self, request: AddOrderRequest) -> Result<String> {
        let fill_price = match request.order_type {
            HedgeOrderType::Limit => {
                let price = request.price.unwrap_or(0.0);
                *self.last_price.lock() = Some(price);
                price
            }
            HedgeOrderType::Market => self
                .last_price
                .lock()
                .ok_or_else(|| anyhow::anyhow!("paper venue has no reference price yet"))?,
        };
        let txid = format!("PAPER-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(
            txid = %txid,
            pair = %request.pair,
            side = %request.side,
            volume = request.volume,
            fill_price,
            "DRY RUN: paper hedge order accepted"
        );
        self.orders.lock().insert(
            txid.clone(),
            PaperOrder { fill_price, volume: request.volume, canceled: false },
        );
        Ok(txid)
    }

    async fn query_order(&self, txid: &str) -> Result<HedgeOrderInfo> {
        let orders = self.orders.lock();
        let order = orders
            .get(txid)
            .ok_or_else(|| anyhow::anyhow!("unknown paper order {}", txid))?;
        if order.canceled {
            return Ok(HedgeOrderInfo { status: HedgeOrderStatus::Canceled, vol_exec: 0.0, price: 0.0 });
        }
        Ok(HedgeOrderInfo {
            status: HedgeOrderStatus::Closed,
            vol_exec: order.volume,
            price: order.fill_price,
        })
    }

    async fn cancel_order(&self, txid: &str) -> Result<u32> {
        let mut orders = self.orders.lock();
        match orders.get_mut(txid) {
            Some(order) if !order.canceled => {
                order.canceled = true;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn limit(volume: f64, price: f64) -> AddOrderRequest {
        AddOrderRequest {
            pair: "XBTUSD".into(),
            side: Side::Sell,
            order_type: HedgeOrderType::Limit,
            price: Some(price),
            volume,
        }
    }

    #[tokio::test]
    async fn test_limit_fills_at_limit_price() {
        let venue = PaperVenue::new();
        let txid = venue.add_order(limit(0.5, 99_990.0)).await.unwrap();
        let info = venue.query_order(&txid).await.unwrap();
        assert_eq!(info.status, HedgeOrderStatus::Closed);
        assert_eq!(info.vol_exec, 0.5);
        assert_eq!(info.price, 99_990.0);
    }

    #[tokio::test]
    async fn test_market_uses_last_seen_price() {
        let venue = PaperVenue::new();
        // Market order before any price reference fails
        let market = AddOrderRequest {
            pair: "XBTUSD".into(),
            side: Side::Buy,
            order_type: HedgeOrderType::Market,
            price: None,
            volume: 1.0,
        };
        assert!(venue.add_order(market.clone()).await.is_err());

        venue.add_order(limit(0.1, 100_000.0)).await.unwrap();
        let txid = venue.add_order(market).await.unwrap();
        let info = venue.query_order(&txid).await.unwrap();
        assert_eq!(info.price, 100_000.0);
    }

    #[tokio::test]
    async fn test_cancel_marks_order() {
        let venue = PaperVenue::new();
        let txid = venue.add_order(limit(0.5, 100_000.0)).await.unwrap();
        assert_eq!(venue.cancel_order(&txid).await.unwrap(), 1);
        assert_eq!(venue.cancel_order(&txid).await.unwrap(), 0);
        let info = venue.query_order(&txid).await.unwrap();
        assert_eq!(info.status, HedgeOrderStatus::Canceled);
        assert!(venue.query_order("PAPER-404").await.is_err());
    }
}
