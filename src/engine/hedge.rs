//! Hedge executor.
//!
//! Routes inventory-rebalancing trades to the hedge venue with a
//! limit-then-market policy: a passive limit at an aggressive offset
//! first, escalating to a market order if it does not fill in time.
//! Urgent hedges (emergency flatten) go straight to market. Only one
//! hedge may be in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::HedgeConfig;
use crate::models::{Fill, PriceUpdate, Side, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeOrderType {
    Limit,
    Market,
}

/// Order submission to the hedge venue.
#[derive(Debug, Clone)]
pub struct AddOrderRequest {
    pub pair: String,
    pub side: Side,
    pub order_type: HedgeOrderType,
    pub price: Option<f64>,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeOrderStatus {
    Open,
    Closed,
    Canceled,
    Expired,
}

/// Order state as reported by the hedge venue.
#[derive(Debug, Clone)]
pub struct HedgeOrderInfo {
    pub status: HedgeOrderStatus,
    pub vol_exec: f64,
    pub price: f64,
}

/// The narrow contract the executor needs from a hedge venue.
#[async_trait]
pub trait HedgeVenue: Send + Sync {
    async fn add_order(&self, request: AddOrderRequest) -> anyhow::Result<String>;
    async fn query_order(&self, txid: &str) -> anyhow::Result<HedgeOrderInfo>;
    async fn cancel_order(&self, txid: &str) -> anyhow::Result<u32>;
}

/// Read-only view of the current reference prices.
pub trait PriceView: Send + Sync {
    fn best_bid(&self) -> Option<f64>;
    fn best_ask(&self) -> Option<f64>;
}

/// Latest price-source observation, shared between the orchestrator
/// (writer) and the hedge executor (reader).
#[derive(Default)]
pub struct SharedPrice {
    latest: RwLock<Option<PriceUpdate>>,
}

impl SharedPrice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update(&self, update: PriceUpdate) {
        *self.latest.write() = Some(update);
    }
}

impl PriceView for SharedPrice {
    fn best_bid(&self) -> Option<f64> {
        self.latest.read().map(|u| u.best_bid)
    }

    fn best_ask(&self) -> Option<f64> {
        self.latest.read().map(|u| u.best_ask)
    }
}

#[derive(Debug, Clone)]
pub enum HedgeEvent {
    HedgePlaced { txid: String, side: Side, size: f64, price: Option<f64> },
    HedgeFilled { fill: Fill, slippage: f64, used_market: bool },
    HedgeTimeout { txid: String, side: Side, size: f64 },
    HedgeFailed { side: Side, size: f64, reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HedgeStats {
    pub total_hedges: u64,
    pub total_hedged_base: f64,
    pub total_slippage: f64,
    pub limit_fills: u64,
    pub market_fills: u64,
    pub failed_hedges: u64,
}

impl HedgeStats {
    pub fn avg_slippage(&self) -> f64 {
        if self.total_hedges == 0 {
            0.0
        } else {
            self.total_slippage / self.total_hedges as f64
        }
    }

    pub fn limit_fill_rate(&self) -> f64 {
        if self.total_hedges == 0 {
            0.0
        } else {
            self.limit_fills as f64 / self.total_hedges as f64
        }
    }
}

enum PollOutcome {
    Filled { vol_exec: f64, price: f64 },
    Abandoned,
    TimedOut,
}

pub struct HedgeExecutor {
    config: HedgeConfig,
    venue: Arc<dyn HedgeVenue>,
    prices: Arc<dyn PriceView>,
    events: mpsc::UnboundedSender<HedgeEvent>,
    in_flight: AtomicBool,
    stats: Mutex<HedgeStats>,
}

impl HedgeExecutor {
    pub fn new(
        config: HedgeConfig,
        venue: Arc<dyn HedgeVenue>,
        prices: Arc<dyn PriceView>,
    ) -> (Self, mpsc::UnboundedReceiver<HedgeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                venue,
                prices,
                events,
                in_flight: AtomicBool::new(false),
                stats: Mutex::new(HedgeStats::default()),
            },
            rx,
        )
    }

    pub fn stats(&self) -> HedgeStats {
        self.stats.lock().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Runs one hedge to completion. Failures surface as events, never
    /// as panics; the position simply stays unhedged until the next
    /// signal.
    pub async fn execute_hedge(&self, side: Side, size: f64, urgency: Urgency) {
        if size <= 0.0 || size < self.config.min_hedge_size {
            warn!(%side, size, min = self.config.min_hedge_size, "hedge request below minimum, rejected");
            self.events
                .send(HedgeEvent::HedgeFailed {
                    side,
                    size,
                    reason: format!("size {:.8} below minimum {:.8}", size, self.config.min_hedge_size),
                })
                .ok();
            return;
        }
        let size = size.min(self.config.max_hedge_size);

        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!(%side, size, "hedge already in flight, skipping");
            return;
        }
        self.run_hedge(side, size, urgency).await;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn run_hedge(&self, side: Side, size: f64, urgency: Urgency) {
        if urgency == Urgency::Urgent {
            self.market_path(side, size, None).await;
            return;
        }

        // Passive leg: an aggressive limit through the touch
        let reference = match side {
            Side::Sell => self.prices.best_bid(),
            Side::Buy => self.prices.best_ask(),
        };
        let reference = match reference {
            Some(p) if p > 0.0 => p,
            _ => {
                warn!(%side, "no reference price available, going straight to market");
                self.market_path(side, size, None).await;
                return;
            }
        };
        let offset = self.config.limit_price_offset_bps / 10_000.0;
        let limit_price = match side {
            Side::Sell => reference * (1.0 - offset),
            Side::Buy => reference * (1.0 + offset),
        };

        let request = AddOrderRequest {
            pair: self.config.hedge_symbol.clone(),
            side,
            order_type: HedgeOrderType::Limit,
            price: Some(limit_price),
            volume: size,
        };
        let txid = match self.venue.add_order(request).await {
            Ok(id) => id,
            Err(e) => {
                warn!("hedge limit order failed: {:#}", e);
                self.record_failure(side, size, format!("limit placement failed: {}", e));
                return;
            }
        };
        info!(%side, size, price = limit_price, txid = %txid, "hedge limit placed");
        self.events
            .send(HedgeEvent::HedgePlaced { txid: txid.clone(), side, size, price: Some(limit_price) })
            .ok();

        match self.poll_order(&txid).await {
            PollOutcome::Filled { vol_exec, price } => {
                self.record_fill(&txid, side, vol_exec, price, reference, false);
            }
            PollOutcome::Abandoned => {
                warn!(txid = %txid, "hedge limit canceled/expired by venue, abandoning");
            }
            PollOutcome::TimedOut => {
                self.events.send(HedgeEvent::HedgeTimeout { txid: txid.clone(), side, size }).ok();
                if let Err(e) = self.venue.cancel_order(&txid).await {
                    warn!(txid = %txid, "hedge limit cancel failed: {:#}", e);
                }
                self.market_path(side, size, Some(reference)).await;
            }
        }
    }

    async fn market_path(&self, side: Side, size: f64, reference: Option<f64>) {
        let reference = reference.or_else(|| match side {
            Side::Sell => self.prices.best_bid(),
            Side::Buy => self.prices.best_ask(),
        });
        let request = AddOrderRequest {
            pair: self.config.hedge_symbol.clone(),
            side,
            order_type: HedgeOrderType::Market,
            price: None,
            volume: size,
        };
        let txid = match self.venue.add_order(request).await {
            Ok(id) => id,
            Err(e) => {
                warn!("hedge market order failed: {:#}", e);
                self.record_failure(side, size, format!("market placement failed: {}", e));
                return;
            }
        };
        info!(%side, size, txid = %txid, "hedge market order placed");
        self.events
            .send(HedgeEvent::HedgePlaced { txid: txid.clone(), side, size, price: None })
            .ok();

        match self.poll_order(&txid).await {
            PollOutcome::Filled { vol_exec, price } => {
                self.record_fill(&txid, side, vol_exec, price, reference.unwrap_or(price), true);
            }
            PollOutcome::Abandoned | PollOutcome::TimedOut => {
                self.record_failure(side, size, "market order reached no terminal state".into());
            }
        }
    }

    /// Polls order status until terminal or the limit timeout elapses.
    async fn poll_order(&self, txid: &str) -> PollOutcome {
        let deadline = Instant::now() + Duration::from_millis(self.config.limit_timeout_ms);
        loop {
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            match self.venue.query_order(txid).await {
                Ok(info) => match info.status {
                    HedgeOrderStatus::Closed => {
                        return PollOutcome::Filled { vol_exec: info.vol_exec, price: info.price }
                    }
                    HedgeOrderStatus::Canceled | HedgeOrderStatus::Expired => {
                        return PollOutcome::Abandoned
                    }
                    HedgeOrderStatus::Open => {}
                },
                Err(e) => warn!(txid = %txid, "hedge status poll failed: {:#}", e),
            }
            if Instant::now() >= deadline {
                return PollOutcome::TimedOut;
            }
        }
    }

    fn record_fill(
        &self,
        txid: &str,
        side: Side,
        vol_exec: f64,
        price: f64,
        reference: f64,
        used_market: bool,
    ) {
        let slippage = match side {
            Side::Sell => price - reference,
            Side::Buy => reference - price,
        };
        {
            let mut stats = self.stats.lock();
            stats.total_hedges += 1;
            stats.total_hedged_base += vol_exec;
            stats.total_slippage += slippage;
            if used_market {
                stats.market_fills += 1;
            } else {
                stats.limit_fills += 1;
            }
        }
        let fill = Fill {
            exec_id: txid.to_string(),
            client_order_id: txid.to_string(),
            side,
            quantity: vol_exec,
            price,
            venue: Venue::Hedge,
            timestamp: chrono::Utc::now(),
            is_maker: Some(false),
        };
        info!(%side, vol_exec, price, slippage, used_market, "hedge filled");
        self.events.send(HedgeEvent::HedgeFilled { fill, slippage, used_market }).ok();
    }

    fn record_failure(&self, side: Side, size: f64, reason: String) {
        self.stats.lock().failed_hedges += 1;
        self.events.send(HedgeEvent::HedgeFailed { side, size, reason }).ok();
    }
}
