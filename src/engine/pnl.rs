//! FIFO P&L tracker.
//!
//! Every fill becomes a lot on its side's queue; opposing lots are
//! matched oldest-first and each matched quantity realizes
//! q·(sellPrice − buyPrice). The remaining net position is marked
//! against the latest mid. Fees follow the per-venue maker/taker
//! schedule and are reported separately from price P&L.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::PnlConfig;
use crate::models::{Fill, Side, Venue};

#[derive(Debug, Clone)]
struct FillLot {
    price: f64,
    remaining: f64,
}

#[derive(Debug, Clone)]
pub enum PnlEvent {
    /// Net P&L moved by at least the configured threshold since the
    /// last report.
    SignificantChange { net_pnl: f64, delta: f64 },
}

/// Point-in-time P&L report.
#[derive(Debug, Clone, Serialize)]
pub struct PnlSummary {
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub net_pnl: f64,
    pub total_fees: f64,
    pub maker_fees: f64,
    pub taker_fees: f64,
    pub fees_by_venue: HashMap<String, f64>,
    pub total_matched_quantity: f64,
    pub open_net_position: f64,
    pub last_mid: Option<f64>,
    pub fill_count: u64,
}

pub struct PnlTracker {
    config: PnlConfig,
    buy_lots: VecDeque<FillLot>,
    sell_lots: VecDeque<FillLot>,
    realized_pnl: f64,
    unrealized_pnl: f64,
    last_mid: Option<f64>,
    total_matched_quantity: f64,
    total_fees: f64,
    maker_fees: f64,
    taker_fees: f64,
    fees_by_venue: HashMap<String, f64>,
    fill_count: u64,
    last_reported: f64,
    events: mpsc::UnboundedSender<PnlEvent>,
}

impl PnlTracker {
    pub fn new(config: PnlConfig) -> (Self, mpsc::UnboundedReceiver<PnlEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                buy_lots: VecDeque::new(),
                sell_lots: VecDeque::new(),
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                last_mid: None,
                total_matched_quantity: 0.0,
                total_fees: 0.0,
                maker_fees: 0.0,
                taker_fees: 0.0,
                fees_by_venue: HashMap::new(),
                fill_count: 0,
                last_reported: 0.0,
                events,
            },
            rx,
        )
    }

    fn fee_bps(&self, venue: Venue, is_maker: bool) -> f64 {
        match (venue, is_maker) {
            (Venue::Truex, true) => self.config.truex_maker_fee_bps,
            (Venue::Truex, false) => self.config.truex_taker_fee_bps,
            (Venue::Hedge, true) => self.config.hedge_maker_fee_bps,
            (Venue::Hedge, false) => self.config.hedge_taker_fee_bps,
        }
    }

    pub fn on_fill(&mut self, fill: &Fill, is_maker: bool) {
        if !fill.is_valid() {
            warn!(exec_id = %fill.exec_id, "ignoring invalid fill for P&L");
            return;
        }
        self.fill_count += 1;

        let fee = fill.quantity * fill.price * self.fee_bps(fill.venue, is_maker) / 10_000.0;
        self.total_fees += fee;
        if is_maker {
            self.maker_fees += fee;
        } else {
            self.taker_fees += fee;
        }
        *self.fees_by_venue.entry(fill.venue.to_string()).or_insert(0.0) += fee;

        match fill.side {
            Side::Buy => self.buy_lots.push_back(FillLot { price: fill.price, remaining: fill.quantity }),
            Side::Sell => self.sell_lots.push_back(FillLot { price: fill.price, remaining: fill.quantity }),
        }
        self.match_lots();
        self.recompute_unrealized();
        self.check_significant_change();
    }

    /// Matches the oldest buy lot against the oldest sell lot until one
    /// queue empties.
    fn match_lots(&mut self) {
        loop {
            let (buy, sell) = match (self.buy_lots.front_mut(), self.sell_lots.front_mut()) {
                (Some(b), Some(s)) => (b, s),
                _ => break,
            };
            let qty = buy.remaining.min(sell.remaining);
            self.realized_pnl += qty * (sell.price - buy.price);
            self.total_matched_quantity += qty;
            buy.remaining -= qty;
            sell.remaining -= qty;
            if buy.remaining <= 0.0 {
                self.buy_lots.pop_front();
            }
            if sell.remaining <= 0.0 {
                self.sell_lots.pop_front();
            }
        }
    }

    /// Marks the open position against a fresh mid.
    pub fn mark_to_market(&mut self, mid: f64) {
        if mid <= 0.0 {
            return;
        }
        self.last_mid = Some(mid);
        self.recompute_unrealized();
        self.check_significant_change();
    }

    fn open_net_position(&self) -> f64 {
        let long: f64 = self.buy_lots.iter().map(|l| l.remaining).sum();
        let short: f64 = self.sell_lots.iter().map(|l| l.remaining).sum();
        long - short
    }

    fn recompute_unrealized(&mut self) {
        let mid = match self.last_mid {
            Some(m) => m,
            None => return,
        };
        let net = self.open_net_position();
        self.unrealized_pnl = if net > 0.0 {
            let qty: f64 = self.buy_lots.iter().map(|l| l.remaining).sum();
            let cost: f64 = self.buy_lots.iter().map(|l| l.remaining * l.price).sum();
            let avg_cost = cost / qty;
            net * (mid - avg_cost)
        } else if net < 0.0 {
            let qty: f64 = self.sell_lots.iter().map(|l| l.remaining).sum();
            let proceeds: f64 = self.sell_lots.iter().map(|l| l.remaining * l.price).sum();
            let avg_price = proceeds / qty;
            net.abs() * (avg_price - mid)
        } else {
            0.0
        };
    }

    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl - self.total_fees
    }

    fn check_significant_change(&mut self) {
        let net = self.net_pnl();
        let delta = net - self.last_reported;
        if delta.abs() >= self.config.significant_pnl_change {
            debug!(net_pnl = net, delta, "significant P&L change");
            self.events.send(PnlEvent::SignificantChange { net_pnl: net, delta }).ok();
            self.last_reported = net;
        }
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    pub fn total_fees(&self) -> f64 {
        self.total_fees
    }

    pub fn summary(&self) -> PnlSummary {
        PnlSummary {
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            net_pnl: self.net_pnl(),
            total_fees: self.total_fees,
            maker_fees: self.maker_fees,
            taker_fees: self.taker_fees,
            fees_by_venue: self.fees_by_venue.clone(),
            total_matched_quantity: self.total_matched_quantity,
            open_net_position: self.open_net_position(),
            last_mid: self.last_mid,
            fill_count: self.fill_count,
        }
    }
}
