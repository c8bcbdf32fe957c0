//! Inventory manager.
//!
//! Tracks the net position from fills, derives the VWAP entry price,
//! shapes quote skew from utilization, and raises hedge / limit-warning
//! / emergency signals. The emergency limit is a hard stop: once hit,
//! no hedge signal is emitted for that fill and the orchestrator pulls
//! every quote.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::InventoryConfig;
use crate::models::{Fill, Side};

/// Which side the exposure is building on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureSide {
    Long,
    Short,
}

/// Tick offsets applied to the two quote sides.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Skew {
    pub bid_skew_ticks: f64,
    pub ask_skew_ticks: f64,
}

/// Position state after a fill.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionSnapshot {
    pub net_position: f64,
    pub total_bought: f64,
    pub total_sold: f64,
    pub entry_price: f64,
    pub fill_count: u64,
    pub utilization: f64,
}

#[derive(Debug, Clone)]
pub enum InventoryEvent {
    Fill { position: PositionSnapshot },
    Emergency { reason: String, net_position: f64 },
    LimitWarning { side: ExposureSide, utilization: f64 },
    HedgeSignal { side: Side, size: f64 },
}

pub struct InventoryManager {
    config: InventoryConfig,
    buy_qty: f64,
    buy_cost: f64,
    sell_qty: f64,
    sell_cost: f64,
    fill_count: u64,
    events: mpsc::UnboundedSender<InventoryEvent>,
}

impl InventoryManager {
    pub fn new(config: InventoryConfig) -> (Self, mpsc::UnboundedReceiver<InventoryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                buy_qty: 0.0,
                buy_cost: 0.0,
                sell_qty: 0.0,
                sell_cost: 0.0,
                fill_count: 0,
                events,
            },
            rx,
        )
    }

    pub fn net_position(&self) -> f64 {
        self.buy_qty - self.sell_qty
    }

    /// VWAP of the accumulating side; zero when flat.
    pub fn entry_price(&self) -> f64 {
        let net = self.net_position();
        if net > 0.0 && self.buy_qty > 0.0 {
            self.buy_cost / self.buy_qty
        } else if net < 0.0 && self.sell_qty > 0.0 {
            self.sell_cost / self.sell_qty
        } else {
            0.0
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.config.max_position_base <= 0.0 {
            return 0.0;
        }
        self.net_position().abs() / self.config.max_position_base
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            net_position: self.net_position(),
            total_bought: self.buy_qty,
            total_sold: self.sell_qty,
            entry_price: self.entry_price(),
            fill_count: self.fill_count,
            utilization: self.utilization(),
        }
    }

    /// Applies a fill and emits the resulting signals. Invalid fills are
    /// ignored with a warning.
    pub fn on_fill(&mut self, fill: &Fill) {
        if !fill.is_valid() {
            warn!(
                exec_id = %fill.exec_id,
                quantity = fill.quantity,
                price = fill.price,
                "ignoring invalid fill"
            );
            return;
        }
        match fill.side {
            Side::Buy => {
                self.buy_qty += fill.quantity;
                self.buy_cost += fill.quantity * fill.price;
            }
            Side::Sell => {
                self.sell_qty += fill.quantity;
                self.sell_cost += fill.quantity * fill.price;
            }
        }
        self.fill_count += 1;

        let net = self.net_position();
        self.events.send(InventoryEvent::Fill { position: self.snapshot() }).ok();

        if net.abs() >= self.config.emergency_limit_base {
            error!(
                net_position = net,
                limit = self.config.emergency_limit_base,
                "position breached emergency limit"
            );
            self.events
                .send(InventoryEvent::Emergency {
                    reason: format!(
                        "net position {:.6} beyond emergency limit {:.6}",
                        net, self.config.emergency_limit_base
                    ),
                    net_position: net,
                })
                .ok();
            return;
        }

        let utilization = self.utilization();
        if utilization >= self.config.limit_warning_pct {
            let side = if net > 0.0 { ExposureSide::Long } else { ExposureSide::Short };
            warn!(?side, utilization, "position approaching limit");
            self.events.send(InventoryEvent::LimitWarning { side, utilization }).ok();
        }

        if net.abs() >= self.config.hedge_threshold_base {
            let side = if net > 0.0 { Side::Sell } else { Side::Buy };
            self.events.send(InventoryEvent::HedgeSignal { side, size: net.abs() }).ok();
        }
    }

    /// Skew grows with utilization^exponent up to max_skew_ticks. Long
    /// inventory pushes asks up and bids down; short is the mirror.
    pub fn skew(&self) -> Skew {
        let net = self.net_position();
        if net == 0.0 || self.config.max_position_base <= 0.0 {
            return Skew::default();
        }
        let utilization = self.utilization().min(1.0);
        let raw = utilization.powf(self.config.skew_exponent) * self.config.max_skew_ticks;
        if net > 0.0 {
            Skew { bid_skew_ticks: -raw, ask_skew_ticks: raw }
        } else {
            Skew { bid_skew_ticks: raw, ask_skew_ticks: -raw }
        }
    }

    /// Whether new quotes on `side` are allowed: accumulation stops at
    /// the max position on that side.
    pub fn can_quote(&self, side: Side) -> bool {
        let net = self.net_position();
        match side {
            Side::Buy => net < self.config.max_position_base,
            Side::Sell => net > -self.config.max_position_base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;
    use chrono::Utc;

    fn fill(side: Side, qty: f64, price: f64) -> Fill {
        Fill {
            exec_id: format!("E-{}-{}", side, qty),
            client_order_id: "Q1".into(),
            side,
            quantity: qty,
            price,
            venue: Venue::Truex,
            timestamp: Utc::now(),
            is_maker: Some(true),
        }
    }

    fn manager(max: f64, threshold: f64) -> (InventoryManager, mpsc::UnboundedReceiver<InventoryEvent>) {
        InventoryManager::new(InventoryConfig {
            max_position_base: max,
            hedge_threshold_base: threshold,
            emergency_limit_base: max * 1.2,
            max_skew_ticks: 10.0,
            skew_exponent: 2.0,
            tick_size: 0.5,
            limit_warning_pct: 0.8,
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<InventoryEvent>) -> Vec<InventoryEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_net_position_is_buys_minus_sells() {
        let (mut inv, _rx) = manager(10.0, 5.0);
        inv.on_fill(&fill(Side::Buy, 2.0, 100.0));
        inv.on_fill(&fill(Side::Sell, 0.5, 101.0));
        inv.on_fill(&fill(Side::Buy, 1.0, 102.0));
        assert!((inv.net_position() - 2.5).abs() < 1e-12);
        assert_eq!(inv.snapshot().fill_count, 3);
    }

    #[test]
    fn test_vwap_entry_price() {
        let (mut inv, _rx) = manager(10.0, 5.0);
        inv.on_fill(&fill(Side::Buy, 1.0, 100.0));
        inv.on_fill(&fill(Side::Buy, 3.0, 200.0));
        // (100 + 600) / 4
        assert!((inv.entry_price() - 175.0).abs() < 1e-9);

        // Going net short switches to the sell VWAP
        inv.on_fill(&fill(Side::Sell, 6.0, 150.0));
        assert!((inv.entry_price() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_position_has_zero_entry() {
        let (mut inv, _rx) = manager(10.0, 5.0);
        inv.on_fill(&fill(Side::Buy, 1.0, 100.0));
        inv.on_fill(&fill(Side::Sell, 1.0, 100.0));
        assert_eq!(inv.net_position(), 0.0);
        assert_eq!(inv.entry_price(), 0.0);
    }

    #[test]
    fn test_invalid_fill_ignored() {
        let (mut inv, mut rx) = manager(10.0, 5.0);
        inv.on_fill(&fill(Side::Buy, 0.0, 100.0));
        inv.on_fill(&fill(Side::Buy, 1.0, -5.0));
        assert_eq!(inv.net_position(), 0.0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_hedge_signal_at_threshold() {
        let (mut inv, mut rx) = manager(1.0, 0.5);
        inv.on_fill(&fill(Side::Buy, 0.6, 100_000.0));
        let events = drain(&mut rx);
        let hedge = events.iter().find_map(|e| match e {
            InventoryEvent::HedgeSignal { side, size } => Some((*side, *size)),
            _ => None,
        });
        assert_eq!(hedge, Some((Side::Sell, 0.6)));
    }

    #[test]
    fn test_emergency_suppresses_hedge_signal() {
        let (mut inv, mut rx) = manager(1.0, 0.5);
        inv.on_fill(&fill(Side::Buy, 1.2, 100_000.0));
        let events = drain(&mut rx);
        let emergencies = events
            .iter()
            .filter(|e| matches!(e, InventoryEvent::Emergency { .. }))
            .count();
        assert_eq!(emergencies, 1);
        assert!(
            !events.iter().any(|e| matches!(e, InventoryEvent::HedgeSignal { .. })),
            "no hedge signal may follow an emergency"
        );
    }

    #[test]
    fn test_limit_warning_sides() {
        let (mut inv, mut rx) = manager(1.0, 0.95);
        inv.on_fill(&fill(Side::Buy, 0.85, 100.0));
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            InventoryEvent::LimitWarning { side: ExposureSide::Long, .. }
        )));

        let (mut inv, mut rx) = manager(1.0, 0.95);
        inv.on_fill(&fill(Side::Sell, 0.9, 100.0));
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            InventoryEvent::LimitWarning { side: ExposureSide::Short, .. }
        )));
    }

    #[test]
    fn test_skew_signs_and_magnitude() {
        let (mut inv, _rx) = manager(2.0, 10.0);
        assert_eq!(inv.skew(), Skew::default());

        inv.on_fill(&fill(Side::Buy, 1.0, 100.0));
        let skew = inv.skew();
        // u = 0.5, raw = 0.25 * 10
        assert!((skew.ask_skew_ticks - 2.5).abs() < 1e-9);
        assert!((skew.bid_skew_ticks + 2.5).abs() < 1e-9);

        inv.on_fill(&fill(Side::Sell, 2.0, 100.0));
        let skew = inv.skew();
        assert!(skew.bid_skew_ticks > 0.0);
        assert!(skew.ask_skew_ticks < 0.0);
    }

    #[test]
    fn test_can_quote_blocks_accumulating_side() {
        let (mut inv, _rx) = manager(1.0, 0.5);
        assert!(inv.can_quote(Side::Buy));
        assert!(inv.can_quote(Side::Sell));

        inv.on_fill(&fill(Side::Buy, 1.0, 100.0));
        assert!(!inv.can_quote(Side::Buy));
        assert!(inv.can_quote(Side::Sell));

        inv.on_fill(&fill(Side::Sell, 2.0, 100.0));
        assert!(inv.can_quote(Side::Buy));
        assert!(!inv.can_quote(Side::Sell));
    }
}
