//! Quote engine.
//!
//! Turns each reference-price update into a desired two-sided ladder,
//! reconciles it against the live order set, and emits 35=D / 35=F
//! through the FIX session. Order flow is bounded by a rolling
//! one-second rate limit with a FIFO overflow queue, and a dup-guard
//! keeps individual orders from being re-actioned in quick succession.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QuoteConfig;
use crate::engine::inventory::InventoryManager;
use crate::fix::message::{msg_type, tag, FixMessage};
use crate::fix::session::FixSession;
use crate::models::{snap_to_tick, Fill, PriceUpdate, Side, Venue};

/// Order state while the venue still owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Sent, not yet acknowledged.
    Pending,
    /// Acknowledged and resting.
    Active,
    /// Cancel requested, awaiting confirmation.
    CancelPending,
}

/// A live quote keyed by client order id.
#[derive(Debug, Clone)]
pub struct ActiveOrder {
    pub client_order_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub level: u32,
    pub status: OrderStatus,
    pub placed_at: Instant,
}

/// One rung of the desired ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteDesired {
    pub side: Side,
    pub level: u32,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub enum QuoteEvent {
    /// A quote filled completely on the maker venue.
    Fill(Fill),
    /// Every live quote was cancelled.
    CancelAll { reason: String, cancelled: usize },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuoteStats {
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub rate_limited: u64,
    pub dup_guard_skips: u64,
}

/// Rolling one-second action budget.
struct RateLimiter {
    window: Duration,
    max_events: u32,
    events: VecDeque<Instant>,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self {
            window: Duration::from_secs(1),
            max_events: max_per_second,
            events: VecDeque::with_capacity(max_per_second as usize * 2),
        }
    }

    /// Acquires `n` slots atomically, or none at all.
    fn try_acquire_n(&mut self, n: u32) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        if self.events.len() + n as usize > self.max_events as usize {
            false
        } else {
            for _ in 0..n {
                self.events.push_back(now);
            }
            true
        }
    }
}

#[derive(Debug, Clone)]
enum QuoteAction {
    Place(QuoteDesired),
    Cancel { client_order_id: String, side: Side },
    /// Cancel + place as one unit, so the dup-guard can never split the
    /// pair and leave two live orders on one ladder slot.
    Replace { client_order_id: String, side: Side, quote: QuoteDesired },
}

impl QuoteAction {
    /// Rate-limit cost; a replace consumes two slots.
    fn cost(&self) -> u32 {
        match self {
            QuoteAction::Replace { .. } => 2,
            _ => 1,
        }
    }
}

pub struct QuoteEngine {
    config: QuoteConfig,
    session: Arc<FixSession>,
    inventory: Arc<RwLock<InventoryManager>>,
    events: mpsc::UnboundedSender<QuoteEvent>,
    active_orders: HashMap<String, ActiveOrder>,
    /// Client order ids actioned recently; guards against churn.
    recent_actions: HashMap<String, Instant>,
    limiter: RateLimiter,
    action_queue: VecDeque<QuoteAction>,
    used_ids: HashSet<String>,
    is_quoting: bool,
    /// Set by the emergency policy; only an operator resume clears it.
    halted: bool,
    stats: QuoteStats,
}

impl QuoteEngine {
    pub fn new(
        config: QuoteConfig,
        session: Arc<FixSession>,
        inventory: Arc<RwLock<InventoryManager>>,
    ) -> (Self, mpsc::UnboundedReceiver<QuoteEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let limiter = RateLimiter::new(config.max_orders_per_second.max(1));
        (
            Self {
                config,
                session,
                inventory,
                events,
                active_orders: HashMap::new(),
                recent_actions: HashMap::new(),
                limiter,
                action_queue: VecDeque::new(),
                used_ids: HashSet::new(),
                is_quoting: false,
                halted: false,
                stats: QuoteStats::default(),
            },
            rx,
        )
    }

    pub fn is_quoting(&self) -> bool {
        self.is_quoting
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders.len()
    }

    pub fn stats(&self) -> QuoteStats {
        self.stats.clone()
    }

    /// Reference-price entry point: gate on confidence, compute the
    /// desired ladder, reconcile, dispatch.
    pub async fn on_price_update(&mut self, update: &PriceUpdate) {
        if self.halted {
            return;
        }
        if update.confidence < self.config.confidence_threshold {
            if self.is_quoting || !self.active_orders.is_empty() {
                info!(
                    confidence = update.confidence,
                    threshold = self.config.confidence_threshold,
                    "confidence below threshold, pulling quotes"
                );
                self.cancel_all_quotes("low confidence").await;
            }
            self.is_quoting = false;
            return;
        }
        self.is_quoting = true;

        let desired = self.compute_desired_quotes(update.mid);
        let actions = self.reconcile(&desired);
        for action in actions {
            self.dispatch(action).await;
        }
    }

    /// The desired ladder for a given mid. Sides blocked by inventory
    /// are omitted entirely; the band and notional filters run last.
    pub fn compute_desired_quotes(&self, mid: f64) -> Vec<QuoteDesired> {
        if mid <= 0.0 {
            return Vec::new();
        }
        let half_spread = (self.config.base_spread_bps / 10_000.0) * mid / 2.0;
        let tick = self.config.tick_size;
        let (skew, can_buy, can_sell) = {
            let inv = self.inventory.read();
            (inv.skew(), inv.can_quote(Side::Buy), inv.can_quote(Side::Sell))
        };

        let mut desired = Vec::with_capacity(self.config.levels as usize * 2);
        for level in 1..=self.config.levels {
            let offset = level as f64 * self.config.level_spacing_ticks * tick;
            let size = self.config.base_size * self.config.size_decay_factor.powi(level as i32 - 1);
            if can_buy {
                let price = snap_to_tick(
                    mid - half_spread - offset + skew.bid_skew_ticks * tick,
                    tick,
                );
                desired.push(QuoteDesired { side: Side::Buy, level, price, size });
            }
            if can_sell {
                let price = snap_to_tick(
                    mid + half_spread + offset + skew.ask_skew_ticks * tick,
                    tick,
                );
                desired.push(QuoteDesired { side: Side::Sell, level, price, size });
            }
        }

        let band = self.config.price_band_pct / 100.0;
        let min_notional = self.config.min_notional;
        desired.retain(|q| {
            if q.price <= 0.0 || (q.price - mid).abs() / mid > band {
                debug!(side = %q.side, level = q.level, price = q.price, "quote outside price band");
                return false;
            }
            if q.price * q.size < min_notional {
                debug!(side = %q.side, level = q.level, notional = q.price * q.size, "quote below min notional");
                return false;
            }
            true
        });
        desired
    }

    /// Diffs desired vs live per (side, level): place what is missing,
    /// cancel what is stale, cancel-replace on reprice or resize.
    fn reconcile(&self, desired: &[QuoteDesired]) -> Vec<QuoteAction> {
        let mut desired_by_slot: HashMap<(Side, u32), &QuoteDesired> = HashMap::new();
        for q in desired {
            desired_by_slot.insert((q.side, q.level), q);
        }
        let mut active_by_slot: HashMap<(Side, u32), &ActiveOrder> = HashMap::new();
        for order in self.active_orders.values() {
            if order.status != OrderStatus::CancelPending {
                active_by_slot.insert((order.side, order.level), order);
            }
        }

        let mut actions = Vec::new();
        let mut slots: Vec<(Side, u32)> =
            desired_by_slot.keys().chain(active_by_slot.keys()).copied().collect();
        slots.sort_by_key(|(side, level)| (*level, *side == Side::Sell));
        slots.dedup();

        let reprice_threshold = self.config.reprice_threshold_ticks * self.config.tick_size;
        for slot in slots {
            match (desired_by_slot.get(&slot), active_by_slot.get(&slot)) {
                (Some(want), None) => actions.push(QuoteAction::Place(**want)),
                (None, Some(have)) => actions.push(QuoteAction::Cancel {
                    client_order_id: have.client_order_id.clone(),
                    side: have.side,
                }),
                (Some(want), Some(have)) => {
                    let repriced = (want.price - have.price).abs() >= reprice_threshold;
                    let resized = want.size != have.size;
                    if repriced || resized {
                        actions.push(QuoteAction::Replace {
                            client_order_id: have.client_order_id.clone(),
                            side: have.side,
                            quote: **want,
                        });
                    }
                }
                (None, None) => {}
            }
        }
        actions
    }

    /// Applies dup-guard and the rate limit, queueing overflow.
    async fn dispatch(&mut self, action: QuoteAction) {
        let guarded_id = match &action {
            QuoteAction::Cancel { client_order_id, .. }
            | QuoteAction::Replace { client_order_id, .. } => Some(client_order_id),
            QuoteAction::Place(_) => None,
        };
        if let Some(id) = guarded_id {
            let guard = Duration::from_millis(self.config.dup_guard_ms);
            if let Some(last) = self.recent_actions.get(id) {
                if last.elapsed() < guard {
                    self.stats.dup_guard_skips += 1;
                    debug!(client_order_id = %id, "dup-guard skip");
                    return;
                }
            }
        }
        if !self.limiter.try_acquire_n(action.cost()) {
            self.stats.rate_limited += 1;
            self.action_queue.push_back(action);
            return;
        }
        self.execute(action).await;
    }

    /// Replays queued actions as rate-limit budget recovers. Driven by
    /// the orchestrator's drain timer.
    pub async fn drain_queue(&mut self) {
        while let Some(front) = self.action_queue.front() {
            if !self.limiter.try_acquire_n(front.cost()) {
                return;
            }
            if let Some(action) = self.action_queue.pop_front() {
                self.execute(action).await;
            }
        }
    }

    pub fn queued_actions(&self) -> usize {
        self.action_queue.len()
    }

    async fn execute(&mut self, action: QuoteAction) {
        match action {
            QuoteAction::Place(quote) => self.place_order(quote).await,
            QuoteAction::Cancel { client_order_id, side } => {
                self.cancel_order(&client_order_id, side).await
            }
            QuoteAction::Replace { client_order_id, side, quote } => {
                self.cancel_order(&client_order_id, side).await;
                self.place_order(quote).await;
            }
        }
    }

    async fn place_order(&mut self, quote: QuoteDesired) {
        let client_order_id = self.generate_cl_ord_id();
        let mut msg = FixMessage::new(msg_type::NEW_ORDER_SINGLE);
        msg.set(tag::CL_ORD_ID, &client_order_id)
            .set(tag::SYMBOL, &self.config.symbol)
            .set(tag::SIDE, quote.side.fix_code())
            .set(tag::ORDER_QTY, quote.size)
            .set(tag::ORD_TYPE, "2")
            .set(tag::PRICE, quote.price)
            .set(tag::TIME_IN_FORCE, "1");
        if !self.config.client_id.is_empty() {
            msg.set(tag::NO_PARTY_IDS, "1")
                .set(tag::PARTY_ID, &self.config.client_id)
                .set(tag::PARTY_ROLE, "D");
        }
        match self.session.send_app_message(msg).await {
            Ok(_) => {
                debug!(
                    client_order_id = %client_order_id,
                    side = %quote.side,
                    level = quote.level,
                    price = quote.price,
                    size = quote.size,
                    "order placed"
                );
                self.active_orders.insert(
                    client_order_id.clone(),
                    ActiveOrder {
                        client_order_id: client_order_id.clone(),
                        side: quote.side,
                        price: quote.price,
                        size: quote.size,
                        level: quote.level,
                        status: OrderStatus::Pending,
                        placed_at: Instant::now(),
                    },
                );
                self.recent_actions.insert(client_order_id, Instant::now());
                self.stats.orders_placed += 1;
            }
            Err(e) => warn!("order placement failed: {}", e),
        }
    }

    async fn cancel_order(&mut self, client_order_id: &str, side: Side) {
        let cancel_id = self.generate_cl_ord_id();
        let mut msg = FixMessage::new(msg_type::ORDER_CANCEL_REQUEST);
        msg.set(tag::CL_ORD_ID, cancel_id)
            .set(tag::ORIG_CL_ORD_ID, client_order_id)
            .set(tag::SYMBOL, &self.config.symbol)
            .set(tag::SIDE, side.fix_code());
        match self.session.send_app_message(msg).await {
            Ok(_) => {
                if let Some(order) = self.active_orders.get_mut(client_order_id) {
                    order.status = OrderStatus::CancelPending;
                }
                self.recent_actions.insert(client_order_id.to_string(), Instant::now());
                self.stats.orders_cancelled += 1;
            }
            Err(e) => warn!("cancel failed for {}: {}", client_order_id, e),
        }
    }

    /// Cancels every live order immediately, bypassing the rate limit
    /// and dup-guard. Pending queued actions are discarded.
    pub async fn cancel_all_quotes(&mut self, reason: &str) {
        self.action_queue.clear();
        let orders: Vec<(String, Side)> = self
            .active_orders
            .values()
            .filter(|o| o.status != OrderStatus::CancelPending)
            .map(|o| (o.client_order_id.clone(), o.side))
            .collect();
        let cancelled = orders.len();
        for (id, side) in orders {
            self.cancel_order(&id, side).await;
        }
        info!(reason, cancelled, "cancelled all quotes");
        self.events
            .send(QuoteEvent::CancelAll { reason: reason.to_string(), cancelled })
            .ok();
    }

    /// Emergency policy: pull everything and stop quoting until an
    /// operator resumes.
    pub async fn emergency_halt(&mut self, reason: &str) {
        self.halted = true;
        self.is_quoting = false;
        self.cancel_all_quotes(reason).await;
    }

    /// Operator action; quoting resumes on the next price update.
    pub fn resume_quoting(&mut self) {
        if self.halted {
            info!("quoting resumed by operator");
            self.halted = false;
        }
    }

    /// Applies an execution report (35=8) by OrdStatus.
    pub fn on_execution_report(&mut self, msg: &FixMessage) {
        let client_order_id = match msg.get(tag::CL_ORD_ID) {
            Some(id) => id.to_string(),
            None => {
                warn!("execution report without ClOrdID");
                return;
            }
        };
        let ord_status = msg.get(tag::ORD_STATUS).unwrap_or("");
        match ord_status {
            "0" => {
                if let Some(order) = self.active_orders.get_mut(&client_order_id) {
                    order.status = OrderStatus::Active;
                    debug!(
                        client_order_id = %client_order_id,
                        order_id = msg.get(tag::ORDER_ID).unwrap_or(""),
                        "order acknowledged"
                    );
                }
            }
            "1" => {
                // Partial fill: order stays on the book
            }
            "2" => {
                let removed = self.active_orders.remove(&client_order_id);
                let side = msg
                    .get(tag::SIDE)
                    .and_then(Side::from_fix_code)
                    .or_else(|| removed.as_ref().map(|o| o.side));
                let side = match side {
                    Some(s) => s,
                    None => {
                        warn!(client_order_id = %client_order_id, "fill with unknown side ignored");
                        return;
                    }
                };
                let price = msg.get_f64(tag::LAST_PX).or(removed.as_ref().map(|o| o.price));
                let size = msg.get_f64(tag::LAST_QTY).or(removed.as_ref().map(|o| o.size));
                let (price, size) = match (price, size) {
                    (Some(p), Some(s)) => (p, s),
                    _ => {
                        warn!(client_order_id = %client_order_id, "fill without price/quantity ignored");
                        return;
                    }
                };
                self.stats.orders_filled += 1;
                let fill = Fill {
                    exec_id: msg.get(tag::EXEC_ID).unwrap_or_default().to_string(),
                    client_order_id,
                    side,
                    quantity: size,
                    price,
                    venue: Venue::Truex,
                    timestamp: chrono::Utc::now(),
                    is_maker: Some(true),
                };
                info!(
                    exec_id = %fill.exec_id,
                    side = %fill.side,
                    price = fill.price,
                    quantity = fill.quantity,
                    "maker fill"
                );
                self.events.send(QuoteEvent::Fill(fill)).ok();
            }
            "4" => {
                if self.active_orders.remove(&client_order_id).is_none() {
                    // Venues ack cancels under the cancel-request id
                    if let Some(orig) = msg.get(tag::ORIG_CL_ORD_ID) {
                        self.active_orders.remove(orig);
                    }
                }
            }
            "8" => {
                self.active_orders.remove(&client_order_id);
                self.stats.orders_rejected += 1;
                warn!(
                    client_order_id = %client_order_id,
                    reason = msg.get(tag::TEXT).unwrap_or("unspecified"),
                    "order rejected"
                );
            }
            other => debug!(
                ord_status = other,
                exec_type = msg.get(tag::EXEC_TYPE).unwrap_or(""),
                "unhandled execution report status"
            ),
        }
    }

    /// Short, URL-safe, session-unique: "Q" + 16 hex chars.
    fn generate_cl_ord_id(&mut self) -> String {
        loop {
            let uuid = Uuid::new_v4().simple().to_string();
            let id = format!("Q{}", &uuid[..16]);
            debug_assert!(id.len() <= 18);
            if self.used_ids.insert(id.clone()) {
                return id;
            }
        }
    }
}
