//! Orchestrator.
//!
//! Owns every core component, wires their event channels together on a
//! single task, and enforces lifecycle and the emergency policy. All
//! cross-component knowledge lives here: components only know their own
//! channels.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::engine::hedge::{HedgeEvent, HedgeExecutor, HedgeVenue, SharedPrice, Urgency};
use crate::engine::inventory::{ExposureSide, InventoryEvent, InventoryManager};
use crate::engine::pnl::{PnlEvent, PnlSummary, PnlTracker};
use crate::engine::quote::{QuoteEngine, QuoteEvent};
use crate::fix::message::msg_type;
use crate::fix::session::{FixSession, SessionEvent};
use crate::market_data::feed::{BookEvent, MarketDataFeed};
use crate::models::{Fill, PriceUpdate, Side};

/// Operator-facing engine events. Persistence and alerting consume
/// these; none of them sit on the trading path.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    Stopped { summary: PnlSummary },
    Emergency { reason: String, net_position: f64 },
    Disconnected { reason: String },
    LimitWarning { side: ExposureSide, utilization: f64 },
    /// Audit record of every applied fill, maker and hedge alike.
    Fill(Fill),
}

pub struct Orchestrator {
    config: AppConfig,
    session: Arc<FixSession>,
    session_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    feed: Arc<MarketDataFeed>,
    feed_rx: Option<mpsc::UnboundedReceiver<BookEvent>>,
    inventory: Arc<RwLock<InventoryManager>>,
    inventory_rx: Option<mpsc::UnboundedReceiver<InventoryEvent>>,
    pnl: PnlTracker,
    pnl_rx: Option<mpsc::UnboundedReceiver<PnlEvent>>,
    quote_engine: QuoteEngine,
    quote_rx: Option<mpsc::UnboundedReceiver<QuoteEvent>>,
    hedge: Arc<HedgeExecutor>,
    hedge_rx: Option<mpsc::UnboundedReceiver<HedgeEvent>>,
    shared_price: Arc<SharedPrice>,
    price_tx: mpsc::UnboundedSender<PriceUpdate>,
    price_rx: Option<mpsc::UnboundedReceiver<PriceUpdate>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    feed_started: bool,
    running: bool,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        venue: Arc<dyn HedgeVenue>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (session, session_rx) = FixSession::new(config.session.clone());
        let (feed, feed_rx) =
            MarketDataFeed::new(config.market_data.clone(), config.quote.symbol.clone());
        let (inventory, inventory_rx) = InventoryManager::new(config.inventory.clone());
        let inventory = Arc::new(RwLock::new(inventory));
        let (pnl, pnl_rx) = PnlTracker::new(config.pnl.clone());
        let (quote_engine, quote_rx) = QuoteEngine::new(
            config.quote.clone(),
            Arc::clone(&session),
            Arc::clone(&inventory),
        );
        let shared_price = SharedPrice::new();
        let (hedge, hedge_rx) = HedgeExecutor::new(
            config.hedge.clone(),
            venue,
            shared_price.clone() as Arc<dyn crate::engine::hedge::PriceView>,
        );
        let (price_tx, price_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                session,
                session_rx: Some(session_rx),
                feed,
                feed_rx: Some(feed_rx),
                inventory,
                inventory_rx: Some(inventory_rx),
                pnl,
                pnl_rx: Some(pnl_rx),
                quote_engine,
                quote_rx: Some(quote_rx),
                hedge: Arc::new(hedge),
                hedge_rx: Some(hedge_rx),
                shared_price,
                price_tx,
                price_rx: Some(price_rx),
                events,
                feed_started: false,
                running: false,
            },
            events_rx,
        )
    }

    /// Handle for the external price source. The orchestrator keeps its
    /// own sender alive, so the channel never closes under the run
    /// loop.
    pub fn price_sender(&self) -> mpsc::UnboundedSender<PriceUpdate> {
        self.price_tx.clone()
    }

    /// Connects order entry (fatal on failure), then market data
    /// (best-effort), then marks the engine started.
    pub async fn start(&mut self) -> Result<()> {
        info!(symbol = %self.config.quote.symbol, "starting market-making engine");
        self.session
            .connect()
            .await
            .context("order-entry session logon failed")?;

        match Arc::clone(&self.feed).start().await {
            Ok(()) => self.feed_started = true,
            Err(e) => warn!("market-data feed unavailable, continuing without book: {}", e),
        }

        self.running = true;
        self.events.send(EngineEvent::Started).ok();
        info!("engine started");
        Ok(())
    }

    /// Main event loop. Returns when a shutdown is requested (or the
    /// shutdown sender is dropped).
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) {
        let mut price_rx = self.price_rx.take().expect("run may only be called once");
        let mut session_rx = self.session_rx.take().expect("run may only be called once");
        let mut feed_rx = self.feed_rx.take().expect("run may only be called once");
        let mut inventory_rx = self.inventory_rx.take().expect("run may only be called once");
        let mut pnl_rx = self.pnl_rx.take().expect("run may only be called once");
        let mut quote_rx = self.quote_rx.take().expect("run may only be called once");
        let mut hedge_rx = self.hedge_rx.take().expect("run may only be called once");

        let mut drain_timer = tokio::time::interval(std::time::Duration::from_millis(
            self.config.drain_interval_ms.max(10),
        ));
        let mut pnl_timer = tokio::time::interval(std::time::Duration::from_millis(
            self.config.pnl.log_interval_ms.max(1_000),
        ));

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.stop().await;
                    return;
                }
                Some(update) = price_rx.recv() => self.on_price_update(update).await,
                Some(ev) = session_rx.recv() => self.on_session_event(ev).await,
                Some(ev) = quote_rx.recv() => self.on_quote_event(ev).await,
                Some(ev) = inventory_rx.recv() => self.on_inventory_event(ev).await,
                Some(ev) = hedge_rx.recv() => self.on_hedge_event(ev),
                Some(ev) = pnl_rx.recv() => self.on_pnl_event(ev),
                Some(ev) = feed_rx.recv() => self.on_book_event(ev),
                _ = drain_timer.tick() => {
                    if self.running {
                        self.quote_engine.drain_queue().await;
                    }
                }
                _ = pnl_timer.tick() => {
                    if self.running {
                        self.log_summary();
                    }
                }
            }
        }
    }

    /// Shutdown: pull quotes, flatten what the hedge venue will take,
    /// then tear the sessions down best-effort.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        info!("stopping market-making engine");

        self.quote_engine.cancel_all_quotes("shutdown").await;

        let net = self.inventory.read().net_position();
        if net.abs() > self.config.hedge.min_hedge_size {
            info!(net_position = net, "flattening residual position before shutdown");
            let side = if net > 0.0 { Side::Sell } else { Side::Buy };
            self.hedge.execute_hedge(side, net.abs(), Urgency::Urgent).await;
        }

        if self.feed_started {
            self.feed.stop().await;
        }
        self.session.disconnect().await;

        let summary = self.pnl.summary();
        info!(
            realized = summary.realized_pnl,
            unrealized = summary.unrealized_pnl,
            fees = summary.total_fees,
            net_pnl = summary.net_pnl,
            "engine stopped"
        );
        self.events.send(EngineEvent::Stopped { summary }).ok();
    }

    async fn on_price_update(&mut self, update: PriceUpdate) {
        if !self.running {
            return;
        }
        self.shared_price.update(update);
        self.pnl.mark_to_market(update.mid);
        self.quote_engine.on_price_update(&update).await;
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message { msg, .. } => {
                if msg.msg_type() == Some(msg_type::EXECUTION_REPORT) {
                    self.quote_engine.on_execution_report(&msg);
                } else {
                    debug!(msg_type = ?msg.msg_type(), "unhandled order-entry message");
                }
            }
            SessionEvent::Disconnected { reason } => {
                warn!(reason = %reason, "order-entry session down");
                self.events.send(EngineEvent::Disconnected { reason }).ok();
            }
            SessionEvent::Reject { ref_seq, text } => {
                warn!(?ref_seq, ?text, "order-entry session reject");
            }
            SessionEvent::ResendCompleted { resent, skipped, .. } => {
                debug!(resent, skipped, "order-entry resend served");
            }
            SessionEvent::LoggedOn | SessionEvent::Sent { .. } => {}
        }
    }

    async fn on_quote_event(&mut self, event: QuoteEvent) {
        match event {
            QuoteEvent::Fill(fill) => {
                self.inventory.write().on_fill(&fill);
                self.pnl.on_fill(&fill, true);
                self.events.send(EngineEvent::Fill(fill)).ok();
            }
            QuoteEvent::CancelAll { reason, cancelled } => {
                info!(reason = %reason, cancelled, "quotes cancelled");
            }
        }
    }

    async fn on_inventory_event(&mut self, event: InventoryEvent) {
        match event {
            InventoryEvent::HedgeSignal { side, size } => {
                info!(%side, size, "hedge signal");
                let hedge = Arc::clone(&self.hedge);
                tokio::spawn(async move {
                    hedge.execute_hedge(side, size, Urgency::Normal).await;
                });
            }
            InventoryEvent::Emergency { reason, net_position } => {
                error!(reason = %reason, net_position, "EMERGENCY: halting quoting");
                self.quote_engine.emergency_halt(&reason).await;
                self.events.send(EngineEvent::Emergency { reason, net_position }).ok();
            }
            InventoryEvent::LimitWarning { side, utilization } => {
                self.events.send(EngineEvent::LimitWarning { side, utilization }).ok();
            }
            InventoryEvent::Fill { position } => {
                debug!(
                    net_position = position.net_position,
                    entry_price = position.entry_price,
                    "position updated"
                );
            }
        }
    }

    fn on_hedge_event(&mut self, event: HedgeEvent) {
        match event {
            HedgeEvent::HedgeFilled { fill, slippage, used_market } => {
                debug!(slippage, used_market, "applying hedge fill");
                self.inventory.write().on_fill(&fill);
                self.pnl.on_fill(&fill, false);
                self.events.send(EngineEvent::Fill(fill)).ok();
            }
            HedgeEvent::HedgeFailed { side, size, reason } => {
                warn!(%side, size, reason = %reason, "hedge failed, position stays unhedged");
            }
            HedgeEvent::HedgePlaced { .. } | HedgeEvent::HedgeTimeout { .. } => {}
        }
    }

    fn on_pnl_event(&mut self, event: PnlEvent) {
        match event {
            PnlEvent::SignificantChange { net_pnl, delta } => {
                info!(net_pnl, delta, "significant P&L change");
            }
        }
    }

    /// The book feed is advisory: when enabled, top-of-book drives the
    /// reference price channel like any external source would.
    fn on_book_event(&mut self, event: BookEvent) {
        if event != BookEvent::BookChange {
            return;
        }
        if !self.config.price_from_book {
            return;
        }
        if let Some(top) = self.feed.best_bid_ask() {
            self.price_tx
                .send(PriceUpdate {
                    mid: top.midpoint,
                    best_bid: top.best_bid,
                    best_ask: top.best_ask,
                    confidence: 1.0,
                    timestamp: chrono::Utc::now(),
                })
                .ok();
        }
    }

    fn log_summary(&self) {
        let pnl = self.pnl.summary();
        let hedge = self.hedge.stats();
        let session = self.session.stats();
        info!(
            realized = pnl.realized_pnl,
            unrealized = pnl.unrealized_pnl,
            fees = pnl.total_fees,
            net_pnl = pnl.net_pnl,
            net_position = pnl.open_net_position,
            active_orders = self.quote_engine.active_order_count(),
            queued_actions = self.quote_engine.queued_actions(),
            hedges = hedge.total_hedges,
            avg_slippage = hedge.avg_slippage(),
            fix_sent = session.messages_sent,
            fix_received = session.messages_received,
            "periodic summary"
        );
    }
}
