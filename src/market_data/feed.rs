//! Market-data feed.
//!
//! Runs its own FIX session, subscribes to one symbol (35=V) and folds
//! 35=W snapshots and 35=X incrementals into a local order book. Book
//! reads are lock-guarded snapshots; consumers get change notifications
//! over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::fix::message::{self as fix, msg_type, tag};
use crate::fix::session::{FixSession, SessionError, SessionEvent};
use crate::market_data::book::{OrderBook, SpreadInfo, TopOfBook};
use crate::models::{BookLevel, Side};

/// Book notifications published by the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum BookEvent {
    /// A full snapshot replaced the book.
    Snapshot { bids: usize, asks: usize },
    /// An incremental refresh was applied.
    Update { entries: usize },
    /// The book changed in any way.
    BookChange,
}

pub struct MarketDataFeed {
    session: Arc<FixSession>,
    symbol: String,
    request_id: String,
    book: RwLock<OrderBook>,
    events: mpsc::UnboundedSender<BookEvent>,
    session_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    running: AtomicBool,
}

impl MarketDataFeed {
    pub fn new(
        config: SessionConfig,
        symbol: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<BookEvent>) {
        let (session, session_rx) = FixSession::new(config);
        let (events, rx) = mpsc::unbounded_channel();
        let feed = Arc::new(Self {
            session,
            symbol: symbol.into(),
            request_id: format!("MD-{}", Uuid::new_v4().simple().to_string().get(..8).unwrap_or("0")),
            book: RwLock::new(OrderBook::new()),
            events,
            session_rx: Mutex::new(Some(session_rx)),
            running: AtomicBool::new(false),
        });
        (feed, rx)
    }

    /// Connects the market-data session and subscribes. The feed keeps
    /// itself subscribed across session reconnects.
    pub async fn start(self: Arc<Self>) -> Result<(), SessionError> {
        self.session.connect().await?;
        self.subscribe().await?;
        self.running.store(true, Ordering::SeqCst);
        let rx = self.session_rx.lock().take();
        if let Some(rx) = rx {
            tokio::spawn(Arc::clone(&self).run(rx));
        }
        info!(symbol = %self.symbol, "market-data feed started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.session.disconnect().await;
    }

    /// Sends the market-data request: snapshot plus updates, full book,
    /// both sides. The two 269 entries are true repeating-group
    /// occurrences, so the body is built as an explicit field list.
    async fn subscribe(&self) -> Result<(), SessionError> {
        let body = vec![
            (tag::MSG_TYPE, msg_type::MARKET_DATA_REQUEST.to_string()),
            (tag::MD_REQ_ID, self.request_id.clone()),
            (tag::SUBSCRIPTION_REQUEST_TYPE, "1".to_string()),
            (tag::MARKET_DEPTH, "0".to_string()),
            (tag::NO_MD_ENTRY_TYPES, "2".to_string()),
            (tag::MD_ENTRY_TYPE, "0".to_string()),
            (tag::MD_ENTRY_TYPE, "1".to_string()),
            (tag::NO_RELATED_SYM, "1".to_string()),
            (tag::SYMBOL, self.symbol.clone()),
        ];
        self.session.send_fields(body).await?;
        debug!(symbol = %self.symbol, request_id = %self.request_id, "market-data subscription sent");
        Ok(())
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        let mut needs_resubscribe = false;
        while let Some(ev) = rx.recv().await {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            match ev {
                SessionEvent::Message { msg, raw } => match msg.msg_type() {
                    Some(msg_type::MARKET_DATA_SNAPSHOT) => self.apply_snapshot(&raw),
                    Some(msg_type::MARKET_DATA_INCREMENTAL) => self.apply_incremental(&raw),
                    other => debug!(msg_type = ?other, "ignoring market-data session message"),
                },
                SessionEvent::Disconnected { reason } => {
                    warn!(reason, "market-data session down");
                    needs_resubscribe = true;
                }
                SessionEvent::LoggedOn => {
                    if needs_resubscribe {
                        needs_resubscribe = false;
                        if let Err(e) = self.subscribe().await {
                            warn!("resubscribe failed: {}", e);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// 35=W: clear both sides and re-insert every entry with size > 0.
    fn apply_snapshot(&self, raw: &[u8]) {
        let entries = fix::parse_md_entries(raw);
        let (bids, asks) = {
            let mut book = self.book.write();
            book.clear();
            for entry in &entries {
                let side = match entry.entry_type {
                    Some('0') => Side::Buy,
                    Some('1') => Side::Sell,
                    _ => continue,
                };
                let (price, size) = match (entry.price, entry.size) {
                    (Some(p), Some(s)) => (p, s),
                    _ => continue,
                };
                if size > 0.0 {
                    book.set_level(side, price, size);
                }
            }
            book.depth()
        };
        debug!(bids, asks, "order book snapshot applied");
        self.events.send(BookEvent::Snapshot { bids, asks }).ok();
        self.events.send(BookEvent::BookChange).ok();
    }

    /// 35=X: apply per-entry MDUpdateAction. Delete or zero size removes
    /// the level, anything else upserts it.
    fn apply_incremental(&self, raw: &[u8]) {
        let entries = fix::parse_md_entries(raw);
        let mut applied = 0usize;
        {
            let mut book = self.book.write();
            for entry in &entries {
                let side = match entry.entry_type {
                    Some('0') => Side::Buy,
                    Some('1') => Side::Sell,
                    _ => continue,
                };
                let price = match entry.price {
                    Some(p) => p,
                    None => continue,
                };
                let size = entry.size.unwrap_or(0.0);
                if entry.update_action == Some('2') || size <= 0.0 {
                    book.remove_level(side, price);
                } else {
                    book.set_level(side, price, size);
                }
                applied += 1;
            }
        }
        if applied > 0 {
            self.events.send(BookEvent::Update { entries: applied }).ok();
            self.events.send(BookEvent::BookChange).ok();
        }
    }

    /// Bids sorted descending, asks ascending.
    pub fn order_book(&self) -> (Vec<BookLevel>, Vec<BookLevel>) {
        let book = self.book.read();
        (book.bids(), book.asks())
    }

    pub fn best_bid_ask(&self) -> Option<TopOfBook> {
        self.book.read().best_bid_ask()
    }

    pub fn spread(&self) -> Option<SpreadInfo> {
        self.book.read().spread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::message::encode_fields;

    fn test_feed() -> (Arc<MarketDataFeed>, mpsc::UnboundedReceiver<BookEvent>) {
        MarketDataFeed::new(SessionConfig::default(), "BTC-USD")
    }

    fn snapshot_frame() -> Vec<u8> {
        encode_fields(&[
            (tag::MSG_TYPE, "W".into()),
            (tag::SYMBOL, "BTC-USD".into()),
            (tag::NO_MD_ENTRIES, "4".into()),
            (tag::MD_ENTRY_TYPE, "0".into()),
            (tag::MD_ENTRY_PX, "99990.5".into()),
            (tag::MD_ENTRY_SIZE, "1.5".into()),
            (tag::MD_ENTRY_TYPE, "0".into()),
            (tag::MD_ENTRY_PX, "99980.0".into()),
            (tag::MD_ENTRY_SIZE, "2.0".into()),
            (tag::MD_ENTRY_TYPE, "1".into()),
            (tag::MD_ENTRY_PX, "100010.5".into()),
            (tag::MD_ENTRY_SIZE, "1.0".into()),
            (tag::MD_ENTRY_TYPE, "1".into()),
            (tag::MD_ENTRY_PX, "100020.0".into()),
            (tag::MD_ENTRY_SIZE, "0".into()),
        ])
    }

    #[tokio::test]
    async fn test_snapshot_builds_book_and_drops_zero_sizes() {
        let (feed, mut rx) = test_feed();
        feed.apply_snapshot(&snapshot_frame());

        let (bids, asks) = feed.order_book();
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, 99_990.5);
        assert_eq!(bids[1].price, 99_980.0);
        // The zero-size ask entry was dropped
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].price, 100_010.5);

        assert_eq!(rx.try_recv().unwrap(), BookEvent::Snapshot { bids: 2, asks: 1 });
        assert_eq!(rx.try_recv().unwrap(), BookEvent::BookChange);
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let (feed, _rx) = test_feed();
        feed.apply_snapshot(&snapshot_frame());
        let before = feed.order_book();
        feed.apply_snapshot(&snapshot_frame());
        assert_eq!(feed.order_book(), before);
    }

    #[tokio::test]
    async fn test_incremental_new_change_delete() {
        let (feed, mut rx) = test_feed();
        feed.apply_snapshot(&snapshot_frame());
        while rx.try_recv().is_ok() {}

        let incremental = encode_fields(&[
            (tag::MSG_TYPE, "X".into()),
            (tag::NO_MD_ENTRIES, "3".into()),
            // New ask level
            (tag::MD_UPDATE_ACTION, "0".into()),
            (tag::MD_ENTRY_TYPE, "1".into()),
            (tag::MD_ENTRY_PX, "100015.0".into()),
            (tag::MD_ENTRY_SIZE, "3.0".into()),
            // Change best bid size
            (tag::MD_UPDATE_ACTION, "1".into()),
            (tag::MD_ENTRY_TYPE, "0".into()),
            (tag::MD_ENTRY_PX, "99990.5".into()),
            (tag::MD_ENTRY_SIZE, "0.7".into()),
            // Delete the other bid
            (tag::MD_UPDATE_ACTION, "2".into()),
            (tag::MD_ENTRY_TYPE, "0".into()),
            (tag::MD_ENTRY_PX, "99980.0".into()),
            (tag::MD_ENTRY_SIZE, "2.0".into()),
        ]);
        feed.apply_incremental(&incremental);

        let (bids, asks) = feed.order_book();
        assert_eq!(bids, vec![BookLevel { price: 99_990.5, size: 0.7 }]);
        assert_eq!(asks.len(), 2);
        assert_eq!(asks[0].price, 100_010.5);
        assert_eq!(asks[1].price, 100_015.0);

        assert_eq!(rx.try_recv().unwrap(), BookEvent::Update { entries: 3 });
        assert_eq!(rx.try_recv().unwrap(), BookEvent::BookChange);
    }

    #[tokio::test]
    async fn test_incremental_zero_size_change_removes_level() {
        let (feed, _rx) = test_feed();
        feed.apply_snapshot(&snapshot_frame());
        let incremental = encode_fields(&[
            (tag::MSG_TYPE, "X".into()),
            (tag::NO_MD_ENTRIES, "1".into()),
            (tag::MD_UPDATE_ACTION, "1".into()),
            (tag::MD_ENTRY_TYPE, "1".into()),
            (tag::MD_ENTRY_PX, "100010.5".into()),
            (tag::MD_ENTRY_SIZE, "0".into()),
        ]);
        feed.apply_incremental(&incremental);
        let (_, asks) = feed.order_book();
        assert!(asks.is_empty());
    }

    #[tokio::test]
    async fn test_best_bid_ask_accessor() {
        let (feed, _rx) = test_feed();
        assert!(feed.best_bid_ask().is_none());
        feed.apply_snapshot(&snapshot_frame());
        let top = feed.best_bid_ask().unwrap();
        assert_eq!(top.best_bid, 99_990.5);
        assert_eq!(top.best_ask, 100_010.5);
        assert!((top.midpoint - 100_000.5).abs() < 1e-9);
        let spread = feed.spread().unwrap();
        assert!((spread.dollars - 20.0).abs() < 1e-9);
        assert!(spread.bps > 0.0);
    }
}
