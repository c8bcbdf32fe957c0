//! Local order book: price → size per side.
//!
//! Prices are keyed by fixed-point integer ticks so sides stay sorted
//! without floating-point keys. Every stored level has size > 0.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{BookLevel, Side};

/// Fixed-point multiplier for price keys (8 decimal places).
pub const PRICE_SCALE: f64 = 100_000_000.0;

#[inline]
fn price_key(price: f64) -> i64 {
    (price * PRICE_SCALE).round() as i64
}

#[inline]
fn key_price(key: i64) -> f64 {
    key as f64 / PRICE_SCALE
}

/// Best bid/ask view of the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TopOfBook {
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub midpoint: f64,
    pub spread: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadInfo {
    pub dollars: f64,
    pub bps: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    bids: BTreeMap<i64, f64>,
    asks: BTreeMap<i64, f64>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Sets a price level. Non-positive size removes the level instead;
    /// zero-size entries are never stored.
    pub fn set_level(&mut self, side: Side, price: f64, size: f64) {
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if size > 0.0 {
            book.insert(price_key(price), size);
        } else {
            book.remove(&price_key(price));
        }
    }

    pub fn remove_level(&mut self, side: Side, price: f64) {
        match side {
            Side::Buy => self.bids.remove(&price_key(price)),
            Side::Sell => self.asks.remove(&price_key(price)),
        };
    }

    /// Bid levels, best (highest) first.
    pub fn bids(&self) -> Vec<BookLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(&k, &size)| BookLevel { price: key_price(k), size })
            .collect()
    }

    /// Ask levels, best (lowest) first.
    pub fn asks(&self) -> Vec<BookLevel> {
        self.asks
            .iter()
            .map(|(&k, &size)| BookLevel { price: key_price(k), size })
            .collect()
    }

    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    pub fn best_bid_ask(&self) -> Option<TopOfBook> {
        let (&bid_key, &bid_size) = self.bids.iter().next_back()?;
        let (&ask_key, &ask_size) = self.asks.iter().next()?;
        let best_bid = key_price(bid_key);
        let best_ask = key_price(ask_key);
        Some(TopOfBook {
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            midpoint: (best_bid + best_ask) / 2.0,
            spread: best_ask - best_bid,
        })
    }

    pub fn spread(&self) -> Option<SpreadInfo> {
        let top = self.best_bid_ask()?;
        let dollars = top.spread;
        let bps = if top.midpoint > 0.0 { dollars / top.midpoint * 10_000.0 } else { 0.0 };
        Some(SpreadInfo { dollars, bps })
    }
}
