//! Shared types used across the market-making engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// FIX tag 54 representation.
    pub fn fix_code(&self) -> &'static str {
        match self {
            Side::Buy => "1",
            Side::Sell => "2",
        }
    }

    pub fn from_fix_code(code: &str) -> Option<Side> {
        match code {
            "1" => Some(Side::Buy),
            "2" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Venue a fill happened on. The maker venue quotes; the hedge venue
/// absorbs inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Truex,
    Hedge,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Truex => write!(f, "truex"),
            Venue::Hedge => write!(f, "hedge"),
        }
    }
}

/// An immutable execution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Exchange-assigned execution id.
    pub exec_id: String,
    pub client_order_id: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub venue: Venue,
    pub timestamp: DateTime<Utc>,
    /// Set when the venue reported which side of the book we were on.
    pub is_maker: Option<bool>,
}

impl Fill {
    /// Fills with non-positive quantity or price are never applied.
    pub fn is_valid(&self) -> bool {
        self.quantity > 0.0 && self.price > 0.0
    }
}

/// A reference price observation from the external price source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub mid: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    /// Source confidence in [0, 1]. Quoting is gated on this.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Snaps a price to the nearest valid tick.
pub fn snap_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    (price / tick_size).round() * tick_size
}
