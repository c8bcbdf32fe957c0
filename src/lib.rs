//! Automated market-making engine: two-sided quoting on a FIX maker
//! venue with REST hedging on Kraken.

pub mod config;
pub mod engine;
pub mod fix;
pub mod market_data;
pub mod models;
pub mod venue;

pub use config::AppConfig;
pub use engine::{EngineEvent, Orchestrator};
pub use models::{Fill, PriceUpdate, Side, Venue};
