//! Market-making core: inventory, P&L, quoting, hedging, and the
//! orchestrator that wires them together.

pub mod hedge;
pub mod inventory;
pub mod orchestrator;
pub mod pnl;
pub mod quote;

pub use hedge::{HedgeExecutor, HedgeVenue, Urgency};
pub use inventory::InventoryManager;
pub use orchestrator::{EngineEvent, Orchestrator};
pub use pnl::PnlTracker;
pub use quote::QuoteEngine;
