//! Hedge-venue adapters.

pub mod kraken;
pub mod paper;

pub use kraken::KrakenClient;
pub use paper::PaperVenue;
