//! FIX 5.0SP2 over FIXT.1.1: wire codec, bounded sent-store, session
//! engine.

pub mod message;
pub mod session;
pub mod store;

pub use message::{FixDecodeError, FixMessage};
pub use session::{FixSession, SessionError, SessionEvent};
