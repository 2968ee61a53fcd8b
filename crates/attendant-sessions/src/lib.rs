//! `attendant-sessions` — in-memory, per-conversation state: message
//! history, active model tier, pinned context, and the ambient
//! "current conversation" binding used by the tool-use loop (4.G).
//!
//! Sessions are process-owned, not persisted (spec.md §3 "Ownership");
//! eviction is TTL (24h) or LRU once the session count exceeds its cap.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use types::{ContentBlock, Message, Role, Session};
