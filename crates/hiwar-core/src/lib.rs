//! Core library for Hiwar — a persistent chat-session store.
//!
//! A [`SessionStore`] owns a set of ordered conversations, persists them
//! to a durable slot (SQLite or a JSON file) with debounced best-effort
//! writes, and forwards conversation history to an OpenAI-compatible
//! completion endpoint. At most one completion request is in flight per
//! store; a newer send supersedes a pending one.

pub mod completion;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod persist;
pub mod storage;
pub mod store;
pub mod tokens;

pub use completion::{Completion, CompletionClient};
pub use config::{CompletionConfig, HiwarConfig, PersistenceConfig};
pub use error::{CompletionError, CompletionErrorKind, HiwarError, Result};
pub use export::ExportFormat;
pub use model::{Message, Role, Session};
pub use store::SessionStore;
