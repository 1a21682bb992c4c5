//! Session and turn history management.
//!
//! This module provides in-memory session storage. Each session owns its
//! ordered turn history and a turn lock that keeps its turns strictly in
//! arrival order.
//!
//! # Architecture
//!
//! - [`Session`]: A single chat session
//! - [`SessionStore`]: Thread-safe store for all active sessions
//!
//! # Example
//!
//! ```rust
//! use study_companion::llm::ChatTurn;
//! use study_companion::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let session = store.get_or_create("default");
//! session.push_turn(ChatTurn::user_text("Hello!"));
//!
//! assert_eq!(session.turns().len(), 1);
//! ```

mod thread;

pub use thread::{Session, SessionStore};
