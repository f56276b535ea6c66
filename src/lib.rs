//! mailbin — disposable email alias manager.
//!
//! Inbound mail for generated alias addresses is matched against the alias
//! directory, mined for one-time verification codes, and persisted; a JSON
//! API plus a single-page admin UI handle alias CRUD and code retrieval.

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod store;
