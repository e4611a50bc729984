//! Support Chat
//!
//! A customer-support chat service:
//! - Account registration, login and password reset
//! - Chats and messages persisted in SQLite
//! - A streaming relay to the inference backend that rewrites `<think>` blocks on the fly
//! - A client library and terminal client for the chat API

pub mod auth;
pub mod client;
pub mod config;
pub mod events;
pub mod mailer;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod title;
pub mod utf8;

// Re-exports for convenience
pub use config::AppConfig;
pub use server::{router, run_server, AppState};
pub use store::{SqliteStore, Store};
