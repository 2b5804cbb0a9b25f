//! huddled - multi-user line-based chat server
//!
//! This crate provides the server side of huddle:
//! - `registry` - Name to session map, the single source of truth for who is online
//! - `server` - TCP acceptor plus the per-session reader, writer and watchdog tasks
//! - `broadcast` - Process-wide fan-out of plain-text messages
//! - `hub` / `dispatch` - Routing context and command effects
//! - `config` - TOML/env/CLI configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       huddled                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   ChatServer    │────▶│     Registry                │   │
//! │  │  (TCP accept)   │     │  (name -> Arc<Session>)     │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │ snapshot          │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│────▶│   Broadcaster               │   │
//! │  │reader/writer/dog│     │   (ordered fan-out)         │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code never calls `.unwrap()`, `.expect()` or `panic!()`.
//! A failed channel send means the receiving session is already closing
//! and is absorbed.

pub mod broadcast;
pub mod cli;
pub mod config;
mod dispatch;
pub mod hub;
pub mod registry;
pub mod server;

#[cfg(test)]
mod testing;
