//! # traceview-core
//!
//! Core library for traceview - a transcript view over autonomous coding
//! agent sessions.
//!
//! This library provides:
//! - Domain types for sessions, events, steps, and turns
//! - A turn assembler that folds the flat event log into a conversation
//! - A reconciler merging the confirmed log with live not-yet-persisted events
//! - A live SSE channel and a session store HTTP client
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through three stages:
//! - **Transport:** confirmed snapshots fetched over HTTP, live events pushed
//!   over SSE
//! - **Reconciliation:** one duplicate-free merged log per session
//! - **Assembly:** the merged log recomputed wholesale into display turns
//!
//! ## Example
//!
//! ```rust,no_run
//! use traceview_core::{Config, SessionView};
//!
//! # async fn run() -> traceview_core::Result<()> {
//! let config = Config::load()?;
//! let mut view = SessionView::new(&config.server)?;
//! view.start("session-1").await?;
//! view.pump().await?;
//! for turn in view.turns() {
//!     println!("{:?}", turn.user_message);
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use channel::{ChannelItem, LiveChannel, Subscription};
pub use client::SessionClient;
pub use config::Config;
pub use error::{Error, Result};
pub use reconcile::Reconciler;
pub use transcript::assemble;
pub use types::*;
pub use view::SessionView;

// Public modules
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod transcript;
pub mod types;
pub mod view;
