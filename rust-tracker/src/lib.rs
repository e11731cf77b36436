//! Replytrack - send tracking and reply correlation for outbound campaigns.
//!
//! This library provides shared modules for the three replytrack binaries:
//! - `replytrack-send`: Registers and transmits personalized sends
//! - `replytrack-poll`: Periodically correlates inbox replies with sends
//! - `replytrack-web`: Tracking API and inbound reply webhook
//!
//! ## Architecture
//!
//! ```text
//! send → Registrar → TrackingStore ← mark_replied ← correlate ← MailboxPoller
//!                          ↑
//!              HTTP API / inbound webhook
//! ```

pub mod config;
pub mod correlate;
pub mod cycle;
pub mod error;
pub mod mailbox;
pub mod model;
pub mod outbound;
pub mod registrar;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod template;
pub mod transmit;
pub mod web;

// Re-export commonly used types
pub use config::{Config, PollConfig};
pub use correlate::correlate;
pub use cycle::{run_cycle, CycleReport, FetchStatus};
pub use error::{PollError, RegistrationError, StoreError, TransmitError};
pub use mailbox::MailboxPoller;
pub use model::{CampaignWindow, InboundMessage, SendStatus, TrackingEntry};
pub use registrar::Registrar;
pub use store::{MarkOutcome, MarkTarget, TrackingStore};
pub use web::AppState;
