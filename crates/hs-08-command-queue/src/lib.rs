//! # Command Queue - Cloud to Edge Dispatch
//!
//! Durable, tenant-scoped, idempotent miner commands:
//!
//! ```text
//! pending ──(require_approval?)──► pending_approval ─approve─► queued
//!    │                                                        │
//!    └──(no approval)───────────────────► queued ────fetch──► running
//!                                           │                   │
//!                                       ─cancel─► cancelled      ├─ok──► succeeded
//!                                           │                   └─err─► failed
//!                                       ─expire─► expired
//! ```
//!
//! Every command is HMAC-signed at creation over
//! `id ‖ dispatch_nonce ‖ expires_at ‖ SHA-256(payload)` with a key derived
//! from the site device's shared secret. The edge refuses unverifiable
//! commands; the server refuses results whose nonce is already terminal.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod nonce;
pub mod service;

pub use nonce::TerminalNonceCache;
pub use service::{CommandService, CreateOutcome, SweepReport, SweeperHandle};
