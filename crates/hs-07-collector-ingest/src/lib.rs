//! # Collector Ingest API
//!
//! The HTTP surface between the fleet and the control plane:
//!
//! | Endpoint | Auth | Purpose |
//! |----------|------|---------|
//! | `POST /collector/upload` | `X-Collector-Key` | telemetry batches |
//! | `GET /collector/commands/pending` | `X-Collector-Key` | command long-poll |
//! | `POST /collector/commands/{id}/result` | `X-Collector-Key` | command results |
//! | `POST /commands` | session | create command |
//! | `POST /commands/{id}/approve` | session | approve command |
//! | `POST /commands/{id}/cancel` | session | cancel command |
//! | `GET /audit/verify` | session | audit chain verification |
//! | `GET /health` | none | SLO report |
//! | `GET /metrics` | none | prometheus exposition |
//!
//! Upload requests pass, in order: key authentication (SWR-cached lookup),
//! the per-key sliding-window rate limiter, the size caps (raw body and
//! gzip-decompressed), closed-world batch validation, then tenant scoping.
//! A batch that fails any gate is rejected whole; accepted batches commit
//! the live upsert, the history append and the upload log in one
//! transaction.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod keycache;
pub mod rate_limit;
pub mod router;
pub mod routes;
pub mod state;
pub mod validation;

pub use error::ApiError;
pub use keycache::KeyCache;
pub use rate_limit::{RateDecision, SlidingWindowLimiter};
pub use router::build_router;
pub use state::{AppState, CollectorIdentity, SessionAuth, StaticSessionAuth};
