//! # Control Runtime
//!
//! Explicit construction of the whole control plane, in dependency order:
//! store, bus (with the five domain topics), telemetry, command service,
//! CDC publisher, consumer groups, ingest router, sweepers. No global
//! singletons; everything is built here and handed down.
//!
//! Lifecycle: [`wiring::Application::build`] → [`wiring::Application::start`]
//! → (long-running) → [`wiring::RunningApplication::shutdown`], with
//! shutdown idempotent and bounded.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod admin;
pub mod handlers;
pub mod provision;
pub mod wiring;

pub use provision::{issue_collector_key, register_device, register_miner};
pub use wiring::{Application, RunningApplication};
