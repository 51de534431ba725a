//! # HashSentry Test Suite
//!
//! Cross-crate scenarios the unit tests cannot cover: the outbox → bus →
//! consumer pipeline end to end, the ingest HTTP surface, command
//! round-trips through an in-process edge, and audit chain integrity.

// Test-only crate
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

#[cfg(test)]
mod integration;

#[cfg(test)]
pub(crate) mod support;
