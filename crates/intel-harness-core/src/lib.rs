//! # Intel Harness Core
//!
//! Runtime-free logic for Intel Harness: request fingerprinting, pipeline
//! models, progress events and their wire framing, best-effort metric
//! extraction, the analysis-mode lookup table, and the cache backend trait
//! with an in-memory implementation.
//!
//! This crate contains no tokio, HTTP, or Redis dependencies. Everything
//! that touches the network lives in the `intel-harness` crate.

pub mod clock;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod metrics;
pub mod models;
pub mod profiles;
pub mod store;
