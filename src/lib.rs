//! # Intel Harness
//!
//! A cached, streaming, multi-stage analysis pipeline for competitive
//! intelligence.
//!
//! A request names a subject (optionally a URL, a focus area and an
//! analysis mode). The pipeline runs three stages in sequence (research,
//! analyze, write), each one a call to an external language model, and
//! assembles a report with extracted scores. Reports are cached under a
//! fingerprint of the normalized request, so repeating a request is free
//! until its TTL expires.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐  hit   ┌──────────────┐
//!  request ──▶ │ Orchestrator │ ─────▶ │ ResultCache  │ ◀── memory / redis
//!              └──────┬───────┘ ◀───── └──────────────┘
//!                     │ miss
//!                     ▼
//!   research ──▶ analyze ──▶ write        (StageRunner → Capability)
//!                     │
//!                     ▼ events
//!              ┌──────────────┐  pull(heartbeat)  ┌──────────────┐
//!              │ EventChannel │ ────────────────▶ │  SSE stream  │ ──▶ client
//!              └──────────────┘                   └──────────────┘
//!                     ▲
//!              SessionManager (lookup, cancel, purge)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | Tracing subscriber setup |
//! | [`cache`] | Fingerprinted result cache with tiered TTLs |
//! | [`redis_store`] | Redis cache backend |
//! | [`capability`] | OpenAI-compatible and Ollama language-model providers |
//! | [`stages`] | Single-stage runner |
//! | [`orchestrator`] | Pipeline state machine |
//! | [`sink`] | Event sink trait and adapters |
//! | [`channel`] | Bounded per-run event channel with heartbeats |
//! | [`session`] | Streaming session registry |
//! | [`server`] | HTTP API and SSE transport |
//! | [`progress`] | CLI progress reporters |
//!
//! Runtime-free types (fingerprints, events, models, metrics, profiles and
//! the cache backend trait) live in the `intel-harness-core` crate.

pub mod cache;
pub mod capability;
pub mod channel;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod redis_store;
pub mod server;
pub mod session;
pub mod sink;
pub mod stages;
