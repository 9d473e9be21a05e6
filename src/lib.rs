//! # jobref — reference retrieval for job listings
//!
//! Ingests large listing snapshots from a flaky relational source, indexes
//! the top-performing "champion" listings as vectors, and serves the most
//! similar champions for a free-text query.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, validation, and defaults
//! - **[`source`]** — Connection options and the paged row source (PostgreSQL)
//! - **[`fetch`]** — Resilient fetch loop: keyset pagination, retry with backoff, batch shrinking
//! - **[`snapshot`]** — Durable CSV snapshot of fetched listings
//! - **[`fingerprint`]** — Snapshot digest gating index reuse vs. rebuild
//! - **[`embedder`]** — Embedding trait boundary plus a deterministic test double
//! - **[`index`]** — SQLite + sqlite-vec champion index (build, persist, query)
//! - **[`retriever`]** — Facade deciding reuse/rebuild/empty once, then serving searches

pub mod config;
pub mod embedder;
pub mod fetch;
pub mod fingerprint;
pub mod index;
pub mod retriever;
pub mod snapshot;
pub mod source;
