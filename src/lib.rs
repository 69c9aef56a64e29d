//! Resumable batch translation of large nested dictionary documents.
//!
//! Documents are split into fixed-size batches of top-level entries. Each
//! batch's translatable leaves are deduplicated by content fingerprint,
//! resolved through a persistent cache, and only the misses are sent to the
//! translation provider by a bounded worker pool. Output and progress are
//! committed per batch so an interrupted run resumes where it stopped.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod persist;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod walker;
