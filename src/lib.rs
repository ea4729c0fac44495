//! Honeyforge
//!
//! Extracts, deduplicates, and scores indicators of compromise from
//! honeypot telemetry. A time-windowed log-source adapter feeds
//! per-honeypot extraction strategies; persisted IOC records are merged
//! and enriched with reconstructed Cowrie sessions, content-addressed
//! command sequences, cluster labels, and behavioral threat scores.

pub mod clustering;
pub mod enrichment;
pub mod error;
pub mod extraction;
pub mod jobs;
pub mod logsource;
pub mod models;
pub mod scoring;
pub mod storage;
