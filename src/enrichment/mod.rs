//! Tag enrichment feeds
//!
//! Feeds deliver per-IOC lookup tables (key/value pairs keyed by IOC
//! name) that are applied with a replace-for-source policy: one
//! transactional delete-and-bulk-insert per feed run, leaving exactly
//! one row per (ioc, key, value) the feed currently reports.

pub mod abuseipdb;
pub mod threatfox;

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::TagRepository;
use crate::storage::tag::TagEntry;

pub use abuseipdb::AbuseIpDbFeed;
pub use threatfox::ThreatFoxFeed;

/// A threat-intelligence feed producing tag entries.
#[async_trait]
pub trait TagFeed: Send + Sync {
    /// Source name recorded on every tag this feed produces.
    fn source(&self) -> &'static str;

    /// Whether required configuration (API keys) is present.
    fn is_configured(&self) -> bool {
        true
    }

    /// Fetch the feed's current lookup table.
    async fn fetch(&self) -> anyhow::Result<Vec<TagEntry>>;
}

/// Apply every configured feed. A failing feed is logged and skipped;
/// its previously stored tags stay untouched.
pub async fn apply_feeds(tags: &TagRepository, feeds: &[Box<dyn TagFeed>]) -> Result<u64> {
    let mut total = 0;
    for feed in feeds {
        if !feed.is_configured() {
            tracing::debug!(source = feed.source(), "feed not configured, skipping");
            continue;
        }
        match feed.fetch().await {
            Ok(entries) => {
                tracing::info!(source = feed.source(), count = entries.len(), "feed fetched");
                total += tags.replace_tags_for_source(feed.source(), &entries).await?;
            }
            Err(e) => {
                tracing::warn!(source = feed.source(), error = %e, "feed fetch failed, keeping existing tags");
            }
        }
    }
    Ok(total)
}
