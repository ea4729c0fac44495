//! Log source adapter: time windowing and chunked retrieval
//!
//! Retrieval is windowed and chunked: the lookback window is split into
//! consecutive extraction-interval sub-windows and fetched lazily, one
//! sub-window at a time, so peak memory is bounded by a single chunk.

pub mod elastic;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Default minutes between two subsequent extraction runs.
pub const EXTRACTION_INTERVAL: u32 = 10;

/// Lookback used on the very first run to backfill history (3 days).
pub const INITIAL_EXTRACTION_TIMESPAN: i64 = 60 * 24 * 3;

/// The fixed field projection requested from the log index. Everything
/// else in the raw documents is ignored.
pub const REQUIRED_FIELDS: &[&str] = &[
    "@timestamp",
    "src_ip",
    "dest_port",
    "ip_rep",
    "geoip.asn",
    "url",
    "message",
    "eventid",
    "session",
    "duration",
    "username",
    "password",
    "t-pot_ip_ext",
    "type",
    "reason",
    "correlation_id",
    "deobfuscated_payload",
    "shasum",
    "destfile",
];

/// One projected log event from the honeypot index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HitEvent {
    #[serde(rename = "@timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub dest_port: Option<i32>,
    #[serde(default, rename = "ip_rep")]
    pub ip_reputation: Option<String>,
    #[serde(default)]
    pub geoip: Option<GeoHint>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub eventid: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "t-pot_ip_ext")]
    pub sensor_ip: Option<String>,
    #[serde(default, rename = "type")]
    pub honeypot: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub deobfuscated_payload: Option<String>,
    #[serde(default)]
    pub shasum: Option<String>,
    #[serde(default)]
    pub destfile: Option<String>,
}

/// Geo/ASN hint attached to an event by the log pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoHint {
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub asn: Option<String>,
}

impl HitEvent {
    /// ASN as a normalized string, if the geo hint carried one.
    pub fn asn(&self) -> Option<String> {
        self.geoip.as_ref().and_then(|g| g.asn.clone())
    }
}

// Correlation ids and ASNs arrive as either JSON strings or numbers
// depending on the shipper version.
fn de_opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Calculate a time window that ends at the last completed extraction
/// interval and looks back a given number of minutes.
///
/// `interval_minutes` must be a positive divisor of 60 and
/// `lookback_minutes` must be at least one interval.
pub fn get_time_window(
    reference_time: DateTime<Utc>,
    lookback_minutes: i64,
    interval_minutes: u32,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if interval_minutes == 0 || 60 % interval_minutes != 0 {
        return Err(PipelineError::Config(format!(
            "extraction interval must be a positive divisor of 60, got {interval_minutes}"
        )));
    }
    if lookback_minutes < i64::from(interval_minutes) {
        return Err(PipelineError::Config(format!(
            "lookback must be at least {interval_minutes} minutes, got {lookback_minutes}"
        )));
    }
    let rounded_minute = (reference_time.minute() / interval_minutes) * interval_minutes;
    let window_end = reference_time
        .with_minute(rounded_minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| PipelineError::Config("reference time truncation failed".to_string()))?;
    let window_start = window_end - Duration::minutes(lookback_minutes);
    Ok((window_start, window_end))
}

/// Time-windowed, field-projected event query interface over the log index.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Verify connectivity. Runs once per retrieval, before any query.
    async fn healthcheck(&self) -> Result<()>;

    /// Fetch all projected events with `start <= timestamp < end`.
    async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HitEvent>>;

    /// Count events of one honeypot type in the window. Used by monitoring.
    async fn count_for_honeypot(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        honeypot: &str,
    ) -> Result<u64>;
}

/// Adapter over an [`EventSource`] producing per-sub-window batches.
pub struct LogSourceAdapter<'a> {
    source: &'a dyn EventSource,
    interval_minutes: u32,
}

impl<'a> LogSourceAdapter<'a> {
    pub fn new(source: &'a dyn EventSource, interval_minutes: u32) -> Self {
        Self {
            source,
            interval_minutes,
        }
    }

    /// Start a chunked retrieval over the lookback window ending at the
    /// last completed interval before `reference_time`.
    ///
    /// Performs a single healthcheck up front; failure aborts the whole
    /// retrieval with [`PipelineError::SourceUnavailable`].
    pub async fn search(
        &self,
        reference_time: DateTime<Utc>,
        lookback_minutes: i64,
    ) -> Result<ChunkedSearch<'a>> {
        self.source.healthcheck().await?;
        tracing::debug!(lookback_minutes, "starting chunked retrieval");
        let (window_start, window_end) =
            get_time_window(reference_time, lookback_minutes, self.interval_minutes)?;
        Ok(ChunkedSearch {
            source: self.source,
            chunk_start: window_start,
            window_end,
            interval: Duration::minutes(i64::from(self.interval_minutes)),
        })
    }

    /// Whether a specific honeypot produced any events in the lookback
    /// window ending at `reference_time`.
    pub async fn has_honeypot_been_hit(
        &self,
        reference_time: DateTime<Utc>,
        lookback_minutes: i64,
        honeypot: &str,
    ) -> Result<bool> {
        let (start, end) = get_time_window(reference_time, lookback_minutes, self.interval_minutes)?;
        Ok(self.source.count_for_honeypot(start, end, honeypot).await? > 0)
    }
}

/// Lazy, finite, non-restartable sequence of per-sub-window batches.
/// Sub-windows the caller never asks for are never fetched.
pub struct ChunkedSearch<'a> {
    source: &'a dyn EventSource,
    chunk_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    interval: Duration,
}

impl ChunkedSearch<'_> {
    /// Fetch the next sub-window batch, sorted by timestamp, or `None`
    /// once the window is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<HitEvent>>> {
        if self.chunk_start >= self.window_end {
            return Ok(None);
        }
        let chunk_end = (self.chunk_start + self.interval).min(self.window_end);
        tracing::debug!(start = %self.chunk_start, end = %chunk_end, "querying log source");
        let mut hits = self.source.fetch_window(self.chunk_start, chunk_end).await?;
        tracing::debug!(count = hits.len(), "chunk fetched");
        hits.sort_by_key(|h| h.timestamp);
        self.chunk_start = chunk_end;
        Ok(Some(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn window_truncates_to_last_completed_interval() {
        let (start, end) = get_time_window(ts("2026-08-06 14:23:00"), 10, 10).unwrap();
        assert_eq!(start, ts("2026-08-06 14:10:00"));
        assert_eq!(end, ts("2026-08-06 14:20:00"));
    }

    #[test]
    fn window_on_exact_boundary() {
        let (start, end) = get_time_window(ts("2026-08-06 14:20:00"), 10, 10).unwrap();
        assert_eq!(start, ts("2026-08-06 14:10:00"));
        assert_eq!(end, ts("2026-08-06 14:20:00"));
    }

    #[test]
    fn window_spanning_multiple_intervals() {
        let (start, end) = get_time_window(ts("2026-08-06 00:07:30"), 120, 5).unwrap();
        assert_eq!(end, ts("2026-08-06 00:05:00"));
        assert_eq!(start, ts("2026-08-05 22:05:00"));
    }

    #[test]
    fn lookback_smaller_than_interval_is_rejected() {
        assert!(matches!(
            get_time_window(ts("2026-08-06 14:23:00"), 5, 10),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn interval_must_divide_sixty() {
        assert!(matches!(
            get_time_window(ts("2026-08-06 14:23:00"), 60, 7),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            get_time_window(ts("2026-08-06 14:23:00"), 60, 0),
            Err(PipelineError::Config(_))
        ));
    }

    struct FakeSource {
        healthy: bool,
        calls: AtomicUsize,
        healthchecks: AtomicUsize,
    }

    impl FakeSource {
        fn new(healthy: bool) -> Self {
            Self {
                healthy,
                calls: AtomicUsize::new(0),
                healthchecks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn healthcheck(&self) -> Result<()> {
            self.healthchecks.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(())
            } else {
                Err(PipelineError::SourceUnavailable("down".to_string()))
            }
        }

        async fn fetch_window(
            &self,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<HitEvent>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // two out-of-order events per chunk
            Ok(vec![
                HitEvent {
                    timestamp: Some(start + Duration::minutes(2)),
                    ..Default::default()
                },
                HitEvent {
                    timestamp: Some(start),
                    ..Default::default()
                },
            ])
        }

        async fn count_for_honeypot(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _honeypot: &str,
        ) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn chunked_search_yields_sorted_interval_chunks() {
        let source = FakeSource::new(true);
        let adapter = LogSourceAdapter::new(&source, 10);
        let mut search = adapter.search(ts("2026-08-06 14:23:00"), 30).await.unwrap();

        let mut chunks = 0;
        while let Some(chunk) = search.next_chunk().await.unwrap() {
            chunks += 1;
            assert_eq!(chunk.len(), 2);
            assert!(chunk[0].timestamp <= chunk[1].timestamp);
        }
        // 30 minute lookback at 10 minute intervals = 3 chunks
        assert_eq!(chunks, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        // exactly one healthcheck for the whole retrieval
        assert_eq!(source.healthchecks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stopping_early_skips_later_subwindows() {
        let source = FakeSource::new(true);
        let adapter = LogSourceAdapter::new(&source, 10);
        let mut search = adapter.search(ts("2026-08-06 14:23:00"), 30).await.unwrap();
        let _ = search.next_chunk().await.unwrap();
        drop(search);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_healthcheck_aborts_retrieval() {
        let source = FakeSource::new(false);
        let adapter = LogSourceAdapter::new(&source, 10);
        let result = adapter.search(ts("2026-08-06 14:23:00"), 30).await;
        assert!(matches!(result, Err(PipelineError::SourceUnavailable(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn correlation_id_accepts_strings_and_numbers() {
        let from_str: HitEvent =
            serde_json::from_str(r#"{"correlation_id": "abc-123"}"#).unwrap();
        assert_eq!(from_str.correlation_id.as_deref(), Some("abc-123"));
        let from_num: HitEvent = serde_json::from_str(r#"{"correlation_id": 42}"#).unwrap();
        assert_eq!(from_num.correlation_id.as_deref(), Some("42"));
    }
}
