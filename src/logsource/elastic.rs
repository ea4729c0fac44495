//! Elasticsearch-backed event source
//!
//! Queries the T-Pot logstash indices over the REST API. Documents are
//! fetched with a fixed `_source` projection and paged with `search_after`
//! so a sub-window larger than one page is still retrieved completely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::logsource::{EventSource, HitEvent, REQUIRED_FIELDS};

const PAGE_SIZE: usize = 5000;

pub struct ElasticEventSource {
    client: Client,
    base_url: String,
    index_pattern: String,
}

impl ElasticEventSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index_pattern: "logstash-*".to_string(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base_url, self.index_pattern)
    }

    fn range_query(start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
        json!({
            "range": {
                "@timestamp": {
                    "gte": start.to_rfc3339(),
                    "lt": end.to_rfc3339(),
                }
            }
        })
    }

    async fn post_search(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.search_url())
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "search returned status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))
    }
}

#[async_trait]
impl EventSource for ElasticEventSource {
    async fn healthcheck(&self) -> Result<()> {
        tracing::debug!("performing healthcheck");
        let url = format!("{}/_cluster/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "healthcheck returned status {}",
                response.status()
            )));
        }
        tracing::debug!("log source is reachable");
        Ok(())
    }

    async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HitEvent>> {
        let mut events = Vec::new();
        let mut search_after: Option<Value> = None;

        loop {
            let mut body = json!({
                "query": Self::range_query(start, end),
                "_source": REQUIRED_FIELDS,
                "size": PAGE_SIZE,
                // _id tiebreaker keeps paging stable for equal timestamps
                "sort": [{"@timestamp": "asc"}, {"_id": "asc"}],
            });
            if let Some(after) = &search_after {
                body["search_after"] = after.clone();
            }

            let response = self.post_search(&body).await?;
            let hits = response["hits"]["hits"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            if hits.is_empty() {
                break;
            }
            let page_len = hits.len();
            search_after = hits.last().and_then(|h| h.get("sort").cloned());

            for hit in hits {
                match serde_json::from_value::<HitEvent>(hit["_source"].clone()) {
                    Ok(event) => events.push(event),
                    Err(e) => tracing::warn!(error = %e, "skipping unparsable log document"),
                }
            }
            if page_len < PAGE_SIZE || search_after.is_none() {
                break;
            }
        }
        Ok(events)
    }

    async fn count_for_honeypot(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        honeypot: &str,
    ) -> Result<u64> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [Self::range_query(start, end)],
                    "filter": [{"term": {"type.keyword": honeypot}}],
                }
            },
            "size": 0,
            "track_total_hits": true,
        });
        let response = self.post_search(&body).await?;
        Ok(response["hits"]["total"]["value"].as_u64().unwrap_or(0))
    }
}
