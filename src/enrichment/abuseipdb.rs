//! AbuseIPDB tag feed

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::enrichment::TagFeed;
use crate::storage::tag::TagEntry;

const BLACKLIST_URL: &str = "https://api.abuseipdb.com/api/v2/blacklist";

#[derive(Debug, Deserialize)]
struct BlacklistResponse {
    data: Vec<BlacklistEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlacklistEntry {
    ip_address: String,
    abuse_confidence_score: i64,
}

pub struct AbuseIpDbFeed {
    client: Client,
    api_key: Option<String>,
}

impl AbuseIpDbFeed {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        Self { client, api_key }
    }
}

#[async_trait]
impl TagFeed for AbuseIpDbFeed {
    fn source(&self) -> &'static str {
        "abuseipdb"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch(&self) -> anyhow::Result<Vec<TagEntry>> {
        let Some(api_key) = &self.api_key else {
            anyhow::bail!("AbuseIPDB API key not configured");
        };
        let response = self
            .client
            .get(BLACKLIST_URL)
            .header("Key", api_key)
            .header("Accept", "application/json")
            .query(&[("confidenceMinimum", "75")])
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("AbuseIPDB returned status {}", response.status());
        }
        let blacklist: BlacklistResponse = response.json().await?;
        Ok(blacklist
            .data
            .into_iter()
            .map(|entry| TagEntry {
                ioc_name: entry.ip_address,
                key: "abuse_confidence".to_string(),
                value: entry.abuse_confidence_score.to_string(),
            })
            .collect())
    }
}
