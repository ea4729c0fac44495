//! ThreatFox tag feed

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::enrichment::TagFeed;
use crate::storage::tag::TagEntry;

const EXPORT_URL: &str = "https://threatfox.abuse.ch/export/json/ip-port/recent/";

/// One entry of the ThreatFox ip-port export.
#[derive(Debug, Deserialize)]
struct ThreatFoxEntry {
    ioc_value: String,
    #[serde(default)]
    malware_printable: Option<String>,
    #[serde(default)]
    threat_type: Option<String>,
}

pub struct ThreatFoxFeed {
    client: Client,
    export_url: String,
}

impl ThreatFoxFeed {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            export_url: EXPORT_URL.to_string(),
        }
    }

    fn entries_from_export(export: HashMap<String, Vec<ThreatFoxEntry>>) -> Vec<TagEntry> {
        let mut entries = vec![];
        for record in export.into_values().flatten() {
            // export values are "ip:port"; only the address maps to an IOC
            let ip = record
                .ioc_value
                .split(':')
                .next()
                .unwrap_or(&record.ioc_value)
                .to_string();
            if let Some(malware) = record.malware_printable.filter(|m| !m.is_empty()) {
                entries.push(TagEntry {
                    ioc_name: ip.clone(),
                    key: "malware".to_string(),
                    value: malware,
                });
            }
            if let Some(threat_type) = record.threat_type.filter(|t| !t.is_empty()) {
                entries.push(TagEntry {
                    ioc_name: ip,
                    key: "threat_type".to_string(),
                    value: threat_type,
                });
            }
        }
        entries.sort_by(|a, b| (&a.ioc_name, &a.key, &a.value).cmp(&(&b.ioc_name, &b.key, &b.value)));
        entries.dedup();
        entries
    }
}

impl Default for ThreatFoxFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TagFeed for ThreatFoxFeed {
    fn source(&self) -> &'static str {
        "threatfox"
    }

    async fn fetch(&self) -> anyhow::Result<Vec<TagEntry>> {
        let response = self.client.get(&self.export_url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("ThreatFox export returned status {}", response.status());
        }
        let export: HashMap<String, Vec<ThreatFoxEntry>> = response.json().await?;
        Ok(Self::entries_from_export(export))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_entries_are_split_and_deduplicated() {
        let export: HashMap<String, Vec<ThreatFoxEntry>> = serde_json::from_str(
            r#"{
                "1": [{"ioc_value": "1.2.3.4:8080", "malware_printable": "Mozi", "threat_type": "botnet_cc"}],
                "2": [{"ioc_value": "1.2.3.4:8081", "malware_printable": "Mozi", "threat_type": "botnet_cc"}],
                "3": [{"ioc_value": "5.6.7.8:1234", "malware_printable": ""}]
            }"#,
        )
        .unwrap();
        let entries = ThreatFoxFeed::entries_from_export(export);
        // same ip reported on two ports collapses to one tag pair
        assert_eq!(
            entries,
            vec![
                TagEntry {
                    ioc_name: "1.2.3.4".to_string(),
                    key: "malware".to_string(),
                    value: "Mozi".to_string()
                },
                TagEntry {
                    ioc_name: "1.2.3.4".to_string(),
                    key: "threat_type".to_string(),
                    value: "botnet_cc".to_string()
                },
            ]
        );
    }
}
