//! Hit aggregation shared by extraction strategies

use std::collections::{BTreeMap, HashSet};

use crate::logsource::HitEvent;
use crate::models::ioc_utils::{correct_ip_reputation, ioc_kind_of, parse_global_ip};
use crate::models::IocCandidate;

/// The Heralding honeypot records one login attempt per hit, so its hit
/// count doubles as a login-attempt count.
const LOGIN_PER_HIT_HONEYPOT: &str = "Heralding";

/// Aggregate a honeypot's hits into one scanner candidate per source IP.
///
/// Groups hits by source, drops non-global addresses, collects the sorted
/// unique destination-port set and min/max timestamps, and corrects the
/// reputation label against the mass-scanner reference set.
pub fn candidates_from_hits(
    hits: &[HitEvent],
    mass_scanners: &HashSet<String>,
) -> Vec<IocCandidate> {
    let mut hits_by_ip: BTreeMap<String, Vec<&HitEvent>> = BTreeMap::new();
    for hit in hits {
        let Some(src_ip) = hit.src_ip.as_deref() else {
            continue;
        };
        hits_by_ip.entry(src_ip.to_string()).or_default().push(hit);
    }

    let mut candidates = vec![];
    for (ip, ip_hits) in hits_by_ip {
        if parse_global_ip(&ip).is_none() {
            continue;
        }

        let mut ports: Vec<i32> = ip_hits.iter().filter_map(|h| h.dest_port).collect();
        ports.sort_unstable();
        ports.dedup();

        let timestamps: Vec<_> = ip_hits.iter().filter_map(|h| h.timestamp).collect();
        let first = timestamps.iter().min().copied();
        let last = timestamps.iter().max().copied();

        let first_hit = ip_hits[0];
        let reputation = correct_ip_reputation(
            &ip,
            first_hit.ip_reputation.as_deref().unwrap_or(""),
            mass_scanners,
        );
        let is_login_honeypot = first_hit.honeypot.as_deref() == Some(LOGIN_PER_HIT_HONEYPOT);

        let mut candidate = IocCandidate::new(
            ip.clone(),
            ioc_kind_of(&ip),
            last.unwrap_or_else(chrono::Utc::now),
        );
        if let Some(first_seen) = first {
            candidate.first_seen = first_seen;
        }
        candidate.interaction_count = ip_hits.len() as i32;
        candidate.login_attempts = if is_login_honeypot {
            ip_hits.len() as i32
        } else {
            0
        };
        candidate.ip_reputation = reputation;
        candidate.asn = first_hit.asn();
        candidate.destination_ports = ports;
        candidates.push(candidate);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn hit(ip: &str, port: i32, time: &str) -> HitEvent {
        HitEvent {
            timestamp: Some(ts(time)),
            src_ip: Some(ip.to_string()),
            dest_port: Some(port),
            honeypot: Some("Tanner".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn aggregates_hits_per_source_ip() {
        let hits = vec![
            hit("8.8.8.8", 22, "2026-08-01 10:00:00"),
            hit("8.8.8.8", 80, "2026-08-01 10:05:00"),
            hit("8.8.8.8", 22, "2026-08-01 10:10:00"),
        ];
        let candidates = candidates_from_hits(&hits, &HashSet::new());
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.destination_ports, vec![22, 80]);
        assert_eq!(c.interaction_count, 3);
        assert_eq!(c.first_seen, ts("2026-08-01 10:00:00"));
        assert_eq!(c.last_seen, ts("2026-08-01 10:10:00"));
        assert_eq!(c.login_attempts, 0);
    }

    #[test]
    fn non_global_sources_are_dropped() {
        let hits = vec![
            hit("192.168.1.10", 22, "2026-08-01 10:00:00"),
            hit("127.0.0.1", 22, "2026-08-01 10:00:00"),
            hit("8.8.8.8", 22, "2026-08-01 10:00:00"),
        ];
        let candidates = candidates_from_hits(&hits, &HashSet::new());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "8.8.8.8");
    }

    #[test]
    fn heralding_hits_count_as_login_attempts() {
        let mut first = hit("8.8.8.8", 22, "2026-08-01 10:00:00");
        first.honeypot = Some("Heralding".to_string());
        let mut second = hit("8.8.8.8", 22, "2026-08-01 10:01:00");
        second.honeypot = Some("Heralding".to_string());
        let candidates = candidates_from_hits(&[first, second], &HashSet::new());
        assert_eq!(candidates[0].login_attempts, 2);
    }

    #[test]
    fn mass_scanner_reputation_is_corrected() {
        let scanners: HashSet<String> = ["8.8.8.8".to_string()].into_iter().collect();
        let mut flagged = hit("8.8.8.8", 22, "2026-08-01 10:00:00");
        flagged.ip_reputation = Some("known attacker".to_string());
        let candidates = candidates_from_hits(&[flagged], &scanners);
        assert_eq!(candidates[0].ip_reputation, "mass scanner");
    }
}
