//! Cowrie extraction strategy
//!
//! The SSH/Telnet decoy produces the richest telemetry: besides scanner
//! IPs it yields payload URLs embedded in login and upload messages,
//! explicit file-download attempts, and full interactive sessions with
//! credentials and command sequences.

use async_trait::async_trait;
use chrono::Utc;

use crate::extraction::cowrie_parser::{
    SessionDraft, extract_downloads, extract_payloads, reconstruct_sessions,
};
use crate::extraction::processor::IocProcessor;
use crate::extraction::strategies::{ExtractionStrategy, ExtractionSummary, PipelineContext};
use crate::extraction::utils::candidates_from_hits;
use crate::logsource::HitEvent;
use crate::models::ioc_utils::ioc_kind_of;
use crate::models::{AttackType, CommandSequence, FileTransfer, IocCandidate};

pub struct CowrieStrategy {
    honeypot: String,
    payloads_in_message: usize,
    added_ip_downloads: usize,
    added_url_downloads: usize,
}

impl CowrieStrategy {
    pub fn new(honeypot: impl Into<String>) -> Self {
        Self {
            honeypot: honeypot.into(),
            payloads_in_message: 0,
            added_ip_downloads: 0,
            added_url_downloads: 0,
        }
    }

    async fn save_scanners(
        &mut self,
        hits: &[HitEvent],
        ctx: &mut PipelineContext,
        summary: &mut ExtractionSummary,
    ) -> anyhow::Result<()> {
        let candidates = candidates_from_hits(hits, ctx.mass_scanners.addresses());
        let mut processor = IocProcessor::new(&mut ctx.iocs, &ctx.sensors, &ctx.whatsmyip);
        for candidate in candidates {
            tracing::info!(ioc = %candidate.name, "found IP by honeypot cowrie");
            if let Some(record) = processor
                .add_ioc(candidate, AttackType::Scanner, Some(&self.honeypot))
                .await?
            {
                summary.ioc_names.push(record.name);
            }
        }
        Ok(())
    }

    async fn save_payloads(
        &mut self,
        hits: &[HitEvent],
        ctx: &mut PipelineContext,
    ) -> anyhow::Result<()> {
        let payloads = extract_payloads(hits);
        let mut processor = IocProcessor::new(&mut ctx.iocs, &ctx.sensors, &ctx.whatsmyip);
        for payload in payloads {
            tracing::info!(
                url = %payload.url,
                scanner = %payload.source_ip,
                "found hidden URL in payload"
            );
            let candidate =
                IocCandidate::new(&payload.hostname, ioc_kind_of(&payload.hostname), Utc::now())
                    .with_related_url(&payload.url);
            processor
                .add_ioc(candidate, AttackType::PayloadRequest, Some(&self.honeypot))
                .await?;
            processor
                .link_related(Some(&payload.source_ip), Some(&payload.hostname))
                .await?;
            self.payloads_in_message += 1;
        }
        Ok(())
    }

    async fn save_downloads(
        &mut self,
        hits: &[HitEvent],
        ctx: &mut PipelineContext,
        summary: &mut ExtractionSummary,
    ) -> anyhow::Result<()> {
        let downloads = extract_downloads(hits);
        let mut processor = IocProcessor::new(&mut ctx.iocs, &ctx.sensors, &ctx.whatsmyip);
        for download in downloads {
            tracing::info!(
                scanner = %download.source_ip,
                url = %download.url,
                "found IP trying to execute download"
            );
            let scanner = IocCandidate::new(
                &download.source_ip,
                ioc_kind_of(&download.source_ip),
                Utc::now(),
            );
            if let Some(record) = processor
                .add_ioc(scanner, AttackType::Scanner, Some(&self.honeypot))
                .await?
            {
                summary.ioc_names.push(record.name);
                self.added_ip_downloads += 1;
            }

            let host =
                IocCandidate::new(&download.hostname, ioc_kind_of(&download.hostname), Utc::now())
                    .with_related_url(&download.url);
            if processor
                .add_ioc(host, AttackType::PayloadRequest, Some(&self.honeypot))
                .await?
                .is_some()
            {
                self.added_url_downloads += 1;
            }
            processor
                .link_related(Some(&download.source_ip), Some(&download.hostname))
                .await?;
        }
        Ok(())
    }

    async fn save_sessions(
        &mut self,
        drafts: Vec<SessionDraft>,
        ctx: &mut PipelineContext,
    ) -> anyhow::Result<()> {
        for draft in drafts {
            // the scanner IOC normally exists from the scanner pass;
            // sessions from filtered-out sources are skipped
            let source = match ctx.iocs.get_by_name(&draft.source_ip).await? {
                Some(record) => record,
                None => {
                    let mut processor =
                        IocProcessor::new(&mut ctx.iocs, &ctx.sensors, &ctx.whatsmyip);
                    let candidate = IocCandidate::new(
                        &draft.source_ip,
                        ioc_kind_of(&draft.source_ip),
                        draft.start_time.unwrap_or_else(Utc::now),
                    );
                    match processor
                        .add_ioc(candidate, AttackType::Scanner, Some(&self.honeypot))
                        .await?
                    {
                        Some(record) => record,
                        None => {
                            tracing::debug!(
                                session_id = draft.session_id,
                                source = %draft.source_ip,
                                "skipping session from filtered source"
                            );
                            continue;
                        }
                    }
                }
            };

            tracing::info!(source = %source.name, session_id = draft.session_id, "adding cowrie session");
            let mut session = ctx
                .sessions
                .get_or_create_session(draft.session_id, &source.name)
                .await?;

            if draft.start_time.is_some() {
                session.start_time = draft.start_time;
            }
            if draft.duration > 0.0 {
                session.duration = draft.duration;
            }
            session.login_attempt = session.login_attempt || draft.login_attempt;
            session.command_execution = session.command_execution || draft.command_execution;
            session.interaction_count += draft.interaction_count;
            session.credentials.extend(draft.credentials.iter().cloned());

            if draft.login_attempt {
                ctx.iocs
                    .add_login_attempts(&source.name, draft.credentials.len() as i32)
                    .await?;
            }

            if draft.command_execution && !draft.commands.is_empty() {
                self.resolve_command_sequence(&mut session, &draft, ctx).await?;
            }

            if let Some(transfer) = &draft.file_transfer {
                ctx.sessions
                    .save_file_transfer(&FileTransfer {
                        session_id: draft.session_id,
                        shasum: transfer.shasum.clone(),
                        url: transfer.url.clone(),
                        destination_file: transfer.destination_file.clone(),
                    })
                    .await?;
            }

            ctx.sessions.save_session(&session).await?;
        }
        Ok(())
    }

    /// Content-address the session's commands and either reference the
    /// already-stored sequence with the same hash or persist a new one.
    async fn resolve_command_sequence(
        &mut self,
        session: &mut crate::models::CowrieSession,
        draft: &SessionDraft,
        ctx: &mut PipelineContext,
    ) -> anyhow::Result<()> {
        // a session continued across batches extends its stored sequence
        let mut commands = match &session.commands_hash {
            Some(hash) => ctx
                .sessions
                .get_command_sequence_by_hash(hash)
                .await?
                .map(|seq| seq.commands)
                .unwrap_or_default(),
            None => vec![],
        };
        commands.extend(draft.commands.iter().cloned());

        let commands_hash = CommandSequence::hash_commands(&commands);
        let last_seen = draft.commands_last_seen.unwrap_or_else(Utc::now);

        match ctx.sessions.get_command_sequence_by_hash(&commands_hash).await? {
            Some(existing) => {
                // already stored by an earlier session: keep one row,
                // move its last_seen forward
                ctx.sessions
                    .bump_sequence_last_seen(&existing.commands_hash, last_seen)
                    .await?;
                session.commands_hash = Some(existing.commands_hash);
            }
            None => {
                let sequence = CommandSequence {
                    commands_hash: commands_hash.clone(),
                    commands,
                    first_seen: draft.commands_first_seen.unwrap_or(last_seen),
                    last_seen,
                    cluster: None,
                };
                ctx.sessions.insert_command_sequence(&sequence).await?;
                session.commands_hash = Some(commands_hash);
            }
        }
        tracing::info!(
            source = %draft.source_ip,
            hash = session.commands_hash.as_deref().unwrap_or(""),
            "saved command execution"
        );
        Ok(())
    }
}

#[async_trait]
impl ExtractionStrategy for CowrieStrategy {
    fn strategy_name(&self) -> &'static str {
        "cowrie"
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

        self.save_scanners(hits, ctx, &mut summary).await?;
        self.save_payloads(hits, ctx).await?;
        self.save_downloads(hits, ctx, &mut summary).await?;

        let sessions = reconstruct_sessions(hits);
        let session_count = sessions.len();
        self.save_sessions(sessions, ctx).await?;

        tracing::info!(
            scanners = summary.ioc_names.len(),
            payloads_in_message = self.payloads_in_message,
            ip_downloads = self.added_ip_downloads,
            url_downloads = self.added_url_downloads,
            sessions = session_count,
            "cowrie extraction finished"
        );
        Ok(summary)
    }
}
