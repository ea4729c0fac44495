//! IOC extraction pipeline
//!
//! Orchestrates one extraction run: chunked retrieval from the log
//! source, per-honeypot grouping, strategy dispatch, and sensor
//! registration. Chunks are processed strictly sequentially, so sensor
//! registrations and IOC merges from one chunk are visible to later ones.

pub mod cowrie_parser;
pub mod processor;
pub mod strategies;
pub mod utils;

use std::collections::BTreeMap;

use chrono::Utc;
use metrics::counter;

use crate::error::{PipelineError, Result};
use crate::logsource::{EventSource, HitEvent, INITIAL_EXTRACTION_TIMESPAN, LogSourceAdapter};
use crate::storage::Storage;
use strategies::{PipelineContext, strategy_for};

pub struct ExtractionPipeline<'a> {
    source: &'a dyn EventSource,
    interval_minutes: u32,
    ctx: PipelineContext,
}

/// Outcome of one extraction run.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Names of all IOC records touched, deduplicated, for rescoring.
    pub ioc_names: Vec<String>,
}

impl<'a> ExtractionPipeline<'a> {
    /// Build a pipeline with fresh per-run repository caches.
    pub async fn new(
        source: &'a dyn EventSource,
        storage: &Storage,
        interval_minutes: u32,
    ) -> Result<ExtractionPipeline<'a>> {
        let pool = storage.pool().clone();
        let ctx = PipelineContext {
            iocs: crate::storage::IocRepository::new(pool.clone()).await?,
            sensors: crate::storage::SensorRepository::new(pool.clone()).await?,
            sessions: crate::storage::CowrieSessionRepository::new(pool.clone()),
            whatsmyip: crate::storage::WhatsMyIpRepository::new(pool.clone()).await?,
            mass_scanners: crate::storage::MassScannerRepository::new(pool).await?,
        };
        Ok(Self {
            source,
            interval_minutes,
            ctx,
        })
    }

    /// Window size for this run: a multi-day backfill on the very first
    /// run, one extraction interval otherwise.
    async fn minutes_back_to_lookup(&self) -> Result<i64> {
        if self.ctx.iocs.is_empty().await? {
            return Ok(INITIAL_EXTRACTION_TIMESPAN);
        }
        Ok(i64::from(self.interval_minutes))
    }

    /// Execute the extraction pipeline. Returns the touched IOC names.
    pub async fn execute(&mut self) -> Result<ExtractionOutcome> {
        let lookback = self.minutes_back_to_lookup().await?;
        let adapter = LogSourceAdapter::new(self.source, self.interval_minutes);
        let mut search = adapter.search(Utc::now(), lookback).await?;

        let mut outcome = ExtractionOutcome::default();
        while let Some(chunk) = search.next_chunk().await? {
            self.process_chunk(chunk, &mut outcome).await?;
        }

        outcome.ioc_names.sort();
        outcome.ioc_names.dedup();
        counter!("honeyforge_iocs_extracted").increment(outcome.ioc_names.len() as u64);
        Ok(outcome)
    }

    async fn process_chunk(
        &mut self,
        chunk: Vec<HitEvent>,
        outcome: &mut ExtractionOutcome,
    ) -> Result<()> {
        let mut hits_by_honeypot: BTreeMap<String, Vec<HitEvent>> = BTreeMap::new();

        for hit in chunk {
            // skip hits with non-existing or empty sources or types
            let Some(src_ip) = hit.src_ip.as_deref() else {
                continue;
            };
            if src_ip.trim().is_empty() {
                continue;
            }
            let Some(honeypot) = hit.honeypot.clone().filter(|hp| !hp.trim().is_empty()) else {
                continue;
            };
            if let Some(sensor_ip) = hit.sensor_ip.clone() {
                self.ctx.sensors.add_sensor(&sensor_ip).await?;
            }
            hits_by_honeypot.entry(honeypot).or_default().push(hit);
        }

        for (honeypot, hits) in hits_by_honeypot {
            if !self.ctx.iocs.is_ready_for_extraction(&honeypot).await? {
                tracing::debug!(honeypot, "disabled - skipping chunk");
                continue;
            }
            let mut strategy = strategy_for(&honeypot);
            match strategy.extract_from_hits(&hits, &mut self.ctx).await {
                Ok(summary) => outcome.ioc_names.extend(summary.ioc_names),
                Err(e) => {
                    // one honeypot's failure must not abort the others
                    let error = PipelineError::ExtractionStrategyFailure {
                        honeypot: honeypot.clone(),
                        source: e,
                    };
                    tracing::error!(honeypot, error = %error, "strategy failed, skipping honeypot chunk");
                    counter!("honeyforge_strategy_failures").increment(1);
                }
            }
        }
        Ok(())
    }
}
