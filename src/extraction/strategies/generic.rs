//! Generic extraction strategy
//!
//! Handles every honeypot without specialized logic: each source IP in
//! the chunk becomes one scanner IOC associated with the honeypot's
//! category.

use async_trait::async_trait;

use crate::extraction::processor::IocProcessor;
use crate::extraction::strategies::{ExtractionStrategy, ExtractionSummary, PipelineContext};
use crate::extraction::utils::candidates_from_hits;
use crate::logsource::HitEvent;
use crate::models::AttackType;

pub struct GenericStrategy {
    honeypot: String,
}

impl GenericStrategy {
    pub fn new(honeypot: impl Into<String>) -> Self {
        Self {
            honeypot: honeypot.into(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for GenericStrategy {
    fn strategy_name(&self) -> &'static str {
        "generic"
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
        let candidates = candidates_from_hits(hits, ctx.mass_scanners.addresses());
        let mut processor = IocProcessor::new(&mut ctx.iocs, &ctx.sensors, &ctx.whatsmyip);

        for candidate in candidates {
            tracing::info!(ioc = %candidate.name, honeypot = %self.honeypot, "found IoC");
            if let Some(record) = processor
                .add_ioc(candidate, AttackType::Scanner, Some(&self.honeypot))
                .await?
            {
                summary.ioc_names.push(record.name);
            }
        }
        tracing::info!(
            honeypot = %self.honeypot,
            count = summary.ioc_names.len(),
            "added IoCs"
        );
        Ok(summary)
    }
}
