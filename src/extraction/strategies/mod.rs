//! Honeypot-specific extraction strategies
//!
//! A strategy turns one honeypot's hits for a chunk into IOC records and,
//! for Cowrie, reconstructed sessions. The factory resolves specialized
//! strategies by exact honeypot name and falls back to the generic one
//! for everything else.

pub mod cowrie;
pub mod generic;
pub mod log4pot;

use async_trait::async_trait;

use crate::logsource::HitEvent;
use crate::storage::{
    CowrieSessionRepository, IocRepository, MassScannerRepository, SensorRepository,
    WhatsMyIpRepository,
};

pub use cowrie::CowrieStrategy;
pub use generic::GenericStrategy;
pub use log4pot::Log4potStrategy;

/// Repositories shared by all strategies during one pipeline run.
pub struct PipelineContext {
    pub iocs: IocRepository,
    pub sensors: SensorRepository,
    pub sessions: CowrieSessionRepository,
    pub whatsmyip: WhatsMyIpRepository,
    pub mass_scanners: MassScannerRepository,
}

/// What one strategy call produced.
#[derive(Debug, Default)]
pub struct ExtractionSummary {
    /// Names of IOC records touched by this strategy, for rescoring.
    pub ioc_names: Vec<String>,
}

#[async_trait]
pub trait ExtractionStrategy: Send {
    /// Short identifier of the strategy variant.
    fn strategy_name(&self) -> &'static str;

    /// Name of the honeypot this strategy instance handles.
    fn honeypot(&self) -> &str;

    /// Extract IOC records from one chunk of this honeypot's hits.
    async fn extract_from_hits(
        &mut self,
        hits: &[HitEvent],
        ctx: &mut PipelineContext,
    ) -> anyhow::Result<ExtractionSummary>;
}

/// Resolve the strategy for a honeypot name. Specialized strategies match
/// case-sensitively; unknown names always get the generic strategy.
pub fn strategy_for(honeypot: &str) -> Box<dyn ExtractionStrategy> {
    match honeypot {
        "Cowrie" => Box::new(CowrieStrategy::new(honeypot)),
        "Log4pot" => Box::new(Log4potStrategy::new(honeypot)),
        _ => Box::new(GenericStrategy::new(honeypot)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_matches_case_sensitively() {
        assert_eq!(strategy_for("Cowrie").strategy_name(), "cowrie");
        assert_eq!(strategy_for("Log4pot").strategy_name(), "log4pot");
        // lowercase names do not match the specialized strategies
        assert_eq!(strategy_for("cowrie").strategy_name(), "generic");
        assert_eq!(strategy_for("Heralding").strategy_name(), "generic");
        assert_eq!(strategy_for("Heralding").honeypot(), "Heralding");
    }
}
