//! IOC create/merge processor

use crate::error::Result;
use crate::models::{AttackType, Ioc, IocCandidate, IocKind};
use crate::storage::{IocRepository, SensorRepository, WhatsMyIpRepository};

/// Processor for creating and updating IOC records.
///
/// Filters out sensor addresses and "what's my IP" probe domains, then
/// creates a new record or merges into the existing one. Borrowed from
/// the pipeline context for the duration of one strategy call.
pub struct IocProcessor<'a> {
    iocs: &'a mut IocRepository,
    sensors: &'a SensorRepository,
    whatsmyip: &'a WhatsMyIpRepository,
}

impl<'a> IocProcessor<'a> {
    pub fn new(
        iocs: &'a mut IocRepository,
        sensors: &'a SensorRepository,
        whatsmyip: &'a WhatsMyIpRepository,
    ) -> Self {
        Self {
            iocs,
            sensors,
            whatsmyip,
        }
    }

    /// Process one IOC observation.
    ///
    /// Returns the persisted record, or `None` when the candidate was
    /// filtered out (sensor match or known probe domain).
    pub async fn add_ioc(
        &mut self,
        candidate: IocCandidate,
        attack_type: AttackType,
        honeypot: Option<&str>,
    ) -> Result<Option<Ioc>> {
        tracing::debug!(ioc = %candidate.name, ?attack_type, "processing ioc");

        if self.sensors.contains(&candidate.name) {
            tracing::debug!(ioc = %candidate.name, "not saved because it is a sensor");
            return Ok(None);
        }
        if candidate.kind == IocKind::Domain && self.whatsmyip.contains(&candidate.name) {
            tracing::debug!(ioc = %candidate.name, "not saved because it is a whats-my-ip domain");
            return Ok(None);
        }

        let mut record = match self.iocs.get_by_name(&candidate.name).await? {
            None => {
                tracing::debug!(ioc = %candidate.name, "not seen before - creating a new record");
                let record = Ioc::from_candidate(&candidate);
                self.iocs.insert(&record).await?;
                record
            }
            Some(mut existing) => {
                tracing::debug!(ioc = %candidate.name, "already known - updating record");
                existing.merge_observation(&candidate);
                existing
            }
        };

        if let Some(honeypot_name) = honeypot {
            self.iocs.attach_honeypot(honeypot_name, &record.name).await?;
        }

        record.record_day_seen();
        record.apply_attack_type(attack_type);
        self.iocs.update(&record).await?;
        Ok(Some(record))
    }

    /// Link two IOC records as related, mirrored on both sides. Missing
    /// records (e.g. a filtered-out side) are skipped.
    pub async fn link_related(&self, a: Option<&str>, b: Option<&str>) -> Result<()> {
        let (Some(a), Some(b)) = (a, b) else {
            return Ok(());
        };
        if self.iocs.get_by_name(a).await?.is_none() || self.iocs.get_by_name(b).await?.is_none() {
            return Ok(());
        }
        tracing::debug!(a, b, "linking related iocs");
        self.iocs.link_related(a, b).await
    }
}
