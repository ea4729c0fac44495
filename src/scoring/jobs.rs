//! Scoring jobs: periodic score application and model training

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::scoring::Scorer;
use crate::scoring::features::{
    correlated_features, encode_matrix, extract_features, feature_columns, honeypot_vocabulary,
};
use crate::scoring::forest::{ModelStore, interaction_model, recurrence_model};
use crate::scoring::threat_level::ThreatLevel;
use crate::storage::ioc::{IocFeatureRow, ScoreRow};
use crate::storage::{HighRiskNetworkRepository, IocRepository};

/// How far back an IOC's last activity may lie to be rescored.
const SCORING_LOOKBACK_DAYS: i64 = 30;
const SCORE_WRITE_BATCH: usize = 1000;
const TRAINING_DATA_FILE: &str = "training_data.json";
const CORRELATION_THRESHOLD: f64 = 0.7;

/// The feature snapshot persisted between training runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub rows: Vec<IocFeatureRow>,
}

impl TrainingSnapshot {
    /// Reference date of the snapshot: the newest last_seen day.
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.last_seen.date_naive()).max()
    }
}

/// Verify the stored snapshot strictly predates the fresh one. Training
/// against a stale-or-newer snapshot would produce negative or garbage
/// interaction deltas.
pub fn validate_snapshot_ordering(
    previous: &TrainingSnapshot,
    current: &TrainingSnapshot,
) -> Result<(NaiveDate, NaiveDate)> {
    let previous_date = previous
        .reference_date()
        .ok_or_else(|| PipelineError::Config("previous snapshot is empty".to_string()))?;
    let current_date = current
        .reference_date()
        .ok_or_else(|| PipelineError::Config("current snapshot is empty".to_string()))?;
    if previous_date >= current_date {
        return Err(PipelineError::TrainingDataOrderingViolation {
            previous: previous_date,
            current: current_date,
        });
    }
    Ok((previous_date, current_date))
}

/// Decide which score rows actually need writing.
///
/// Stored rows present in the computed set are overwritten when any
/// column changed; rows absent from it have nonzero scores reset to zero
/// when `reset_missing` is set. Unchanged rows produce no writes, so a
/// second application over unchanged data writes nothing.
pub fn plan_score_updates(
    stored: &[ScoreRow],
    computed: &HashMap<String, ScoreRow>,
    reset_missing: bool,
) -> Vec<ScoreRow> {
    let mut updates = vec![];
    for row in stored {
        match computed.get(&row.name) {
            Some(new) => {
                if new != row {
                    updates.push(new.clone());
                }
            }
            None if reset_missing
                && (row.recurrence_probability != 0.0
                    || row.expected_interactions != 0.0
                    || row.threat_level != 0.0) =>
            {
                updates.push(ScoreRow {
                    name: row.name.clone(),
                    recurrence_probability: 0.0,
                    expected_interactions: 0.0,
                    threat_level: 0.0,
                });
            }
            None => {}
        }
    }
    updates
}

/// Applies all registered scorers and writes changed scores back.
pub struct UpdateScores<'a> {
    iocs: &'a IocRepository,
    scorers: Vec<Box<dyn Scorer>>,
}

impl<'a> UpdateScores<'a> {
    /// Assemble the scorer list: the threat-level heuristic plus every
    /// trainable model with persisted state. Untrained models are
    /// skipped with a warning until the training job has run.
    pub fn new(
        iocs: &'a IocRepository,
        highrisk: &HighRiskNetworkRepository,
        store: &ModelStore,
    ) -> Self {
        let mut scorers: Vec<Box<dyn Scorer>> =
            vec![Box::new(ThreatLevel::new(highrisk.high_risk_asns().clone()))];
        for mut model in [recurrence_model(), interaction_model()] {
            match model.load(store) {
                Ok(true) => scorers.push(Box::new(model)),
                Ok(false) => {
                    tracing::warn!(model = model.name(), "no trained model found, skipping scorer");
                }
                Err(e) => {
                    tracing::warn!(model = model.name(), error = %e, "failed to load model, skipping scorer");
                }
            }
        }
        Self { iocs, scorers }
    }

    fn compute_scores(&self, rows: &[IocFeatureRow]) -> Result<HashMap<String, ScoreRow>> {
        let reference = rows
            .iter()
            .map(|r| r.last_seen.date_naive())
            .max()
            .unwrap_or_else(|| Utc::now().date_naive());
        tracing::info!(rows = rows.len(), %reference, "extracting features");
        let features = extract_features(rows, reference);

        let mut columns: HashMap<&str, Vec<f64>> = HashMap::new();
        for scorer in &self.scorers {
            match scorer.score(&features) {
                Ok(scores) => {
                    columns.insert(scorer.score_name(), scores);
                }
                Err(e) => {
                    tracing::warn!(scorer = scorer.name(), error = %e, "scorer failed, column left at zero");
                }
            }
        }

        let column = |name: &str, index: usize| -> f64 {
            columns
                .get(name)
                .and_then(|values| values.get(index))
                .copied()
                .unwrap_or(0.0)
        };
        Ok(features
            .iter()
            .enumerate()
            .map(|(i, f)| {
                (
                    f.name.clone(),
                    ScoreRow {
                        name: f.name.clone(),
                        recurrence_probability: column("recurrence_probability", i),
                        expected_interactions: column("expected_interactions", i),
                        threat_level: column("threat_level", i),
                    },
                )
            })
            .collect())
    }

    async fn write_updates(
        &self,
        computed: HashMap<String, ScoreRow>,
        reset_missing: bool,
    ) -> Result<u64> {
        let stored = self.iocs.get_scanner_scores().await?;
        tracing::info!(checking = stored.len(), "begin updating scores");
        let updates = plan_score_updates(&stored, &computed, reset_missing);
        tracing::info!(count = updates.len(), "writing updated scores");
        if updates.is_empty() {
            return Ok(0);
        }
        let written = self
            .iocs
            .bulk_update_scores(&updates, SCORE_WRITE_BATCH)
            .await?;
        tracing::info!(written, "IoCs were updated");
        Ok(written)
    }

    /// Recompute and apply scores for all currently-active scanner IOCs.
    /// Scores of IOCs that dropped out of the active set are reset.
    pub async fn run(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(SCORING_LOOKBACK_DAYS);
        let rows = self.iocs.get_recent_scanner_features(cutoff).await?;
        let computed = self.compute_scores(&rows)?;
        self.write_updates(computed, true).await
    }

    /// Rescore only the given IOCs, without resetting anything else.
    /// Used by the extraction pipeline after each run.
    pub async fn score_only(&self, names: &[String]) -> Result<u64> {
        if names.is_empty() {
            return Ok(0);
        }
        let rows = self.iocs.get_features_by_names(names).await?;
        let computed = self.compute_scores(&rows)?;
        self.write_updates(computed, false).await
    }
}

/// Trains the forest models against the previous feature snapshot.
///
/// The previous snapshot provides the features, the fresh one provides
/// the targets (interaction-count deltas). The fresh snapshot is always
/// persisted for the next run, even when training fails, so the job can
/// never wedge itself.
pub struct TrainModels<'a> {
    iocs: &'a IocRepository,
    store: ModelStore,
}

impl<'a> TrainModels<'a> {
    pub fn new(iocs: &'a IocRepository, store: ModelStore) -> Self {
        Self { iocs, store }
    }

    fn load_snapshot(&self) -> Option<TrainingSnapshot> {
        match self.store.load_json::<TrainingSnapshot>(TRAINING_DATA_FILE) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "error loading training snapshot");
                None
            }
        }
    }

    fn save_snapshot(&self, snapshot: &TrainingSnapshot) -> Result<()> {
        tracing::info!("saving current data for future training");
        self.store
            .save_json(TRAINING_DATA_FILE, snapshot)
            .map_err(PipelineError::Other)
    }

    /// Interaction-count delta per IOC between the snapshots. Only IOCs
    /// active after the previous snapshot date contribute.
    fn interaction_deltas(
        previous: &TrainingSnapshot,
        current: &TrainingSnapshot,
        previous_date: NaiveDate,
    ) -> HashMap<String, f64> {
        let previous_counts: HashMap<&str, i32> = previous
            .rows
            .iter()
            .map(|r| (r.name.as_str(), r.interaction_count))
            .collect();
        current
            .rows
            .iter()
            .filter(|r| r.last_seen.date_naive() > previous_date)
            .map(|r| {
                let delta =
                    r.interaction_count - previous_counts.get(r.name.as_str()).copied().unwrap_or(0);
                (r.name.clone(), f64::from(delta))
            })
            .collect()
    }

    fn train_all(&self, previous: &TrainingSnapshot, current: &TrainingSnapshot) -> Result<()> {
        let (previous_date, _) = validate_snapshot_ordering(previous, current)?;
        tracing::info!(%previous_date, rows = previous.rows.len(), "training data loaded");

        let deltas = Self::interaction_deltas(previous, current, previous_date);
        tracing::info!("extracting features from training data");
        let features = extract_features(&previous.rows, previous_date);
        let targets: Vec<f64> = features
            .iter()
            .map(|f| deltas.get(&f.name).copied().unwrap_or(0.0))
            .collect();

        let columns = feature_columns(&honeypot_vocabulary(&features));
        let matrix = encode_matrix(&features, &columns);
        for (a, b, correlation) in correlated_features(&matrix, &columns, CORRELATION_THRESHOLD) {
            tracing::debug!(a, b, correlation = format!("{correlation:.2}"), "highly correlated features");
        }

        let mut first_error = None;
        let mut models = [recurrence_model(), interaction_model()];
        for model in &mut models {
            if let Err(e) = model.train(&features, &targets, &self.store) {
                tracing::error!(model = model.name(), error = %e, "training failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(PipelineError::Other(e)),
            None => Ok(()),
        }
    }

    /// Execute the training pipeline.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("fetching current IoC data from DB");
        let cutoff = Utc::now() - Duration::days(SCORING_LOOKBACK_DAYS);
        let current = TrainingSnapshot {
            rows: self.iocs.get_recent_scanner_features(cutoff).await?,
        };
        tracing::info!(rows = current.rows.len(), "current IoC data fetched");

        let Some(previous) = self.load_snapshot() else {
            tracing::warn!("no training data found, skip training");
            return self.save_snapshot(&current);
        };

        // the fresh snapshot is saved regardless of the training outcome,
        // including ordering violations, so the next run can proceed
        let training_result = self.train_all(&previous, &current);
        self.save_snapshot(&current)?;
        training_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_row(name: &str, recurrence: f64, expected: f64, threat: f64) -> ScoreRow {
        ScoreRow {
            name: name.to_string(),
            recurrence_probability: recurrence,
            expected_interactions: expected,
            threat_level: threat,
        }
    }

    #[test]
    fn unchanged_scores_produce_no_writes() {
        let stored = vec![score_row("a", 0.5, 2.0, 0.3), score_row("b", 0.0, 0.0, 0.0)];
        let computed: HashMap<String, ScoreRow> = stored
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();
        assert!(plan_score_updates(&stored, &computed, true).is_empty());
    }

    #[test]
    fn second_application_writes_nothing() {
        let stored = vec![score_row("a", 0.0, 0.0, 0.0)];
        let computed: HashMap<String, ScoreRow> =
            [("a".to_string(), score_row("a", 0.7, 1.0, 0.4))].into();

        let first_pass = plan_score_updates(&stored, &computed, true);
        assert_eq!(first_pass.len(), 1);

        // apply the writes, then plan again with identical input
        let stored_after: Vec<ScoreRow> = first_pass;
        assert!(plan_score_updates(&stored_after, &computed, true).is_empty());
    }

    #[test]
    fn missing_iocs_are_reset_only_when_nonzero() {
        let stored = vec![
            score_row("gone_hot", 0.9, 5.0, 0.8),
            score_row("gone_cold", 0.0, 0.0, 0.0),
        ];
        let computed = HashMap::new();
        let updates = plan_score_updates(&stored, &computed, true);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "gone_hot");
        assert_eq!(updates[0].recurrence_probability, 0.0);
        assert_eq!(updates[0].threat_level, 0.0);
    }

    #[test]
    fn targeted_updates_never_reset_missing() {
        let stored = vec![score_row("other", 0.9, 5.0, 0.8)];
        let computed = HashMap::new();
        assert!(plan_score_updates(&stored, &computed, false).is_empty());
    }

    fn snapshot_row(name: &str, last_seen: &str, interactions: i32) -> IocFeatureRow {
        let day = NaiveDate::parse_from_str(last_seen, "%Y-%m-%d").unwrap();
        IocFeatureRow {
            name: name.to_string(),
            first_seen: day.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            last_seen: day.and_hms_opt(12, 0, 0).unwrap().and_utc(),
            days_seen: vec![day],
            attack_count: 1,
            interaction_count: interactions,
            login_attempts: 0,
            destination_port_count: 1,
            ip_reputation: String::new(),
            asn: None,
            honeypots: vec!["Cowrie".to_string()],
        }
    }

    #[test]
    fn snapshot_reference_date_is_newest_last_seen() {
        let snapshot = TrainingSnapshot {
            rows: vec![
                snapshot_row("a", "2026-08-01", 5),
                snapshot_row("b", "2026-08-03", 2),
            ],
        };
        assert_eq!(
            snapshot.reference_date(),
            Some(NaiveDate::from_ymd_opt(2026, 8, 3).unwrap())
        );
        assert_eq!(TrainingSnapshot { rows: vec![] }.reference_date(), None);
    }

    #[test]
    fn stale_or_equal_snapshot_dates_violate_ordering() {
        let older = TrainingSnapshot {
            rows: vec![snapshot_row("a", "2026-08-01", 5)],
        };
        let newer = TrainingSnapshot {
            rows: vec![snapshot_row("a", "2026-08-02", 9)],
        };
        assert!(validate_snapshot_ordering(&older, &newer).is_ok());
        assert!(matches!(
            validate_snapshot_ordering(&newer, &older),
            Err(PipelineError::TrainingDataOrderingViolation { .. })
        ));
        assert!(matches!(
            validate_snapshot_ordering(&older, &older),
            Err(PipelineError::TrainingDataOrderingViolation { .. })
        ));
    }

    #[test]
    fn interaction_deltas_only_count_newly_active_iocs() {
        let previous = TrainingSnapshot {
            rows: vec![
                snapshot_row("returning", "2026-08-01", 10),
                snapshot_row("quiet", "2026-08-01", 7),
            ],
        };
        let current = TrainingSnapshot {
            rows: vec![
                snapshot_row("returning", "2026-08-05", 25),
                snapshot_row("quiet", "2026-08-01", 7),
                snapshot_row("newcomer", "2026-08-04", 3),
            ],
        };
        let previous_date = previous.reference_date().unwrap();
        let deltas = TrainModels::interaction_deltas(&previous, &current, previous_date);
        assert_eq!(deltas.get("returning"), Some(&15.0));
        assert_eq!(deltas.get("newcomer"), Some(&3.0));
        // not seen after the previous snapshot date: no target
        assert!(!deltas.contains_key("quiet"));
    }
}
