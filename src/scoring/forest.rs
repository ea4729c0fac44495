//! Trainable random-forest scoring models
//!
//! Two models share the feature set: a recurrence model predicting
//! whether an IOC will interact again (trained on a binary target, the
//! forest's vote share is the probability-style score) and an
//! interaction model predicting the expected interaction count for the
//! next period. Models and their training-time column layout are
//! persisted as JSON next to the training snapshot.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::scoring::features::{
    FeatureVector, encode_matrix, feature_columns, honeypot_vocabulary,
};
use crate::scoring::{Scorer, recall_auc};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

const TEST_FRACTION: f64 = 0.2;
const MIN_TRAINING_ROWS: usize = 20;
const SPLIT_SEED: u64 = 0x5eed;

/// What the model is trained to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Binary will-interact-again target; scores are vote shares in [0, 1].
    Recurrence,
    /// Non-negative interaction count for the next period.
    InteractionCount,
}

#[derive(Serialize, Deserialize)]
struct StoredForest {
    columns: Vec<String>,
    forest: Forest,
}

/// File-system persistence for models and the training snapshot.
pub struct ModelStore {
    directory: PathBuf,
}

impl ModelStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.directory.join(file_name)
    }

    pub fn save_json<T: Serialize>(&self, file_name: &str, value: &T) -> anyhow::Result<()> {
        fs::create_dir_all(&self.directory)
            .with_context(|| format!("failed to create {}", self.directory.display()))?;
        let path = self.path_for(file_name);
        let serialized = serde_json::to_vec(value).context("failed to serialize")?;
        fs::write(&path, serialized)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load_json<T: for<'de> Deserialize<'de>>(
        &self,
        file_name: &str,
    ) -> anyhow::Result<Option<T>> {
        let path = self.path_for(file_name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }
}

pub struct ForestModel {
    name: &'static str,
    score_name: &'static str,
    target: TargetKind,
    state: Option<StoredForest>,
}

/// Forest predicting the probability that an IOC interacts again.
pub fn recurrence_model() -> ForestModel {
    ForestModel {
        name: "Recurrence Forest",
        score_name: "recurrence_probability",
        target: TargetKind::Recurrence,
        state: None,
    }
}

/// Forest predicting the interaction count for the next period.
pub fn interaction_model() -> ForestModel {
    ForestModel {
        name: "Interaction Forest",
        score_name: "expected_interactions",
        target: TargetKind::InteractionCount,
        state: None,
    }
}

impl ForestModel {
    fn file_name(&self) -> String {
        format!("{}.json", self.name.replace(' ', "_").to_lowercase())
    }

    /// Load the persisted model, if one was trained before.
    pub fn load(&mut self, store: &ModelStore) -> anyhow::Result<bool> {
        self.state = store.load_json(&self.file_name())?;
        Ok(self.state.is_some())
    }

    fn parameters(&self) -> RandomForestRegressorParameters {
        match self.target {
            TargetKind::Recurrence => RandomForestRegressorParameters::default()
                .with_n_trees(241)
                .with_max_depth(10)
                .with_min_samples_leaf(6)
                .with_min_samples_split(3),
            TargetKind::InteractionCount => RandomForestRegressorParameters::default()
                .with_n_trees(70)
                .with_max_depth(11)
                .with_min_samples_leaf(3)
                .with_min_samples_split(8),
        }
    }

    fn training_target(&self, raw_targets: &[f64]) -> Vec<f64> {
        match self.target {
            TargetKind::Recurrence => raw_targets
                .iter()
                .map(|&t| if t > 0.0 { 1.0 } else { 0.0 })
                .collect(),
            TargetKind::InteractionCount => raw_targets.iter().map(|&t| t.max(0.0)).collect(),
        }
    }

    /// Split row indices into train and test sets. The recurrence target
    /// is split per class so the rare positives keep their share.
    fn split_train_test(&self, targets: &[f64]) -> (Vec<usize>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
        let mut train = vec![];
        let mut test = vec![];

        let mut split_group = |mut indices: Vec<usize>| {
            indices.shuffle(&mut rng);
            let test_size = ((indices.len() as f64) * TEST_FRACTION).round() as usize;
            test.extend(indices.iter().take(test_size));
            train.extend(indices.iter().skip(test_size));
        };

        match self.target {
            TargetKind::Recurrence => {
                let (positives, negatives): (Vec<usize>, Vec<usize>) =
                    (0..targets.len()).partition(|&i| targets[i] > 0.0);
                split_group(positives);
                split_group(negatives);
            }
            TargetKind::InteractionCount => split_group((0..targets.len()).collect()),
        }
        (train, test)
    }

    fn predict_with(forest: &Forest, matrix: &[Vec<f64>], target: TargetKind) -> anyhow::Result<Vec<f64>> {
        let x = DenseMatrix::from_2d_vec(&matrix.to_vec());
        let raw = forest.predict(&x).map_err(|e| anyhow!("prediction failed: {e}"))?;
        Ok(raw
            .into_iter()
            .map(|value| match target {
                TargetKind::Recurrence => value.clamp(0.0, 1.0),
                TargetKind::InteractionCount => value.max(0.0),
            })
            .collect())
    }

    /// Train on a feature set with raw interaction-delta targets, then
    /// persist the fitted forest together with its column layout.
    pub fn train(
        &mut self,
        features: &[FeatureVector],
        raw_targets: &[f64],
        store: &ModelStore,
    ) -> anyhow::Result<()> {
        tracing::info!(model = self.name, "start training");
        if features.len() != raw_targets.len() {
            return Err(anyhow!("feature and target lengths differ"));
        }
        if features.len() < MIN_TRAINING_ROWS {
            return Err(anyhow!(
                "not enough training rows: {} < {MIN_TRAINING_ROWS}",
                features.len()
            ));
        }

        let columns = feature_columns(&honeypot_vocabulary(features));
        let matrix = encode_matrix(features, &columns);
        let targets = self.training_target(raw_targets);

        let (train_idx, test_idx) = self.split_train_test(&targets);
        if train_idx.is_empty() || test_idx.is_empty() {
            return Err(anyhow!("train/test split produced an empty set"));
        }
        let train_x: Vec<Vec<f64>> = train_idx.iter().map(|&i| matrix[i].clone()).collect();
        let train_y: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();
        let test_x: Vec<Vec<f64>> = test_idx.iter().map(|&i| matrix[i].clone()).collect();
        let test_y: Vec<f64> = test_idx.iter().map(|&i| targets[i]).collect();

        let x = DenseMatrix::from_2d_vec(&train_x);
        let forest = Forest::fit(&x, &train_y, self.parameters())
            .map_err(|e| anyhow!("training failed: {e}"))?;

        let test_predictions = Self::predict_with(&forest, &test_x, self.target)?;
        let auc = recall_auc(&test_predictions, &test_y);
        tracing::info!(model = self.name, recall_auc = format!("{auc:.4}"), "finished training");

        let state = StoredForest { columns, forest };
        store.save_json(&self.file_name(), &state)?;
        self.state = Some(state);
        Ok(())
    }
}

impl Scorer for ForestModel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn score_name(&self) -> &'static str {
        self.score_name
    }

    fn trainable(&self) -> bool {
        true
    }

    fn score(&self, features: &[FeatureVector]) -> anyhow::Result<Vec<f64>> {
        tracing::info!(scorer = self.name, score = self.score_name, "calculating scores");
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| anyhow!("{} has not been trained yet", self.name))?;
        // encode against the training-time columns; features unknown to
        // the model default to 0
        let matrix = encode_matrix(features, &state.columns);
        Self::predict_with(&state.forest, &matrix, self.target)
    }
}
