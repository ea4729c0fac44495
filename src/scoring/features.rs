//! Feature engineering over IOC attributes

use chrono::NaiveDate;

use crate::storage::ioc::IocFeatureRow;

/// Numeric feature columns, in matrix order. The honeypot one-hot
/// columns follow these.
pub const NUM_FEATURES: &[&str] = &[
    "honeypot_count",
    "destination_port_count",
    "days_seen_count",
    "active_days_ratio",
    "login_attempts",
    "login_attempts_per_day",
    "interaction_count",
    "std_days_between",
    "days_since_last_seen",
    "days_since_first_seen",
];

/// Engineered features for one IOC.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub name: String,
    pub honeypots: Vec<String>,
    pub asn: Option<String>,
    pub honeypot_count: f64,
    pub destination_port_count: f64,
    pub days_seen_count: f64,
    /// Days between first and last active day, inclusive.
    pub active_timespan: f64,
    pub active_days_ratio: f64,
    pub login_attempts: f64,
    pub login_attempts_per_day: f64,
    pub interaction_count: f64,
    pub interactions_per_day: f64,
    pub avg_days_between: f64,
    pub std_days_between: f64,
    pub days_since_last_seen: f64,
    pub days_since_first_seen: f64,
}

fn date_delta(earlier: NaiveDate, later: NaiveDate) -> i64 {
    (later - earlier).num_days()
}

/// Extract and calculate features for each IOC, relative to a reference
/// date.
pub fn extract_features(rows: &[IocFeatureRow], reference_day: NaiveDate) -> Vec<FeatureVector> {
    rows.iter()
        .map(|row| {
            let days_seen_count = row.days_seen.len().max(1) as f64;
            let gaps: Vec<f64> = row
                .days_seen
                .windows(2)
                .map(|pair| date_delta(pair[0], pair[1]) as f64)
                .collect();
            let active_timespan = gaps.iter().sum::<f64>() + 1.0;
            let avg_days_between = if gaps.is_empty() {
                1.0
            } else {
                gaps.iter().sum::<f64>() / gaps.len() as f64
            };
            let std_days_between = if gaps.is_empty() {
                0.0
            } else {
                let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
                (gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64).sqrt()
            };

            FeatureVector {
                name: row.name.clone(),
                honeypots: row.honeypots.clone(),
                asn: row.asn.clone(),
                honeypot_count: row.honeypots.len() as f64,
                destination_port_count: f64::from(row.destination_port_count),
                days_seen_count,
                active_timespan,
                active_days_ratio: days_seen_count / active_timespan,
                login_attempts: f64::from(row.login_attempts),
                login_attempts_per_day: f64::from(row.login_attempts) / days_seen_count,
                interaction_count: f64::from(row.interaction_count),
                interactions_per_day: f64::from(row.interaction_count) / days_seen_count,
                avg_days_between,
                std_days_between,
                days_since_last_seen: date_delta(row.last_seen.date_naive(), reference_day) as f64,
                days_since_first_seen: date_delta(row.first_seen.date_naive(), reference_day)
                    as f64,
            }
        })
        .collect()
}

/// Sorted unique honeypot names across a feature set. One one-hot column
/// per entry, named `has_<honeypot>`.
pub fn honeypot_vocabulary(features: &[FeatureVector]) -> Vec<String> {
    let mut vocabulary: Vec<String> = features
        .iter()
        .flat_map(|f| f.honeypots.iter().cloned())
        .collect();
    vocabulary.sort();
    vocabulary.dedup();
    vocabulary
}

/// Full column list for a model: numeric features followed by the one-hot
/// expansion of the honeypot vocabulary.
pub fn feature_columns(vocabulary: &[String]) -> Vec<String> {
    NUM_FEATURES
        .iter()
        .map(|name| name.to_string())
        .chain(vocabulary.iter().map(|hp| format!("has_{hp}")))
        .collect()
}

/// Encode feature vectors into a numeric matrix aligned with `columns`.
/// Columns unknown to a vector (a honeypot it was never seen on, or one
/// absent at training time) encode as 0.
pub fn encode_matrix(features: &[FeatureVector], columns: &[String]) -> Vec<Vec<f64>> {
    features
        .iter()
        .map(|f| {
            columns
                .iter()
                .map(|column| match column.as_str() {
                    "honeypot_count" => f.honeypot_count,
                    "destination_port_count" => f.destination_port_count,
                    "days_seen_count" => f.days_seen_count,
                    "active_days_ratio" => f.active_days_ratio,
                    "login_attempts" => f.login_attempts,
                    "login_attempts_per_day" => f.login_attempts_per_day,
                    "interaction_count" => f.interaction_count,
                    "std_days_between" => f.std_days_between,
                    "days_since_last_seen" => f.days_since_last_seen,
                    "days_since_first_seen" => f.days_since_first_seen,
                    other => match other.strip_prefix("has_") {
                        Some(honeypot) if f.honeypots.iter().any(|hp| hp == honeypot) => 1.0,
                        _ => 0.0,
                    },
                })
                .collect()
        })
        .collect()
}

/// Pairs of matrix columns whose Pearson correlation exceeds the
/// threshold. Reported at debug level during training.
pub fn correlated_features(
    matrix: &[Vec<f64>],
    columns: &[String],
    threshold: f64,
) -> Vec<(String, String, f64)> {
    if matrix.is_empty() {
        return vec![];
    }
    let n = matrix.len() as f64;
    let column_count = columns.len();
    let means: Vec<f64> = (0..column_count)
        .map(|c| matrix.iter().map(|row| row[c]).sum::<f64>() / n)
        .collect();
    let stds: Vec<f64> = (0..column_count)
        .map(|c| {
            (matrix
                .iter()
                .map(|row| (row[c] - means[c]).powi(2))
                .sum::<f64>()
                / n)
                .sqrt()
        })
        .collect();

    let mut pairs = vec![];
    for i in 0..column_count {
        for j in (i + 1)..column_count {
            if stds[i] == 0.0 || stds[j] == 0.0 {
                continue;
            }
            let covariance = matrix
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum::<f64>()
                / n;
            let correlation = covariance / (stds[i] * stds[j]);
            if correlation.abs() > threshold {
                pairs.push((columns[i].clone(), columns[j].clone(), correlation));
            }
        }
    }
    pairs
}
