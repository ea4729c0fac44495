//! Heuristic threat-level scorer

use std::collections::HashSet;

use crate::scoring::Scorer;
use crate::scoring::features::FeatureVector;

const INTENSITY_WEIGHT: f64 = 0.25;
const PERSISTENCE_WEIGHT: f64 = 0.25;
const INFRASTRUCTURE_WEIGHT: f64 = 0.25;
const BREADTH_WEIGHT: f64 = 0.25;

const SIGMOID_CENTER: f64 = 3.0;
const LOGIN_NORM_FACTOR: f64 = 8.0;

/// Logistic sigmoid with optional centering, mapping into (0, 1).
fn sigmoid(x: f64, center: f64) -> f64 {
    1.0 / (1.0 + (-(x - center)).exp())
}

/// Non-trainable threat scorer combining four normalized sub-scores into
/// a weighted sum, damped by an aging factor that approaches zero as the
/// IOC goes quiet.
pub struct ThreatLevel {
    high_risk_asns: HashSet<String>,
}

impl ThreatLevel {
    pub fn new(high_risk_asns: HashSet<String>) -> Self {
        debug_assert!(
            (INTENSITY_WEIGHT + PERSISTENCE_WEIGHT + INFRASTRUCTURE_WEIGHT + BREADTH_WEIGHT - 1.0)
                .abs()
                < f64::EPSILON
        );
        Self { high_risk_asns }
    }

    fn threat_level(&self, ioc: &FeatureVector) -> f64 {
        // Intensity: log-scaled login attempts per day. The log1p/8
        // normalization saturates around ~3000 attempts per day while
        // 10 attempts per day still score ~0.3.
        let attempts_per_day = ioc.login_attempts / ioc.days_seen_count.max(1.0);
        let intensity = (attempts_per_day.ln_1p() / LOGIN_NORM_FACTOR).min(1.0);

        // Persistence: blend of activity density and longevity.
        let persistence =
            0.5 * ioc.active_days_ratio + 0.5 * (ioc.days_seen_count / 30.0).min(1.0);

        // Infrastructure: membership in the high-risk network list.
        let infrastructure = match &ioc.asn {
            Some(asn) if self.high_risk_asns.contains(asn) => 1.0,
            _ => 0.0,
        };

        // Breadth: sigmoid of distinct destination ports, centered at 3.
        let breadth = sigmoid(ioc.destination_port_count, SIGMOID_CENTER);

        let total = INTENSITY_WEIGHT * intensity
            + PERSISTENCE_WEIGHT * persistence
            + INFRASTRUCTURE_WEIGHT * infrastructure
            + BREADTH_WEIGHT * breadth;

        // aging factor: fresh activity dominates the feed
        let aging_factor = 2.0 / (2.0 + ioc.days_since_last_seen.max(0.0));
        aging_factor * total
    }
}

impl Scorer for ThreatLevel {
    fn name(&self) -> &'static str {
        "Threat Level"
    }

    fn score_name(&self) -> &'static str {
        "threat_level"
    }

    fn score(&self, features: &[FeatureVector]) -> anyhow::Result<Vec<f64>> {
        tracing::info!(scorer = self.name(), "calculating threat_level");
        Ok(features.iter().map(|f| self.threat_level(f)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(
        login_attempts: f64,
        days_seen_count: f64,
        active_days_ratio: f64,
        ports: f64,
        days_since_last_seen: f64,
        asn: Option<&str>,
    ) -> FeatureVector {
        FeatureVector {
            name: "8.8.8.8".to_string(),
            honeypots: vec!["Cowrie".to_string()],
            asn: asn.map(String::from),
            honeypot_count: 1.0,
            destination_port_count: ports,
            days_seen_count,
            active_timespan: days_seen_count / active_days_ratio.max(f64::MIN_POSITIVE),
            active_days_ratio,
            login_attempts,
            login_attempts_per_day: login_attempts / days_seen_count.max(1.0),
            interaction_count: 10.0,
            interactions_per_day: 10.0 / days_seen_count.max(1.0),
            avg_days_between: 1.0,
            std_days_between: 0.0,
            days_since_last_seen,
            days_since_first_seen: days_since_last_seen + days_seen_count,
        }
    }

    #[test]
    fn score_is_in_unit_range() {
        let scorer = ThreatLevel::new(HashSet::new());
        let extremes = [
            feature(0.0, 1.0, 1.0, 0.0, 0.0, None),
            feature(1e6, 30.0, 1.0, 100.0, 0.0, Some("666")),
        ];
        for score in scorer.score(&extremes).unwrap() {
            assert!((0.0..=1.0).contains(&score), "score {score} out of range");
        }
    }

    #[test]
    fn high_risk_asn_raises_the_score() {
        let risky: HashSet<String> = ["13335".to_string()].into_iter().collect();
        let scorer = ThreatLevel::new(risky);
        let on_risky = scorer
            .score(&[feature(100.0, 5.0, 0.5, 3.0, 0.0, Some("13335"))])
            .unwrap()[0];
        let on_clean = scorer
            .score(&[feature(100.0, 5.0, 0.5, 3.0, 0.0, Some("15169"))])
            .unwrap()[0];
        assert!(on_risky > on_clean);
    }

    #[test]
    fn aging_decays_stale_iocs() {
        let scorer = ThreatLevel::new(HashSet::new());
        let fresh = scorer
            .score(&[feature(100.0, 5.0, 0.5, 3.0, 0.0, None)])
            .unwrap()[0];
        let stale = scorer
            .score(&[feature(100.0, 5.0, 0.5, 3.0, 60.0, None)])
            .unwrap()[0];
        assert!(fresh > stale);
        // 2 / (2 + 60) of the fresh score
        assert!((stale - fresh * 2.0 / 62.0).abs() < 1e-9);
    }

    #[test]
    fn breadth_grows_with_port_count() {
        let scorer = ThreatLevel::new(HashSet::new());
        let one_port = scorer
            .score(&[feature(0.0, 1.0, 1.0, 1.0, 0.0, None)])
            .unwrap()[0];
        let five_ports = scorer
            .score(&[feature(0.0, 1.0, 1.0, 5.0, 0.0, None)])
            .unwrap()[0];
        assert!(five_ports > one_port);
    }
}
