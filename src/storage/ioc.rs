//! Repository for IOC records and the honeypot registry

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::models::{Honeypot, Ioc};

/// Row shape used by feature extraction and scoring: the IOC attributes
/// plus the aggregated honeypot names it was seen on.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IocFeatureRow {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub days_seen: Vec<NaiveDate>,
    pub attack_count: i32,
    pub interaction_count: i32,
    pub login_attempts: i32,
    pub destination_port_count: i32,
    pub ip_reputation: String,
    pub asn: Option<String>,
    pub honeypots: Vec<String>,
}

/// Stored score columns for one IOC.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub name: String,
    pub recurrence_probability: f64,
    pub expected_interactions: f64,
    pub threat_level: f64,
}

/// Repository for IOC data access with a per-run honeypot cache.
///
/// The cache maps normalized honeypot names to their enabled flag. It is
/// populated at construction and updated when honeypots are auto-registered.
pub struct IocRepository {
    pool: PgPool,
    honeypot_cache: HashMap<String, bool>,
}

impl IocRepository {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let honeypots: Vec<Honeypot> =
            sqlx::query_as("SELECT name, active FROM honeypots ORDER BY name")
                .fetch_all(&pool)
                .await?;
        let honeypot_cache = honeypots
            .into_iter()
            .map(|hp| (Self::normalize_name(&hp.name), hp.active))
            .collect();
        Ok(Self {
            pool,
            honeypot_cache,
        })
    }

    fn normalize_name(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Whether the IOC table holds any records at all. The extraction
    /// pipeline uses this to decide on the first-run backfill window.
    pub async fn is_empty(&self) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM iocs) AS present")
            .fetch_one(&self.pool)
            .await?;
        Ok(!row.get::<bool, _>("present"))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Ioc>> {
        let ioc = sqlx::query_as::<_, Ioc>("SELECT * FROM iocs WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ioc)
    }

    pub async fn insert(&self, ioc: &Ioc) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO iocs (
                name, kind, first_seen, last_seen, days_seen, number_of_days_seen,
                attack_count, interaction_count, login_attempts, scanner, payload_request,
                ip_reputation, asn, destination_ports, related_urls,
                recurrence_probability, expected_interactions, threat_level
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(&ioc.name)
        .bind(ioc.kind)
        .bind(ioc.first_seen)
        .bind(ioc.last_seen)
        .bind(&ioc.days_seen)
        .bind(ioc.number_of_days_seen)
        .bind(ioc.attack_count)
        .bind(ioc.interaction_count)
        .bind(ioc.login_attempts)
        .bind(ioc.scanner)
        .bind(ioc.payload_request)
        .bind(&ioc.ip_reputation)
        .bind(&ioc.asn)
        .bind(&ioc.destination_ports)
        .bind(&ioc.related_urls)
        .bind(ioc.recurrence_probability)
        .bind(ioc.expected_interactions)
        .bind(ioc.threat_level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the mutable attributes of an existing record.
    pub async fn update(&self, ioc: &Ioc) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE iocs SET
                last_seen = $2, days_seen = $3, number_of_days_seen = $4,
                attack_count = $5, interaction_count = $6, login_attempts = $7,
                scanner = $8, payload_request = $9, ip_reputation = $10, asn = $11,
                destination_ports = $12, related_urls = $13
            WHERE name = $1
            "#,
        )
        .bind(&ioc.name)
        .bind(ioc.last_seen)
        .bind(&ioc.days_seen)
        .bind(ioc.number_of_days_seen)
        .bind(ioc.attack_count)
        .bind(ioc.interaction_count)
        .bind(ioc.login_attempts)
        .bind(ioc.scanner)
        .bind(ioc.payload_request)
        .bind(&ioc.ip_reputation)
        .bind(&ioc.asn)
        .bind(&ioc.destination_ports)
        .bind(&ioc.related_urls)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add `login_attempts` observed in a session to the source IOC.
    pub async fn add_login_attempts(&self, name: &str, count: i32) -> Result<()> {
        sqlx::query("UPDATE iocs SET login_attempts = login_attempts + $2 WHERE name = $1")
            .bind(name)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Honeypot registry ====================

    /// Register a honeypot, enabled by default. Returns the enabled flag.
    pub async fn create_honeypot(&mut self, name: &str) -> Result<bool> {
        let normalized = Self::normalize_name(name);
        let row = sqlx::query(
            r#"
            INSERT INTO honeypots (name, active)
            VALUES ($1, TRUE)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING active
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        let active: bool = row.get("active");
        self.honeypot_cache.insert(normalized, active);
        tracing::info!(honeypot = name, active, "registered honeypot");
        Ok(active)
    }

    /// All honeypots currently enabled for extraction.
    pub async fn get_active_honeypots(&self) -> Result<Vec<Honeypot>> {
        let honeypots =
            sqlx::query_as("SELECT name, active FROM honeypots WHERE active ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(honeypots)
    }

    /// Whether a honeypot is registered and enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.honeypot_cache
            .get(&Self::normalize_name(name))
            .copied()
            .unwrap_or(false)
    }

    /// Whether a honeypot's hits should be extracted. Unknown honeypots
    /// are auto-registered (enabled); known-but-disabled ones are skipped.
    pub async fn is_ready_for_extraction(&mut self, name: &str) -> Result<bool> {
        let normalized = Self::normalize_name(name);
        if !self.honeypot_cache.contains_key(&normalized) {
            self.create_honeypot(name).await?;
        }
        Ok(self.is_enabled(name))
    }

    /// Associate a honeypot category with an IOC.
    pub async fn attach_honeypot(&self, honeypot: &str, ioc_name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ioc_honeypots (ioc_name, honeypot_name)
            SELECT $1, name FROM honeypots WHERE lower(name) = lower($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(ioc_name)
        .bind(honeypot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Related IOC graph ====================

    /// Link two IOCs as related. The relation is undirected; the insert
    /// is mirrored on both sides.
    pub async fn link_related(&self, a: &str, b: &str) -> Result<()> {
        if a == b {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO related_iocs (ioc_name, related_name)
            VALUES ($1, $2), ($2, $1)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(a)
        .bind(b)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Scoring queries ====================

    /// Feature rows for active scanner IOCs seen in the last
    /// `days_lookback` days, with their honeypot membership aggregated.
    pub async fn get_recent_scanner_features(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IocFeatureRow>> {
        let rows = sqlx::query(
            r#"
            SELECT i.name, i.first_seen, i.last_seen, i.days_seen, i.attack_count,
                   i.interaction_count, i.login_attempts,
                   cardinality(i.destination_ports) AS destination_port_count,
                   i.ip_reputation, i.asn,
                   COALESCE(array_agg(h.honeypot_name) FILTER (WHERE h.honeypot_name IS NOT NULL), '{}') AS honeypots
            FROM iocs i
            JOIN ioc_honeypots h ON h.ioc_name = i.name
            JOIN honeypots hp ON hp.name = h.honeypot_name AND hp.active
            WHERE i.scanner AND i.last_seen >= $1
            GROUP BY i.name
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| IocFeatureRow {
                name: row.get("name"),
                first_seen: row.get("first_seen"),
                last_seen: row.get("last_seen"),
                days_seen: row.get("days_seen"),
                attack_count: row.get("attack_count"),
                interaction_count: row.get("interaction_count"),
                login_attempts: row.get("login_attempts"),
                destination_port_count: row.get("destination_port_count"),
                ip_reputation: row.get("ip_reputation"),
                asn: row.get("asn"),
                honeypots: row.get("honeypots"),
            })
            .collect())
    }

    /// Feature rows for a specific set of IOC names.
    pub async fn get_features_by_names(&self, names: &[String]) -> Result<Vec<IocFeatureRow>> {
        let rows = sqlx::query(
            r#"
            SELECT i.name, i.first_seen, i.last_seen, i.days_seen, i.attack_count,
                   i.interaction_count, i.login_attempts,
                   cardinality(i.destination_ports) AS destination_port_count,
                   i.ip_reputation, i.asn,
                   COALESCE(array_agg(h.honeypot_name) FILTER (WHERE h.honeypot_name IS NOT NULL), '{}') AS honeypots
            FROM iocs i
            LEFT JOIN ioc_honeypots h ON h.ioc_name = i.name
            WHERE i.name = ANY($1)
            GROUP BY i.name
            "#,
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| IocFeatureRow {
                name: row.get("name"),
                first_seen: row.get("first_seen"),
                last_seen: row.get("last_seen"),
                days_seen: row.get("days_seen"),
                attack_count: row.get("attack_count"),
                interaction_count: row.get("interaction_count"),
                login_attempts: row.get("login_attempts"),
                destination_port_count: row.get("destination_port_count"),
                ip_reputation: row.get("ip_reputation"),
                asn: row.get("asn"),
                honeypots: row.get("honeypots"),
            })
            .collect())
    }

    /// Stored score columns for every scanner IOC on an active honeypot.
    pub async fn get_scanner_scores(&self) -> Result<Vec<ScoreRow>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT i.name, i.recurrence_probability, i.expected_interactions, i.threat_level
            FROM iocs i
            JOIN ioc_honeypots h ON h.ioc_name = i.name
            JOIN honeypots hp ON hp.name = h.honeypot_name AND hp.active
            WHERE i.scanner
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ScoreRow {
                name: row.get("name"),
                recurrence_probability: row.get("recurrence_probability"),
                expected_interactions: row.get("expected_interactions"),
                threat_level: row.get("threat_level"),
            })
            .collect())
    }

    /// Write changed score rows back, in batches.
    pub async fn bulk_update_scores(&self, updates: &[ScoreRow], batch_size: usize) -> Result<u64> {
        let mut written = 0;
        for batch in updates.chunks(batch_size.max(1)) {
            let names: Vec<String> = batch.iter().map(|u| u.name.clone()).collect();
            let recurrence: Vec<f64> = batch.iter().map(|u| u.recurrence_probability).collect();
            let expected: Vec<f64> = batch.iter().map(|u| u.expected_interactions).collect();
            let threat: Vec<f64> = batch.iter().map(|u| u.threat_level).collect();
            let result = sqlx::query(
                r#"
                UPDATE iocs SET
                    recurrence_probability = data.recurrence,
                    expected_interactions = data.expected,
                    threat_level = data.threat
                FROM (
                    SELECT * FROM UNNEST($1::text[], $2::float8[], $3::float8[], $4::float8[])
                        AS t(name, recurrence, expected, threat)
                ) AS data
                WHERE iocs.name = data.name
                "#,
            )
            .bind(&names)
            .bind(&recurrence)
            .bind(&expected)
            .bind(&threat)
            .execute(&self.pool)
            .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }
}
