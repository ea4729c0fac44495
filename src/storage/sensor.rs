//! Repository for trusted sensor addresses with a per-run cache

use std::collections::HashSet;

use sqlx::PgPool;

use crate::error::Result;
use crate::models::{IocKind, Sensor, ioc_utils::ioc_kind_of};

/// Data access to the set of honeypot sensors.
///
/// The cache is filled once from the database at construction and updated
/// on successful additions, so registrations from earlier chunks are
/// visible to later ones in the same run.
pub struct SensorRepository {
    pool: PgPool,
    cache: HashSet<String>,
}

impl SensorRepository {
    pub async fn new(pool: PgPool) -> Result<Self> {
        tracing::debug!("populating sensor cache");
        let rows: Vec<Sensor> = sqlx::query_as("SELECT address FROM sensors")
            .fetch_all(&pool)
            .await?;
        Ok(Self {
            pool,
            cache: rows.into_iter().map(|sensor| sensor.address).collect(),
        })
    }

    /// Exact-match lookup against the known sensor set.
    pub fn contains(&self, address: &str) -> bool {
        self.cache.contains(address)
    }

    /// Register a sensor address. Returns true if it was newly added,
    /// false when already known or not a valid IP address.
    pub async fn add_sensor(&mut self, address: &str) -> Result<bool> {
        if self.cache.contains(address) {
            return Ok(false);
        }
        if ioc_kind_of(address) != IocKind::Ip {
            tracing::debug!(address, "not an IP address - won't add as a sensor");
            return Ok(false);
        }
        sqlx::query("INSERT INTO sensors (address) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(address)
            .execute(&self.pool)
            .await?;
        self.cache.insert(address.to_string());
        tracing::info!(address, "added sensor");
        Ok(true)
    }
}
