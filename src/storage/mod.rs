//! Database storage layer
//!
//! Repositories own a clone of the shared pool. In-memory caches (the
//! honeypot-enabled map, the sensor set, the reference lists) are filled
//! when a repository is constructed at the start of a run and discarded
//! with it, so every run starts from the persisted state.

pub mod ioc;
pub mod reference;
pub mod sensor;
pub mod session;
pub mod tag;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use ioc::IocRepository;
pub use reference::{HighRiskNetworkRepository, MassScannerRepository, WhatsMyIpRepository};
pub use sensor::SensorRepository;
pub use session::CowrieSessionRepository;
pub use tag::TagRepository;

/// Shared database handle.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }
}
