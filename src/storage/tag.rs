//! Repository for enrichment tags

use sqlx::PgPool;

use crate::error::Result;
use crate::models::Tag;

/// One tag entry as reported by a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub ioc_name: String,
    pub key: String,
    pub value: String,
}

pub struct TagRepository {
    pool: PgPool,
}

impl TagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace all tags for a source with the set the feed currently
    /// reports: delete everything from this source, then bulk-insert the
    /// new entries.
    ///
    /// Runs inside a single transaction with the source's existing rows
    /// locked, so concurrent feed runs never interleave partial writes.
    /// Entries pointing at unknown IOCs are dropped at insert time.
    pub async fn replace_tags_for_source(
        &self,
        source: &str,
        entries: &[TagEntry],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT 1 FROM tags WHERE source = $1 FOR UPDATE")
            .bind(source)
            .fetch_all(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM tags WHERE source = $1")
            .bind(source)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut created = 0;
        if !entries.is_empty() {
            let names: Vec<String> = entries.iter().map(|e| e.ioc_name.clone()).collect();
            let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
            let values: Vec<String> = entries.iter().map(|e| e.value.clone()).collect();
            created = sqlx::query(
                r#"
                INSERT INTO tags (ioc_name, key, value, source)
                SELECT data.ioc_name, data.key, data.value, $4
                FROM UNNEST($1::text[], $2::text[], $3::text[]) AS data(ioc_name, key, value)
                JOIN iocs ON iocs.name = data.ioc_name
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&names)
            .bind(&keys)
            .bind(&values)
            .bind(source)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        tracing::info!(source, deleted, created, "replaced tags for source");
        Ok(created)
    }

    pub async fn get_tags_by_ioc(&self, ioc_name: &str) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>(
            "SELECT ioc_name, key, value, source FROM tags WHERE ioc_name = $1",
        )
        .bind(ioc_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    pub async fn get_tags_by_source(&self, source: &str) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>(
            "SELECT ioc_name, key, value, source FROM tags WHERE source = $1",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }
}
