//! Repository for Cowrie sessions and command sequences

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::models::{CommandSequence, CowrieSession, FileTransfer};

pub struct CowrieSessionRepository {
    pool: PgPool,
}

impl CowrieSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Retrieve an existing session or create a fresh one for this id.
    pub async fn get_or_create_session(
        &self,
        session_id: i64,
        source_name: &str,
    ) -> Result<CowrieSession> {
        if let Some(existing) =
            sqlx::query_as::<_, CowrieSession>("SELECT * FROM cowrie_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?
        {
            tracing::debug!(session_id, "session already exists");
            return Ok(existing);
        }
        let session = CowrieSession {
            session_id,
            source_name: source_name.to_string(),
            start_time: None,
            duration: 0.0,
            login_attempt: false,
            command_execution: false,
            interaction_count: 0,
            credentials: vec![],
            commands_hash: None,
        };
        sqlx::query(
            r#"
            INSERT INTO cowrie_sessions (
                session_id, source_name, start_time, duration, login_attempt,
                command_execution, interaction_count, credentials, commands_hash
            )
            VALUES ($1, $2, NULL, 0, FALSE, FALSE, 0, '{}', NULL)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(source_name)
        .execute(&self.pool)
        .await?;
        tracing::debug!(session_id, "created new session");
        Ok(session)
    }

    /// Persist the mutable attributes of a session.
    pub async fn save_session(&self, session: &CowrieSession) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cowrie_sessions SET
                start_time = $2, duration = $3, login_attempt = $4,
                command_execution = $5, interaction_count = $6,
                credentials = $7, commands_hash = $8
            WHERE session_id = $1
            "#,
        )
        .bind(session.session_id)
        .bind(session.start_time)
        .bind(session.duration)
        .bind(session.login_attempt)
        .bind(session.command_execution)
        .bind(session.interaction_count)
        .bind(&session.credentials)
        .bind(&session.commands_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a stored command sequence by its content hash.
    pub async fn get_command_sequence_by_hash(
        &self,
        commands_hash: &str,
    ) -> Result<Option<CommandSequence>> {
        let sequence = sqlx::query_as::<_, CommandSequence>(
            "SELECT * FROM command_sequences WHERE commands_hash = $1",
        )
        .bind(commands_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sequence)
    }

    /// Store a new command sequence row.
    pub async fn insert_command_sequence(&self, sequence: &CommandSequence) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO command_sequences (commands_hash, commands, first_seen, last_seen, cluster)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (commands_hash) DO UPDATE SET last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(&sequence.commands_hash)
        .bind(&sequence.commands)
        .bind(sequence.first_seen)
        .bind(sequence.last_seen)
        .bind(sequence.cluster)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a stored sequence's `last_seen` forward. Used when a new
    /// session resolves to already-stored content.
    pub async fn bump_sequence_last_seen(
        &self,
        commands_hash: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE command_sequences SET last_seen = GREATEST(last_seen, $2) WHERE commands_hash = $1",
        )
        .bind(commands_hash)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All stored sequences with their current cluster labels.
    pub async fn all_command_sequences(&self) -> Result<Vec<CommandSequence>> {
        let sequences = sqlx::query_as::<_, CommandSequence>(
            "SELECT * FROM command_sequences ORDER BY first_seen, commands_hash",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sequences)
    }

    /// Write changed cluster labels back, in batches.
    pub async fn update_cluster_labels(
        &self,
        labels: &[(String, i32)],
        batch_size: usize,
    ) -> Result<u64> {
        let mut written = 0;
        for batch in labels.chunks(batch_size.max(1)) {
            let hashes: Vec<String> = batch.iter().map(|(h, _)| h.clone()).collect();
            let clusters: Vec<i32> = batch.iter().map(|(_, c)| *c).collect();
            let result = sqlx::query(
                r#"
                UPDATE command_sequences SET cluster = data.cluster
                FROM (
                    SELECT * FROM UNNEST($1::text[], $2::int4[]) AS t(commands_hash, cluster)
                ) AS data
                WHERE command_sequences.commands_hash = data.commands_hash
                "#,
            )
            .bind(&hashes)
            .bind(&clusters)
            .execute(&self.pool)
            .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    /// Attach a file-transfer record to a session.
    pub async fn save_file_transfer(&self, transfer: &FileTransfer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_transfers (session_id, shasum, url, destination_file)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, shasum) DO NOTHING
            "#,
        )
        .bind(transfer.session_id)
        .bind(&transfer.shasum)
        .bind(&transfer.url)
        .bind(&transfer.destination_file)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
