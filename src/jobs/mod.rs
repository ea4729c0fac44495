//! Batch job contract
//!
//! Every periodic task (extraction, clustering, scoring, training, tag
//! enrichment, reference-list refresh) implements the same thin `run`
//! contract; `execute` wraps it with start/finish logging and converts
//! the outcome into a success flag for the caller's exit code.

use async_trait::async_trait;

#[async_trait]
pub trait Job {
    fn name(&self) -> &'static str;

    async fn run(&mut self) -> anyhow::Result<()>;
}

/// Run a job with the shared logging template. Returns whether it
/// succeeded; the error itself is logged, not propagated.
pub async fn execute(job: &mut dyn Job) -> bool {
    tracing::info!(job = job.name(), "starting execution");
    let success = match job.run().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(job = job.name(), error = ?e, "job failed");
            false
        }
    };
    tracing::info!(job = job.name(), success, "finished execution");
    success
}
