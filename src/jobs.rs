use crate::{batch::PricingPipeline, error::PricingError, models::BatchStatus};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::error;
use uuid::Uuid;

/// Hands batches to a single background worker, one at a time, and
/// keeps a status snapshot per batch id for polling.
#[derive(Clone)]
pub struct BatchQueue {
    tx: mpsc::Sender<BatchJob>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Clone, Copy)]
struct BatchJob {
    batch_id: Uuid,
    user_id: Uuid,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        status: BatchStatus,
        processed_skus: u32,
        successful_updates: u32,
        failed_updates: u32,
    },
    Failed {
        error: String,
    },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub batch_id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl BatchQueue {
    pub fn spawn(pipeline: PricingPipeline) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<BatchJob>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.batch_id, JobState::Running);
                }

                let result = pipeline.run_batch(job.batch_id, job.user_id).await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(batch) => {
                        guard.insert(
                            job.batch_id,
                            JobState::Completed {
                                status: batch.status,
                                processed_skus: batch.processed_skus,
                                successful_updates: batch.successful_updates,
                                failed_updates: batch.failed_updates,
                            },
                        );
                    }
                    Err(err) => {
                        error!(
                            target = "repricer.jobs",
                            batch_id = %job.batch_id,
                            error = %err,
                            "batch_job_failed"
                        );
                        guard.insert(
                            job.batch_id,
                            JobState::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, batch_id: Uuid, user_id: Uuid) -> Result<(), PricingError> {
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(batch_id, JobState::Queued);
        }
        let job = BatchJob { batch_id, user_id };
        self.tx
            .send(job)
            .await
            .map_err(|_| PricingError::job("batch worker not available"))?;
        Ok(())
    }

    pub async fn get(&self, batch_id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&batch_id).cloned().map(|state| JobInfo {
            batch_id: batch_id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("REPRICER_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
