use crate::{
    models::{AnalyzeRequest, AnalyzeResponse, ApiError},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::warn;
use uuid::Uuid;

/// Background analysis queue: one worker, bounded channel, statuses polled by id.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    retention: Retention,
}

/// How long finished jobs stay pollable, and how many are kept at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub ttl: Duration,
    pub max_finished: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_finished: 1000,
        }
    }
}

impl Retention {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let number = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        Self {
            ttl: number("JOB_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            max_finished: number("JOB_MAX_RETAINED")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_finished),
        }
    }
}

struct JobEntry {
    state: JobState,
    finished_at: Option<Instant>,
}

impl JobEntry {
    fn pending(state: JobState) -> Self {
        Self {
            state,
            finished_at: None,
        }
    }
}

struct Job {
    id: Uuid,
    request: AnalyzeRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: AnalyzeResponse },
    Failed { error: String },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline, capacity: usize) -> (Self, JoinHandle<()>) {
        Self::spawn_with(pipeline, capacity, Retention::default())
    }

    pub fn spawn_with(
        pipeline: Pipeline,
        capacity: usize,
        retention: Retention,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                statuses_bg
                    .lock()
                    .await
                    .insert(job.id, JobEntry::pending(JobState::Running));

                let pipeline = pipeline.clone();
                let request = job.request;
                // Analysis is total; only a panic inside it ends up as a failed job.
                let run = tokio::spawn(async move {
                    pipeline
                        .analyze(&request.text, &request.images, &request.options)
                        .await
                });
                let state = match run.await {
                    Ok(report) => JobState::Completed {
                        result: AnalyzeResponse {
                            analyzed: report.product,
                            meta: report.meta,
                        },
                    },
                    Err(err) => {
                        warn!(target: "analyzer.api", job = %job.id, error = %err, "analysis job failed");
                        JobState::Failed {
                            error: err.to_string(),
                        }
                    }
                };
                let now = Instant::now();
                let mut guard = statuses_bg.lock().await;
                guard.insert(
                    job.id,
                    JobEntry {
                        state,
                        finished_at: Some(now),
                    },
                );
                prune(&mut guard, &retention, now);
            }
        });

        (
            Self {
                tx,
                statuses,
                retention,
            },
            handle,
        )
    }

    pub async fn enqueue(&self, request: AnalyzeRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        self.statuses
            .lock()
            .await
            .insert(id, JobEntry::pending(JobState::Queued));
        if self.tx.send(Job { id, request }).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let mut guard = self.statuses.lock().await;
        prune(&mut guard, &self.retention, Instant::now());
        guard.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            state: entry.state.clone(),
        })
    }
}

/// Drops finished jobs past their TTL, then the oldest finished ones beyond the cap.
/// Queued and running jobs are never dropped.
fn prune(statuses: &mut HashMap<Uuid, JobEntry>, retention: &Retention, now: Instant) {
    statuses.retain(|_, entry| {
        entry
            .finished_at
            .is_none_or(|at| now.saturating_duration_since(at) < retention.ttl)
    });
    let mut finished: Vec<(Instant, Uuid)> = statuses
        .iter()
        .filter_map(|(id, entry)| entry.finished_at.map(|at| (at, *id)))
        .collect();
    if finished.len() <= retention.max_finished {
        return;
    }
    finished.sort();
    let excess = finished.len() - retention.max_finished;
    for (_, id) in finished.into_iter().take(excess) {
        statuses.remove(&id);
    }
}

pub fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
