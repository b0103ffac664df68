//! Transcode job lifecycle
//!
//! One job per track id. The coordinator launches it through a
//! [`TranscodeExecutor`], relays the executor's events to whoever currently
//! subscribes to that track, and owns cleanup of the job's temp file.
//!
//! Guarantees per job:
//! - zero or more `Progress` events, then exactly one terminal event
//! - nothing after the terminal event
//! - the temp file is deleted on failure, and on success when no subscriber
//!   is left to play it
//!
//! Jobs are never killed. A track change only releases interest; a job that
//! is still running finishes in the background and its output is discarded.

use crate::pipeline::collab::{ExecutorEvent, TranscodeExecutor, TranscodeRequest};
use crate::pipeline::transcode::registry::TempFileRegistry;
use cadence_common::{Track, TrackId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Snapshot of one job
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub track_id: TrackId,
    pub source_url: String,
    /// Path reserved in the temp-file registry at launch
    pub planned_path: PathBuf,
    /// Set only when the job succeeded
    pub output_path: Option<PathBuf>,
    pub status: JobStatus,
}

/// What a subscriber hears about its job
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// 0-99
    Progress(f32),
    Completed(PathBuf),
    Failed(String),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress(_))
    }
}

/// Interest in one track's job
///
/// Dropping the subscription unsubscribes: later events for the job go
/// nowhere, and a result that nobody receives is cleaned up.
#[derive(Debug)]
pub struct JobSubscription {
    track_id: TrackId,
    events: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobSubscription {
    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    /// Next event; `None` once the job has nothing more to say
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }
}

struct JobEntry {
    job: TranscodeJob,
    /// Distinguishes successive jobs for the same track
    generation: u64,
    subscriber: Option<mpsc::UnboundedSender<JobEvent>>,
    /// Track was released while the job was running
    abandoned: bool,
}

impl JobEntry {
    fn notify(&self, event: JobEvent) {
        if let Some(tx) = &self.subscriber {
            // Receiver gone means the subscriber lost interest
            let _ = tx.send(event);
        }
    }

    fn has_live_subscriber(&self) -> bool {
        self.subscriber.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

type JobTable = Arc<Mutex<HashMap<TrackId, JobEntry>>>;

/// Launches, relays and cleans up transcode jobs
pub struct TranscodeCoordinator {
    executor: Arc<dyn TranscodeExecutor>,
    registry: TempFileRegistry,
    jobs: JobTable,
    next_generation: u64,
}

impl TranscodeCoordinator {
    pub fn new(executor: Arc<dyn TranscodeExecutor>, registry: TempFileRegistry) -> Self {
        Self {
            executor,
            registry,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: 0,
        }
    }

    /// Start (or rejoin) the job for a track.
    ///
    /// Returns immediately. If a job for the same track is still running the
    /// caller is re-subscribed to it instead of launching a second process.
    /// A launch failure is delivered as the subscription's only event.
    pub fn start_job(&mut self, track: &Track, source_url: &str) -> JobSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = JobSubscription {
            track_id: track.id.clone(),
            events: rx,
        };

        let mut jobs = self.jobs.lock();

        if let Some(entry) = jobs.get_mut(&track.id) {
            if !entry.job.status.is_finished() {
                info!(track_id = %track.id, "Rejoining running transcode job");
                entry.subscriber = Some(tx);
                entry.abandoned = false;
                return subscription;
            }
        }

        // A finished job left over for this track is superseded
        if let Some(stale) = jobs.remove(&track.id) {
            discard_output(&self.registry, &stale.job);
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let planned_path = self.registry.allocate(&track.id);
        let request = TranscodeRequest {
            source_url: source_url.to_string(),
            correlation_id: track.id.clone(),
            output_path: planned_path.clone(),
        };

        jobs.insert(
            track.id.clone(),
            JobEntry {
                job: TranscodeJob {
                    track_id: track.id.clone(),
                    source_url: source_url.to_string(),
                    planned_path: planned_path.clone(),
                    output_path: None,
                    status: JobStatus::Pending,
                },
                generation,
                subscriber: Some(tx),
                abandoned: false,
            },
        );

        let (exec_tx, exec_rx) = mpsc::unbounded_channel();
        match self.executor.spawn(request, exec_tx) {
            Ok(()) => {
                if let Some(entry) = jobs.get_mut(&track.id) {
                    entry.job.status = JobStatus::Running;
                }
                drop(jobs);
                info!(
                    track_id = %track.id,
                    output = %planned_path.display(),
                    "Transcode job started"
                );

                tokio::spawn(relay(
                    Arc::clone(&self.jobs),
                    self.registry.clone(),
                    track.id.clone(),
                    generation,
                    exec_rx,
                ));
            }
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "Transcode job failed to launch");
                self.registry.remove(&planned_path);
                if let Some(entry) = jobs.remove(&track.id) {
                    entry.notify(JobEvent::Failed(e.to_string()));
                }
            }
        }

        subscription
    }

    /// Give up interest in a track's job.
    ///
    /// A finished job's output is deleted now; a running job is marked so its
    /// output is deleted when it finishes.
    pub fn release(&mut self, track_id: &TrackId) {
        let mut jobs = self.jobs.lock();
        let finished = match jobs.get_mut(track_id) {
            Some(entry) if entry.job.status.is_finished() => true,
            Some(entry) => {
                debug!(track_id = %track_id, "Abandoning running transcode job");
                entry.abandoned = true;
                entry.subscriber = None;
                false
            }
            None => return,
        };

        if finished {
            if let Some(entry) = jobs.remove(track_id) {
                discard_output(&self.registry, &entry.job);
            }
        }
    }

    /// Snapshot of a track's job
    pub fn job(&self, track_id: &TrackId) -> Option<TranscodeJob> {
        self.jobs.lock().get(track_id).map(|entry| entry.job.clone())
    }

    /// Jobs that have not reached their terminal event
    pub fn in_flight(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|entry| !entry.job.status.is_finished())
            .count()
    }

    /// Release every job and sweep the registry.
    pub fn shutdown(&mut self) -> usize {
        let track_ids: Vec<TrackId> = self.jobs.lock().keys().cloned().collect();
        for track_id in &track_ids {
            self.release(track_id);
        }
        self.registry.sweep()
    }
}

/// Delete whatever a finished job left on disk
fn discard_output(registry: &TempFileRegistry, job: &TranscodeJob) {
    if let Some(output) = &job.output_path {
        registry.remove(output);
    }
    registry.remove(&job.planned_path);
}

/// Forward executor events for one job until its terminal event
async fn relay(
    jobs: JobTable,
    registry: TempFileRegistry,
    track_id: TrackId,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ExecutorEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ExecutorEvent::Progress {
                correlation_id,
                percent,
            } => {
                if correlation_id != track_id {
                    warn!(expected = %track_id, got = %correlation_id, "Progress for wrong job ignored");
                    continue;
                }
                let jobs = jobs.lock();
                if let Some(entry) = jobs.get(&track_id) {
                    if entry.generation == generation && !entry.job.status.is_finished() {
                        entry.notify(JobEvent::Progress(clamp_percent(percent)));
                    }
                }
            }
            ExecutorEvent::Terminal {
                correlation_id,
                outcome,
            } => {
                if correlation_id != track_id {
                    warn!(expected = %track_id, got = %correlation_id, "Terminal event for wrong job ignored");
                    continue;
                }
                finish(&jobs, &registry, &track_id, generation, outcome);
                return;
            }
        }
    }

    finish(
        &jobs,
        &registry,
        &track_id,
        generation,
        Err("transcoder exited without reporting a result".to_string()),
    );
}

fn finish(
    jobs: &JobTable,
    registry: &TempFileRegistry,
    track_id: &TrackId,
    generation: u64,
    outcome: std::result::Result<PathBuf, String>,
) {
    let mut jobs = jobs.lock();
    let Some(entry) = jobs
        .get_mut(track_id)
        .filter(|entry| entry.generation == generation)
    else {
        // Entry already released and swept; make sure nothing is left behind
        if let Ok(path) = &outcome {
            registry.remove(path);
        }
        return;
    };

    match outcome {
        Ok(path) if entry.abandoned || !entry.has_live_subscriber() => {
            info!(track_id = %track_id, "Discarding output of abandoned transcode job");
            registry.remove(&path);
            registry.remove(&entry.job.planned_path);
            jobs.remove(track_id);
        }
        Ok(path) => {
            info!(track_id = %track_id, output = %path.display(), "Transcode job completed");
            entry.job.status = JobStatus::Succeeded;
            entry.job.output_path = Some(path.clone());
            entry.notify(JobEvent::Completed(path));
        }
        Err(reason) => {
            warn!(track_id = %track_id, reason = %reason, "Transcode job failed");
            entry.job.status = JobStatus::Failed;
            registry.remove(&entry.job.planned_path);
            entry.notify(JobEvent::Failed(reason));
            if entry.abandoned {
                jobs.remove(track_id);
            }
        }
    }
}

fn clamp_percent(percent: f32) -> f32 {
    if percent.is_finite() {
        percent.clamp(0.0, 99.0)
    } else {
        0.0
    }
}
