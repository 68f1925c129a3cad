use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::config::settings::WorkerSettings;
use crate::modules::jobs::{Job, JobStatus, JobStore, Outcome, StoreError};
use crate::modules::render::RenderPipeline;

pub const STALE_CLAIM_REASON: &str = "interrupted: worker lost its claim";

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Stranded `processing` jobs failed by the stale-claim sweep.
    pub swept: usize,
}

impl TickReport {
    fn record(&mut self, status: Option<JobStatus>) {
        match status {
            Some(JobStatus::Completed) => self.completed += 1,
            Some(JobStatus::Failed) => self.failed += 1,
            _ => {}
        }
    }
}

/// How `dispatch` treats a full worker.
#[derive(Clone, Copy)]
enum Capacity {
    /// Stop claiming once every permit is taken.
    FreeSlotsOnly,
    /// Wait for a running job to give its permit back.
    WaitForSlot,
}

type JobTasks = JoinSet<Option<JobStatus>>;

/// Claims pending jobs on a fixed interval and drives each through the render pipeline.
pub struct Poller {
    store: Arc<dyn JobStore>,
    pipeline: Arc<RenderPipeline>,
    settings: WorkerSettings,
    backoff: Arc<dyn BackoffPolicy>,
    permits: Arc<Semaphore>,
    heartbeat: Duration,
}

impl Poller {
    pub fn new(store: Arc<dyn JobStore>, pipeline: Arc<RenderPipeline>, settings: WorkerSettings) -> Self {
        let backoff = Arc::new(ExponentialBackoff::from_base(settings.error_backoff));
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        let heartbeat = (settings.stale_job_after / 4).max(MIN_HEARTBEAT);

        Self {
            store,
            pipeline,
            settings,
            backoff,
            permits,
            heartbeat,
        }
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until `cancel` fires. Jobs run in the background while polling continues;
    /// on shutdown they are cancelled and drained before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.poll_interval.as_secs_f64(),
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            "🎬 Render worker started"
        );

        let mut tasks = JobTasks::new();
        let mut consecutive_failures = 0u32;

        while !cancel.is_cancelled() {
            while let Some(joined) = tasks.try_join_next() {
                job_finished(joined);
            }

            let delay = match self.dispatch(&mut tasks, &cancel, Capacity::FreeSlotsOnly).await {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.claimed > 0 || report.swept > 0 {
                        info!(
                            claimed = report.claimed,
                            swept = report.swept,
                            in_flight = tasks.len(),
                            "Dispatched jobs"
                        );
                    }
                    self.settings.poll_interval
                }
                Err(e) => {
                    let delay = self.backoff.delay(consecutive_failures);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    error!(
                        error = %e,
                        consecutive_failures,
                        delay_secs = delay.as_secs_f64(),
                        "❌ Job store unavailable, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                // A finished job frees a slot, so poll again straight away.
                Some(joined) = tasks.join_next(), if consecutive_failures == 0 => {
                    job_finished(joined);
                }
                _ = cancel.cancelled() => break,
            }
        }

        // Job tokens are children of `cancel`; everything left is already winding down.
        while let Some(joined) = tasks.join_next().await {
            job_finished(joined);
        }

        info!("🛑 Render worker stopped");
    }

    /// One full pass: sweep stale claims, claim until nothing is pending, wait for every job.
    pub async fn run_once(&self) -> Result<TickReport, StoreError> {
        let mut tasks = JobTasks::new();
        let dispatched = self
            .dispatch(&mut tasks, &CancellationToken::new(), Capacity::WaitForSlot)
            .await;

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            finished.push(job_finished(joined));
        }

        let mut report = dispatched?;
        for status in finished {
            report.record(status);
        }
        Ok(report)
    }

    /// Sweep stale claims, then claim jobs into `tasks` while there is capacity.
    /// Each spawned task finalizes its own job and gives its permit back.
    async fn dispatch(
        &self,
        tasks: &mut JobTasks,
        cancel: &CancellationToken,
        capacity: Capacity,
    ) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();

        let stale = self
            .store
            .fail_stale(self.settings.stale_job_after, STALE_CLAIM_REASON)
            .await?;
        for job in &stale {
            warn!(job_id = %job.id, "Failed stale job left in processing");
        }
        report.swept = stale.len();

        loop {
            // Capacity first, so a claimed job always has a slot to run in.
            let permit = match capacity {
                Capacity::FreeSlotsOnly => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match self.permits.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
                Capacity::WaitForSlot => tokio::select! {
                    permit = self.permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = cancel.cancelled() => break,
                },
            };

            let Some(job) = self.store.claim_next().await? else {
                break;
            };

            report.claimed += 1;
            info!(job_id = %job.id, title = %job.title, "📦 Claimed job");

            tasks.spawn(supervise(
                self.store.clone(),
                self.pipeline.clone(),
                job,
                permit,
                cancel.child_token(),
                self.heartbeat,
            ));
        }

        Ok(report)
    }
}

/// Drive one claimed job to a terminal status, refreshing its claim while it runs.
async fn supervise(
    store: Arc<dyn JobStore>,
    pipeline: Arc<RenderPipeline>,
    job: Job,
    _permit: OwnedSemaphorePermit,
    cancel: CancellationToken,
    heartbeat: Duration,
) -> Option<JobStatus> {
    let job_id = job.id;

    // The pipeline runs in its own task so a panic is contained and the job still finalizes.
    let mut handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match pipeline.run(&job, &cancel).await {
                Ok(published) => Outcome::Completed(published),
                Err(failure) => {
                    warn!(
                        job_id = %job.id,
                        stage = failure.error.stage(),
                        error = %failure.error,
                        "Job failed"
                    );
                    failure.into_outcome()
                }
            }
        })
    };

    let mut beat = tokio::time::interval(heartbeat);
    beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    beat.tick().await;

    let joined = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = beat.tick() => match store.touch(job_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(job_id = %job_id, "Claim lost while running, cancelling job");
                    cancel.cancel();
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Heartbeat failed"),
            },
        }
    };

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Job task crashed");
            Outcome::failed(format!("worker task crashed: {e}"))
        }
    };

    finalize(store.as_ref(), job_id, outcome).await
}

fn job_finished(joined: Result<Option<JobStatus>, JoinError>) -> Option<JobStatus> {
    match joined {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Job supervisor task failed");
            None
        }
    }
}

async fn finalize(store: &dyn JobStore, job_id: Uuid, outcome: Outcome) -> Option<JobStatus> {
    match store.finalize(job_id, outcome).await {
        Ok(job) => {
            match job.status {
                JobStatus::Completed => info!(job_id = %job_id, "✅ Job completed"),
                _ => info!(
                    job_id = %job_id,
                    error = job.error_message.as_deref().unwrap_or_default(),
                    "Job marked failed"
                ),
            }
            Some(job.status)
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::{Job, JobFilter, MemoryJobStore, NewJob, StoreResult};
    use crate::modules::render::{
        ArtifactPublisher, AssemblyRequest, EncodeError, LocalPublisher, SpeechSynthesizer, SynthesisError,
        VideoAssembler,
    };
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeSynthesizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(&self, text: &str, output: &Path, _cancel: &CancellationToken) -> Result<(), SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == "panic" {
                panic!("synthesizer blew up");
            }
            tokio::fs::write(output, b"audio").await?;
            Ok(())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    /// Fails any job with a `broken.jpg` frame; waits for cancellation on `slow.jpg`.
    #[derive(Default)]
    struct FakeAssembler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VideoAssembler for FakeAssembler {
        async fn assemble(&self, request: &AssemblyRequest, cancel: &CancellationToken) -> Result<PathBuf, EncodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.images.iter().any(|i| i == "broken.jpg") {
                return Err(EncodeError::failed(Some(1), b"broken.jpg: Invalid data found"));
            }
            if request.images.iter().any(|i| i == "slow.jpg") {
                cancel.cancelled().await;
                return Err(EncodeError::Cancelled);
            }
            tokio::fs::write(&request.output, b"video").await?;
            Ok(request.output.clone())
        }
    }

    struct Harness {
        store: Arc<MemoryJobStore>,
        synth: Arc<FakeSynthesizer>,
        assembler: Arc<FakeAssembler>,
        uploads: TempDir,
        _static_root: TempDir,
        poller: Poller,
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            max_concurrent_jobs: 2,
            stale_job_after: Duration::from_secs(3600),
        }
    }

    fn harness_with(settings: WorkerSettings) -> Harness {
        let store = Arc::new(MemoryJobStore::new());
        let synth = Arc::new(FakeSynthesizer::default());
        let assembler = Arc::new(FakeAssembler::default());
        let uploads = tempfile::tempdir().unwrap();
        let static_root = tempfile::tempdir().unwrap();
        let publisher: Arc<dyn ArtifactPublisher> =
            Arc::new(LocalPublisher::new(static_root.path(), "http://localhost:3000"));

        let pipeline = Arc::new(RenderPipeline::new(
            uploads.path(),
            synth.clone(),
            assembler.clone(),
            publisher,
        ));
        let poller = Poller::new(store.clone(), pipeline, settings);

        Harness {
            store,
            synth,
            assembler,
            uploads,
            _static_root: static_root,
            poller,
        }
    }

    fn harness() -> Harness {
        harness_with(settings())
    }

    impl Harness {
        /// Submit a job and lay its images out in the upload directory.
        async fn submit(&self, description: &str, images: &[&str]) -> Uuid {
            let id = Uuid::new_v4();
            let dir = self.uploads.path().join(id.to_string());
            std::fs::create_dir_all(&dir).unwrap();
            for image in images {
                std::fs::write(dir.join(image), b"img").unwrap();
            }

            self.store
                .create(NewJob {
                    id,
                    title: "My Reel".into(),
                    description: description.into(),
                    input_assets: images.iter().map(|s| s.to_string()).collect(),
                })
                .await
                .unwrap();
            id
        }

        async fn job(&self, id: Uuid) -> Job {
            self.store.get(id).await.unwrap().unwrap()
        }

        async fn wait_for(&self, id: Uuid, status: JobStatus, within: Duration) -> Job {
            let deadline = tokio::time::Instant::now() + within;
            loop {
                let job = self.job(id).await;
                if job.status == status || tokio::time::Instant::now() >= deadline {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn start(self: &Arc<Self>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
            let h = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { h.poller.run(cancel).await })
        }
    }

    #[tokio::test]
    async fn test_one_failing_job_does_not_affect_another() {
        let h = harness();
        let bad = h.submit("A rainy day", &["a.jpg", "broken.jpg"]).await;
        let good = h.submit("A sunny day", &["a.jpg", "b.jpg"]).await;

        let report = h.poller.run_once().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);

        let bad = h.job(bad).await;
        assert_eq!(bad.status, JobStatus::Failed);
        assert!(bad.error_message.unwrap().contains("Invalid data found"));
        assert!(bad.audio_asset.unwrap().ends_with("audio.mp3"));
        assert_eq!(bad.video_asset, None);

        let good = h.job(good).await;
        assert_eq!(good.status, JobStatus::Completed);
        assert_eq!(good.error_message, None);
        assert_eq!(
            good.video_asset.as_deref(),
            Some(format!("http://localhost:3000/static/reels/{}.mp4", good.id).as_str())
        );
        assert_eq!(
            good.thumbnail_url.as_deref(),
            Some(format!("http://localhost:3000/static/reels/{}.jpg", good.id).as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_input_fails_fast_without_external_calls() {
        let h = harness();
        let no_description = h.submit("", &["a.jpg"]).await;
        let no_images = h.submit("Words", &[]).await;
        let escaping = Uuid::new_v4();
        h.store
            .create(NewJob {
                id: escaping,
                title: "My Reel".into(),
                description: "Words".into(),
                input_assets: vec!["../../etc/passwd".into()],
            })
            .await
            .unwrap();

        let report = h.poller.run_once().await.unwrap();

        assert_eq!(report.failed, 3);
        assert_eq!(h.synth.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.assembler.calls.load(Ordering::SeqCst), 0);

        let job = h.job(no_description).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Missing input: description is empty"));
        assert_eq!(
            h.job(no_images).await.error_message.as_deref(),
            Some("Missing input: no input images")
        );
        assert_eq!(h.job(escaping).await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_never_picked_up_again() {
        let h = harness();
        let id = h.submit("A sunny day", &["a.jpg"]).await;

        let first = h.poller.run_once().await.unwrap();
        let second = h.poller.run_once().await.unwrap();

        assert_eq!(first.completed, 1);
        assert_eq!(second, TickReport::default());
        assert_eq!(h.synth.calls.load(Ordering::SeqCst), 1);

        let err = h.store.finalize(id, Outcome::failed("late write")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(h.job(id).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_panicking_job_is_finalized_failed() {
        let h = harness();
        let id = h.submit("panic", &["a.jpg"]).await;
        let other = h.submit("A sunny day", &["a.jpg"]).await;

        let report = h.poller.run_once().await.unwrap();

        assert_eq!(report.claimed, 2);
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().starts_with("worker task crashed"));
        assert_eq!(h.job(other).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_many_jobs_drain_in_one_tick_with_bounded_concurrency() {
        let h = harness();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(h.submit("A sunny day", &["a.jpg"]).await);
        }

        let report = h.poller.run_once().await.unwrap();

        assert_eq!(report.claimed, 5);
        assert_eq!(report.completed, 5);
        assert_eq!(h.poller.permits.available_permits(), 2);
        let pending = h
            .store
            .list(JobFilter {
                status: Some(JobStatus::Pending),
                limit: None,
            })
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_stale_processing_jobs_are_swept() {
        let h = harness_with(WorkerSettings {
            stale_job_after: Duration::from_millis(1),
            ..settings()
        });
        let id = h.submit("A sunny day", &["a.jpg"]).await;
        h.store.claim_next().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = h.poller.run_once().await.unwrap();

        assert_eq!(report.swept, 1);
        assert_eq!(report.claimed, 0);
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(STALE_CLAIM_REASON));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_jobs() {
        let h = Arc::new(harness());
        let id = h.submit("A slow day", &["slow.jpg"]).await;

        let cancel = CancellationToken::new();
        let worker = h.start(&cancel);

        let job = h.wait_for(id, JobStatus::Processing, Duration::from_secs(2)).await;
        assert_eq!(job.status, JobStatus::Processing);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();

        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Job cancelled before completion"));
    }

    #[tokio::test]
    async fn test_slow_job_does_not_hold_up_new_claims() {
        let h = Arc::new(harness());
        let slow = h.submit("A slow day", &["slow.jpg"]).await;

        let cancel = CancellationToken::new();
        let worker = h.start(&cancel);
        assert_eq!(
            h.wait_for(slow, JobStatus::Processing, Duration::from_secs(2)).await.status,
            JobStatus::Processing
        );

        let fast = h.submit("A sunny day", &["a.jpg"]).await;
        let fast = h.wait_for(fast, JobStatus::Completed, Duration::from_secs(2)).await;

        assert_eq!(fast.status, JobStatus::Completed);
        assert_eq!(h.job(slow).await.status, JobStatus::Processing);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
        assert_eq!(h.job(slow).await.status, JobStatus::Failed);
        assert_eq!(h.poller.permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_running_job_survives_another_workers_sweep() {
        let short_window = WorkerSettings {
            stale_job_after: Duration::from_millis(200),
            ..settings()
        };
        let h = Arc::new(harness_with(short_window.clone()));
        let id = h.submit("A slow day", &["slow.jpg"]).await;

        let cancel = CancellationToken::new();
        let worker = h.start(&cancel);
        h.wait_for(id, JobStatus::Processing, Duration::from_secs(2)).await;

        // Well past the stale window; only the heartbeat keeps the claim fresh.
        tokio::time::sleep(Duration::from_millis(600)).await;

        let other = Poller::new(h.store.clone(), h.poller.pipeline.clone(), short_window);
        let report = other.run_once().await.unwrap();

        assert_eq!(report.swept, 0);
        assert_eq!(report.claimed, 0);
        assert_eq!(h.job(id).await.status, JobStatus::Processing);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Job cancelled before completion"));
    }

    struct UnavailableStore;

    #[async_trait]
    impl JobStore for UnavailableStore {
        async fn create(&self, _job: NewJob) -> StoreResult<Job> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn claim_next(&self) -> StoreResult<Option<Job>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn finalize(&self, id: Uuid, _outcome: Outcome) -> StoreResult<Job> {
            Err(StoreError::NotFound(id))
        }
        async fn get(&self, _id: Uuid) -> StoreResult<Option<Job>> {
            Ok(None)
        }
        async fn list(&self, _filter: JobFilter) -> StoreResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn fail_stale(&self, _older_than: Duration, _reason: &str) -> StoreResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn touch(&self, _id: Uuid) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[derive(Default)]
    struct RecordingBackoff {
        seen: Mutex<Vec<u32>>,
    }

    impl BackoffPolicy for RecordingBackoff {
        fn delay(&self, consecutive_failures: u32) -> Duration {
            self.seen.lock().unwrap().push(consecutive_failures);
            Duration::from_millis(5)
        }
    }

    #[tokio::test]
    async fn test_store_errors_back_off_and_keep_the_loop_alive() {
        let h = harness();
        let backoff = Arc::new(RecordingBackoff::default());
        let pipeline = h.poller.pipeline.clone();
        let poller = Poller::new(Arc::new(UnavailableStore), pipeline, settings()).with_backoff(backoff.clone());

        assert!(matches!(poller.run_once().await, Err(StoreError::Unavailable(_))));

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), poller.run(cancel)).await.unwrap();

        let seen = backoff.seen.lock().unwrap().clone();
        assert!(seen.len() >= 2);
        assert_eq!(&seen[..2], &[0, 1]);
    }
}
