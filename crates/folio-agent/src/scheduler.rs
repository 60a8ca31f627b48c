// ABOUTME: Translation scheduler that keeps every untranslated paragraph moving toward a stored translation.
// ABOUTME: Owns a per-job state map, bounds concurrent provider calls, retries with backoff, and reports exhaustion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use folio_core::change::{ChangeAction, ChangeEvent, Table};
use folio_core::model::{Paragraph, QueuedJob, normalize_language_code};
use folio_core::translation::TranslationRequest;
use folio_store::actor::{BridgeError, BridgeHandle};
use folio_store::live::{self, LiveOptions};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use ulid::Ulid;

use crate::provider::TranslationProvider;

/// Errors returned by scheduler handle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler stopped")]
    ChannelClosed,

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on jobs talking to the provider at once.
    pub max_concurrent: usize,
    /// Attempts per job before it is dropped and reported.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each later attempt.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Debounce for the discovery queries behind `watch_book`.
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            debounce: Duration::from_millis(100),
        }
    }
}

/// Delay before retrying a job whose `attempt`-th try just failed.
pub fn retry_delay(config: &SchedulerConfig, attempt: u32, rate_limited: bool) -> Duration {
    let exponent = attempt.saturating_sub(1) + u32::from(rate_limited);
    let factor = 2u32.saturating_pow(exponent.min(16));
    config
        .retry_delay
        .saturating_mul(factor)
        .min(config.max_retry_delay)
}

/// A job is one paragraph translated into one language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub paragraph_uid: Ulid,
    pub language: String,
}

/// Where a job currently sits in its lifecycle. Finished and exhausted jobs
/// leave the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for a worker slot. `attempts` tries have failed so far.
    Queued { attempts: u32 },
    Running { attempt: u32 },
    /// Failed and waiting out its backoff before going back to the queue.
    Failed { attempts: u32 },
}

/// Reported when a job has used up its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub paragraph_uid: Ulid,
    pub book_uid: Ulid,
    pub language: String,
    pub attempts: u32,
    pub error: String,
}

/// Counts of jobs by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub exhausted: usize,
    pub completed: usize,
}

impl SchedulerStatus {
    /// No job is queued, running, or waiting to retry.
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0 && self.retrying == 0
    }
}

enum JobOutcome {
    Done,
    /// The paragraph disappeared; the job is a no-op.
    Vanished,
    Failed { error: String, rate_limited: bool },
}

enum SchedulerCommand {
    Enqueue {
        job: QueuedJob,
        reply: oneshot::Sender<bool>,
    },
    RetryDue(JobKey),
    WatchBook {
        book_uid: Ulid,
        language: String,
        reply: oneshot::Sender<()>,
    },
    UnwatchBook {
        book_uid: Ulid,
        language: String,
    },
    Shutdown,
}

/// Handle for interacting with a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<SchedulerCommand>,
    bridge: BridgeHandle,
    failures: broadcast::Sender<JobFailure>,
    status: watch::Receiver<SchedulerStatus>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    model: String,
}

impl SchedulerHandle {
    /// Record a job in the durable queue and schedule it. Returns false when
    /// the paragraph is gone, already translated, or already queued.
    pub async fn enqueue(
        &self,
        paragraph_uid: Ulid,
        book_uid: Ulid,
        language: &str,
    ) -> Result<bool, SchedulerError> {
        let job = QueuedJob {
            paragraph_uid,
            book_uid,
            language: normalize_language_code(language),
            model: self.model.clone(),
        };
        if !self.bridge.enqueue_translation(job.clone()).await? {
            return Ok(false);
        }
        self.schedule(job).await
    }

    async fn schedule(&self, job: QueuedJob) -> Result<bool, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SchedulerCommand::Enqueue { job, reply })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    /// Reload jobs recorded in the durable queue, e.g. after a restart.
    /// Returns how many were newly scheduled.
    pub async fn resume(&self) -> Result<usize, SchedulerError> {
        let jobs = self.bridge.list_queued_jobs().await?;
        let mut scheduled = 0;
        for job in jobs {
            if self.schedule(job).await? {
                scheduled += 1;
            }
        }
        tracing::info!(scheduled, "resumed durable translation queue");
        Ok(scheduled)
    }

    /// Keep every untranslated paragraph of `book_uid` scheduled for
    /// `language`, including paragraphs that lose their translation later.
    pub async fn watch_book(&self, book_uid: Ulid, language: &str) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SchedulerCommand::WatchBook {
                book_uid,
                language: normalize_language_code(language),
                reply,
            })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    pub async fn unwatch_book(&self, book_uid: Ulid, language: &str) -> Result<(), SchedulerError> {
        self.cmd_tx
            .send(SchedulerCommand::UnwatchBook {
                book_uid,
                language: normalize_language_code(language),
            })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)
    }

    /// Subscribe to jobs dropped after exhausting their retry budget.
    pub fn failures(&self) -> broadcast::Receiver<JobFailure> {
        self.failures.subscribe()
    }

    pub fn status(&self) -> SchedulerStatus {
        *self.status.borrow()
    }

    /// Wait until nothing is queued, running, or waiting to retry.
    pub async fn wait_idle(&self) -> SchedulerStatus {
        let mut status = self.status.clone();
        match status.wait_for(SchedulerStatus::is_idle).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stop the scheduler. Running provider calls are abandoned; their jobs
    /// stay in the durable queue for `resume`.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Shutdown).await;
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Spawn a scheduler that writes through `bridge` and translates with `provider`.
pub fn spawn(
    bridge: BridgeHandle,
    provider: Arc<dyn TranslationProvider>,
    config: SchedulerConfig,
) -> SchedulerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (failures, _) = broadcast::channel(256);
    let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());
    let model = provider.model_name().to_string();

    let scheduler = Scheduler {
        config,
        bridge: bridge.clone(),
        provider,
        model: model.clone(),
        cmd_tx: cmd_tx.downgrade(),
        jobs: HashMap::new(),
        books: HashMap::new(),
        queue: VecDeque::new(),
        exhausted: HashSet::new(),
        completed: 0,
        workers: JoinSet::new(),
        watchers: HashMap::new(),
        failures: failures.clone(),
        status: status_tx,
    };
    let task = tokio::spawn(scheduler.run(cmd_rx));

    SchedulerHandle {
        cmd_tx,
        bridge,
        failures,
        status: status_rx,
        task: Arc::new(std::sync::Mutex::new(Some(task))),
        model,
    }
}

struct Scheduler {
    config: SchedulerConfig,
    bridge: BridgeHandle,
    provider: Arc<dyn TranslationProvider>,
    model: String,
    cmd_tx: mpsc::WeakSender<SchedulerCommand>,
    jobs: HashMap<JobKey, JobState>,
    books: HashMap<JobKey, Ulid>,
    queue: VecDeque<JobKey>,
    exhausted: HashSet<JobKey>,
    completed: usize,
    workers: JoinSet<(JobKey, u32, JobOutcome)>,
    watchers: HashMap<(Ulid, String), JoinHandle<()>>,
    failures: broadcast::Sender<JobFailure>,
    status: watch::Sender<SchedulerStatus>,
}

impl Scheduler {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SchedulerCommand>) {
        let mut changes = Box::pin(self.bridge.changes());
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            max_attempts = self.config.max_attempts,
            model = %self.model,
            "translation scheduler started"
        );

        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(finished) = self.workers.join_next(), if !self.workers.is_empty() => {
                    match finished {
                        Ok((key, attempt, outcome)) => self.finish(key, attempt, outcome),
                        Err(err) => tracing::error!(error = %err, "translation worker aborted"),
                    }
                }
                Some(event) = changes.next() => self.observe(event),
            }
            self.dispatch();
            self.publish_status();
        }

        self.workers.abort_all();
        for (_, watcher) in self.watchers.drain() {
            watcher.abort();
        }
        tracing::info!("translation scheduler stopped");
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Enqueue { job, reply } => {
                let admitted = self.admit(job);
                self.dispatch();
                self.publish_status();
                let _ = reply.send(admitted);
            }
            SchedulerCommand::RetryDue(key) => {
                if let Some(JobState::Failed { attempts }) = self.jobs.get(&key).copied() {
                    self.jobs.insert(key.clone(), JobState::Queued { attempts });
                    self.queue.push_back(key);
                }
            }
            SchedulerCommand::WatchBook {
                book_uid,
                language,
                reply,
            } => {
                let watch_key = (book_uid, language.clone());
                if !self.watchers.contains_key(&watch_key) {
                    let watcher = self.spawn_discovery(book_uid, language);
                    self.watchers.insert(watch_key, watcher);
                }
                let _ = reply.send(());
            }
            SchedulerCommand::UnwatchBook { book_uid, language } => {
                if let Some(watcher) = self.watchers.remove(&(book_uid, language)) {
                    watcher.abort();
                }
            }
            SchedulerCommand::Shutdown => {}
        }
    }

    /// Add a job unless it is already queued, running, retrying, or exhausted.
    fn admit(&mut self, job: QueuedJob) -> bool {
        let key = JobKey {
            paragraph_uid: job.paragraph_uid,
            language: normalize_language_code(&job.language),
        };
        if self.jobs.contains_key(&key) || self.exhausted.contains(&key) {
            return false;
        }
        tracing::debug!(paragraph = %key.paragraph_uid, language = %key.language, "job queued");
        self.jobs.insert(key.clone(), JobState::Queued { attempts: 0 });
        self.books.insert(key.clone(), job.book_uid);
        self.queue.push_back(key);
        true
    }

    /// Start queued jobs while worker slots are free.
    fn dispatch(&mut self) {
        while self.running() < self.config.max_concurrent.max(1) {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            let Some(JobState::Queued { attempts }) = self.jobs.get(&key).copied() else {
                continue;
            };
            let attempt = attempts + 1;
            self.jobs.insert(key.clone(), JobState::Running { attempt });

            let bridge = self.bridge.clone();
            let provider = Arc::clone(&self.provider);
            let model = self.model.clone();
            self.workers.spawn(async move {
                let outcome = AssertUnwindSafe(run_job(&bridge, provider.as_ref(), &key, &model))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| JobOutcome::Failed {
                        error: "translation worker panicked".to_string(),
                        rate_limited: false,
                    });
                (key, attempt, outcome)
            });
        }
    }

    fn running(&self) -> usize {
        self.jobs
            .values()
            .filter(|state| matches!(state, JobState::Running { .. }))
            .count()
    }

    fn finish(&mut self, key: JobKey, attempt: u32, outcome: JobOutcome) {
        if !matches!(self.jobs.get(&key), Some(JobState::Running { .. })) {
            // Dropped while running (e.g. its paragraph was deleted).
            return;
        }
        match outcome {
            JobOutcome::Done => {
                tracing::info!(paragraph = %key.paragraph_uid, language = %key.language, attempt, "paragraph translated");
                self.forget(&key);
                self.completed += 1;
            }
            JobOutcome::Vanished => {
                tracing::info!(paragraph = %key.paragraph_uid, "paragraph vanished before translation was stored");
                self.forget(&key);
            }
            JobOutcome::Failed {
                error,
                rate_limited,
            } => {
                if attempt >= self.config.max_attempts {
                    let book_uid = self.books.get(&key).copied().unwrap_or(Ulid::nil());
                    tracing::error!(
                        paragraph = %key.paragraph_uid,
                        language = %key.language,
                        attempts = attempt,
                        error = %error,
                        "translation job exhausted its retries"
                    );
                    let _ = self.failures.send(JobFailure {
                        paragraph_uid: key.paragraph_uid,
                        book_uid,
                        language: key.language.clone(),
                        attempts: attempt,
                        error,
                    });
                    self.forget(&key);
                    self.exhausted.insert(key);
                    return;
                }

                let delay = retry_delay(&self.config, attempt, rate_limited);
                tracing::warn!(
                    paragraph = %key.paragraph_uid,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    rate_limited,
                    error = %error,
                    "translation attempt failed"
                );
                self.jobs.insert(key.clone(), JobState::Failed { attempts: attempt });
                let cmd_tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(cmd_tx) = cmd_tx.upgrade() {
                        let _ = cmd_tx.send(SchedulerCommand::RetryDue(key)).await;
                    }
                });
            }
        }
    }

    fn forget(&mut self, key: &JobKey) {
        self.jobs.remove(key);
        self.books.remove(key);
    }

    /// Drop waiting jobs whose paragraph was deleted, and discovery for
    /// deleted books. Running jobs finish on their own and are recognized as
    /// vanished by the write path.
    fn observe(&mut self, event: ChangeEvent) {
        if event.action != ChangeAction::Delete {
            return;
        }
        if event.table == Table::Books {
            self.watchers.retain(|(book_uid, _), watcher| {
                if *book_uid == event.uid {
                    watcher.abort();
                    return false;
                }
                true
            });
            return;
        }
        if event.table != Table::Paragraphs {
            return;
        }
        let doomed: Vec<JobKey> = self
            .jobs
            .iter()
            .filter(|(key, state)| {
                key.paragraph_uid == event.uid && !matches!(state, JobState::Running { .. })
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            tracing::debug!(paragraph = %key.paragraph_uid, "dropping job for deleted paragraph");
            self.forget(&key);
        }
        self.exhausted.retain(|key| key.paragraph_uid != event.uid);
    }

    /// Watch the book's untranslated paragraphs and schedule each one.
    fn spawn_discovery(&self, book_uid: Ulid, language: String) -> JoinHandle<()> {
        let options = LiveOptions::new([Table::Books, Table::Paragraphs, Table::ParagraphTranslations])
            .narrowed([book_uid])
            .debounce(self.config.debounce);
        let query_language = language.clone();
        let query = live::watch_bridge(&self.bridge, options, move |bridge: BridgeHandle| {
            let language = query_language.clone();
            async move { bridge.list_untranslated_paragraphs(book_uid, &language).await }
        });

        let bridge = self.bridge.clone();
        let cmd_tx = self.cmd_tx.clone();
        let model = self.model.clone();
        tokio::spawn(async move {
            let mut results = query.subscribe();
            loop {
                let batch: Option<Arc<Vec<Paragraph>>> = results.borrow_and_update().clone();
                if let Some(paragraphs) = batch {
                    for paragraph in paragraphs.iter() {
                        let job = QueuedJob {
                            paragraph_uid: paragraph.uid,
                            book_uid,
                            language: language.clone(),
                            model: model.clone(),
                        };
                        match bridge.enqueue_translation(job.clone()).await {
                            Ok(true) => {}
                            Ok(false) => continue,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to record queued job");
                                continue;
                            }
                        }
                        let Some(cmd_tx) = cmd_tx.upgrade() else {
                            return;
                        };
                        let (reply, _) = oneshot::channel();
                        if cmd_tx.send(SchedulerCommand::Enqueue { job, reply }).await.is_err() {
                            return;
                        }
                    }
                }
                if results.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    fn publish_status(&self) {
        let mut status = SchedulerStatus {
            exhausted: self.exhausted.len(),
            completed: self.completed,
            ..SchedulerStatus::default()
        };
        for state in self.jobs.values() {
            match state {
                JobState::Queued { .. } => status.queued += 1,
                JobState::Running { .. } => status.running += 1,
                JobState::Failed { .. } => status.retrying += 1,
            }
        }
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}

/// One attempt at one job: read the paragraph, call the provider, write back.
async fn run_job(
    bridge: &BridgeHandle,
    provider: &dyn TranslationProvider,
    key: &JobKey,
    model: &str,
) -> JobOutcome {
    let paragraph = match bridge.get_paragraph(key.paragraph_uid).await {
        Ok(Some(paragraph)) => paragraph,
        Ok(None) => return JobOutcome::Vanished,
        Err(err) => {
            return JobOutcome::Failed {
                error: err.to_string(),
                rate_limited: false,
            };
        }
    };

    let request = TranslationRequest {
        text: paragraph.original_text,
        target_language: key.language.clone(),
        source_language: None,
    };
    let mut response = match provider.translate(&request).await {
        Ok(response) => response,
        Err(err) => {
            return JobOutcome::Failed {
                rate_limited: err.is_rate_limited(),
                error: err.to_string(),
            };
        }
    };
    // Stored under the language the job was scheduled for, whatever label the provider used.
    response.target_language = key.language.clone();

    match bridge
        .update_paragraph_translation(key.paragraph_uid, model.to_string(), response)
        .await
    {
        Ok(Some(_)) => JobOutcome::Done,
        Ok(None) => {
            tracing::debug!(paragraph = %key.paragraph_uid, "paragraph deleted while translating");
            JobOutcome::Vanished
        }
        Err(err) => JobOutcome::Failed {
            error: err.to_string(),
            rate_limited: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::testing::StubProvider;
    use folio_core::model::{NewBook, NewChapter, NewParagraph};
    use folio_store::actor::{self, BridgeConfig};
    use folio_store::sqlite::Database;
    use std::sync::atomic::Ordering;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: 2,
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(50),
            debounce: Duration::from_millis(10),
        }
    }

    fn bridge() -> BridgeHandle {
        let mut db = Database::open_in_memory().unwrap();
        db.apply_migrations().unwrap();
        actor::spawn(db, BridgeConfig::default()).unwrap().0
    }

    async fn import(bridge: &BridgeHandle, paragraphs: &[&str]) -> (Ulid, Vec<Paragraph>) {
        let created = bridge
            .create_book(NewBook {
                title: "Scheduled".to_string(),
                path: Vec::new(),
                chapters: vec![NewChapter {
                    title: None,
                    paragraphs: paragraphs.iter().map(|p| NewParagraph::plain(*p)).collect(),
                }],
            })
            .await
            .unwrap();
        let chapters = bridge.list_chapters(created.uid).await.unwrap();
        let paragraphs = bridge.list_paragraphs(chapters[0].uid).await.unwrap();
        (created.uid, paragraphs)
    }

    async fn settle(handle: &SchedulerHandle) -> SchedulerStatus {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_idle())
            .await
            .expect("scheduler did not go idle")
    }

    async fn wait_until(handle: &SchedulerHandle, done: impl Fn(&SchedulerStatus) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&handle.status()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler status never matched");
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let config = SchedulerConfig {
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            ..SchedulerConfig::default()
        };
        assert_eq!(retry_delay(&config, 1, false), Duration::from_secs(1));
        assert_eq!(retry_delay(&config, 2, false), Duration::from_secs(2));
        assert_eq!(retry_delay(&config, 3, false), Duration::from_secs(4));
        assert_eq!(retry_delay(&config, 3, true), Duration::from_secs(8));
        assert_eq!(retry_delay(&config, 10, false), Duration::from_secs(60));
        assert_eq!(retry_delay(&config, 40, true), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn watched_book_gets_fully_translated() {
        let bridge = bridge();
        let (book_uid, _) = import(&bridge, &["Hello world.", "Goodbye.", "Again."]).await;
        let handle = spawn(bridge.clone(), Arc::new(StubProvider::new()), fast_config());

        handle.watch_book(book_uid, "ES").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.status().completed < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("book was not translated");
        let status = settle(&handle).await;

        assert_eq!(status.completed, 3);
        assert!(bridge.list_untranslated_paragraphs(book_uid, "es").await.unwrap().is_empty());
        assert!(bridge.list_queued_jobs().await.unwrap().is_empty());
        let book = bridge.get_book(book_uid).await.unwrap().unwrap();
        assert_eq!(book.translated_paragraphs, 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["Hello."]).await;
        let (stub, gate) = StubProvider::gated();
        let handle = spawn(bridge.clone(), Arc::new(stub), fast_config());

        assert!(handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap());
        assert!(!handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap());
        // A different language is a different job.
        assert!(handle.enqueue(paragraphs[0].uid, book_uid, "fr").await.unwrap());

        gate.open();
        assert_eq!(settle(&handle).await.completed, 2);
        assert_eq!(gate.started(), 2);
    }

    #[tokio::test]
    async fn failures_are_retried_until_success() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["Hello world."]).await;
        let stub = StubProvider::new()
            .then_fail(ProviderError::Http("503".to_string()))
            .then_fail(ProviderError::RateLimited);
        let calls = stub.call_counter();
        let handle = spawn(bridge.clone(), Arc::new(stub), fast_config());

        handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap();
        let status = settle(&handle).await;

        assert_eq!(status.completed, 1);
        assert_eq!(status.exhausted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(
            bridge
                .get_paragraph_translation(paragraphs[0].uid, "es")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn exhausted_jobs_are_reported_once() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["Hello world."]).await;
        let stub = StubProvider::failing(ProviderError::Http("down".to_string()));
        let handle = spawn(bridge.clone(), Arc::new(stub), fast_config());
        let mut failures = handle.failures();

        handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap();
        let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(failure.paragraph_uid, paragraphs[0].uid);
        assert_eq!(failure.book_uid, book_uid);
        assert_eq!(failure.attempts, 3);
        assert!(failure.error.contains("down"));

        let status = settle(&handle).await;
        assert_eq!(status.exhausted, 1);
        // Exhausted jobs are not picked up again.
        assert!(!handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap());
        assert!(
            bridge
                .get_paragraph_translation(paragraphs[0].uid, "es")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["One.", "Two.", "Three.", "Four.", "Five."]).await;
        let (stub, gate) = StubProvider::gated();
        let handle = spawn(bridge.clone(), Arc::new(stub), fast_config());

        for paragraph in &paragraphs {
            handle.enqueue(paragraph.uid, book_uid, "es").await.unwrap();
        }
        gate.wait_started(2).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(gate.started(), 2);
        let status = handle.status();
        assert_eq!(status.running, 2);
        assert_eq!(status.queued, 3);

        gate.open();
        assert_eq!(settle(&handle).await.completed, 5);
    }

    #[tokio::test]
    async fn deleting_the_book_mid_flight_is_a_no_op() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["Hello world."]).await;
        let (stub, gate) = StubProvider::gated();
        let handle = spawn(bridge.clone(), Arc::new(stub), fast_config());
        let mut failures = handle.failures();

        handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap();
        gate.wait_started(1).await;
        bridge.delete_book(book_uid).await.unwrap();
        gate.open();

        let status = settle(&handle).await;
        assert_eq!(status.completed, 0);
        assert_eq!(status.exhausted, 0);
        assert!(failures.try_recv().is_err());
        assert!(
            bridge
                .get_paragraph_translation(paragraphs[0].uid, "es")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn deleting_a_book_drops_its_queued_jobs() {
        let bridge = bridge();
        let (kept_uid, kept) = import(&bridge, &["Kept."]).await;
        let (doomed_uid, doomed) = import(&bridge, &["Doomed."]).await;
        let (stub, gate) = StubProvider::gated();
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..fast_config()
        };
        let handle = spawn(bridge.clone(), Arc::new(stub), config);

        handle.enqueue(kept[0].uid, kept_uid, "es").await.unwrap();
        handle.enqueue(doomed[0].uid, doomed_uid, "es").await.unwrap();
        gate.wait_started(1).await;
        assert_eq!(handle.status().queued, 1);

        bridge.delete_book(doomed_uid).await.unwrap();
        wait_until(&handle, |status| status.queued == 0).await;
        gate.open();

        let status = settle(&handle).await;
        assert_eq!(gate.started(), 1);
        assert_eq!(status.completed, 1);
        assert_eq!(status.queued, 0);
        assert_eq!(status.retrying, 0);
        assert_eq!(status.exhausted, 0);
        assert!(bridge.list_queued_jobs().await.unwrap().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn deleting_a_book_drops_jobs_waiting_to_retry() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["Hello world."]).await;
        let stub = StubProvider::new().then_fail(ProviderError::Http("503".to_string()));
        let calls = stub.call_counter();
        let config = SchedulerConfig {
            max_concurrent: 1,
            retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(30),
            ..fast_config()
        };
        let handle = spawn(bridge.clone(), Arc::new(stub), config);
        let mut failures = handle.failures();

        handle.enqueue(paragraphs[0].uid, book_uid, "es").await.unwrap();
        wait_until(&handle, |status| status.retrying == 1).await;

        bridge.delete_book(book_uid).await.unwrap();
        let status = settle(&handle).await;

        assert_eq!(status.retrying, 0);
        assert_eq!(status.completed, 0);
        assert_eq!(status.exhausted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(failures.try_recv().is_err());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn resume_picks_up_durable_queue() {
        let bridge = bridge();
        let (book_uid, paragraphs) = import(&bridge, &["Hello.", "World."]).await;
        for paragraph in &paragraphs {
            bridge
                .enqueue_translation(QueuedJob {
                    paragraph_uid: paragraph.uid,
                    book_uid,
                    language: "de".to_string(),
                    model: "stub-model".to_string(),
                })
                .await
                .unwrap();
        }

        let handle = spawn(bridge.clone(), Arc::new(StubProvider::new()), fast_config());
        assert_eq!(handle.resume().await.unwrap(), 2);
        assert_eq!(settle(&handle).await.completed, 2);
        assert!(bridge.list_queued_jobs().await.unwrap().is_empty());
    }
}
