// ABOUTME: Reactive query cache turning a bridge read plus its table dependencies into a refreshing value.
// ABOUTME: Re-runs are narrowed to the UIDs of the previous result and debounced into single refreshes.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use folio_core::change::{ChangeEvent, Table};
use folio_core::model::{
    Book, Chapter, DictionaryEntry, Paragraph, ParagraphTranslationTree, QueuedJob,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use ulid::Ulid;

use crate::actor::{BridgeError, BridgeHandle};

/// Values whose UIDs a live query can narrow on.
pub trait HasUids {
    fn collect_uids(&self, out: &mut HashSet<Ulid>);
}

impl HasUids for Book {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        out.insert(self.uid);
    }
}

impl HasUids for Chapter {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        out.insert(self.uid);
    }
}

impl HasUids for Paragraph {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        out.insert(self.uid);
    }
}

impl HasUids for QueuedJob {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        out.insert(self.paragraph_uid);
    }
}

impl HasUids for ParagraphTranslationTree {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        out.insert(self.translation.uid);
        out.insert(self.translation.paragraph_uid);
        for sentence in &self.sentences {
            out.insert(sentence.sentence.uid);
            out.extend(sentence.words.iter().map(|w| w.uid));
        }
    }
}

impl HasUids for DictionaryEntry {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        out.insert(self.word.uid);
        out.extend(self.translations.iter().map(|t| t.uid));
    }
}

impl<T: HasUids> HasUids for Vec<T> {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        for item in self {
            item.collect_uids(out);
        }
    }
}

impl<T: HasUids> HasUids for Option<T> {
    fn collect_uids(&self, out: &mut HashSet<Ulid>) {
        if let Some(item) = self {
            item.collect_uids(out);
        }
    }
}

/// Which change events cause a live query to refresh.
#[derive(Debug, Clone)]
pub struct LiveOptions {
    tables: HashSet<Table>,
    /// When set, only events whose uid is an anchor or part of the previous
    /// result qualify. Otherwise every event on a dependency table does.
    narrow: bool,
    anchors: HashSet<Ulid>,
    debounce: Duration,
}

impl LiveOptions {
    pub fn new(tables: impl IntoIterator<Item = Table>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
            narrow: false,
            anchors: HashSet::new(),
            debounce: Duration::from_millis(100),
        }
    }

    /// Narrow refreshes to the previous result's UIDs plus `anchors`, the
    /// entities that scope the query (for example the paragraph whose
    /// translation is being watched).
    pub fn narrowed(mut self, anchors: impl IntoIterator<Item = Ulid>) -> Self {
        self.narrow = true;
        self.anchors.extend(anchors);
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// A subscribed live query. Dropping it (or calling `unsubscribe`) stops the
/// refresh task and releases its change-bus receiver.
pub struct LiveQuery<T> {
    value: watch::Receiver<Option<Arc<T>>>,
    runs: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T> {
    /// The latest result, if the first run has completed.
    pub fn current(&self) -> Option<Arc<T>> {
        self.value.borrow().clone()
    }

    /// A receiver that observes every published result.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.value.clone()
    }

    /// Wait until a published result satisfies `predicate`.
    pub async fn wait_until(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        let mut rx = self.value.clone();
        let found = rx
            .wait_for(|value| value.as_deref().is_some_and(&mut predicate))
            .await
            .ok()?;
        found.clone()
    }

    /// Number of times the underlying query has executed.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a live query fed by `events`. The query runs immediately, then again
/// after each qualifying event, coalescing bursts within the debounce window.
pub fn spawn<T, F, Fut>(
    events: broadcast::Receiver<ChangeEvent>,
    options: LiveOptions,
    fetch: F,
) -> LiveQuery<T>
where
    T: HasUids + Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BridgeError>> + Send + 'static,
{
    let (value_tx, value_rx) = watch::channel(None);
    let runs = Arc::new(AtomicUsize::new(0));
    let refresher = Refresher {
        events,
        options,
        fetch,
        value_tx,
        runs: Arc::clone(&runs),
        known: None,
    };
    let task = tokio::spawn(refresher.run());
    LiveQuery {
        value: value_rx,
        runs,
        task,
    }
}

/// Convenience wrapper: a live query whose fetch goes through `bridge`.
pub fn watch_bridge<T, F, Fut>(bridge: &BridgeHandle, options: LiveOptions, fetch: F) -> LiveQuery<T>
where
    T: HasUids + Send + Sync + 'static,
    F: Fn(BridgeHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BridgeError>> + Send + 'static,
{
    let handle = bridge.clone();
    spawn(bridge.subscribe(), options, move || fetch(handle.clone()))
}

struct Refresher<T, F> {
    events: broadcast::Receiver<ChangeEvent>,
    options: LiveOptions,
    fetch: F,
    value_tx: watch::Sender<Option<Arc<T>>>,
    runs: Arc<AtomicUsize>,
    /// UIDs of the last successful result; None until one exists.
    known: Option<HashSet<Ulid>>,
}

impl<T, F, Fut> Refresher<T, F>
where
    T: HasUids + Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BridgeError>> + Send + 'static,
{
    async fn run(mut self) {
        self.refresh().await;

        let mut deadline: Option<Instant> = None;
        loop {
            let pending_refresh = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                received = self.events.recv() => match received {
                    Ok(event) => {
                        if deadline.is_none() && self.qualifies(&event) {
                            deadline = Some(Instant::now() + self.options.debounce);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "live query lagged behind change bus, refreshing");
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.options.debounce);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = pending_refresh => {
                    deadline = None;
                    self.refresh().await;
                }
                _ = self.value_tx.closed() => break,
            }
        }
    }

    fn qualifies(&self, event: &ChangeEvent) -> bool {
        if !self.options.tables.contains(&event.table) {
            return false;
        }
        if !self.options.narrow {
            return true;
        }
        match &self.known {
            None => true,
            Some(known) => known.contains(&event.uid) || self.options.anchors.contains(&event.uid),
        }
    }

    async fn refresh(&mut self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match (self.fetch)().await {
            Ok(value) => {
                let mut uids = HashSet::new();
                value.collect_uids(&mut uids);
                self.known = Some(uids);
                let _ = self.value_tx.send(Some(Arc::new(value)));
            }
            Err(err) => {
                tracing::warn!(error = %err, "live query refresh failed");
                self.known = None;
            }
        }
    }
}
