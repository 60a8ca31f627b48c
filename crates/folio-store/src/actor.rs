// ABOUTME: Request/response bridge between async callers and the thread that owns the database.
// ABOUTME: The owner executes one request at a time and publishes committed change events on a broadcast bus.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use folio_core::change::ChangeEvent;
use folio_core::command::{Mutation, Outcome, Request, RequestEnvelope, Response, ResponseEnvelope};
use folio_core::model::{
    Book, Chapter, DictionaryEntry, NewBook, Paragraph, ParagraphTranslationTree, QueuedJob,
};
use folio_core::translation::TranslationResponse;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use ulid::Ulid;

use crate::repo;
use crate::sqlite::{Database, StoreError};

/// Errors seen by bridge callers.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The owner did not attach within the bounded wait.
    #[error("bridge owner did not become reachable within {0:?}")]
    Timeout(Duration),

    #[error("bridge channel closed")]
    ChannelClosed,

    /// The owner ran the request and it failed.
    #[error("{0}")]
    Remote(String),

    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

/// Tunables for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a call waits for the owner to attach before failing.
    pub ready_timeout: Duration,
    pub request_capacity: usize,
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            request_capacity: 64,
            event_capacity: 1024,
        }
    }
}

type RequestMessage = (RequestEnvelope, oneshot::Sender<ResponseEnvelope>);

/// Cloneable handle used by every caller. Each call allocates a fresh
/// correlation id and waits only for its own response.
#[derive(Clone)]
pub struct BridgeHandle {
    request_tx: mpsc::Sender<RequestMessage>,
    event_tx: broadcast::Sender<ChangeEvent>,
    ready: watch::Receiver<bool>,
    next_id: Arc<AtomicU64>,
    ready_timeout: Duration,
}

/// The not-yet-attached owner side. `attach` hands it the database and
/// starts serving on a dedicated thread.
pub struct BridgeOwner {
    request_rx: mpsc::Receiver<RequestMessage>,
    event_tx: broadcast::Sender<ChangeEvent>,
    ready: watch::Sender<bool>,
}

/// Create a connected handle/owner pair. Calls made through the handle wait
/// (up to `ready_timeout`) until the owner attaches.
pub fn channel(config: BridgeConfig) -> (BridgeHandle, BridgeOwner) {
    let (request_tx, request_rx) = mpsc::channel(config.request_capacity);
    let (event_tx, _) = broadcast::channel(config.event_capacity);
    let (ready_tx, ready_rx) = watch::channel(false);

    let handle = BridgeHandle {
        request_tx,
        event_tx: event_tx.clone(),
        ready: ready_rx,
        next_id: Arc::new(AtomicU64::new(1)),
        ready_timeout: config.ready_timeout,
    };
    let owner = BridgeOwner {
        request_rx,
        event_tx,
        ready: ready_tx,
    };
    (handle, owner)
}

/// Start an owner for `db` and return the handle plus the owner thread.
pub fn spawn(db: Database, config: BridgeConfig) -> std::io::Result<(BridgeHandle, JoinHandle<()>)> {
    let (handle, owner) = channel(config);
    let thread = owner.attach(db)?;
    Ok((handle, thread))
}

impl BridgeOwner {
    /// Take ownership of the database on a new thread. The thread exits once
    /// every handle has been dropped.
    pub fn attach(self, db: Database) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("folio-store".to_string())
            .spawn(move || self.run(db))
    }

    fn run(mut self, mut db: Database) {
        let _ = self.ready.send(true);
        tracing::info!("bridge owner attached");

        while let Some((envelope, reply_tx)) = self.request_rx.blocking_recv() {
            let RequestEnvelope { id, request } = envelope;
            let action = request.action();
            let mutating = request.is_mutating();

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| execute(&mut db, request)));
            let response = match outcome {
                Ok(Ok((response, events))) => {
                    if mutating {
                        tracing::debug!(id, action, events = events.len(), "committed mutation");
                    }
                    // Events are published only after the transaction has committed.
                    for event in events {
                        let _ = self.event_tx.send(event);
                    }
                    ResponseEnvelope::ok(id, response)
                }
                Ok(Err(err)) => {
                    tracing::warn!(id, action, error = %err, "bridge request failed");
                    ResponseEnvelope::error(id, err.to_string())
                }
                Err(_) => {
                    tracing::error!(id, action, "bridge request handler panicked");
                    ResponseEnvelope::error(id, format!("{action} handler panicked"))
                }
            };
            // The caller may have given up waiting.
            let _ = reply_tx.send(response);
        }

        let _ = self.ready.send(false);
        tracing::info!("bridge owner stopped");
    }
}

fn mutation(primary: Option<Ulid>, events: &[ChangeEvent]) -> Response {
    match primary {
        Some(uid) => Response::Mutated(Mutation {
            uid,
            touched: repo::touched_uids(events),
        }),
        None => Response::NotFound,
    }
}

/// Execute one request against the database. Mutations run in a single
/// transaction; the returned events are already committed.
pub fn execute(db: &mut Database, request: Request) -> Result<(Response, Vec<ChangeEvent>), StoreError> {
    let committed = match request {
        Request::CreateBook { book } => db.transaction(|tx| repo::create_book(tx, &book).map(Some))?,
        Request::UpdateBookPath { book_uid, path } => {
            db.transaction(|tx| repo::update_book_path(tx, &book_uid, &path))?
        }
        Request::DeleteBook { book_uid } => db.transaction(|tx| repo::delete_book(tx, &book_uid))?,
        Request::UpdateParagraphTranslation {
            paragraph_uid,
            model,
            translation,
        } => db.transaction(|tx| {
            repo::update_paragraph_translation(tx, &paragraph_uid, &model, &translation)
        })?,
        Request::EnqueueTranslation { job } => {
            let committed = db.transaction(|tx| repo::enqueue_translation(tx, &job))?;
            return Ok((Response::Enqueued(committed.value), committed.events));
        }
        Request::ListQueuedJobs => {
            return Ok((Response::QueuedJobs(repo::list_queued_jobs(db.conn())?), Vec::new()));
        }
        Request::ListBooks => return Ok((Response::Books(repo::list_books(db.conn())?), Vec::new())),
        Request::GetBook { book_uid } => {
            return Ok((Response::Book(repo::get_book(db.conn(), &book_uid)?), Vec::new()));
        }
        Request::ListChapters { book_uid } => {
            return Ok((
                Response::Chapters(repo::list_chapters(db.conn(), &book_uid)?),
                Vec::new(),
            ));
        }
        Request::ListParagraphs { chapter_uid } => {
            return Ok((
                Response::Paragraphs(repo::list_paragraphs(db.conn(), &chapter_uid)?),
                Vec::new(),
            ));
        }
        Request::GetParagraph { paragraph_uid } => {
            return Ok((
                Response::Paragraph(repo::get_paragraph(db.conn(), &paragraph_uid)?),
                Vec::new(),
            ));
        }
        Request::GetParagraphTranslation {
            paragraph_uid,
            language,
        } => {
            return Ok((
                Response::ParagraphTranslation(repo::get_paragraph_translation(
                    db.conn(),
                    &paragraph_uid,
                    &language,
                )?),
                Vec::new(),
            ));
        }
        Request::ListUntranslatedParagraphs { book_uid, language } => {
            return Ok((
                Response::Paragraphs(repo::list_untranslated_paragraphs(
                    db.conn(),
                    &book_uid,
                    &language,
                )?),
                Vec::new(),
            ));
        }
        Request::LookupWord { language, word } => {
            return Ok((
                Response::Dictionary(repo::lookup_word(db.conn(), &language, &word)?),
                Vec::new(),
            ));
        }
    };

    let response = mutation(committed.value, &committed.events);
    Ok((response, committed.events))
}

impl BridgeHandle {
    /// Subscribe to the change bus. Events arrive in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_tx.subscribe()
    }

    /// The change bus as a stream. Lagged gaps are logged and skipped.
    pub fn changes(&self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "change stream lagged");
                None
            }
        })
    }

    /// True once an owner has attached and is still serving.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    async fn wait_ready(&self) -> Result<(), BridgeError> {
        let mut ready = self.ready.clone();
        match tokio::time::timeout(self.ready_timeout, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => Err(BridgeError::Timeout(self.ready_timeout)),
        }
    }

    /// Send one request and await its correlated response.
    pub async fn request(&self, request: Request) -> Result<Response, BridgeError> {
        self.wait_ready().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let action = request.action();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send((RequestEnvelope { id, request }, reply_tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        let envelope = reply_rx.await.map_err(|_| BridgeError::ChannelClosed)?;

        if envelope.id != id {
            return Err(BridgeError::UnexpectedResponse(action));
        }
        match envelope.outcome {
            Outcome::Result(response) => Ok(response),
            Outcome::Error(message) => Err(BridgeError::Remote(message)),
        }
    }

    async fn mutate(&self, request: Request) -> Result<Option<Mutation>, BridgeError> {
        let action = request.action();
        match self.request(request).await? {
            Response::Mutated(mutation) => Ok(Some(mutation)),
            Response::NotFound => Ok(None),
            _ => Err(BridgeError::UnexpectedResponse(action)),
        }
    }

    pub async fn create_book(&self, book: NewBook) -> Result<Mutation, BridgeError> {
        self.mutate(Request::CreateBook { book })
            .await?
            .ok_or(BridgeError::UnexpectedResponse("createBook"))
    }

    pub async fn update_book_path(
        &self,
        book_uid: Ulid,
        path: Vec<String>,
    ) -> Result<Option<Mutation>, BridgeError> {
        self.mutate(Request::UpdateBookPath { book_uid, path }).await
    }

    pub async fn delete_book(&self, book_uid: Ulid) -> Result<Option<Mutation>, BridgeError> {
        self.mutate(Request::DeleteBook { book_uid }).await
    }

    /// Store a translation. `Ok(None)` means the paragraph no longer exists.
    pub async fn update_paragraph_translation(
        &self,
        paragraph_uid: Ulid,
        model: String,
        translation: TranslationResponse,
    ) -> Result<Option<Mutation>, BridgeError> {
        self.mutate(Request::UpdateParagraphTranslation {
            paragraph_uid,
            model,
            translation,
        })
        .await
    }

    pub async fn enqueue_translation(&self, job: QueuedJob) -> Result<bool, BridgeError> {
        match self.request(Request::EnqueueTranslation { job }).await? {
            Response::Enqueued(inserted) => Ok(inserted),
            _ => Err(BridgeError::UnexpectedResponse("enqueueTranslation")),
        }
    }

    pub async fn list_queued_jobs(&self) -> Result<Vec<QueuedJob>, BridgeError> {
        match self.request(Request::ListQueuedJobs).await? {
            Response::QueuedJobs(jobs) => Ok(jobs),
            _ => Err(BridgeError::UnexpectedResponse("listQueuedJobs")),
        }
    }

    pub async fn list_books(&self) -> Result<Vec<Book>, BridgeError> {
        match self.request(Request::ListBooks).await? {
            Response::Books(books) => Ok(books),
            _ => Err(BridgeError::UnexpectedResponse("listBooks")),
        }
    }

    pub async fn get_book(&self, book_uid: Ulid) -> Result<Option<Book>, BridgeError> {
        match self.request(Request::GetBook { book_uid }).await? {
            Response::Book(book) => Ok(book),
            _ => Err(BridgeError::UnexpectedResponse("getBook")),
        }
    }

    pub async fn list_chapters(&self, book_uid: Ulid) -> Result<Vec<Chapter>, BridgeError> {
        match self.request(Request::ListChapters { book_uid }).await? {
            Response::Chapters(chapters) => Ok(chapters),
            _ => Err(BridgeError::UnexpectedResponse("listChapters")),
        }
    }

    pub async fn list_paragraphs(&self, chapter_uid: Ulid) -> Result<Vec<Paragraph>, BridgeError> {
        match self.request(Request::ListParagraphs { chapter_uid }).await? {
            Response::Paragraphs(paragraphs) => Ok(paragraphs),
            _ => Err(BridgeError::UnexpectedResponse("listParagraphs")),
        }
    }

    pub async fn get_paragraph(&self, paragraph_uid: Ulid) -> Result<Option<Paragraph>, BridgeError> {
        match self.request(Request::GetParagraph { paragraph_uid }).await? {
            Response::Paragraph(paragraph) => Ok(paragraph),
            _ => Err(BridgeError::UnexpectedResponse("getParagraph")),
        }
    }

    pub async fn get_paragraph_translation(
        &self,
        paragraph_uid: Ulid,
        language: &str,
    ) -> Result<Option<ParagraphTranslationTree>, BridgeError> {
        let request = Request::GetParagraphTranslation {
            paragraph_uid,
            language: language.to_string(),
        };
        match self.request(request).await? {
            Response::ParagraphTranslation(tree) => Ok(tree),
            _ => Err(BridgeError::UnexpectedResponse("getParagraphTranslation")),
        }
    }

    pub async fn list_untranslated_paragraphs(
        &self,
        book_uid: Ulid,
        language: &str,
    ) -> Result<Vec<Paragraph>, BridgeError> {
        let request = Request::ListUntranslatedParagraphs {
            book_uid,
            language: language.to_string(),
        };
        match self.request(request).await? {
            Response::Paragraphs(paragraphs) => Ok(paragraphs),
            _ => Err(BridgeError::UnexpectedResponse("listUntranslatedParagraphs")),
        }
    }

    pub async fn lookup_word(
        &self,
        language: &str,
        word: &str,
    ) -> Result<Option<DictionaryEntry>, BridgeError> {
        let request = Request::LookupWord {
            language: language.to_string(),
            word: word.to_string(),
        };
        match self.request(request).await? {
            Response::Dictionary(entry) => Ok(entry),
            _ => Err(BridgeError::UnexpectedResponse("lookupWord")),
        }
    }
}
