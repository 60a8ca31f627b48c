// ABOUTME: Closed request/response vocabulary carried by the bridge between callers and the store owner.
// ABOUTME: Envelopes add a correlation id; responses carry either a typed result or an error message.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{
    Book, Chapter, DictionaryEntry, NewBook, Paragraph, ParagraphTranslationTree, QueuedJob,
};
use crate::translation::TranslationResponse;

/// Every operation the store owner knows how to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum Request {
    CreateBook {
        book: NewBook,
    },
    UpdateBookPath {
        book_uid: Ulid,
        path: Vec<String>,
    },
    DeleteBook {
        book_uid: Ulid,
    },
    UpdateParagraphTranslation {
        paragraph_uid: Ulid,
        model: String,
        translation: TranslationResponse,
    },
    EnqueueTranslation {
        job: QueuedJob,
    },
    ListQueuedJobs,
    ListBooks,
    GetBook {
        book_uid: Ulid,
    },
    ListChapters {
        book_uid: Ulid,
    },
    ListParagraphs {
        chapter_uid: Ulid,
    },
    GetParagraph {
        paragraph_uid: Ulid,
    },
    GetParagraphTranslation {
        paragraph_uid: Ulid,
        language: String,
    },
    ListUntranslatedParagraphs {
        book_uid: Ulid,
        language: String,
    },
    LookupWord {
        language: String,
        word: String,
    },
}

impl Request {
    /// Operation name as it appears on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            Request::CreateBook { .. } => "createBook",
            Request::UpdateBookPath { .. } => "updateBookPath",
            Request::DeleteBook { .. } => "deleteBook",
            Request::UpdateParagraphTranslation { .. } => "updateParagraphTranslation",
            Request::EnqueueTranslation { .. } => "enqueueTranslation",
            Request::ListQueuedJobs => "listQueuedJobs",
            Request::ListBooks => "listBooks",
            Request::GetBook { .. } => "getBook",
            Request::ListChapters { .. } => "listChapters",
            Request::ListParagraphs { .. } => "listParagraphs",
            Request::GetParagraph { .. } => "getParagraph",
            Request::GetParagraphTranslation { .. } => "getParagraphTranslation",
            Request::ListUntranslatedParagraphs { .. } => "listUntranslatedParagraphs",
            Request::LookupWord { .. } => "lookupWord",
        }
    }

    /// True for operations that write to the store.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::CreateBook { .. }
                | Request::UpdateBookPath { .. }
                | Request::DeleteBook { .. }
                | Request::UpdateParagraphTranslation { .. }
                | Request::EnqueueTranslation { .. }
        )
    }
}

/// Outcome of a mutating operation: the primary entity it acted on and
/// every UID it inserted, updated, or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub uid: Ulid,
    pub touched: Vec<Ulid>,
}

impl Mutation {
    pub fn touches(&self, uid: &Ulid) -> bool {
        self.touched.contains(uid)
    }
}

/// Typed result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Response {
    Mutated(Mutation),
    NotFound,
    Enqueued(bool),
    QueuedJobs(Vec<QueuedJob>),
    Books(Vec<Book>),
    Book(Option<Book>),
    Chapters(Vec<Chapter>),
    Paragraphs(Vec<Paragraph>),
    Paragraph(Option<Paragraph>),
    ParagraphTranslation(Option<ParagraphTranslationTree>),
    Dictionary(Option<DictionaryEntry>),
}

/// A request tagged with its caller-allocated correlation id.
/// Serializes as `{id, action, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// The owner's answer to a request. Serializes as `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Response),
    Error(String),
}

impl ResponseEnvelope {
    pub fn ok(id: u64, response: Response) -> Self {
        Self {
            id,
            outcome: Outcome::Result(response),
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_uses_action_and_payload_keys() {
        let book_uid = Ulid::new();
        let envelope = RequestEnvelope {
            id: 7,
            request: Request::DeleteBook { book_uid },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["action"], "deleteBook");
        assert_eq!(json["payload"]["book_uid"], book_uid.to_string());

        let back: RequestEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn response_envelope_carries_result_or_error() {
        let ok = serde_json::to_value(ResponseEnvelope::ok(3, Response::NotFound)).unwrap();
        assert_eq!(ok["id"], 3);
        assert_eq!(ok["result"]["kind"], "notFound");

        let err = serde_json::to_value(ResponseEnvelope::error(4, "boom")).unwrap();
        assert_eq!(err["id"], 4);
        assert_eq!(err["error"], "boom");
    }

    #[test]
    fn mutating_requests_are_flagged() {
        assert!(
            Request::DeleteBook {
                book_uid: Ulid::new()
            }
            .is_mutating()
        );
        assert!(!Request::ListBooks.is_mutating());
        assert_eq!(Request::ListQueuedJobs.action(), "listQueuedJobs");
    }
}
