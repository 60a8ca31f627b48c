// ABOUTME: Core library for folio, containing domain types, identifiers, and wire protocols.
// ABOUTME: Also hosts the alignment engine, which is pure and shared by the store and the facade.

pub mod alignment;
pub mod change;
pub mod command;
pub mod model;
pub mod translation;
pub mod uid;

pub use alignment::{Alignment, Span, TokenRef, align};
pub use change::{ChangeAction, ChangeEvent, Table};
pub use command::{Mutation, Request, Response};
pub use model::{Book, Chapter, NewBook, NewChapter, NewParagraph, Paragraph};
pub use translation::{TranslationRequest, TranslationResponse};
pub use uid::{UidError, is_valid_uid, new_uid, parse_uid};
