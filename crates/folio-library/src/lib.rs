// ABOUTME: Library facade for folio, composing the store, bridge, and scheduler into reader operations.
// ABOUTME: Also owns configuration, engine lifecycle, plain-text import, and folder listing.

pub mod config;
pub mod engine;
pub mod folders;
pub mod import;
pub mod library;

pub use config::{ConfigError, FolioConfig};
pub use engine::{Engine, EngineError};
pub use folders::{FolderListing, list_folder, parse_folder};
pub use library::{AlignedParagraph, Library, LibraryError, TranslationPlan};
