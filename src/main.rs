// ABOUTME: Entry point for the folio binary.
// ABOUTME: Parses CLI arguments, initializes tracing, starts the engine, and runs one library command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use folio_agent::providers::{UnavailableProvider, create_provider};
use folio_agent::{JobFailure, TranslationProvider};
use folio_core::alignment::Span;
use folio_core::parse_uid;
use folio_library::{Engine, FolioConfig, Library, parse_folder};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ulid::Ulid;

/// folio: a personal reading library with word-level translations
#[derive(Parser)]
#[command(name = "folio", version, about)]
struct Cli {
    /// Database file (overrides FOLIO_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a plain-text file as a book
    Import {
        file: PathBuf,
        /// Book title (default: the file name)
        #[arg(long)]
        title: Option<String>,
        /// Folder to file the book under, e.g. Fiction/Sci-Fi
        #[arg(long)]
        folder: Option<String>,
    },

    /// List the books and subfolders of a folder
    List {
        #[arg(long)]
        folder: Option<String>,
    },

    /// Move a book to another folder (omit --folder for the root)
    Move {
        book: String,
        #[arg(long)]
        folder: Option<String>,
    },

    /// Delete a book and all of its translations
    Delete { book: String },

    /// Show a paragraph with its aligned translation
    Show {
        paragraph: String,
        #[arg(long)]
        language: Option<String>,
    },

    /// Translate every untranslated paragraph of a book
    Translate {
        book: String,
        #[arg(long)]
        language: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "folio=info,folio_store=info,folio_agent=info,folio_library=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = FolioConfig::from_env().context("invalid configuration")?;
    if let Some(db) = &cli.db {
        config.database = db.clone();
    }

    let translating = matches!(cli.command, Command::Translate { .. });
    config.resume_queue = translating;
    let provider = provider(&config, translating)?;

    let engine = Engine::start(config, provider)
        .await
        .context("failed to start the folio engine")?;
    let library = Library::new(engine);

    let outcome = run(&library, cli.command, cli.json).await;
    library.shutdown().await;
    outcome
}

fn provider(config: &FolioConfig, required: bool) -> Result<Arc<dyn TranslationProvider>> {
    match create_provider(&config.provider, config.model.as_deref()) {
        Ok(provider) => Ok(provider),
        Err(err) if required => Err(err).context("translation provider is not configured"),
        Err(err) => {
            tracing::debug!(error = %err, "no translation provider; read-only session");
            Ok(Arc::new(UnavailableProvider::new(err.to_string())))
        }
    }
}

fn uid_arg(value: &str) -> Result<Ulid> {
    parse_uid(value).with_context(|| format!("not a valid id: {value}"))
}

fn folder_arg(folder: Option<&str>) -> Vec<String> {
    folder.map(parse_folder).unwrap_or_default()
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(library: &Library, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Import {
            file,
            title,
            folder,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let title = title.unwrap_or_else(|| {
                file.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Untitled".to_string())
            });
            let created = library
                .create_from_text(&title, &text, &folder_arg(folder.as_deref()))
                .await?;
            let book = library.get_book(created.uid).await?;
            match (json, book) {
                (true, book) => print_json(&book)?,
                (false, Some(book)) => {
                    println!("{}  {} ({} paragraphs)", book.uid, book.title, book.paragraph_count)
                }
                (false, None) => println!("{}", created.uid),
            }
        }

        Command::List { folder } => {
            let listing = library.list_folder(&folder_arg(folder.as_deref())).await?;
            if json {
                return print_json(&listing);
            }
            for name in &listing.folders {
                println!("{name}/");
            }
            for book in &listing.books {
                println!(
                    "{}  {}  [{}/{} translated]",
                    book.uid, book.title, book.translated_paragraphs, book.paragraph_count
                );
            }
            if listing.is_empty() {
                println!("(empty)");
            }
        }

        Command::Move { book, folder } => {
            let path = folder_arg(folder.as_deref());
            library.update_book_path(uid_arg(&book)?, &path).await?;
            println!("moved to /{}", path.join("/"));
        }

        Command::Delete { book } => {
            let deleted = library.delete_book(uid_arg(&book)?).await?;
            println!("deleted {} ({} rows)", deleted.uid, deleted.touched.len());
        }

        Command::Show {
            paragraph,
            language,
        } => {
            let paragraph_uid = uid_arg(&paragraph)?;
            let Some(aligned) = library
                .aligned_paragraph(paragraph_uid, language.as_deref())
                .await?
            else {
                let paragraph = library.get_paragraph(paragraph_uid).await?;
                if let Some(paragraph) = paragraph {
                    println!("{}", paragraph.original_text);
                }
                println!("(not translated)");
                return Ok(());
            };
            if json {
                return print_json(&aligned);
            }

            println!("{}", aligned.paragraph.original_text);
            for sentence in &aligned.translation.sentences {
                println!("  = {}", sentence.sentence.full_translation);
            }
            for span in aligned.alignment.word_spans() {
                if let Span::Word {
                    start, end, text, token, ..
                } = span
                {
                    let meaning = aligned
                        .word(token.sentence, token.word)
                        .map(|row| row.word_translation_in_context.join(", "))
                        .unwrap_or_default();
                    println!("  [{start:>4}..{end:<4}] {text} -> {meaning}");
                }
            }
        }

        Command::Translate { book, language } => {
            let book_uid = uid_arg(&book)?;
            let mut failures = library.scheduler().failures();
            let plan = library.translate_book(book_uid, language.as_deref()).await?;
            tracing::info!(
                untranslated = plan.untranslated,
                scheduled = plan.scheduled,
                "waiting for translations"
            );

            let status = library.scheduler().wait_idle().await;
            let reported = drain_failures(&mut failures);
            let book = library
                .get_book(book_uid)
                .await?
                .with_context(|| format!("book {book_uid} disappeared"))?;
            println!(
                "{}: {}/{} paragraphs translated ({} this run)",
                book.title, book.translated_paragraphs, book.paragraph_count, status.completed
            );
            for failure in &reported {
                eprintln!(
                    "failed: paragraph {} after {} attempts: {}",
                    failure.paragraph_uid, failure.attempts, failure.error
                );
            }
            if !reported.is_empty() {
                bail!("{} paragraphs could not be translated", reported.len());
            }
        }
    }
    Ok(())
}

fn drain_failures(failures: &mut broadcast::Receiver<JobFailure>) -> Vec<JobFailure> {
    let mut reported = Vec::new();
    loop {
        match failures.try_recv() {
            Ok(failure) => reported.push(failure),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return reported,
        }
    }
}
