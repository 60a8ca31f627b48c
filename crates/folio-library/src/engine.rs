// ABOUTME: Engine lifecycle: opens the database, applies migrations, and starts the bridge owner and scheduler.
// ABOUTME: One explicitly constructed Engine replaces any process-wide store; shutting it down stops everything it started.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use folio_agent::scheduler::{self, SchedulerError, SchedulerHandle};
use folio_agent::TranslationProvider;
use folio_store::actor::{self, BridgeHandle};
use folio_store::{Database, StoreError};
use thiserror::Error;

use crate::config::FolioConfig;

/// Errors that can occur while starting the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// A running engine: the database owner thread, its bridge, and the scheduler.
pub struct Engine {
    config: FolioConfig,
    bridge: BridgeHandle,
    scheduler: SchedulerHandle,
    owner: Option<std::thread::JoinHandle<()>>,
}

impl Engine {
    /// Open the configured database file and start the engine over it.
    /// A migration failure aborts startup. Pending jobs from the durable
    /// queue are rescheduled unless `resume_queue` is off.
    pub async fn start(
        config: FolioConfig,
        provider: Arc<dyn TranslationProvider>,
    ) -> Result<Self, EngineError> {
        if let Some(parent) = config.database.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database)?;
        tracing::info!(database = %config.database.display(), "opened library database");
        Self::start_with(db, config, provider).await
    }

    /// Start over a private in-memory database.
    pub async fn start_in_memory(
        config: FolioConfig,
        provider: Arc<dyn TranslationProvider>,
    ) -> Result<Self, EngineError> {
        Self::start_with(Database::open_in_memory()?, config, provider).await
    }

    async fn start_with(
        mut db: Database,
        config: FolioConfig,
        provider: Arc<dyn TranslationProvider>,
    ) -> Result<Self, EngineError> {
        let applied = db.apply_migrations()?;
        if !applied.is_empty() {
            tracing::info!(migrations = ?applied, "applied schema migrations");
        }

        let (bridge, owner) = actor::spawn(db, config.bridge_config())?;
        let scheduler = scheduler::spawn(bridge.clone(), provider, config.scheduler_config());
        if config.resume_queue {
            scheduler.resume().await?;
        }

        tracing::info!(
            target_language = %config.target_language,
            model = %scheduler.model(),
            "folio engine started"
        );
        Ok(Self {
            config,
            bridge,
            scheduler,
            owner: Some(owner),
        })
    }

    pub fn config(&self) -> &FolioConfig {
        &self.config
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Stop the scheduler and release the bridge. The owner thread exits once
    /// the last outstanding handle (e.g. a live query) is dropped.
    pub async fn shutdown(mut self) {
        self.scheduler.shutdown().await;
        let owner = self.owner.take();
        drop(self);

        if let Some(owner) = owner {
            let joined = tokio::time::timeout(
                Duration::from_secs(1),
                tokio::task::spawn_blocking(move || owner.join()),
            )
            .await;
            match joined {
                Ok(_) => tracing::info!("folio engine stopped"),
                Err(_) => tracing::debug!("bridge owner still referenced, leaving it to exit on its own"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_agent::StubProvider;
    use folio_core::model::{NewBook, NewChapter, NewParagraph};
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> FolioConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FolioConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    #[tokio::test]
    async fn start_creates_and_migrates_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("library.db");
        let config = config(&[("FOLIO_DB", db_path.to_str().unwrap())]);

        let engine = Engine::start(config, Arc::new(StubProvider::new())).await.unwrap();
        assert!(db_path.exists());
        assert!(engine.bridge().is_ready());
        assert!(engine.bridge().list_books().await.unwrap().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn data_and_queue_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        let vars = [("FOLIO_DB", db_path.to_str().unwrap())];

        let (stub, _gate) = StubProvider::gated();
        let engine = Engine::start(config(&vars), Arc::new(stub)).await.unwrap();
        let created = engine
            .bridge()
            .create_book(NewBook {
                title: "Persistent".to_string(),
                path: Vec::new(),
                chapters: vec![NewChapter {
                    title: None,
                    paragraphs: vec![NewParagraph::plain("Hello world.")],
                }],
            })
            .await
            .unwrap();
        let chapters = engine.bridge().list_chapters(created.uid).await.unwrap();
        let paragraphs = engine.bridge().list_paragraphs(chapters[0].uid).await.unwrap();
        assert!(
            engine
                .scheduler()
                .enqueue(paragraphs[0].uid, created.uid, "es")
                .await
                .unwrap()
        );
        engine.shutdown().await;

        // A fresh engine picks the pending job back up and finishes it.
        let engine = Engine::start(config(&vars), Arc::new(StubProvider::new())).await.unwrap();
        assert_eq!(engine.bridge().list_books().await.unwrap().len(), 1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.scheduler().status().completed < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(engine.bridge().list_queued_jobs().await.unwrap().is_empty());
        engine.shutdown().await;
    }
}
