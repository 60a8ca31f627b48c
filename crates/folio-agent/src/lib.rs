// ABOUTME: Translation side of folio: provider adapters, the response cache, and the translation scheduler.
// ABOUTME: The scheduler drives providers and writes results back through the store bridge.

pub mod cache;
pub mod provider;
pub mod providers;
pub mod scheduler;
pub mod testing;

pub use cache::CachedProvider;
pub use provider::{ProviderError, TranslationProvider};
pub use providers::create_provider;
pub use scheduler::{
    JobFailure, JobKey, JobState, SchedulerConfig, SchedulerError, SchedulerHandle,
    SchedulerStatus,
};
pub use testing::StubProvider;
