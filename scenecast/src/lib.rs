//! # Scenecast
//!
//! A resilient pipeline engine that turns a Markdown document into a
//! narrated animated video.
//!
//! The engine drives a fixed, linear sequence of eleven stages (prompt
//! loading, input validation, LLM summarisation and script synthesis,
//! image planning and retrieval, animation rendering, narration, speech
//! synthesis, and final muxing) where every stage is an opaque,
//! failure-prone call against an external tool or remote API. The value is
//! in the shell around those calls:
//!
//! - **Checkpointed execution**: the job context is snapshotted after every
//!   successful stage, enabling rollback-on-retry and resume-after-crash
//! - **Uniform retry policy**: capped exponential backoff, per-stage and
//!   job-wide retry budgets, error classification at the stage boundary
//! - **Graceful degradation**: degradable stages fall back to deterministic
//!   substitute outputs instead of aborting the job
//! - **Pre-merge validation**: a final checklist decides between a known
//!   complete artifact and an explicitly labelled degraded one
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scenecast::prelude::*;
//!
//! let engine = Engine::new(config, jobs, checkpoints, services);
//! let job = engine.create_job(markdown).await?;
//! let finished = engine.run(job.id).await?;
//! assert!(finished.status.is_terminal());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod job;
pub mod prompts;
pub mod registry;
pub mod runner;
pub mod services;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancellation::CancelToken;
    pub use crate::checkpoint::{CheckpointStore, FsCheckpointStore};
    pub use crate::config::{EngineConfig, RenderQuality};
    pub use crate::context::{
        AudioClip, ImageAsset, ImageQuery, JobContext, LayoutHint, NarrationLine, SlideTiming,
        TokenUsage,
    };
    pub use crate::engine::Engine;
    pub use crate::errors::{EngineError, ErrorKind, StageError};
    pub use crate::gate::Checklist;
    pub use crate::job::store::{JobStore, MemoryJobStore, SqliteJobStore};
    pub use crate::job::{ErrorRecord, JobRecord, JobStatus};
    pub use crate::registry::{FallbackPolicy, StageDescriptor, REGISTRY, STAGE_COUNT};
    pub use crate::runner::{RunOutcome, StageRunner};
    pub use crate::services::{
        AnimationRenderer, ImageSearch, LanguageModel, MediaFetcher, MediaInfo, MediaToolkit,
        ServiceSet, SpeechSynthesizer,
    };
    pub use crate::stages::Stage;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[tokio::test]
    async fn test_prelude_wires_a_minimal_pipeline() {
        assert_eq!(REGISTRY.len(), STAGE_COUNT);

        let config = EngineConfig::default();
        assert_eq!(config.max_retries_per_stage, 3);

        let store = MemoryJobStore::new();
        let job = store.create(uuid::Uuid::new_v4(), "# Doc").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(store.acquire(job.id).await.unwrap().status, JobStatus::Processing);
    }
}
