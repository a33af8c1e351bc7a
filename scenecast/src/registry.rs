//! The static stage registry.
//!
//! The pipeline is exactly these eleven stages, in this order. The engine
//! walks the registry; it never hard-codes stage identity. Behaviour
//! variants (fallback or not, remote-retry opt-in) are data on the
//! descriptor, not subtypes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of stages in the pipeline.
pub const STAGE_COUNT: usize = 11;

/// Whether a stage has a deterministic fallback producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Exhausted retries invoke the fallback producer and continue.
    Enabled,
    /// Exhausted retries abort the job.
    Disabled,
}

/// Whether a stage's failure can take the whole job down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Failure aborts the job (or, for the muxer, forces a degraded artifact).
    Fatal,
    /// Failure degrades the output but the pipeline continues.
    Degradable,
}

/// Static metadata for one stage.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    /// Ordinal position, 0 through 10.
    pub index: u8,
    /// Stable stage name.
    pub name: &'static str,
    /// Maximum attempts for this stage (before the config-wide cap).
    pub max_retries: u32,
    /// Fallback policy.
    pub fallback: FallbackPolicy,
    /// Criticality class.
    pub criticality: Criticality,
    /// Wall-clock budget per attempt.
    pub timeout: Duration,
    /// Whether quota / remote-api errors are retried for this stage.
    pub retry_remote_errors: bool,
}

/// The fixed, ordered registry of all pipeline stages.
pub static REGISTRY: [StageDescriptor; STAGE_COUNT] = [
    StageDescriptor {
        index: 0,
        name: "load_style_prompts",
        max_retries: 1,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(10),
        retry_remote_errors: false,
    },
    StageDescriptor {
        index: 1,
        name: "validate_input",
        max_retries: 1,
        fallback: FallbackPolicy::Disabled,
        criticality: Criticality::Fatal,
        timeout: Duration::from_secs(10),
        retry_remote_errors: false,
    },
    StageDescriptor {
        index: 2,
        name: "synthesise_summary",
        max_retries: 3,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(60),
        retry_remote_errors: true,
    },
    StageDescriptor {
        index: 3,
        name: "synthesise_base_script",
        max_retries: 3,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(120),
        retry_remote_errors: true,
    },
    StageDescriptor {
        index: 4,
        name: "plan_images",
        max_retries: 3,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(60),
        retry_remote_errors: true,
    },
    StageDescriptor {
        index: 5,
        name: "fetch_images",
        max_retries: 3,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(120),
        retry_remote_errors: false,
    },
    StageDescriptor {
        index: 6,
        name: "enhance_script",
        max_retries: 1,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(10),
        retry_remote_errors: false,
    },
    StageDescriptor {
        index: 7,
        name: "render_video",
        max_retries: 2,
        fallback: FallbackPolicy::Disabled,
        criticality: Criticality::Fatal,
        timeout: Duration::from_secs(420),
        retry_remote_errors: false,
    },
    StageDescriptor {
        index: 8,
        name: "synthesise_narration",
        max_retries: 3,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(90),
        retry_remote_errors: true,
    },
    StageDescriptor {
        index: 9,
        name: "synthesise_audio",
        max_retries: 2,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Degradable,
        timeout: Duration::from_secs(300),
        retry_remote_errors: false,
    },
    StageDescriptor {
        index: 10,
        name: "mux",
        max_retries: 1,
        fallback: FallbackPolicy::Enabled,
        criticality: Criticality::Fatal,
        timeout: Duration::from_secs(300),
        retry_remote_errors: false,
    },
];
