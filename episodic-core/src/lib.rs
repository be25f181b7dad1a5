//! Continuity-aware episodic story generation.
//!
//! The engine plans a multi-episode story once, then generates episodes
//! sequentially. Each episode run assembles a causally-bounded context from
//! the continuity store and semantic index, generates scenes one at a time,
//! critiques the draft, extracts structured continuity deltas, and persists
//! everything for the episodes that follow. Facts dated at or after the
//! target episode are never visible to its generation.
//!
//! [`StoryPipeline`] is the entry point; it is generic over the
//! [`TextGenerator`] and [`Embedder`] seams so the whole engine runs against
//! scripted backends in tests.

pub mod chunk;
pub mod context;
pub mod continuity;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod plan;
pub mod provider;
pub mod refine;
pub mod scenes;
pub mod testing;

pub use context::ContextBundle;
pub use continuity::{
    Character, ContinuityStore, PersistFailurePolicy, PlotId, PlotPoint, StoreError,
};
pub use index::{ChunkKind, ScoredChunk, SemanticIndex};
pub use pipeline::{
    EpisodeOutcome, EpisodeRecord, PipelineConfig, PipelineError, StoryPipeline,
};
pub use plan::{EpisodePlan, PlanError, Planner, RefinedEpisodePlan, StoryPlan};
pub use provider::{Embedder, TextGenerator};
pub use refine::{Critic, ExtractedUpdates, Extractor};
pub use scenes::{EpisodeScript, SceneLoop, ScriptStatus, MAX_SCENES_PER_EPISODE};
