//! The episode pipeline: plan a story once, then generate episodes through
//! the fixed plan, generate, critique, extract, persist sequence.

use crate::chunk::{split_text, CHUNK_OVERLAP, CHUNK_SIZE};
use crate::context;
use crate::continuity::{ContinuityStore, PersistFailurePolicy, StoreError};
use crate::index::{ChunkKind, SemanticIndex};
use crate::persist::PersistError;
use crate::plan::{
    store_plan, PlanError, Planner, RefinedEpisodePlan, StoryPlan, DEFAULT_EPISODE_COUNT,
    PLANNER_MODEL,
};
use crate::provider::{Embedder, TextGenerator};
use crate::refine::{apply_updates, Critic, Extractor, REFINER_MODEL, UPDATER_MODEL};
use crate::scenes::{EpisodeScript, SceneLoop, GENERATOR_MODEL, MAX_SCENES_PER_EPISODE};
use openai::OpenAi;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Critique text recorded when generation failed before the critique stage.
pub const NO_CRITIQUE_MARKER: &str = "Generation failed, no critique available.";

const INDEX_SUBDIR: &str = "index";

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no story plan exists; call plan_story first")]
    NoPlan,

    #[error("episode {0} is not in the story plan")]
    EpisodeNotInPlan(u32),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not open continuity storage: {0}")]
    Open(#[from] PersistError),

    #[error(transparent)]
    Client(#[from] openai::Error),
}

/// Pipeline configuration. The defaults match production settings; tests
/// override the cap and storage location.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory for durable state. `None` keeps everything in memory.
    pub db_dir: Option<PathBuf>,
    pub episode_count: usize,
    pub scene_cap: usize,
    pub planner_model: String,
    pub generator_model: String,
    pub refiner_model: String,
    pub updater_model: String,
    pub persist_policy: PersistFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            episode_count: DEFAULT_EPISODE_COUNT,
            scene_cap: MAX_SCENES_PER_EPISODE,
            planner_model: PLANNER_MODEL.to_string(),
            generator_model: GENERATOR_MODEL.to_string(),
            refiner_model: REFINER_MODEL.to_string(),
            updater_model: UPDATER_MODEL.to_string(),
            persist_policy: PersistFailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_db_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.db_dir = Some(dir.into());
        self
    }

    pub fn with_episode_count(mut self, count: usize) -> Self {
        self.episode_count = count.max(1);
        self
    }

    pub fn with_scene_cap(mut self, cap: usize) -> Self {
        self.scene_cap = cap.max(1);
        self
    }

    pub fn with_persist_policy(mut self, policy: PersistFailurePolicy) -> Self {
        self.persist_policy = policy;
        self
    }
}

/// The result of one episode run, including partial scripts on failure.
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    pub episode: u32,
    pub script: EpisodeScript,
    pub critique: String,
}

/// What the pipeline retains for a successfully generated episode.
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub script: String,
    pub critique: String,
}

/// Orchestrates planning and episode generation over one story.
pub struct StoryPipeline<G: TextGenerator, E: Embedder> {
    generator: G,
    store: ContinuityStore,
    index: SemanticIndex<E>,
    config: PipelineConfig,
    plan: Option<StoryPlan>,
    episodes: HashMap<u32, EpisodeRecord>,
}

impl StoryPipeline<OpenAi, OpenAi> {
    /// Build a pipeline against the live API, with the key from the
    /// environment.
    pub async fn from_env(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = OpenAi::from_env()?;
        Self::new(client.clone(), client, config).await
    }
}

impl<G: TextGenerator, E: Embedder> StoryPipeline<G, E> {
    /// Build a pipeline, opening durable state if the config names a
    /// directory.
    pub async fn new(generator: G, embedder: E, config: PipelineConfig) -> Result<Self, PipelineError> {
        let (store, index) = match &config.db_dir {
            Some(dir) => {
                let store = ContinuityStore::open(dir, config.persist_policy)?;
                let index = SemanticIndex::open(embedder, dir.join(INDEX_SUBDIR)).await;
                (store, index)
            }
            None => (
                ContinuityStore::in_memory(),
                SemanticIndex::in_memory(embedder),
            ),
        };

        Ok(Self {
            generator,
            store,
            index,
            config,
            plan: None,
            episodes: HashMap::new(),
        })
    }

    /// The current story plan, if planning has run.
    pub fn plan(&self) -> Option<&StoryPlan> {
        self.plan.as_ref()
    }

    pub fn store(&self) -> &ContinuityStore {
        &self.store
    }

    pub fn index(&self) -> &SemanticIndex<E> {
        &self.index
    }

    /// Generate the master plan and seed it into memory as episode-0 facts.
    pub async fn plan_story(&mut self, user_input: &str) -> Result<&StoryPlan, PipelineError> {
        let planner = Planner::new(&self.generator, &self.config.planner_model);
        let plan = planner
            .generate_initial_plan(user_input, self.config.episode_count)
            .await?;

        store_plan(&plan, &mut self.store, &mut self.index).await?;
        Ok(self.plan.insert(plan))
    }

    /// Run the full generation sequence for one episode.
    ///
    /// A scene-loop failure returns `Ok` with the partial script and no
    /// critique; the failed draft is not critiqued, extracted, indexed, or
    /// recorded. Regenerating an episode number replaces its record.
    pub async fn generate_episode(
        &mut self,
        episode_number: u32,
    ) -> Result<EpisodeOutcome, PipelineError> {
        let plan = self.plan.as_ref().ok_or(PipelineError::NoPlan)?;
        let episode_plan = plan
            .episode(episode_number)
            .ok_or(PipelineError::EpisodeNotInPlan(episode_number))?;
        let episode_summary = episode_plan.summary.clone();

        info!(episode = episode_number, "starting episode run");

        let bundle =
            context::assemble(&self.store, &self.index, episode_number, &episode_summary).await;

        let script = SceneLoop::new(&self.generator, &self.config.generator_model)
            .with_cap(self.config.scene_cap)
            .generate(episode_number, &episode_summary, &bundle)
            .await;

        if script.is_failed() {
            warn!(
                episode = episode_number,
                scenes = script.scene_count(),
                "episode generation failed, skipping refinement and persistence"
            );
            return Ok(EpisodeOutcome {
                episode: episode_number,
                script,
                critique: NO_CRITIQUE_MARKER.to_string(),
            });
        }

        let script_text = script.text();

        let critique = Critic::new(&self.generator, &self.config.refiner_model)
            .critique_episode(&script_text, episode_number, &episode_summary, &self.store)
            .await;

        let chunks = split_text(&script_text, CHUNK_SIZE, CHUNK_OVERLAP);
        if let Some(first_chunk) = chunks.first() {
            let updates = Extractor::new(&self.generator, &self.config.updater_model)
                .extract_updates(first_chunk, episode_number)
                .await;
            apply_updates(&updates, episode_number, &mut self.store)?;
        }

        // Index the episode's own text for future episodes, even when
        // extraction produced nothing.
        self.index
            .add_chunks(&chunks, episode_number, ChunkKind::ScriptChunk)
            .await;

        self.episodes.insert(
            episode_number,
            EpisodeRecord {
                script: script_text,
                critique: critique.clone(),
            },
        );

        info!(
            episode = episode_number,
            scenes = script.scene_count(),
            "episode run finished"
        );
        Ok(EpisodeOutcome {
            episode: episode_number,
            script,
            critique,
        })
    }

    /// The retained script and critique for an episode, if it generated
    /// successfully.
    pub fn get_episode_data(&self, episode_number: u32) -> Option<&EpisodeRecord> {
        self.episodes.get(&episode_number)
    }

    /// Refresh one episode's plan against the continuity state established
    /// by the episodes before it.
    pub async fn refine_episode_plan(
        &self,
        episode_number: u32,
    ) -> Result<RefinedEpisodePlan, PipelineError> {
        let plan = self.plan.as_ref().ok_or(PipelineError::NoPlan)?;
        let episode_plan = plan
            .episode(episode_number)
            .ok_or(PipelineError::EpisodeNotInPlan(episode_number))?;

        let context = self.store.get_context_summary(episode_number);
        let planner = Planner::new(&self.generator, &self.config.planner_model);
        Ok(planner.refine_episode_plan(episode_plan, &context).await?)
    }

    /// Flush durable state. Continuity failures follow the persist policy;
    /// index failures only warn.
    pub async fn close(&mut self) -> Result<(), PipelineError> {
        self.store.flush()?;
        if !self.index.flush().await {
            warn!("semantic index not flushed on close");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_plan_json, MockEmbedder, MockGenerator};
    use crate::scenes::{ScriptStatus, EPISODE_END_MARKER};

    async fn pipeline_with(
        generator: MockGenerator,
    ) -> StoryPipeline<MockGenerator, MockEmbedder> {
        StoryPipeline::new(generator, MockEmbedder::new(), PipelineConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_before_plan_is_rejected() {
        let mut pipeline = pipeline_with(MockGenerator::new()).await;
        let result = pipeline.generate_episode(1).await;
        assert!(matches!(result, Err(PipelineError::NoPlan)));
    }

    #[tokio::test]
    async fn test_unknown_episode_is_rejected() {
        let generator = MockGenerator::new();
        generator.queue_text(sample_plan_json(2));

        let mut pipeline = pipeline_with(generator).await;
        pipeline.plan_story("a heist story").await.unwrap();

        let result = pipeline.generate_episode(9).await;
        assert!(matches!(result, Err(PipelineError::EpisodeNotInPlan(9))));
    }

    #[tokio::test]
    async fn test_failed_generation_returns_partial_and_records_nothing() {
        let generator = MockGenerator::new();
        generator.queue_text(sample_plan_json(2));
        generator.queue_text("INT. LAB - NIGHT\n\nScene one.");
        generator.queue_error("service unavailable");

        let mut pipeline = pipeline_with(generator).await;
        pipeline.plan_story("a heist story").await.unwrap();

        let outcome = pipeline.generate_episode(1).await.unwrap();
        assert!(outcome.script.is_failed());
        assert_eq!(outcome.script.scene_count(), 1);
        assert_eq!(outcome.critique, NO_CRITIQUE_MARKER);
        assert!(pipeline.get_episode_data(1).is_none());
    }

    #[tokio::test]
    async fn test_successful_episode_is_recorded_and_indexed() {
        let generator = MockGenerator::new();
        generator.queue_text(sample_plan_json(2));
        // Scene, critique, extraction.
        generator.queue_text(format!("INT. VAULT - NIGHT\n\nMira enters.\n{EPISODE_END_MARKER}"));
        generator.queue_text("Looks good. Continuity holds.");
        generator.queue_text(
            r#"{"character_updates": [{"name": "Mira", "state_change": "inside the vault"}],
                "plot_updates": [], "new_plot_points": ["an alarm is tripped"],
                "key_event_summary": "Mira breaches the vault."}"#,
        );

        let mut pipeline = pipeline_with(generator).await;
        pipeline.plan_story("a heist story").await.unwrap();
        let indexed_before = pipeline.index().len();

        let outcome = pipeline.generate_episode(1).await.unwrap();
        assert_eq!(outcome.script.status, ScriptStatus::Complete);
        assert_eq!(outcome.critique, "Looks good. Continuity holds.");

        let record = pipeline.get_episode_data(1).unwrap();
        assert!(record.script.contains("Mira enters."));
        assert_eq!(record.critique, "Looks good. Continuity holds.");

        // Extraction applied and script indexed for later episodes.
        let mira = pipeline.store().character("Mira").unwrap();
        assert!(mira
            .state_history
            .iter()
            .any(|c| c.episode == 1 && c.change == "inside the vault"));
        assert!(pipeline
            .store()
            .plots()
            .iter()
            .any(|p| p.summary == "an alarm is tripped" && p.status == "introduced"));
        assert!(pipeline.index().len() > indexed_before);
    }

    #[tokio::test]
    async fn test_regeneration_replaces_record() {
        let generator = MockGenerator::new();
        generator.queue_text(sample_plan_json(2));
        for draft in ["FIRST DRAFT", "SECOND DRAFT"] {
            generator.queue_text(format!("{draft}\n{EPISODE_END_MARKER}"));
            generator.queue_text(format!("Critique of {draft}"));
            generator.queue_text("{}");
        }

        let mut pipeline = pipeline_with(generator).await;
        pipeline.plan_story("a heist story").await.unwrap();

        pipeline.generate_episode(1).await.unwrap();
        pipeline.generate_episode(1).await.unwrap();

        let record = pipeline.get_episode_data(1).unwrap();
        assert!(record.script.contains("SECOND DRAFT"));
        assert!(!record.script.contains("FIRST DRAFT"));
    }

    #[tokio::test]
    async fn test_refine_episode_plan_uses_prior_context() {
        let generator = MockGenerator::new();
        generator.queue_text(sample_plan_json(2));
        generator.queue_text(
            r#"{"title": "Refined", "summary": "Tighter plan.",
                "key_points": ["a", "b", "c"], "characters": ["Mira"],
                "continuity_notes": "Follows the vault breach."}"#,
        );

        let mut pipeline = pipeline_with(generator).await;
        pipeline.plan_story("a heist story").await.unwrap();

        let refined = pipeline.refine_episode_plan(2).await.unwrap();
        assert_eq!(refined.title, "Refined");

        // The refinement prompt carried the causally-filtered context.
        let requests = pipeline.generator.requests();
        let prompt = &requests.last().unwrap().messages[1].content;
        assert!(prompt.contains("CURRENT STORY CONTEXT"));
    }
}
