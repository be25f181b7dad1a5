//! Story planning: the initial multi-episode outline and its storage as
//! episode-0 continuity facts.

use crate::continuity::{ContinuityStore, StoreError};
use crate::index::{ChunkKind, SemanticIndex};
use crate::provider::{Embedder, TextGenerator};
use openai::{Message, Request};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Default model for planning.
pub const PLANNER_MODEL: &str = "gpt-4-turbo-preview";

/// Default episode count for a new story.
pub const DEFAULT_EPISODE_COUNT: usize = 5;

const PLAN_TEMPERATURE: f32 = 0.7;
const REFINE_TEMPERATURE: f32 = 0.5;

/// Errors from planning operations. Unlike extraction, a malformed planning
/// response fails the whole operation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no user input provided for planning")]
    EmptyInput,

    #[error("planning request failed: {0}")]
    Api(#[from] openai::Error),

    #[error("planner returned malformed JSON: {0}")]
    Malformed(String),
}

/// The immutable story plan. Created once by planning; read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub premise: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub characters: Vec<PlannedCharacter>,
    #[serde(default)]
    pub master_outline: Vec<EpisodePlan>,
}

impl StoryPlan {
    /// Look up an outline entry by episode number.
    pub fn episode(&self, number: u32) -> Option<&EpisodePlan> {
        self.master_outline.iter().find(|ep| ep.episode == number)
    }

    pub fn episode_count(&self) -> usize {
        self.master_outline.len()
    }
}

/// A main character as planned, before any episode exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCharacter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub motivation: String,
}

/// One episode's entry within the master outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodePlan {
    pub episode: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// A per-episode plan refreshed against current story context.
#[derive(Debug, Clone, Deserialize)]
pub struct RefinedEpisodePlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub continuity_notes: Option<String>,
}

/// Generates story plans from user input.
pub struct Planner<'a, G: TextGenerator> {
    generator: &'a G,
    model: String,
}

impl<'a, G: TextGenerator> Planner<'a, G> {
    pub fn new(generator: &'a G, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Generate a complete story plan from user input.
    pub async fn generate_initial_plan(
        &self,
        user_input: &str,
        episode_count: usize,
    ) -> Result<StoryPlan, PlanError> {
        if user_input.trim().is_empty() {
            return Err(PlanError::EmptyInput);
        }
        info!("generating initial story plan");

        let prompt = format!(
            "You are a skilled story planner that organizes stories into episodic formats.\n\
             \n\
             Create a structured story arc for a {episode_count}-episode story based on this input:\n\
             \"{user_input}\"\n\
             \n\
             Format your response as JSON with these components:\n\
             1. \"title\": A compelling title for the story\n\
             2. \"premise\": A 2-3 sentence summary of the core concept\n\
             3. \"setting\": Brief description of where/when the story takes place\n\
             4. \"characters\": Array of main characters, each with:\n\
                - \"name\": Character name\n\
                - \"description\": Brief character description\n\
                - \"motivation\": What drives this character\n\
             5. \"master_outline\": Array with exactly {episode_count} episodes, each containing:\n\
                - \"episode\": Episode number (1 to {episode_count})\n\
                - \"title\": Episode title\n\
                - \"summary\": 1-2 paragraph summary of this episode's content\n\
                - \"key_points\": Array of 2-3 key plot points or events in this episode\n\
             \n\
             Create a story that's engaging, has clear character arcs, and resolves by the final episode.\n\
             \n\
             IMPORTANT: Return ONLY the valid JSON object."
        );

        let request = Request::new(vec![
            Message::system(
                "You are a story planning assistant that creates well-structured outlines. \
                 Return ONLY valid JSON.",
            ),
            Message::user(prompt),
        ])
        .with_model(&self.model)
        .with_temperature(PLAN_TEMPERATURE)
        .with_json_response();

        let response = self.generator.complete(request).await?;
        let json = extract_json(response.text());
        let plan: StoryPlan =
            serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))?;

        info!(
            title = %plan.title,
            episodes = plan.episode_count(),
            "generated story plan"
        );
        Ok(plan)
    }

    /// Refine one episode's plan against the current story context.
    pub async fn refine_episode_plan(
        &self,
        episode_plan: &EpisodePlan,
        context_from_memory: &str,
    ) -> Result<RefinedEpisodePlan, PlanError> {
        info!(episode = episode_plan.episode, "refining episode plan");

        let prompt = format!(
            "You are a story editor refining an episode plan using the latest story context.\n\
             \n\
             EPISODE TO REFINE: Episode {episode}\n\
             \n\
             ORIGINAL EPISODE PLAN:\n\
             Title: {title}\n\
             Summary: {summary}\n\
             Key Points: {key_points}\n\
             \n\
             CURRENT STORY CONTEXT (from previous episodes):\n\
             {context_from_memory}\n\
             \n\
             Based on this context, enhance the episode plan to maintain continuity and strengthen the narrative.\n\
             Return a JSON object with these fields:\n\
             - \"title\": Episode title (may be updated)\n\
             - \"summary\": Updated episode summary (1-2 paragraphs)\n\
             - \"key_points\": Array of 3-5 key events that should happen in this episode\n\
             - \"characters\": Array of character names who should appear in this episode\n\
             - \"continuity_notes\": Important connections to previous episodes\n\
             \n\
             IMPORTANT: Return ONLY the valid JSON object.",
            episode = episode_plan.episode,
            title = episode_plan.title,
            summary = episode_plan.summary,
            key_points = episode_plan.key_points.join(", "),
        );

        let request = Request::new(vec![
            Message::system(
                "You are a story editor specializing in narrative coherence and continuity.",
            ),
            Message::user(prompt),
        ])
        .with_model(&self.model)
        .with_temperature(REFINE_TEMPERATURE)
        .with_json_response();

        let response = self.generator.complete(request).await?;
        let json = extract_json(response.text());
        serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))
    }
}

/// Seed the continuity store and semantic index with episode-0 facts from a
/// freshly generated plan.
pub async fn store_plan<E: Embedder>(
    plan: &StoryPlan,
    store: &mut ContinuityStore,
    index: &mut SemanticIndex<E>,
) -> Result<(), StoreError> {
    for character in &plan.characters {
        store.upsert_character_state(
            &character.name,
            &format!(
                "Description: {}. Motivation: {}",
                character.description, character.motivation
            ),
            0,
        )?;
    }

    for episode in &plan.master_outline {
        store.add_plot_point(
            &format!("Episode {} objective: {}", episode.episode, episode.summary),
            "planned",
            0,
        )?;
        for point in &episode.key_points {
            store.add_plot_point(
                &format!("Episode {} key point: {}", episode.episode, point),
                "planned",
                0,
            )?;
        }
    }

    let overview = format!(
        "STORY TITLE: {}\n\nPREMISE: {}\n\nSETTING: {}",
        plan.title, plan.premise, plan.setting
    );
    if !index
        .add_chunks(&[overview], 0, ChunkKind::StoryOverview)
        .await
    {
        warn!("story overview not indexed; planning facts remain authoritative");
    }

    info!("story plan stored");
    Ok(())
}

/// Strip markdown code fences from a response that should be bare JSON.
pub(crate) fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}
