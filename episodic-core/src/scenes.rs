//! Sequential scene-by-scene generation for one episode.
//!
//! Each scene's prompt carries the rolling summary of every prior scene in
//! the episode, so generation is inherently sequential. The loop terminates
//! on an explicit end marker from the model, on the scene cap, or on the
//! first service error; already-generated scenes are never discarded.

use crate::context::ContextBundle;
use crate::provider::TextGenerator;
use openai::{Message, Request};
use tracing::{error, info, warn};

/// Default model for scene generation.
pub const GENERATOR_MODEL: &str = "gpt-4-turbo-preview";

/// Hard ceiling on scenes per episode, independent of model behavior.
pub const MAX_SCENES_PER_EPISODE: usize = 10;

/// Marker the model appends when it considers the episode concluded.
pub const EPISODE_END_MARKER: &str = "# EPISODE END";

const SCENE_LIMIT_ANNOTATION: &str = "# SCENE LIMIT REACHED - EPISODE INCOMPLETE";
const SCENE_TEMPERATURE: f32 = 0.75;
const SCENE_MAX_TOKENS: usize = 700;

/// How an episode's scene loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStatus {
    /// The model signalled the episode end.
    Complete,
    /// The scene cap was hit without an end marker.
    CapReached,
    /// A service error stopped the loop at the given scene number.
    Failed { scene: usize, reason: String },
}

/// The typed result of a scene loop: the scenes that were produced, plus
/// how the loop ended. Partial scripts are preserved on failure.
#[derive(Debug, Clone)]
pub struct EpisodeScript {
    pub scenes: Vec<String>,
    pub status: ScriptStatus,
}

impl EpisodeScript {
    /// Whether any usable script was produced.
    pub fn has_scenes(&self) -> bool {
        !self.scenes.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ScriptStatus::Failed { .. })
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// Render the script text, with the status annotation the loop's
    /// consumers and readers expect appended where applicable.
    pub fn text(&self) -> String {
        let mut parts = self.scenes.clone();
        match &self.status {
            ScriptStatus::Complete => {}
            ScriptStatus::CapReached => parts.push(SCENE_LIMIT_ANNOTATION.to_string()),
            ScriptStatus::Failed { scene, .. } => {
                parts.push(format!("ERROR GENERATING SCENE {scene}: Generation stopped."))
            }
        }
        parts.join("\n\n")
    }
}

/// Drives scene generation for one episode.
pub struct SceneLoop<'a, G: TextGenerator> {
    generator: &'a G,
    model: String,
    cap: usize,
}

impl<'a, G: TextGenerator> SceneLoop<'a, G> {
    pub fn new(generator: &'a G, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
            cap: MAX_SCENES_PER_EPISODE,
        }
    }

    /// Override the scene cap (still a hard ceiling).
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    /// Generate scenes until the model ends the episode, the cap is hit,
    /// or a service call fails.
    pub async fn generate(
        &self,
        episode_number: u32,
        episode_summary: &str,
        bundle: &ContextBundle,
    ) -> EpisodeScript {
        info!(episode = episode_number, "beginning episode generation");

        let mut scenes: Vec<String> = Vec::new();
        // Explicit accumulator: the summary of all prior scenes in this
        // episode, passed forward by value into each prompt.
        let mut rolling_summary = String::new();

        for scene_number in 1..=self.cap {
            let prompt = self.scene_prompt(
                episode_number,
                scene_number,
                episode_summary,
                bundle,
                &rolling_summary,
            );
            let request = Request::new(vec![
                Message::system(format!(
                    "You are writing Scene {scene_number} of Episode {episode_number}."
                )),
                Message::user(prompt),
            ])
            .with_model(&self.model)
            .with_temperature(SCENE_TEMPERATURE)
            .with_max_tokens(SCENE_MAX_TOKENS);

            let scene = match self.generator.complete(request).await {
                Ok(response) => response.text().trim().to_string(),
                Err(e) => {
                    error!(
                        episode = episode_number,
                        scene = scene_number,
                        "scene generation failed: {e}"
                    );
                    return EpisodeScript {
                        scenes,
                        status: ScriptStatus::Failed {
                            scene: scene_number,
                            reason: e.to_string(),
                        },
                    };
                }
            };

            info!(
                episode = episode_number,
                scene = scene_number,
                words = scene.split_whitespace().count(),
                "scene generated"
            );

            let episode_complete = scene.ends_with(EPISODE_END_MARKER);
            rolling_summary = if rolling_summary.is_empty() {
                scene.clone()
            } else {
                format!("{rolling_summary}\n\n{scene}")
            };
            scenes.push(scene);

            if episode_complete {
                return EpisodeScript {
                    scenes,
                    status: ScriptStatus::Complete,
                };
            }
        }

        warn!(
            episode = episode_number,
            cap = self.cap,
            "episode hit maximum scene limit"
        );
        EpisodeScript {
            scenes,
            status: ScriptStatus::CapReached,
        }
    }

    fn scene_prompt(
        &self,
        episode_number: u32,
        scene_number: usize,
        episode_summary: &str,
        bundle: &ContextBundle,
        rolling_summary: &str,
    ) -> String {
        let previous = if scene_number > 1 {
            rolling_summary
        } else {
            "This is the first scene."
        };

        format!(
            "You are a screenwriter AI writing Scene {scene_number} of Episode {episode_number}.\n\
             \n\
             Overall Episode Goal / Summary: {episode_summary}\n\
             \n\
             Context from Past Episodes & World:\n\
             {context}\n\
             \n\
             Characters Potentially Involved (refer to their state/motivations):\n\
             {characters}\n\
             \n\
             Relevant Snippets from Past (use if helpful):\n\
             {chunks}\n\
             \n\
             Summary of Previous Scenes in this Episode:\n\
             {previous}\n\
             \n\
             Instructions for Scene {scene_number}:\n\
             - Write ONLY Scene {scene_number} in standard screenplay format (SCENE HEADING, Action, CHARACTER, Dialogue).\n\
             - The scene should logically follow the previous scene and work towards the overall Episode Goal.\n\
             - Keep character actions and dialogue consistent with their established traits and the situation.\n\
             - Keep the scene concise (100-400 words).\n\
             - Do NOT write subsequent scenes. Only output the content for Scene {scene_number}.\n\
             - If the episode goal is met or this is a natural conclusion point, end the episode by putting \"{end_marker}\" on the final line.\n\
             \n\
             Begin Scene {scene_number}:",
            context = bundle.context_summary,
            characters = bundle.character_info,
            chunks = bundle.relevant_chunks,
            end_marker = EPISODE_END_MARKER,
        )
    }
}
