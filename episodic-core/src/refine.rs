//! Post-generation refinement: the continuity critique and the structured
//! extraction of continuity deltas from generated prose.
//!
//! Both stages are contained: a failure here degrades the episode result
//! with an explicit marker or empty deltas, it never aborts the episode.

use crate::continuity::{ContinuityStore, PlotId, StoreError};
use crate::plan::extract_json;
use crate::provider::TextGenerator;
use openai::{Message, Request};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

/// Default model for critique.
pub const REFINER_MODEL: &str = "gpt-4-turbo-preview";

/// Default model for extraction (a cheaper model is sufficient).
pub const UPDATER_MODEL: &str = "gpt-3.5-turbo-0125";

/// Marker stored in the critique field when the critique call fails.
pub const CRITIQUE_FAILED_MARKER: &str = "Error generating critique.";

const CRITIQUE_TEMPERATURE: f32 = 0.3;
const CRITIQUE_MAX_TOKENS: usize = 500;
const EXTRACT_TEMPERATURE: f32 = 0.1;
const EXTRACT_MAX_TOKENS: usize = 1500;

/// Reviews generated scripts against established continuity.
pub struct Critic<'a, G: TextGenerator> {
    generator: &'a G,
    model: String,
}

impl<'a, G: TextGenerator> Critic<'a, G> {
    pub fn new(generator: &'a G, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Critique a script draft. On failure returns the failure marker
    /// instead of propagating the error.
    pub async fn critique_episode(
        &self,
        script_text: &str,
        episode_number: u32,
        episode_summary: &str,
        store: &ContinuityStore,
    ) -> String {
        info!(episode = episode_number, "reviewing script");

        // The critic sees the state established *before* this episode.
        let context_summary = store.get_context_summary(episode_number);

        let prompt = format!(
            "You are a script editor reviewing the following draft script for Episode {episode_number}.\n\
             \n\
             Episode Goal/Summary: {episode_summary}\n\
             \n\
             Established Context (Characters, Active Plots before this episode):\n\
             {context_summary}\n\
             \n\
             Script Draft:\n\
             --- START SCRIPT ---\n\
             {script_text}\n\
             --- END SCRIPT ---\n\
             \n\
             Please evaluate the script based on these criteria:\n\
             1. Continuity: Does the script contradict established facts from the context \
             (character knowledge, location, plot statuses)? Point out specific inconsistencies if any.\n\
             2. Consistency: Are character actions and dialogue consistent with their established \
             personalities and motivations (as described in the context)?\n\
             3. Plot Advancement: Does the script meaningfully advance the plot towards the stated Episode Goal?\n\
             4. Pacing/Engagement: Briefly comment on the pacing or if the script feels engaging.\n\
             \n\
             Provide concise feedback. Start with an overall assessment (e.g., \"Looks good\", \
             \"Minor issues found\", \"Major inconsistencies\"). Then list specific points if necessary."
        );

        let request = Request::new(vec![
            Message::system(
                "You are a meticulous script editor focused on continuity and consistency.",
            ),
            Message::user(prompt),
        ])
        .with_model(&self.model)
        .with_temperature(CRITIQUE_TEMPERATURE)
        .with_max_tokens(CRITIQUE_MAX_TOKENS);

        match self.generator.complete(request).await {
            Ok(response) => response.text().trim().to_string(),
            Err(e) => {
                error!(episode = episode_number, "critique call failed: {e}");
                CRITIQUE_FAILED_MARKER.to_string()
            }
        }
    }
}

/// A reference to a plot point in extraction output: either a store-assigned
/// id or a free-text summary (which cannot be applied).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PlotRef {
    Id(u64),
    Summary(String),
}

/// One character state change reported by extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct CharacterUpdate {
    pub name: String,
    #[serde(default)]
    pub state_change: String,
}

/// One plot status change reported by extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct PlotUpdate {
    #[serde(alias = "plot_summary_or_id")]
    pub plot_ref: PlotRef,
    #[serde(default)]
    pub new_status: String,
}

/// The structured continuity deltas extracted from a script. Every field
/// defaults so a partially-valid response still parses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedUpdates {
    #[serde(default)]
    pub character_updates: Vec<CharacterUpdate>,
    #[serde(default)]
    pub plot_updates: Vec<PlotUpdate>,
    #[serde(default)]
    pub new_plot_points: Vec<String>,
    #[serde(default)]
    pub key_event_summary: Option<String>,
}

impl ExtractedUpdates {
    pub fn is_empty(&self) -> bool {
        self.character_updates.is_empty()
            && self.plot_updates.is_empty()
            && self.new_plot_points.is_empty()
    }
}

/// Extraction errors are internal; callers see empty deltas instead.
#[derive(Debug, Error)]
enum ExtractError {
    #[error("extraction request failed: {0}")]
    Api(#[from] openai::Error),

    #[error("extraction returned malformed JSON: {0}")]
    Malformed(String),
}

/// Turns generated prose into structured continuity deltas.
pub struct Extractor<'a, G: TextGenerator> {
    generator: &'a G,
    model: String,
}

impl<'a, G: TextGenerator> Extractor<'a, G> {
    pub fn new(generator: &'a G, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Extract updates from the first chunk of an episode's script.
    ///
    /// Best-effort: any failure is logged and yields empty deltas rather
    /// than aborting the episode.
    pub async fn extract_updates(
        &self,
        script_first_chunk: &str,
        episode_number: u32,
    ) -> ExtractedUpdates {
        match self.try_extract(script_first_chunk, episode_number).await {
            Ok(updates) => {
                info!(
                    episode = episode_number,
                    characters = updates.character_updates.len(),
                    plots = updates.plot_updates.len(),
                    new_plots = updates.new_plot_points.len(),
                    "extracted continuity updates"
                );
                updates
            }
            Err(e) => {
                error!(
                    episode = episode_number,
                    "extraction failed, applying no structured updates: {e}"
                );
                ExtractedUpdates::default()
            }
        }
    }

    async fn try_extract(
        &self,
        script_first_chunk: &str,
        episode_number: u32,
    ) -> Result<ExtractedUpdates, ExtractError> {
        let prompt = format!(
            "Analyze the first part of the script for Episode {episode_number}. \
             Extract key information updates as a valid JSON object.\n\
             \n\
             Script Text (First Segment):\n\
             --- START SCRIPT ---\n\
             {script_first_chunk}\n\
             --- END SCRIPT ---\n\
             \n\
             Identify the following and structure them in JSON:\n\
             - \"character_updates\": (Array of Objects) List characters whose state changed significantly. Include:\n\
                 - \"name\": (String) Character name\n\
                 - \"state_change\": (String) Description of the new state\n\
             - \"plot_updates\": (Array of Objects) List existing plot points whose status changed. Include:\n\
                 - \"plot_ref\": (Integer) The numeric plot id if known\n\
                 - \"new_status\": (String) The new status\n\
             - \"new_plot_points\": (Array of Strings) List summaries of any *new* major plot threads or quests introduced\n\
             - \"key_event_summary\": (String) A brief (1-2 sentence) summary of what appears to be happening in this episode.\n\
             \n\
             If no updates are found for a category, provide an empty array [].\n\
             Output *only* the valid JSON object."
        );

        let request = Request::new(vec![
            Message::system(
                "You are an AI assistant extracting structured data from scripts. \
                 Output *only* valid JSON.",
            ),
            Message::user(prompt),
        ])
        .with_model(&self.model)
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS)
        .with_json_response();

        let response = self.generator.complete(request).await?;
        let json = extract_json(response.text());
        serde_json::from_str(json).map_err(|e| ExtractError::Malformed(e.to_string()))
    }
}

/// Apply extracted deltas to the continuity store, in order: character
/// upserts, then integer-ref plot updates, then new plot points.
///
/// Summary plot refs are dropped with a warning (no reliable summary-to-id
/// resolution exists); unknown plot ids are reported but non-fatal.
pub fn apply_updates(
    updates: &ExtractedUpdates,
    episode_number: u32,
    store: &mut ContinuityStore,
) -> Result<(), StoreError> {
    for update in &updates.character_updates {
        if update.name.trim().is_empty() {
            continue;
        }
        store.upsert_character_state(&update.name, &update.state_change, episode_number)?;
    }

    for update in &updates.plot_updates {
        match &update.plot_ref {
            PlotRef::Id(id) => {
                match store.update_plot_status(PlotId(*id), &update.new_status, episode_number) {
                    Ok(()) => {}
                    Err(StoreError::PlotNotFound(id)) => {
                        warn!(%id, "extraction referenced unknown plot id, status not updated");
                    }
                    Err(e) => return Err(e),
                }
            }
            PlotRef::Summary(summary) => {
                warn!(
                    summary,
                    "plot update referenced a summary instead of an id, status not updated"
                );
            }
        }
    }

    for summary in &updates.new_plot_points {
        store.add_plot_point(summary, "introduced", episode_number)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGenerator;

    #[test]
    fn test_plot_ref_parses_id_or_summary() {
        let updates: ExtractedUpdates = serde_json::from_str(
            r#"{
                "plot_updates": [
                    {"plot_ref": 3, "new_status": "resolved"},
                    {"plot_ref": "the vault heist", "new_status": "in progress"},
                    {"plot_summary_or_id": 5, "new_status": "complicated"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(updates.plot_updates[0].plot_ref, PlotRef::Id(3));
        assert_eq!(
            updates.plot_updates[1].plot_ref,
            PlotRef::Summary("the vault heist".to_string())
        );
        assert_eq!(updates.plot_updates[2].plot_ref, PlotRef::Id(5));
    }

    #[test]
    fn test_missing_fields_default_empty() {
        let updates: ExtractedUpdates = serde_json::from_str("{}").unwrap();
        assert!(updates.is_empty());
        assert!(updates.key_event_summary.is_none());
    }

    #[tokio::test]
    async fn test_malformed_extraction_yields_empty_deltas() {
        let generator = MockGenerator::new();
        generator.queue_text("sorry, I cannot produce JSON today");

        let extractor = Extractor::new(&generator, UPDATER_MODEL);
        let updates = extractor.extract_updates("INT. LAB - NIGHT", 2).await;
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_service_error_yields_empty_deltas() {
        let generator = MockGenerator::new();
        generator.queue_error("quota exceeded");

        let extractor = Extractor::new(&generator, UPDATER_MODEL);
        let updates = extractor.extract_updates("INT. LAB - NIGHT", 2).await;
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_parses_fenced_json() {
        let generator = MockGenerator::new();
        generator.queue_text(
            "```json\n{\"character_updates\": [{\"name\": \"Mira\", \"state_change\": \"injured\"}]}\n```",
        );

        let extractor = Extractor::new(&generator, UPDATER_MODEL);
        let updates = extractor.extract_updates("INT. LAB - NIGHT", 2).await;
        assert_eq!(updates.character_updates.len(), 1);
        assert_eq!(updates.character_updates[0].name, "Mira");
    }

    #[test]
    fn test_apply_updates_order_and_tolerance() {
        let mut store = ContinuityStore::in_memory();
        let known = store.add_plot_point("the vault", "introduced", 1).unwrap();

        let updates: ExtractedUpdates = serde_json::from_str(&format!(
            r#"{{
                "character_updates": [
                    {{"name": "Mira", "state_change": "breaks into the vault"}},
                    {{"name": "", "state_change": "ignored"}}
                ],
                "plot_updates": [
                    {{"plot_ref": {known}, "new_status": "in progress"}},
                    {{"plot_ref": 999, "new_status": "resolved"}},
                    {{"plot_ref": "some summary", "new_status": "resolved"}}
                ],
                "new_plot_points": ["a rival crew appears"],
                "key_event_summary": "The heist begins."
            }}"#,
            known = known.0
        ))
        .unwrap();

        apply_updates(&updates, 2, &mut store).unwrap();

        assert_eq!(store.character("Mira").unwrap().state_history.len(), 1);
        assert_eq!(store.plot(known).unwrap().status, "in progress");
        // Unknown-id and summary refs were dropped without error.
        assert_eq!(store.plots().len(), 2);
        assert_eq!(store.plots()[1].summary, "a rival crew appears");
        assert_eq!(store.plots()[1].status, "introduced");
        assert_eq!(store.plots()[1].episode_added, 2);
    }
}
