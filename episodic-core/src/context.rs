//! Bounded context assembly for a target episode.
//!
//! Combines the causally-filtered continuity summary, the full character
//! roster, and retrieved prior text into the bundle every generation and
//! critique call consumes. Nothing dated at or after the target episode may
//! appear here, from either source.

use crate::continuity::ContinuityStore;
use crate::index::{ChunkKind, ScoredChunk, SemanticIndex, DEFAULT_SEARCH_LIMIT};
use crate::provider::Embedder;

/// The assembled prompt context for one episode.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    /// Causally-filtered character and plot facts.
    pub context_summary: String,
    /// Full character roster with recent states.
    pub character_info: String,
    /// Retrieved prior text, formatted for prompt inclusion.
    pub relevant_chunks: String,
}

/// Build the context bundle for `episode_number`.
pub async fn assemble<E: Embedder>(
    store: &ContinuityStore,
    index: &SemanticIndex<E>,
    episode_number: u32,
    episode_summary: &str,
) -> ContextBundle {
    let context_summary = store.get_context_summary(episode_number);
    let character_info = store.get_character_summaries();

    let retrieved = index.search(episode_summary, DEFAULT_SEARCH_LIMIT).await;
    // Second enforcement of the causal boundary: on regeneration the index
    // already holds this episode's own prior text.
    let visible: Vec<&ScoredChunk> = retrieved
        .iter()
        .filter(|chunk| chunk.metadata.episode < episode_number)
        .collect();

    let relevant_chunks = if visible.is_empty() {
        "No relevant prior material retrieved.".to_string()
    } else {
        visible
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let source = match chunk.metadata.kind {
                    ChunkKind::StoryOverview => {
                        format!("[Story Overview, Episode {}]", chunk.metadata.episode)
                    }
                    ChunkKind::ScriptChunk => format!(
                        "[From Episode {}, Chunk {}]",
                        chunk.metadata.episode, chunk.metadata.chunk_index
                    ),
                };
                format!("Relevant Context {} {}:\n{}\n", i + 1, source, chunk.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    ContextBundle {
        context_summary,
        character_info,
        relevant_chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedder;

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_bundle_includes_store_summaries() {
        let mut store = ContinuityStore::in_memory();
        store.upsert_character_state("Mira", "archivist", 0).unwrap();
        store.add_plot_point("the vault", "planned", 0).unwrap();
        let index = SemanticIndex::in_memory(MockEmbedder::new());

        let bundle = assemble(&store, &index, 1, "Mira opens the vault").await;
        assert!(bundle.context_summary.contains("archivist"));
        assert!(bundle.character_info.contains("Mira"));
        assert!(bundle.relevant_chunks.contains("No relevant prior material"));
    }

    #[tokio::test]
    async fn test_chunks_from_target_episode_are_excluded() {
        let store = ContinuityStore::in_memory();
        let mut index = SemanticIndex::in_memory(MockEmbedder::new());
        index
            .add_chunks(&strings(&["text from episode one"]), 1, ChunkKind::ScriptChunk)
            .await;
        index
            .add_chunks(&strings(&["text from episode two"]), 2, ChunkKind::ScriptChunk)
            .await;

        let bundle = assemble(&store, &index, 2, "text from episode").await;
        assert!(bundle.relevant_chunks.contains("text from episode one"));
        assert!(
            !bundle.relevant_chunks.contains("text from episode two"),
            "episode 2 context must not see episode 2 text"
        );
        assert!(bundle.relevant_chunks.contains("[From Episode 1, Chunk 0]"));
    }

    #[tokio::test]
    async fn test_planning_overview_visible_to_episode_one() {
        let store = ContinuityStore::in_memory();
        let mut index = SemanticIndex::in_memory(MockEmbedder::new());
        index
            .add_chunks(&strings(&["STORY TITLE: The Vault"]), 0, ChunkKind::StoryOverview)
            .await;

        let bundle = assemble(&store, &index, 1, "STORY TITLE: The Vault").await;
        assert!(bundle.relevant_chunks.contains("STORY TITLE"));
        assert!(bundle.relevant_chunks.contains("[Story Overview, Episode 0]"));
    }
}
