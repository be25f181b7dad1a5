//! The continuity store: single source of truth for characters and plots.

use super::character::Character;
use super::plot::{PlotId, PlotPoint};
use crate::persist::{PersistError, RecordStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

const CHARACTERS_RECORD: &str = "characters.json";
const PLOTS_RECORD: &str = "plots.json";
const COUNTER_RECORD: &str = "counter.json";

/// How many history entries a full character summary shows.
const SUMMARY_RECENT_STATES: usize = 3;

/// How many history entries a causally-filtered context summary shows.
const CONTEXT_RECENT_STATES: usize = 2;

/// Errors from continuity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plot point {0} not found")]
    PlotNotFound(PlotId),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// What to do when a durable write fails.
///
/// The default keeps the in-memory mutation and continues in a degraded
/// memory-only mode; `Fail` escalates the write error to the caller instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistFailurePolicy {
    #[default]
    ContinueDegraded,
    Fail,
}

#[derive(Serialize, Deserialize)]
struct PlotCounter {
    plot_counter: u64,
}

/// Durable record of characters and plot threads.
///
/// Mutations append to history and synchronously rewrite the character table,
/// plot table, and id counter through the record store. In-memory state is
/// never rolled back on a write failure.
#[derive(Debug)]
pub struct ContinuityStore {
    characters: Vec<Character>,
    character_index: HashMap<String, usize>,
    plots: Vec<PlotPoint>,
    plot_index: HashMap<PlotId, usize>,
    /// Last assigned plot id; the next assignment is this plus one.
    plot_counter: u64,
    records: Option<RecordStore>,
    policy: PersistFailurePolicy,
    degraded: bool,
}

impl ContinuityStore {
    /// Create an ephemeral in-memory store with no durability.
    pub fn in_memory() -> Self {
        Self {
            characters: Vec::new(),
            character_index: HashMap::new(),
            plots: Vec::new(),
            plot_index: HashMap::new(),
            plot_counter: 0,
            records: None,
            policy: PersistFailurePolicy::default(),
            degraded: false,
        }
    }

    /// Open a durable store at the given directory, loading any prior state.
    pub fn open(
        dir: impl AsRef<Path>,
        policy: PersistFailurePolicy,
    ) -> Result<Self, PersistError> {
        let records = RecordStore::open(dir.as_ref())?;

        let characters: Vec<Character> = records.load(CHARACTERS_RECORD)?.unwrap_or_default();
        let plots: Vec<PlotPoint> = records.load(PLOTS_RECORD)?.unwrap_or_default();
        let plot_counter = records
            .load::<PlotCounter>(COUNTER_RECORD)?
            .map(|c| c.plot_counter)
            .unwrap_or(0);

        let character_index = characters
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let plot_index = plots.iter().enumerate().map(|(i, p)| (p.id, i)).collect();

        if !characters.is_empty() || !plots.is_empty() {
            info!(
                characters = characters.len(),
                plots = plots.len(),
                plot_counter,
                "loaded continuity state from {:?}",
                records.dir()
            );
        }

        Ok(Self {
            characters,
            character_index,
            plots,
            plot_index,
            plot_counter,
            records: Some(records),
            policy,
            degraded: false,
        })
    }

    /// Whether a durable write has failed and the store is memory-only.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// All characters, in insertion order.
    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    /// All plot points, in id order.
    pub fn plots(&self) -> &[PlotPoint] {
        &self.plots
    }

    /// Look up a character by name.
    pub fn character(&self, name: &str) -> Option<&Character> {
        self.character_index.get(name).map(|&i| &self.characters[i])
    }

    /// Look up a plot point by id.
    pub fn plot(&self, id: PlotId) -> Option<&PlotPoint> {
        self.plot_index.get(&id).map(|&i| &self.plots[i])
    }

    /// Append a state change to a character, creating it on first use.
    pub fn upsert_character_state(
        &mut self,
        name: &str,
        change: &str,
        episode: u32,
    ) -> Result<(), StoreError> {
        let position = match self.character_index.get(name) {
            Some(&i) => i,
            None => {
                let i = self.characters.len();
                self.characters.push(Character::new(name, episode));
                self.character_index.insert(name.to_string(), i);
                i
            }
        };

        self.characters[position].record_state(episode, change);
        info!(character = name, episode, "recorded character state change");
        self.save_all()
    }

    /// Track a new plot thread. Returns the assigned id.
    pub fn add_plot_point(
        &mut self,
        summary: &str,
        status: &str,
        episode_added: u32,
    ) -> Result<PlotId, StoreError> {
        self.plot_counter += 1;
        let id = PlotId(self.plot_counter);

        self.plot_index.insert(id, self.plots.len());
        self.plots
            .push(PlotPoint::new(id, summary, status, episode_added));

        info!(%id, episode = episode_added, "added plot point");
        self.save_all()?;
        Ok(id)
    }

    /// Append a status change to an existing plot thread.
    pub fn update_plot_status(
        &mut self,
        id: PlotId,
        new_status: &str,
        episode: u32,
    ) -> Result<(), StoreError> {
        let position = *self
            .plot_index
            .get(&id)
            .ok_or(StoreError::PlotNotFound(id))?;

        self.plots[position].record_status(episode, new_status);
        info!(%id, status = new_status, episode, "updated plot status");
        self.save_all()
    }

    /// Deterministic text rendering of every character, insertion order,
    /// with each character's last few history entries.
    pub fn get_character_summaries(&self) -> String {
        if self.characters.is_empty() {
            return "No character information available.".to_string();
        }

        let summaries: Vec<String> = self
            .characters
            .iter()
            .map(|character| {
                let recent: Vec<String> = character
                    .recent_states(SUMMARY_RECENT_STATES)
                    .iter()
                    .map(|c| format!("Episode {}: {}", c.episode, c.change))
                    .collect();

                let mut summary = format!(
                    "{}: First appeared in Episode {}.",
                    character.name, character.first_appearance
                );
                if !recent.is_empty() {
                    summary.push_str(&format!(" Recent state: {}", recent.join("; ")));
                }
                summary
            })
            .collect();

        summaries.join("\n")
    }

    /// Plot threads whose current status is not terminal.
    pub fn get_active_plot_points(&self) -> Vec<&PlotPoint> {
        self.plots.iter().filter(|p| !p.is_terminal()).collect()
    }

    /// Render the causally-filtered context for a target episode.
    ///
    /// Only facts dated strictly before `episode_number` are visible:
    /// characters that first appeared earlier (showing their last two
    /// qualifying state changes) and plots added earlier (showing the latest
    /// qualifying status). This is the causal boundary enforcement point.
    pub fn get_context_summary(&self, episode_number: u32) -> String {
        let mut character_lines = Vec::new();
        for character in &self.characters {
            if character.first_appearance >= episode_number {
                continue;
            }
            let relevant = character.states_before(episode_number);
            if relevant.is_empty() {
                continue;
            }
            let start = relevant.len().saturating_sub(CONTEXT_RECENT_STATES);
            let states: Vec<String> = relevant[start..]
                .iter()
                .map(|c| format!("Episode {}: {}", c.episode, c.change))
                .collect();
            character_lines.push(format!("{}: {}", character.name, states.join("; ")));
        }

        let mut plot_lines = Vec::new();
        for plot in &self.plots {
            if plot.episode_added >= episode_number {
                continue;
            }
            if let Some(latest) = plot.latest_status_before(episode_number) {
                plot_lines.push(format!(
                    "Plot: {} - Status as of Episode {}: {}",
                    plot.summary, latest.episode, latest.status
                ));
            }
        }

        let character_block = if character_lines.is_empty() {
            "No prior character information.".to_string()
        } else {
            format!("CHARACTER CONTEXT:\n{}", character_lines.join("\n"))
        };

        let plot_block = if plot_lines.is_empty() {
            "No prior plot points.".to_string()
        } else {
            format!("PLOT CONTEXT:\n{}", plot_lines.join("\n"))
        };

        format!("{character_block}\n\n{plot_block}")
    }

    /// Rewrite all three records now. Called automatically by mutations.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.save_all()
    }

    fn save_all(&mut self) -> Result<(), StoreError> {
        let Some(ref records) = self.records else {
            return Ok(());
        };

        let result = records
            .save(CHARACTERS_RECORD, &self.characters)
            .and_then(|()| records.save(PLOTS_RECORD, &self.plots))
            .and_then(|()| {
                records.save(
                    COUNTER_RECORD,
                    &PlotCounter {
                        plot_counter: self.plot_counter,
                    },
                )
            });

        match result {
            Ok(()) => {
                self.degraded = false;
                Ok(())
            }
            Err(e) => match self.policy {
                PersistFailurePolicy::ContinueDegraded => {
                    if !self.degraded {
                        error!("durable write failed, continuing memory-only: {e}");
                    } else {
                        warn!("durable write still failing: {e}");
                    }
                    self.degraded = true;
                    Ok(())
                }
                PersistFailurePolicy::Fail => Err(e.into()),
            },
        }
    }
}
