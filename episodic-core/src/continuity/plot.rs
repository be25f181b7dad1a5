//! Plot thread records with lifecycle status tracking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Statuses that end a plot thread's active life.
const TERMINAL_STATUSES: [&str; 3] = ["resolved", "completed", "abandoned"];

/// Store-assigned plot point identifier, strictly increasing from 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlotId(pub u64);

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One appended entry in a plot point's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Episode the status change is dated to (0 = planning stage).
    pub episode: u32,
    /// The status at that point, free-form (model-supplied).
    pub status: String,
}

/// A tracked narrative thread, independent of any single episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub id: PlotId,
    pub summary: String,
    /// Current status. Statuses are free-form strings because they come from
    /// model output; only the terminal set is interpreted.
    pub status: String,
    pub episode_added: u32,
    /// Append-only history, seeded with the initial status.
    pub status_history: Vec<StatusChange>,
}

impl PlotPoint {
    /// Create a plot point with its initial status recorded in history.
    pub fn new(
        id: PlotId,
        summary: impl Into<String>,
        status: impl Into<String>,
        episode_added: u32,
    ) -> Self {
        let status = status.into();
        Self {
            id,
            summary: summary.into(),
            status: status.clone(),
            episode_added,
            status_history: vec![StatusChange {
                episode: episode_added,
                status,
            }],
        }
    }

    /// Append a status change and update the current status.
    pub fn record_status(&mut self, episode: u32, status: impl Into<String>) {
        let status = status.into();
        self.status = status.clone();
        self.status_history.push(StatusChange { episode, status });
    }

    /// Whether the current status ends this thread's active life.
    pub fn is_terminal(&self) -> bool {
        let lower = self.status.to_lowercase();
        TERMINAL_STATUSES.contains(&lower.as_str())
    }

    /// The most recent status entry dated strictly before the given episode.
    pub fn latest_status_before(&self, episode: u32) -> Option<&StatusChange> {
        self.status_history
            .iter()
            .filter(|change| change.episode < episode)
            .next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_seeds_history() {
        let plot = PlotPoint::new(PlotId(1), "The missing courier", "introduced", 1);
        assert_eq!(plot.status, "introduced");
        assert_eq!(plot.status_history.len(), 1);
        assert_eq!(plot.status_history[0].episode, 1);
    }

    #[test]
    fn test_record_status_appends_and_updates_current() {
        let mut plot = PlotPoint::new(PlotId(1), "The missing courier", "introduced", 1);
        plot.record_status(2, "in progress");
        plot.record_status(3, "resolved");

        assert_eq!(plot.status, "resolved");
        assert_eq!(plot.status_history.len(), 3);
        assert_eq!(plot.status_history[1].status, "in progress");
    }

    #[test]
    fn test_terminal_statuses() {
        let mut plot = PlotPoint::new(PlotId(1), "thread", "introduced", 1);
        assert!(!plot.is_terminal());

        plot.record_status(2, "Resolved");
        assert!(plot.is_terminal());

        plot.record_status(3, "reopened");
        assert!(!plot.is_terminal());

        plot.record_status(4, "abandoned");
        assert!(plot.is_terminal());
    }

    #[test]
    fn test_latest_status_before() {
        let mut plot = PlotPoint::new(PlotId(1), "thread", "planned", 0);
        plot.record_status(1, "introduced");
        plot.record_status(3, "resolved");

        assert_eq!(plot.latest_status_before(1).unwrap().status, "planned");
        assert_eq!(plot.latest_status_before(3).unwrap().status, "introduced");
        assert_eq!(plot.latest_status_before(4).unwrap().status, "resolved");
        assert!(plot.latest_status_before(0).is_none());
    }
}
