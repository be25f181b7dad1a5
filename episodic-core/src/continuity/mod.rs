//! Continuity tracking for multi-episode stories.
//!
//! The store is the authoritative record of who exists and which narrative
//! threads are open, with every change dated to an episode so later context
//! assembly can filter out facts an episode should not yet know.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    ContinuityStore                        │
//! │                                                           │
//! │  ┌───────────────────┐     ┌───────────────────────────┐  │
//! │  │ Character table   │     │ Plot table + id counter   │  │
//! │  │ (append-only      │     │ (append-only              │  │
//! │  │  state_history)   │     │  status_history)          │  │
//! │  └───────────────────┘     └───────────────────────────┘  │
//! │                                                           │
//! │  every mutation → RecordStore (whole-file replace)        │
//! └───────────────────────────────────────────────────────────┘
//! ```

mod character;
mod plot;
mod store;

pub use character::{Character, StateChange};
pub use plot::{PlotId, PlotPoint, StatusChange};
pub use store::{ContinuityStore, PersistFailurePolicy, StoreError};
