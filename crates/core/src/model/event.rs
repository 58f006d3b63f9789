use serde::{Deserialize, Serialize};

use crate::model::call_tree::NodeId;

/// A named interval overlaid on the profile timeline, captured alongside
/// the samples (GC pause, network request, marker region). Passive data:
/// the profile stores and returns these, nothing interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingEvent {
    pub name: String,
    pub detail: Option<String>,
    /// Start offset in µs from profile start.
    pub start: f64,
    /// End offset in µs from profile start.
    pub end: f64,
    /// Bottom node of a secondary stack captured with the event, if any.
    pub stack: Option<NodeId>,
    /// Optional color hint for renderers.
    pub color: Option<String>,
}

impl ProfilingEvent {
    pub fn new(name: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            detail: None,
            start,
            end,
            stack: None,
            color: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}
