//! Execution trace: an ordered log of step outcomes.

use crate::types::StepResult;
use flowscript_resolve::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One recorded step outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Arena id of the node that produced this entry.
    pub node: NodeId,
    /// Flow the node was defined in.
    pub flow: String,
    /// Human-readable step label.
    pub label: String,
    pub result: StepResult,
}

/// Ordered log of everything that ran in one execution: what ran, in what
/// order, and why it failed. Entries are appended in settlement order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    /// Step labels in settlement order.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    /// First entry recorded for a given label.
    pub fn get(&self, label: &str) -> Option<&TraceEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    /// All entries recorded for a given label.
    pub fn all(&self, label: &str) -> Vec<&TraceEntry> {
        self.entries.iter().filter(|e| e.label == label).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append-only trace collector shared by all tasks of one execution.
///
/// The engine is single-writer per entry; the mutex linearizes appends from
/// concurrently settling children.
#[derive(Debug, Default)]
pub(crate) struct TraceSink {
    entries: Mutex<Vec<TraceEntry>>,
}

impl TraceSink {
    pub fn record(&self, entry: TraceEntry) {
        self.entries.lock().push(entry);
    }

    pub fn snapshot(&self) -> ExecutionTrace {
        ExecutionTrace {
            entries: self.entries.lock().clone(),
        }
    }
}
