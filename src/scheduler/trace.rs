//! Execution trace for reproducible cooperative runs.

use super::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered record of what the scheduler did, stamped with a logical clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    events: Vec<TraceEvent>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Record an event
    pub fn record(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Tasks in the order they were resumed.
    pub fn resumption_order(&self) -> Vec<TaskId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Resumed { task_id, .. } => Some(*task_id),
                _ => None,
            })
            .collect()
    }

    /// Check that every task still incomplete at the start of a window of
    /// `incomplete` resumptions is resumed inside that window.
    pub fn is_round_robin(&self) -> bool {
        let mut finished: HashSet<TaskId> = HashSet::new();
        let mut resumptions: Vec<(TaskId, HashSet<TaskId>)> = Vec::new();
        let mut known: Vec<TaskId> = Vec::new();

        // incomplete set as it stood before each resumption
        for event in &self.events {
            match event {
                TraceEvent::Resumed { task_id, .. } => {
                    if !known.contains(task_id) {
                        known.push(*task_id);
                    }
                    resumptions.push((*task_id, finished.clone()));
                }
                TraceEvent::Completed { task_id, .. }
                | TraceEvent::Failed { task_id, .. }
                | TraceEvent::Cancelled { task_id, .. } => {
                    finished.insert(*task_id);
                }
                TraceEvent::Yielded { .. } => {}
            }
        }

        for start in 0..resumptions.len() {
            let done_before = &resumptions[start].1;
            let incomplete: Vec<TaskId> = known
                .iter()
                .copied()
                .filter(|id| !done_before.contains(id))
                .collect();
            let end = start + incomplete.len();
            if end > resumptions.len() {
                break;
            }
            let window: HashSet<TaskId> =
                resumptions[start..end].iter().map(|(id, _)| *id).collect();
            // a cancelled task leaves the list without another resumption
            let all_seen = incomplete.iter().all(|id| {
                window.contains(id) || resumptions[start..end].iter().any(|(_, d)| d.contains(id))
            });
            if !all_seen {
                return false;
            }
        }

        true
    }

    /// Save trace to JSON file
    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load trace from JSON file
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Events that can be recorded in an execution trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    Resumed {
        task_id: TaskId,
        timestamp: u64,
    },
    Yielded {
        task_id: TaskId,
        timestamp: u64,
    },
    Completed {
        task_id: TaskId,
        timestamp: u64,
    },
    Failed {
        task_id: TaskId,
        timestamp: u64,
        message: String,
    },
    Cancelled {
        task_id: TaskId,
        timestamp: u64,
    },
}
