// In-flight Task Board
//
// Tokio tasks cannot be enumerated from outside, so the engine keeps its
// own board of admitted requests, keyed by correlation id. Entries exist
// exactly as long as the admission slot is held.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// One admitted call or batch.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub correlation_id: String,
    /// Epoch seconds at admission.
    pub started: i64,
    /// Absolute deadline, epoch seconds.
    pub deadline: i64,
}

/// Introspection row returned by `rpc.tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub correlation_id: String,
    pub time_elapsed: i64,
    pub time_left: i64,
}

#[derive(Default)]
pub struct TaskBoard {
    entries: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: TaskEntry) {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.correlation_id.clone(), entry);
    }

    pub fn complete(&self, correlation_id: &str) {
        self.entries.lock().unwrap().remove(correlation_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elapsed/remaining view of every in-flight task, sorted by
    /// correlation id for stable output.
    pub fn snapshot(&self, now: i64) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .map(|entry| TaskInfo {
                correlation_id: entry.correlation_id.clone(),
                time_elapsed: now - entry.started,
                time_left: entry.deadline - now,
            })
            .collect();
        infos.sort_by(|a, b| a.correlation_id.cmp(&b.correlation_id));
        infos
    }
}
