//! Typed job filters used by claims and bulk updates.

use crate::job::{JobId, JobRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Conjunction of optional conditions over a [`JobRecord`].
///
/// An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Restrict to these ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeSet<JobId>>,

    /// Restrict to these job names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<BTreeSet<String>>,

    /// Minimum priority, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<i32>,

    /// Restrict to jobs last claimed by this worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Equality conditions on top-level `params` keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<(String, Value)>,
}

impl JobFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a single id.
    pub fn id(self, id: JobId) -> Self {
        self.ids([id])
    }

    /// Restricts to a set of ids.
    pub fn ids(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.ids = Some(intersect(self.ids.take(), ids.into_iter().collect()));
        self
    }

    /// Restricts to a single job name.
    pub fn name(self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        self.names([name])
    }

    /// Restricts to a set of job names.
    pub fn names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        let names = names.into_iter().map(Into::into).collect();
        self.names = Some(intersect(self.names.take(), names));
        self
    }

    /// Restricts to jobs at or above `priority`.
    pub fn min_priority(mut self, priority: i32) -> Self {
        self.min_priority = Some(self.min_priority.map_or(priority, |p| p.max(priority)));
        self
    }

    /// Restricts to jobs claimed by `worker`.
    pub fn worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Requires `params[key] == value`.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Conjoins two filters.
    pub fn and(mut self, other: JobFilter) -> Self {
        if let Some(ids) = other.ids {
            self = self.ids(ids);
        }
        if let Some(names) = other.names {
            self = self.names(names);
        }
        if let Some(priority) = other.min_priority {
            self = self.min_priority(priority);
        }
        if let Some(worker) = other.worker {
            // Two different worker constraints can never both hold.
            if self.worker.as_ref().is_some_and(|w| *w != worker) {
                self.ids = Some(BTreeSet::new());
            }
            self.worker = Some(worker);
        }
        self.params.extend(other.params);
        self
    }

    /// Returns true if `record` satisfies every condition.
    pub fn matches(&self, record: &JobRecord) -> bool {
        if let Some(ids) = &self.ids {
            if !record.id.is_some_and(|id| ids.contains(&id)) {
                return false;
            }
        }
        if let Some(names) = &self.names {
            if !names.contains(&record.name) {
                return false;
            }
        }
        if let Some(min) = self.min_priority {
            if record.priority < min {
                return false;
            }
        }
        if let Some(worker) = &self.worker {
            if record.worker.as_ref() != Some(worker) {
                return false;
            }
        }
        self.params
            .iter()
            .all(|(key, expected)| record.params.get(key) == Some(expected))
    }
}

fn intersect<T: Ord>(current: Option<BTreeSet<T>>, incoming: BTreeSet<T>) -> BTreeSet<T> {
    match current {
        Some(current) => current.into_iter().filter(|v| incoming.contains(v)).collect(),
        None => incoming,
    }
}
