//! Change collection and flush planning.
//!
//! Turns a root entity plus an action into the entity sets to refresh and
//! tear down, then merges their owned URLs into one queue write plan.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::context::ActionContext;
use crate::domain::entities::{EntityHandle, EntitySet, Priority};
use crate::domain::types::QueueIntent;

/// Entities affected by one change, one hop from the root.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub update: EntitySet,
    pub delete: EntitySet,
}

impl ChangeSet {
    /// Ask the root entity which entities the action touches.
    ///
    /// Entities returned by the root are not expanded again.
    pub fn collect(root: &EntityHandle, context: &ActionContext) -> Self {
        Self {
            update: root.clone().objects_to_update(context),
            delete: root.clone().objects_to_delete(context),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.delete.is_empty()
    }

    /// Merge another change set into this one.
    pub fn merge(&mut self, other: ChangeSet) {
        self.update.extend(other.update);
        self.delete.extend(other.delete);
    }
}

/// One queue write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedUrl {
    pub priority: Priority,
    pub intent: QueueIntent,
}

/// URLs to enqueue for a change set, keyed by URL.
///
/// A URL owned by both an updated and a deleted entity is planned as a
/// delete. Among duplicates with the same intent the most urgent priority is kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushPlan {
    entries: BTreeMap<String, PlannedUrl>,
}

impl fmt::Display for FlushPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlushPlan {{ update: {}, delete: {} }}",
            self.count(QueueIntent::Update),
            self.count(QueueIntent::Delete)
        )
    }
}

impl FlushPlan {
    pub fn from_changes(changes: &ChangeSet) -> Self {
        let mut plan = Self::default();
        for entity in changes.update.iter() {
            for (url, priority) in entity.urls_to_cache() {
                plan.add(url, priority, QueueIntent::Update);
            }
        }
        for entity in changes.delete.iter() {
            for (url, priority) in entity.urls_to_cache() {
                plan.add(url, priority, QueueIntent::Delete);
            }
        }
        plan
    }

    fn add(&mut self, url: String, priority: Priority, intent: QueueIntent) {
        let planned = PlannedUrl { priority, intent };
        match self.entries.get_mut(&url) {
            None => {
                self.entries.insert(url, planned);
            }
            Some(existing) if existing.intent == intent => {
                existing.priority = existing.priority.min(priority);
            }
            Some(existing) => {
                if intent == QueueIntent::Delete {
                    *existing = planned;
                }
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<PlannedUrl> {
        self.entries.get(url).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PlannedUrl)> {
        self.entries.iter().map(|(url, planned)| (url.as_str(), *planned))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, intent: QueueIntent) -> usize {
        self.entries
            .values()
            .filter(|planned| planned.intent == intent)
            .count()
    }
}
