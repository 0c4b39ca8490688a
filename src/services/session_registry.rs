/// Session Registry
///
/// Latest-snapshot channels, one per registered exercise plus one for
/// auto-detect. Streams publish whole snapshots with `send_replace`; the
/// feedback endpoints read a clone of the latest value, so a reader never
/// observes a partially updated session.
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::models::session::FeedbackSnapshot;
use crate::services::exercise_classifier::AutoSnapshot;
use crate::services::rule_catalog::RuleCatalog;

pub type SnapshotPublisher<T> = Arc<watch::Sender<T>>;

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    exercises: BTreeMap<String, SnapshotPublisher<FeedbackSnapshot>>,
    auto: SnapshotPublisher<AutoSnapshot>,
}

impl SessionRegistry {
    /// One channel per exercise in the catalog, each holding its initial snapshot
    pub fn new(catalog: &RuleCatalog) -> Self {
        let exercises = catalog
            .exercises()
            .iter()
            .map(|table| {
                let (tx, _rx) = watch::channel(FeedbackSnapshot::initial(&table.id));
                (table.id.clone(), Arc::new(tx))
            })
            .collect();
        let (auto, _rx) = watch::channel(AutoSnapshot::initial());

        Self {
            exercises,
            auto: Arc::new(auto),
        }
    }

    /// Publisher for a registered exercise
    pub fn exercise(&self, id: &str) -> Option<SnapshotPublisher<FeedbackSnapshot>> {
        self.exercises.get(id).cloned()
    }

    /// Latest published snapshot of a registered exercise
    pub fn latest(&self, id: &str) -> Option<FeedbackSnapshot> {
        self.exercises.get(id).map(|tx| tx.borrow().clone())
    }

    pub fn auto(&self) -> SnapshotPublisher<AutoSnapshot> {
        self.auto.clone()
    }

    pub fn latest_auto(&self) -> AutoSnapshot {
        self.auto.borrow().clone()
    }

    pub fn exercise_ids(&self) -> impl Iterator<Item = &str> {
        self.exercises.keys().map(String::as_str)
    }
}
