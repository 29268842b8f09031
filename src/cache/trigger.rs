//! Publishing engine.
//!
//! Entry point for change events: collects the affected entities for an
//! action and writes their URLs into the durable queue. Rebuilding happens
//! later in the queue worker, so a content edit never waits on rendering.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument};

use crate::application::repos::{QueueRepo, RepoError};
use crate::domain::context::{Action, ActionContext, ActionExtensions};
use crate::domain::entities::EntityHandle;

use super::planner::{ChangeSet, FlushPlan};

pub(crate) const METRIC_URLS_ENQUEUED: &str = "staticpub_urls_enqueued_total";

/// Change collector plus queue writer.
///
/// # Usage
///
/// ```ignore
/// // Site-tree page published:
/// engine.after_publish(&page, ActionExtensions::default()).await?;
///
/// // Page about to be unpublished; relations are read while it still exists:
/// let pending = engine.before_unpublish(&page, ActionExtensions::default());
/// content.unpublish(page.id()).await?;
/// pending.flush().await?;
/// ```
#[derive(Clone)]
pub struct PublishingEngine {
    queue: Arc<dyn QueueRepo>,
}

/// Changes collected before a destructive action, flushed once it completes.
#[must_use = "pending changes are lost unless flushed"]
pub struct PendingChanges {
    queue: Arc<dyn QueueRepo>,
    changes: ChangeSet,
}

impl PendingChanges {
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub async fn flush(self) -> Result<FlushPlan, RepoError> {
        flush_changes(self.queue.as_ref(), &self.changes).await
    }
}

impl PublishingEngine {
    pub fn new(queue: Arc<dyn QueueRepo>) -> Self {
        Self { queue }
    }

    /// Collect the one-hop change set for `root` under `context`.
    pub fn collect(&self, root: &EntityHandle, context: &ActionContext) -> ChangeSet {
        let changes = ChangeSet::collect(root, context);
        debug!(
            target: "staticpub::publish",
            entity = %root.id(),
            action = %context.action(),
            update = ?changes.update,
            delete = ?changes.delete,
            "Collected changes"
        );
        changes
    }

    /// Enqueue every URL owned by the collected entities.
    pub async fn flush(&self, changes: &ChangeSet) -> Result<FlushPlan, RepoError> {
        flush_changes(self.queue.as_ref(), changes).await
    }

    /// Collect and flush in one step.
    #[instrument(skip_all, fields(entity = %root.id(), action = %context.action()))]
    pub async fn propagate(
        &self,
        root: &EntityHandle,
        context: &ActionContext,
    ) -> Result<FlushPlan, RepoError> {
        let changes = self.collect(root, context);
        self.flush(&changes).await
    }

    /// A site-tree page was published.
    pub async fn after_publish(
        &self,
        entity: &EntityHandle,
        extensions: ActionExtensions,
    ) -> Result<FlushPlan, RepoError> {
        let context = ActionContext::with_extensions(Action::Publish, extensions);
        self.propagate(entity, &context).await
    }

    /// A site-tree page is about to be unpublished.
    pub fn before_unpublish(
        &self,
        entity: &EntityHandle,
        extensions: ActionExtensions,
    ) -> PendingChanges {
        let context = ActionContext::with_extensions(Action::Unpublish, extensions);
        self.pending(entity, &context)
    }

    /// A data record was written. Records that report themselves as not
    /// publishable are unpublished instead.
    pub async fn after_write(
        &self,
        record: &EntityHandle,
        extensions: ActionExtensions,
    ) -> Result<FlushPlan, RepoError> {
        let mut context = ActionContext::with_extensions(Action::Publish, extensions);
        if !record.is_publishable() {
            context = context.with_action(Action::Unpublish);
        }
        self.propagate(record, &context).await
    }

    /// A data record is about to be deleted.
    pub fn before_delete(
        &self,
        record: &EntityHandle,
        extensions: ActionExtensions,
    ) -> PendingChanges {
        let context = ActionContext::with_extensions(Action::Unpublish, extensions);
        self.pending(record, &context)
    }

    fn pending(&self, entity: &EntityHandle, context: &ActionContext) -> PendingChanges {
        PendingChanges {
            queue: self.queue.clone(),
            changes: self.collect(entity, context),
        }
    }
}

async fn flush_changes(queue: &dyn QueueRepo, changes: &ChangeSet) -> Result<FlushPlan, RepoError> {
    let plan = FlushPlan::from_changes(changes);
    if plan.is_empty() {
        debug!(target: "staticpub::publish", "Nothing to enqueue");
        return Ok(plan);
    }

    for (url, planned) in plan.iter() {
        queue.enqueue(url, planned.priority, planned.intent).await?;
        counter!(METRIC_URLS_ENQUEUED, "intent" => planned.intent.as_str()).increment(1);
    }

    info!(target: "staticpub::publish", plan = %plan, "Enqueued changed urls");
    Ok(plan)
}
