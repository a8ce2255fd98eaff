//! Indexing pipeline
//!
//! Single write path for stream events:
//! 1. Parse the payload for the message's stream
//! 2. Skip saves whose exact payload was already applied
//! 3. Upsert into the graph (create or update)
//! 4. Reload the canonical recipe and index it
//! 5. Record the save as applied
//!
//! Deletes remove the recipe from the graph, the index and the applied log.
//! Steps 2-5 are blocking and run together on a blocking thread; the whole
//! step is retried in place while failures are transient. A failure after
//! the graph commit is reported as incomplete and never acknowledged.

use super::events::{EventRoutes, RecipeEvent};
use super::{ErrorKind, PipelineError, PipelineResult};
use crate::fulltext::FulltextIndex;
use crate::gateway::{Disposition, MessageHandler};
use crate::guard::{AppliedLog, IdempotencyGuard};
use crate::recipe::Recipe;
use crate::retry::{retry, RetryPolicy};
use crate::stream::Message;
use crate::upsert::{DeleteOutcome, SaveOutcome, UpsertEngine};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Saved(SaveOutcome),
    /// The identical payload was applied before.
    Skipped,
    /// The recipe was deleted between upsert and reload; nothing to index.
    Superseded,
    Deleted(DeleteOutcome),
}

/// Handles saved/deleted recipe messages.
#[derive(Clone)]
pub struct IndexingPipeline {
    engine: UpsertEngine,
    index: Arc<dyn FulltextIndex>,
    guard: IdempotencyGuard<dyn AppliedLog>,
    routes: EventRoutes,
    retry: RetryPolicy,
}

impl IndexingPipeline {
    pub fn new(
        engine: UpsertEngine,
        index: Arc<dyn FulltextIndex>,
        applied: Arc<dyn AppliedLog>,
        routes: EventRoutes,
    ) -> Self {
        Self {
            engine,
            index,
            guard: IdempotencyGuard::new(applied),
            routes,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the in-place retry policy for retryable failures.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn routes(&self) -> &EventRoutes {
        &self.routes
    }

    /// Parse a message into an event.
    pub fn parse(&self, message: &Message) -> PipelineResult<RecipeEvent> {
        let kind = self.routes.kind_of(&message.stream).ok_or_else(|| {
            PipelineError::Malformed(format!("no route for stream {}", message.stream))
        })?;
        RecipeEvent::parse(kind, &message.payload).map_err(PipelineError::Malformed)
    }

    /// Apply one event, retrying in place while the failure is retryable.
    pub async fn process(&self, event: RecipeEvent) -> PipelineResult<Applied> {
        let event = Arc::new(event);
        retry(&self.retry, "apply event", PipelineError::is_retryable, || {
            let this = self.clone();
            let event = event.clone();
            async move {
                tokio::task::spawn_blocking(move || this.apply(&event))
                    .await
                    .map_err(|e| PipelineError::Task(e.to_string()))?
            }
        })
        .await
    }

    /// Apply one event synchronously.
    pub fn apply(&self, event: &RecipeEvent) -> PipelineResult<Applied> {
        match event {
            RecipeEvent::Saved(recipe) => self.apply_saved(recipe),
            RecipeEvent::Deleted(external_id) => self.apply_deleted(external_id),
        }
    }

    fn apply_saved(&self, recipe: &Recipe) -> PipelineResult<Applied> {
        if self.guard.already_applied(recipe)? {
            debug!(recipe = %recipe.external_id, "already applied, skipping");
            return Ok(Applied::Skipped);
        }

        let outcome = self.engine.save(recipe)?;
        let indexed = self
            .index_canonical(&recipe.external_id)
            .map_err(|e| PipelineError::incomplete(&recipe.external_id, e))?;
        if !indexed {
            return Ok(Applied::Superseded);
        }
        // a missing entry only costs a redundant reapply
        if let Err(e) = self.guard.mark_applied(recipe) {
            warn!(recipe = %recipe.external_id, error = %e, "could not record applied event");
        }
        Ok(Applied::Saved(outcome))
    }

    /// Index what the graph holds, not what the event carried. False when
    /// the recipe was deleted in between.
    fn index_canonical(&self, external_id: &str) -> PipelineResult<bool> {
        let Some(canonical) = self.engine.canonical(external_id)? else {
            debug!(recipe = %external_id, "deleted before indexing");
            return Ok(false);
        };
        self.index.index_recipe(&canonical)?;
        Ok(true)
    }

    fn apply_deleted(&self, external_id: &str) -> PipelineResult<Applied> {
        let outcome = self.engine.delete(external_id)?;
        // also when absent: an earlier attempt may have stopped after the graph delete
        self.index
            .delete_recipe(external_id)
            .map_err(PipelineError::from)
            .and_then(|()| self.guard.forget(external_id).map_err(PipelineError::from))
            .map_err(|e| PipelineError::incomplete(external_id, e))?;
        Ok(Applied::Deleted(outcome))
    }
}

/// How the gateway should treat a message whose event failed.
///
/// Nothing is acknowledged while the index may be behind the graph.
fn disposition_for(err: &PipelineError) -> Disposition {
    match err.kind() {
        ErrorKind::Malformed | ErrorKind::DuplicateIdentity => Disposition::Ack,
        _ if err.is_incomplete() => Disposition::Halt,
        ErrorKind::TransactionAborted => Disposition::Retry,
        ErrorKind::Transient => Disposition::Halt,
    }
}

#[async_trait]
impl MessageHandler for IndexingPipeline {
    async fn handle(&self, message: &Message) -> Disposition {
        let event = match self.parse(message) {
            Ok(event) => event,
            Err(e) => {
                warn!(stream = %message.stream, id = %message.id, error = %e, "discarding malformed message");
                return Disposition::Ack;
            }
        };
        let recipe = event.external_id().to_string();

        let err = match self.process(event).await {
            Ok(applied) => {
                info!(stream = %message.stream, id = %message.id, recipe = %recipe, ?applied, "event applied");
                return Disposition::Ack;
            }
            Err(e) => e,
        };
        let disposition = disposition_for(&err);
        match (err.kind(), disposition) {
            (ErrorKind::Malformed, _) => {
                warn!(id = %message.id, recipe = %recipe, error = %err, "discarding invalid recipe")
            }
            (ErrorKind::DuplicateIdentity, _) => {
                warn!(id = %message.id, recipe = %recipe, "lost create race, keeping winner")
            }
            (_, Disposition::Retry) => {
                warn!(id = %message.id, recipe = %recipe, error = %err, "transaction aborted, leaving pending")
            }
            _ => error!(id = %message.id, recipe = %recipe, error = %err, "event failed, stopping"),
        }
        disposition
    }
}
