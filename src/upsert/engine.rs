//! Upsert engine: resolves stems, submits plans, interprets outcomes

use super::plan::{
    create_transaction, delete_transaction, update_transaction, Resolution, CREATE_LABEL,
    RECIPE_BLANK, UPDATE_LABEL,
};
use super::{UpsertError, UpsertResult};
use crate::graph::{NodeId, TermStemmer};
use crate::recipe::Recipe;
use crate::storage::GraphStore;
use std::sync::Arc;
use tracing::{debug, info};

/// What a save did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new recipe node was committed.
    Created { id: NodeId, fired: usize },
    /// An existing recipe's owned children were replaced.
    Updated { fired: usize },
}

/// What a delete did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// No recipe had that external ID.
    Absent,
}

/// Writes recipes into the graph with shared-node deduplication.
///
/// Calls are blocking; async callers should run them on a blocking thread.
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn GraphStore>,
    stemmer: TermStemmer,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn GraphStore>, stemmer: TermStemmer) -> Self {
        Self { store, stemmer }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn stemmer(&self) -> &TermStemmer {
        &self.stemmer
    }

    fn resolve(&self, recipe: &Recipe) -> UpsertResult<Resolution> {
        recipe.validate().map_err(UpsertError::Invalid)?;
        Resolution::resolve(recipe, &self.stemmer)
    }

    /// Create a recipe that is believed not to exist.
    ///
    /// Fails with [`UpsertError::DuplicateIdentity`] if the external ID
    /// was taken by the time the transaction ran.
    pub fn create(&self, recipe: &Recipe) -> UpsertResult<SaveOutcome> {
        let resolution = self.resolve(recipe)?;
        let txn = create_transaction(recipe, &resolution)?;
        let outcome = match self.store.execute(&txn) {
            Ok(outcome) => outcome,
            // another writer committed the same external ID first
            Err(e) if e.is_conflict() && self.store.recipe_exists(&recipe.external_id)? => {
                debug!(external_id = %recipe.external_id, error = %e, "create conflicted");
                return Err(UpsertError::DuplicateIdentity(recipe.external_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let id = outcome
            .created_id(RECIPE_BLANK)
            .cloned()
            .ok_or_else(|| UpsertError::DuplicateIdentity(recipe.external_id.clone()))?;
        debug!(
            external_id = %recipe.external_id,
            fired = ?outcome.fired,
            "{}", CREATE_LABEL
        );
        info!(
            external_id = %recipe.external_id,
            recipe_id = %id,
            ingredients = recipe.ingredients.len(),
            tags = resolution.tags.len(),
            "recipe created"
        );
        Ok(SaveOutcome::Created {
            id,
            fired: outcome.fired.len(),
        })
    }

    /// Replace an existing recipe's scalars and owned children.
    ///
    /// Returns `None` if the recipe vanished before the transaction ran.
    pub fn update(&self, recipe: &Recipe) -> UpsertResult<Option<SaveOutcome>> {
        let resolution = self.resolve(recipe)?;
        let txn = update_transaction(recipe, &resolution)?;
        let outcome = self.store.execute(&txn)?;

        if !outcome.fired.iter().any(|label| label == UPDATE_LABEL) {
            return Ok(None);
        }
        info!(
            external_id = %recipe.external_id,
            ingredients = recipe.ingredients.len(),
            tags = resolution.tags.len(),
            "recipe updated"
        );
        Ok(Some(SaveOutcome::Updated {
            fired: outcome.fired.len(),
        }))
    }

    /// Create or update depending on whether the external ID is known.
    pub fn save(&self, recipe: &Recipe) -> UpsertResult<SaveOutcome> {
        if self.store.recipe_exists(&recipe.external_id)? {
            if let Some(outcome) = self.update(recipe)? {
                return Ok(outcome);
            }
            debug!(external_id = %recipe.external_id, "recipe vanished before update, creating");
        }
        self.create(recipe)
    }

    /// Delete a recipe and its owned children. Shared nodes stay.
    pub fn delete(&self, external_id: &str) -> UpsertResult<DeleteOutcome> {
        if external_id.trim().is_empty() {
            return Err(UpsertError::Invalid("empty external ID".to_string()));
        }
        let outcome = self.store.execute(&delete_transaction(external_id))?;
        if outcome.is_noop() {
            debug!(external_id, "delete of unknown recipe ignored");
            return Ok(DeleteOutcome::Absent);
        }
        info!(external_id, fired = ?outcome.fired, "recipe deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// The recipe as the store now holds it.
    pub fn canonical(&self, external_id: &str) -> UpsertResult<Option<Recipe>> {
        Ok(self.store.load_recipe(external_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Language, NodeKind};
    use crate::recipe::Ingredient;
    use crate::storage::{OpenStore, SharedNode, SqliteStore, StorageError, StorageResult};
    use crate::storage::{Transaction, TxnOutcome};

    fn create_test_engine() -> (UpsertEngine, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = UpsertEngine::new(store.clone(), TermStemmer::new(Language::Italian));
        (engine, store)
    }

    /// Reads from the inner store; every write loses to a concurrent writer.
    struct ContendedStore(Arc<SqliteStore>);

    impl GraphStore for ContendedStore {
        fn execute(&self, _txn: &Transaction) -> StorageResult<TxnOutcome> {
            Err(StorageError::Aborted("UNIQUE constraint failed: recipes.external_id".into()))
        }

        fn recipe_exists(&self, external_id: &str) -> StorageResult<bool> {
            self.0.recipe_exists(external_id)
        }

        fn load_recipe(&self, external_id: &str) -> StorageResult<Option<Recipe>> {
            self.0.load_recipe(external_id)
        }

        fn count(&self, kind: NodeKind) -> StorageResult<usize> {
            self.0.count(kind)
        }

        fn find_shared(&self, kind: NodeKind, stem: &str) -> StorageResult<Option<SharedNode>> {
            self.0.find_shared(kind, stem)
        }

        fn recipes_referencing(&self, node: &NodeId) -> StorageResult<Vec<String>> {
            self.0.recipes_referencing(node)
        }
    }

    fn pasta(xid: &str) -> Recipe {
        Recipe::new(xid, "Pasta al pomodoro")
            .with_ingredient(Ingredient::new("pomodori"))
            .with_ingredient(Ingredient::new("basilico"))
            .with_step("Soffritto", "Scaldare l'olio")
            .with_step("Sugo", "Aggiungere i pomodori")
            .with_tag("primi")
    }

    #[test]
    fn test_create_then_duplicate_create() {
        let (engine, store) = create_test_engine();
        assert!(matches!(
            engine.create(&pasta("r1")).unwrap(),
            SaveOutcome::Created { .. }
        ));

        let err = engine.create(&pasta("r1")).unwrap_err();
        assert!(matches!(err, UpsertError::DuplicateIdentity(ref id) if id == "r1"));
        assert_eq!(store.count(NodeKind::Recipe).unwrap(), 1);
        assert_eq!(store.count(NodeKind::Ingredient).unwrap(), 2);
    }

    #[test]
    fn test_save_twice_updates_in_place() {
        let (engine, store) = create_test_engine();
        engine.save(&pasta("r1")).unwrap();
        assert!(matches!(
            engine.save(&pasta("r1")).unwrap(),
            SaveOutcome::Updated { .. }
        ));

        assert_eq!(store.count(NodeKind::Recipe).unwrap(), 1);
        assert_eq!(store.count(NodeKind::Ingredient).unwrap(), 2);
        assert_eq!(store.count(NodeKind::Step).unwrap(), 2);
        assert_eq!(store.count(NodeKind::Food).unwrap(), 2);
        assert_eq!(store.count(NodeKind::Tag).unwrap(), 1);
    }

    #[test]
    fn test_update_of_missing_recipe_returns_none() {
        let (engine, _) = create_test_engine();
        assert_eq!(engine.update(&pasta("ghost")).unwrap(), None);
    }

    #[test]
    fn test_update_replaces_owned_children_and_scalars() {
        let (engine, _) = create_test_engine();
        engine.save(&pasta("r1")).unwrap();

        let mut revised = Recipe::new("r1", "Pasta al sugo")
            .with_ingredient(Ingredient::new("pomodoro"))
            .with_step("Tutto", "Cuocere insieme")
            .with_tag("veloce");
        revised.servings = Some(2);
        engine.save(&revised).unwrap();

        let loaded = engine.canonical("r1").unwrap().unwrap();
        assert_eq!(loaded.title, "Pasta al sugo");
        assert_eq!(loaded.servings, Some(2));
        assert_eq!(loaded.ingredient_names().collect::<Vec<_>>(), vec!["pomodoro"]);
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.tag_names().collect::<Vec<_>>(), vec!["veloce"]);
        // first writer's term is kept on the shared node
        assert_eq!(loaded.ingredients[0].food.as_ref().unwrap().term, "pomodori");
    }

    #[test]
    fn test_steps_and_ingredients_keep_order() {
        let (engine, _) = create_test_engine();
        engine.save(&pasta("r1")).unwrap();
        let loaded = engine.canonical("r1").unwrap().unwrap();
        assert_eq!(loaded.steps[0].heading, "Soffritto");
        assert_eq!(loaded.steps[1].heading, "Sugo");
        assert_eq!(
            loaded.ingredient_names().collect::<Vec<_>>(),
            vec!["pomodori", "basilico"]
        );
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let (engine, _) = create_test_engine();
        assert_eq!(engine.delete("nope").unwrap(), DeleteOutcome::Absent);
    }

    #[test]
    fn test_delete_keeps_shared_nodes() {
        let (engine, store) = create_test_engine();
        engine.save(&pasta("r1")).unwrap();
        assert_eq!(engine.delete("r1").unwrap(), DeleteOutcome::Deleted);

        assert_eq!(store.count(NodeKind::Recipe).unwrap(), 0);
        assert_eq!(store.count(NodeKind::Ingredient).unwrap(), 0);
        assert_eq!(store.count(NodeKind::Step).unwrap(), 0);
        assert_eq!(store.count(NodeKind::Food).unwrap(), 2);
        assert_eq!(store.count(NodeKind::Tag).unwrap(), 1);
    }

    #[test]
    fn test_invalid_recipe_is_rejected_before_writing() {
        let (engine, store) = create_test_engine();
        let err = engine.save(&Recipe::new("", "no id")).unwrap_err();
        assert!(matches!(err, UpsertError::Invalid(_)));
        assert_eq!(store.count(NodeKind::Recipe).unwrap(), 0);
    }

    #[test]
    fn test_conflicting_create_reports_duplicate_when_winner_exists() {
        let (engine, store) = create_test_engine();
        engine.create(&pasta("r1")).unwrap();
        let contended = UpsertEngine::new(
            Arc::new(ContendedStore(store)),
            TermStemmer::new(Language::Italian),
        );

        let err = contended.create(&pasta("r1")).unwrap_err();
        assert!(matches!(err, UpsertError::DuplicateIdentity(ref id) if id == "r1"));

        // no winner: the conflict is reported as it is
        let err = contended.create(&pasta("r2")).unwrap_err();
        assert!(matches!(err, UpsertError::Storage(StorageError::Aborted(_))));
    }
}
