//! Transaction plans for recipe create, update and delete
//!
//! Every sub-entity gets its own pair of mutually exclusive variants keyed
//! on whether its shared node exists, so a recipe with I ingredients and T
//! distinct tags yields `2·(I+T) + 1` mutations. All variants of a plan are
//! additionally conditioned on the recipe anchor (`r` absent for create,
//! present for update); when the anchor predicate fails nothing fires.

use super::{UpsertError, UpsertResult};
use crate::graph::{relationship, NodeKind, TermStemmer};
use crate::recipe::Recipe;
use crate::storage::{
    Binding, Condition, IngredientRecord, Mutation, NodeRef, Op, Presence, RecipeRecord,
    SharedRecord, StepRecord, Transaction,
};

/// Variable bound to the recipe being written.
pub const RECIPE_VAR: &str = "r";
/// Blank node name of a newly created recipe.
pub const RECIPE_BLANK: &str = "recipe";

pub const CREATE_LABEL: &str = "recipe:create";
pub const UPDATE_LABEL: &str = "recipe:update";
pub const DELETE_LABEL: &str = "recipe:delete";

/// A term and the stem it is deduplicated under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedTerm {
    pub term: String,
    pub stem: String,
}

/// Stems computed for a recipe before planning.
///
/// `foods` and `tags` hold one entry per distinct stem, in first-seen
/// order; `ingredient_food[i]` is the index into `foods` for ingredient `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub ingredient_food: Vec<usize>,
    pub foods: Vec<SharedTerm>,
    pub tags: Vec<SharedTerm>,
}

impl Resolution {
    pub fn resolve(recipe: &Recipe, stemmer: &TermStemmer) -> UpsertResult<Self> {
        let mut foods: Vec<SharedTerm> = Vec::new();
        let mut ingredient_food = Vec::with_capacity(recipe.ingredients.len());
        for (i, ingredient) in recipe.ingredients.iter().enumerate() {
            let stem = stemmer.stem(&ingredient.name);
            if stem.is_empty() {
                return Err(UpsertError::Invalid(format!(
                    "ingredient #{} '{}' has no stemmable term",
                    i, ingredient.name
                )));
            }
            let idx = match foods.iter().position(|f| f.stem == stem) {
                Some(idx) => idx,
                None => {
                    foods.push(SharedTerm {
                        term: ingredient.name.trim().to_string(),
                        stem,
                    });
                    foods.len() - 1
                }
            };
            ingredient_food.push(idx);
        }

        let mut tags: Vec<SharedTerm> = Vec::new();
        for (i, tag) in recipe.tags.iter().enumerate() {
            let stem = stemmer.stem(&tag.name);
            if stem.is_empty() {
                return Err(UpsertError::Invalid(format!(
                    "tag #{} '{}' has no stemmable term",
                    i, tag.name
                )));
            }
            if !tags.iter().any(|t| t.stem == stem) {
                tags.push(SharedTerm {
                    term: tag.name.trim().to_string(),
                    stem,
                });
            }
        }

        Ok(Self {
            ingredient_food,
            foods,
            tags,
        })
    }
}

fn food_var(k: usize) -> String {
    format!("f{}", k)
}

fn tag_var(k: usize) -> String {
    format!("t{}", k)
}

/// Recipe lookup plus one binding per distinct stem.
fn bind_all(txn: &mut Transaction, external_id: &str, resolution: &Resolution) {
    txn.bind(RECIPE_VAR, Binding::RecipeByExternalId(external_id.to_string()));
    for (k, food) in resolution.foods.iter().enumerate() {
        txn.bind(food_var(k), Binding::FoodByStem(food.stem.clone()));
    }
    for (k, tag) in resolution.tags.iter().enumerate() {
        txn.bind(tag_var(k), Binding::TagByStem(tag.stem.clone()));
    }
}

/// Steps are always created fresh under the anchor.
fn push_steps(mutation: &mut Mutation, recipe: &Recipe, anchor: &NodeRef) -> UpsertResult<()> {
    for (j, step) in recipe.steps.iter().enumerate() {
        let blank = format!("step{}", j);
        mutation.ops.push(Op::CreateNode {
            blank: blank.clone(),
            data: StepRecord::from_domain(step).node()?,
        });
        mutation.ops.push(Op::link(
            anchor.clone(),
            relationship::STEPS,
            NodeRef::Blank(blank),
            Some(j),
        ));
    }
    Ok(())
}

/// Two variants per ingredient and two per tag, each conjoined with the
/// anchor predicate.
fn push_entity_variants(
    txn: &mut Transaction,
    recipe: &Recipe,
    resolution: &Resolution,
    anchor: &NodeRef,
    anchor_presence: Presence,
) -> UpsertResult<()> {
    for (i, ingredient) in recipe.ingredients.iter().enumerate() {
        let k = resolution.ingredient_food[i];
        let food = &resolution.foods[k];
        let var = food_var(k);
        let blank = format!("ingredient{}", i);
        let data = IngredientRecord::from_domain(ingredient).node()?;
        let owned = [
            Op::CreateNode {
                blank: blank.clone(),
                data,
            },
            Op::link(
                anchor.clone(),
                relationship::INGREDIENTS,
                NodeRef::blank(&blank),
                Some(i),
            ),
        ];

        let mut present = Mutation::new(
            format!("ingredient[{}]:food-present", i),
            Condition::when(RECIPE_VAR, anchor_presence).and(&var, Presence::Present),
        );
        present.ops.extend(owned.iter().cloned());
        present.ops.push(Op::link(
            NodeRef::blank(&blank),
            relationship::FOOD,
            NodeRef::Bound(var.clone()),
            None,
        ));
        txn.push(present);

        let food_blank = format!("food{}", k);
        let mut absent = Mutation::new(
            format!("ingredient[{}]:food-absent", i),
            Condition::when(RECIPE_VAR, anchor_presence).and(&var, Presence::Absent),
        );
        absent.ops.extend(owned);
        absent.ops.push(Op::CreateNode {
            blank: food_blank.clone(),
            data: SharedRecord::node(NodeKind::Food, &food.term, &food.stem)?,
        });
        absent.ops.push(Op::link(
            NodeRef::blank(&blank),
            relationship::FOOD,
            NodeRef::Blank(food_blank),
            None,
        ));
        txn.push(absent);
    }

    for (k, tag) in resolution.tags.iter().enumerate() {
        let var = tag_var(k);
        txn.push(
            Mutation::new(
                format!("tag[{}]:present", k),
                Condition::when(RECIPE_VAR, anchor_presence).and(&var, Presence::Present),
            )
            .with_op(Op::link(
                anchor.clone(),
                relationship::TAGS,
                NodeRef::Bound(var.clone()),
                Some(k),
            )),
        );

        let tag_blank = format!("tag{}", k);
        txn.push(
            Mutation::new(
                format!("tag[{}]:absent", k),
                Condition::when(RECIPE_VAR, anchor_presence).and(&var, Presence::Absent),
            )
            .with_op(Op::CreateNode {
                blank: tag_blank.clone(),
                data: SharedRecord::node(NodeKind::Tag, &tag.term, &tag.stem)?,
            })
            .with_op(Op::link(
                anchor.clone(),
                relationship::TAGS,
                NodeRef::Blank(tag_blank),
                Some(k),
            )),
        );
    }
    Ok(())
}

/// Create the recipe and link or create every shared node.
pub fn create_transaction(recipe: &Recipe, resolution: &Resolution) -> UpsertResult<Transaction> {
    let mut txn = Transaction::new();
    bind_all(&mut txn, &recipe.external_id, resolution);

    let anchor = NodeRef::blank(RECIPE_BLANK);
    let mut root = Mutation::new(CREATE_LABEL, Condition::when(RECIPE_VAR, Presence::Absent))
        .with_op(Op::CreateNode {
            blank: RECIPE_BLANK.to_string(),
            data: RecipeRecord::from_domain(recipe).node(&recipe.external_id)?,
        });
    push_steps(&mut root, recipe, &anchor)?;
    txn.push(root);

    push_entity_variants(&mut txn, recipe, resolution, &anchor, Presence::Absent)?;
    Ok(txn)
}

/// Replace owned children of an existing recipe and re-resolve shared
/// references. Shared nodes themselves are never touched.
pub fn update_transaction(recipe: &Recipe, resolution: &Resolution) -> UpsertResult<Transaction> {
    let mut txn = Transaction::new();
    bind_all(&mut txn, &recipe.external_id, resolution);

    let anchor = NodeRef::bound(RECIPE_VAR);
    let mut root = Mutation::new(UPDATE_LABEL, Condition::when(RECIPE_VAR, Presence::Present))
        .with_op(Op::DetachOwned {
            anchor: anchor.clone(),
            relationship: relationship::INGREDIENTS.to_string(),
        })
        .with_op(Op::DetachOwned {
            anchor: anchor.clone(),
            relationship: relationship::STEPS.to_string(),
        })
        .with_op(Op::Unlink {
            anchor: anchor.clone(),
            relationship: relationship::TAGS.to_string(),
        })
        .with_op(Op::UpdateNode {
            target: anchor.clone(),
            properties: RecipeRecord::from_domain(recipe).properties()?,
        });
    push_steps(&mut root, recipe, &anchor)?;
    txn.push(root);

    push_entity_variants(&mut txn, recipe, resolution, &anchor, Presence::Present)?;
    Ok(txn)
}

/// Remove the recipe and its owned children; absent recipe is a no-op.
pub fn delete_transaction(external_id: &str) -> Transaction {
    let mut txn = Transaction::new();
    txn.bind(RECIPE_VAR, Binding::RecipeByExternalId(external_id.to_string()));
    let anchor = NodeRef::bound(RECIPE_VAR);
    txn.push(
        Mutation::new(DELETE_LABEL, Condition::when(RECIPE_VAR, Presence::Present))
            .with_op(Op::DetachOwned {
                anchor: anchor.clone(),
                relationship: relationship::INGREDIENTS.to_string(),
            })
            .with_op(Op::DetachOwned {
                anchor: anchor.clone(),
                relationship: relationship::STEPS.to_string(),
            })
            .with_op(Op::DeleteNode { target: anchor }),
    );
    txn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Language;
    use crate::recipe::Ingredient;
    use crate::storage::BindingCounts;
    use std::collections::BTreeMap;

    fn stemmer() -> TermStemmer {
        TermStemmer::new(Language::English)
    }

    fn sample() -> Recipe {
        Recipe::new("r1", "Tomato Soup")
            .with_ingredient(Ingredient::new("tomato"))
            .with_ingredient(Ingredient::new("tomatoes"))
            .with_ingredient(Ingredient::new("basil"))
            .with_step("Boil", "Boil everything")
            .with_tag("easy")
            .with_tag("Easy")
            .with_tag("summer")
    }

    /// Every assignment of 0/1 to the given variables.
    fn assignments(vars: &[String]) -> Vec<BindingCounts> {
        (0..(1u32 << vars.len()))
            .map(|mask| {
                vars.iter()
                    .enumerate()
                    .map(|(bit, var)| (var.clone(), ((mask >> bit) & 1) as usize))
                    .collect()
            })
            .collect()
    }

    /// Fired variants grouped by entity (label prefix before ':').
    fn fired_per_entity(txn: &Transaction, counts: &BindingCounts) -> BTreeMap<String, usize> {
        let mut per_entity: BTreeMap<String, usize> = txn
            .mutations()
            .iter()
            .map(|m| (entity(&m.label), 0))
            .collect();
        for m in txn.fired(counts) {
            *per_entity.entry(entity(&m.label)).or_default() += 1;
        }
        per_entity
    }

    fn entity(label: &str) -> String {
        label.split(':').next().unwrap_or(label).to_string()
    }

    #[test]
    fn resolution_dedups_stems_within_a_recipe() {
        let res = Resolution::resolve(&sample(), &stemmer()).unwrap();
        assert_eq!(res.foods.len(), 2);
        assert_eq!(res.ingredient_food, vec![0, 0, 1]);
        assert_eq!(res.foods[0].term, "tomato");
        assert_eq!(res.tags.len(), 2);
        assert_eq!(res.tags[0].stem, "easi");
    }

    #[test]
    fn unstemmable_tag_is_invalid() {
        let recipe = Recipe::new("r1", "t").with_tag("!!");
        assert!(matches!(
            Resolution::resolve(&recipe, &stemmer()),
            Err(UpsertError::Invalid(_))
        ));
    }

    #[test]
    fn variant_count_is_linear() {
        let recipe = sample();
        let res = Resolution::resolve(&recipe, &stemmer()).unwrap();
        let i = recipe.ingredients.len();
        let t = res.tags.len();

        let create = create_transaction(&recipe, &res).unwrap();
        assert_eq!(create.mutations().len(), 2 * (i + t) + 1);
        // one binding for the recipe plus one per distinct stem
        assert_eq!(create.bindings().len(), 1 + res.foods.len() + t);

        let update = update_transaction(&recipe, &res).unwrap();
        assert_eq!(update.mutations().len(), 2 * (i + t) + 1);
    }

    #[test]
    fn exactly_one_variant_per_entity_fires_under_the_anchor() {
        let recipe = sample();
        let res = Resolution::resolve(&recipe, &stemmer()).unwrap();

        for (txn, anchor_len) in [
            (create_transaction(&recipe, &res).unwrap(), 0),
            (update_transaction(&recipe, &res).unwrap(), 1),
        ] {
            let shared_vars: Vec<String> = txn
                .bindings()
                .iter()
                .map(|(v, _)| v.clone())
                .filter(|v| v != RECIPE_VAR)
                .collect();
            for mut counts in assignments(&shared_vars) {
                counts.insert(RECIPE_VAR.to_string(), anchor_len);
                for (entity, fired) in fired_per_entity(&txn, &counts) {
                    assert_eq!(fired, 1, "{} fired {} variants under {:?}", entity, fired, counts);
                }
            }
        }
    }

    #[test]
    fn nothing_fires_when_the_anchor_predicate_fails() {
        let recipe = sample();
        let res = Resolution::resolve(&recipe, &stemmer()).unwrap();
        let create = create_transaction(&recipe, &res).unwrap();

        let mut counts = BindingCounts::new();
        counts.insert(RECIPE_VAR.to_string(), 1);
        assert_eq!(create.fired(&counts).count(), 0);
    }

    #[test]
    fn update_detaches_before_relinking() {
        let recipe = sample();
        let res = Resolution::resolve(&recipe, &stemmer()).unwrap();
        let update = update_transaction(&recipe, &res).unwrap();
        let root = &update.mutations()[0];

        assert_eq!(root.label, UPDATE_LABEL);
        assert!(matches!(root.ops[0], Op::DetachOwned { .. }));
        assert!(matches!(root.ops[1], Op::DetachOwned { .. }));
        assert!(matches!(root.ops[2], Op::Unlink { .. }));
        assert_eq!(root.condition.to_string(), "@if(eq(len(r), 1))");
    }

    #[test]
    fn ingredient_conditions_pair_anchor_with_food() {
        let recipe = sample();
        let res = Resolution::resolve(&recipe, &stemmer()).unwrap();
        let create = create_transaction(&recipe, &res).unwrap();
        let conds: Vec<String> = create
            .mutations()
            .iter()
            .filter(|m| m.label.starts_with("ingredient[1]"))
            .map(|m| m.condition.to_string())
            .collect();
        assert_eq!(
            conds,
            vec![
                "@if(eq(len(r), 0) AND eq(len(f0), 1))",
                "@if(eq(len(r), 0) AND eq(len(f0), 0))",
            ]
        );
    }

    #[test]
    fn delete_is_a_single_guarded_variant() {
        let txn = delete_transaction("r1");
        assert_eq!(txn.mutations().len(), 1);
        assert_eq!(txn.mutations()[0].condition.to_string(), "@if(eq(len(r), 1))");
        assert!(matches!(
            txn.mutations()[0].ops.last(),
            Some(Op::DeleteNode { .. })
        ));
    }
}
