//! Stored property shapes for each node kind
//!
//! Scalar fields live in the `properties_json` column; identity columns
//! (external ID, stem) and timestamps are kept outside the JSON so they can
//! be indexed.

use super::traits::StorageResult;
use super::txn::{NodeData, Properties};
use crate::graph::NodeKind;
use crate::recipe::{Cost, Difficulty, Ingredient, Quantity, Recipe, Step};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

fn to_properties<T: Serialize>(value: &T) -> StorageResult<Properties> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(Properties::new()),
    }
}

pub(crate) fn from_properties_json<T: DeserializeOwned>(json: &str) -> StorageResult<T> {
    Ok(serde_json::from_str(json)?)
}

/// Scalar fields of a recipe node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub main_image: Option<String>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub cost: Option<Cost>,
    #[serde(default)]
    pub prep_time: Option<u32>,
    #[serde(default)]
    pub cook_time: Option<u32>,
    #[serde(default)]
    pub servings: Option<u32>,
    #[serde(default)]
    pub extra_notes: String,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub slug: String,
}

impl RecipeRecord {
    pub fn from_domain(recipe: &Recipe) -> Self {
        Self {
            title: recipe.title.clone(),
            subtitle: recipe.subtitle.clone(),
            description: recipe.description.clone(),
            main_image: recipe.main_image.clone(),
            likes: recipe.likes,
            difficulty: recipe.difficulty,
            cost: recipe.cost,
            prep_time: recipe.prep_time,
            cook_time: recipe.cook_time,
            servings: recipe.servings,
            extra_notes: recipe.extra_notes.clone(),
            conclusion: recipe.conclusion.clone(),
            slug: recipe.slug.clone(),
        }
    }

    /// Copy the scalar fields onto a recipe; collections are left alone.
    pub fn apply_to(self, recipe: &mut Recipe) {
        recipe.title = self.title;
        recipe.subtitle = self.subtitle;
        recipe.description = self.description;
        recipe.main_image = self.main_image;
        recipe.likes = self.likes;
        recipe.difficulty = self.difficulty;
        recipe.cost = self.cost;
        recipe.prep_time = self.prep_time;
        recipe.cook_time = self.cook_time;
        recipe.servings = self.servings;
        recipe.extra_notes = self.extra_notes;
        recipe.conclusion = self.conclusion;
        recipe.slug = self.slug;
    }

    pub fn properties(&self) -> StorageResult<Properties> {
        to_properties(self)
    }

    pub fn node(&self, external_id: &str) -> StorageResult<NodeData> {
        Ok(NodeData::new(NodeKind::Recipe, self.properties()?).with_external_id(external_id))
    }
}

/// Fields of a step node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image: Option<String>,
}

impl StepRecord {
    pub fn from_domain(step: &Step) -> Self {
        Self {
            heading: step.heading.clone(),
            body: step.body.clone(),
            image: step.image.clone(),
        }
    }

    pub fn into_domain(self) -> Step {
        Step {
            heading: self.heading,
            body: self.body,
            image: self.image,
        }
    }

    pub fn node(&self) -> StorageResult<NodeData> {
        Ok(NodeData::new(NodeKind::Step, to_properties(self)?))
    }
}

/// Fields of an ingredient node. The food reference is an edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngredientRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub unit_of_measure: String,
}

impl IngredientRecord {
    pub fn from_domain(ingredient: &Ingredient) -> Self {
        Self {
            name: ingredient.name.clone(),
            quantity: ingredient.quantity.clone(),
            unit_of_measure: ingredient.unit_of_measure.clone(),
        }
    }

    pub fn into_domain(self) -> Ingredient {
        Ingredient {
            name: self.name,
            quantity: self.quantity,
            unit_of_measure: self.unit_of_measure,
            food: None,
        }
    }

    pub fn node(&self) -> StorageResult<NodeData> {
        Ok(NodeData::new(NodeKind::Ingredient, to_properties(self)?))
    }
}

/// Fields of a shared node (food term or tag name). The stem is a column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedRecord {
    #[serde(default)]
    pub term: String,
}

impl SharedRecord {
    pub fn node(kind: NodeKind, term: &str, stem: &str) -> StorageResult<NodeData> {
        let record = Self {
            term: term.to_string(),
        };
        Ok(NodeData::new(kind, to_properties(&record)?).with_stem(stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_record_carries_scalars_only() {
        let recipe = Recipe::new("r1", "Pasta al pomodoro")
            .with_tag("primi")
            .with_step("Cuocere", "Cuocere la pasta");
        let node = RecipeRecord::from_domain(&recipe).node("r1").unwrap();

        assert_eq!(node.kind, NodeKind::Recipe);
        assert_eq!(node.external_id.as_deref(), Some("r1"));
        assert_eq!(node.properties["title"], "Pasta al pomodoro");
        assert!(!node.properties.contains_key("tags"));
        assert!(!node.properties.contains_key("steps"));
    }

    #[test]
    fn recipe_record_applies_back_onto_domain() {
        let mut original = Recipe::new("r1", "Tiramisù");
        original.difficulty = Some(Difficulty::Medium);
        original.servings = Some(6);
        let json = serde_json::to_string(&RecipeRecord::from_domain(&original)).unwrap();

        let mut loaded = Recipe::new("r1", "");
        from_properties_json::<RecipeRecord>(&json).unwrap().apply_to(&mut loaded);
        assert_eq!(loaded.title, "Tiramisù");
        assert_eq!(loaded.difficulty, Some(Difficulty::Medium));
        assert_eq!(loaded.servings, Some(6));
    }

    #[test]
    fn shared_record_sets_stem_column() {
        let node = SharedRecord::node(NodeKind::Food, "pomodori", "pomodor").unwrap();
        assert_eq!(node.stem.as_deref(), Some("pomodor"));
        assert_eq!(node.properties["term"], "pomodori");
    }
}
