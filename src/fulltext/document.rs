//! Denormalized search document

use crate::recipe::Recipe;

/// What the index stores for one recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDocument {
    pub recipe_id: String,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub ingredients: Vec<String>,
    pub tags: Vec<String>,
}

impl RecipeDocument {
    /// Build from a canonical recipe. Food terms are indexed alongside
    /// ingredient names so either spelling finds the recipe.
    pub fn from_recipe(recipe: &Recipe) -> Self {
        let mut ingredients: Vec<String> = Vec::with_capacity(recipe.ingredients.len());
        for ingredient in &recipe.ingredients {
            push_unique(&mut ingredients, &ingredient.name);
            if let Some(food) = &ingredient.food {
                push_unique(&mut ingredients, &food.term);
            }
        }
        let mut tags = Vec::with_capacity(recipe.tags.len());
        for tag in &recipe.tags {
            push_unique(&mut tags, &tag.name);
        }
        Self {
            recipe_id: recipe.external_id.clone(),
            title: recipe.title.clone(),
            subtitle: recipe.subtitle.clone(),
            description: recipe.description.clone(),
            ingredients,
            tags,
        }
    }

    pub(crate) fn ingredients_text(&self) -> String {
        self.ingredients.join(" ")
    }

    pub(crate) fn tags_text(&self) -> String {
        self.tags.join(" ")
    }
}

fn push_unique(into: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !into.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        into.push(value.to_string());
    }
}
