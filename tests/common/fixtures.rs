//! Sample recipes

use ricetta::{Ingredient, Quantity, Recipe};

pub fn tomato_soup() -> Recipe {
    Recipe::new("r1", "Tomato Soup")
        .with_ingredient(Ingredient::new("tomato").with_quantity(Quantity::Int(4), "pcs"))
        .with_step("Simmer", "Simmer the tomatoes for twenty minutes.")
        .with_tag("easy")
}

pub fn tomato_salad() -> Recipe {
    Recipe::new("r2", "Tomato Salad")
        .with_ingredient(Ingredient::new("tomatoes").with_quantity(Quantity::Int(3), "pcs"))
        .with_ingredient(Ingredient::new("basil"))
        .with_step("Slice", "Slice and season.")
}

pub fn sugo() -> Recipe {
    Recipe::new("it-1", "Sugo al pomodoro")
        .with_ingredient(Ingredient::new("pomodoro").with_quantity(Quantity::Int(500), "g"))
        .with_ingredient(Ingredient::new("sale").with_quantity(Quantity::Text("q.b.".into()), ""))
        .with_step("Cottura", "Cuocere a fuoco lento.")
        .with_tag("facile")
}

pub fn bruschetta() -> Recipe {
    Recipe::new("it-2", "Bruschetta")
        .with_ingredient(Ingredient::new("pomodori").with_quantity(Quantity::Int(2), ""))
        .with_ingredient(Ingredient::new("pane"))
        .with_tag("facili")
}
