use barcart::{analyze, Config, IngredientRow, RecipeRow};
use serde_json::Value;

fn catalog() -> Vec<IngredientRow> {
    vec![
        IngredientRow::top_level("gin", "Gin"),
        IngredientRow::child("london-dry", "London Dry", "gin", true),
        IngredientRow::top_level("vermouth", "Vermouth"),
        IngredientRow::top_level("campari", "Campari"),
    ]
}

fn drinks() -> Vec<RecipeRow> {
    vec![
        RecipeRow::new("martini", "Martini", "london-dry", 0.75),
        RecipeRow::new("martini", "Martini", "vermouth", 0.25),
        RecipeRow::new("negroni", "Negroni", "gin", 1.0 / 3.0),
        RecipeRow::new("negroni", "Negroni", "vermouth", 1.0 / 3.0),
        RecipeRow::new("negroni", "Negroni", "campari", 1.0 / 3.0),
        RecipeRow::new("americano", "Americano", "campari", 0.5),
        RecipeRow::new("americano", "Americano", "vermouth", 0.5),
    ]
}

#[test]
fn analysis_serializes_to_flat_point_records() {
    let analysis = analyze(&catalog(), &drinks(), &Config::default()).unwrap();
    let json: Value = serde_json::to_value(&analysis).unwrap();

    let points = json["points"].as_array().unwrap();
    assert_eq!(points.len(), 3);
    for point in points {
        assert!(point["recipe_id"].is_string());
        assert!(point["recipe_name"].is_string());
        assert!(point["x"].is_number());
        assert!(point["y"].is_number());
        // Nothing but the four boundary fields leaks through.
        assert_eq!(point.as_object().unwrap().len(), 4);
    }
}

#[test]
fn usage_tree_serializes_with_both_count_flavors() {
    let analysis = analyze(&catalog(), &drinks(), &Config::default()).unwrap();
    let json: Value = serde_json::to_value(&analysis.usage_tree).unwrap();

    assert_eq!(json["id"], "root");
    let gin = json["children"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["id"] == "gin")
        .unwrap();
    // Negroni pours gin directly; the martini's london dry counts only
    // hierarchically.
    assert_eq!(gin["recipe_count"], 1);
    assert_eq!(gin["hierarchical_recipe_count"], 2);
}

#[test]
fn same_seed_produces_identical_serialized_output() {
    let a = analyze(&catalog(), &drinks(), &Config::default()).unwrap();
    let b = analyze(&catalog(), &drinks(), &Config::default()).unwrap();
    assert_eq!(
        serde_json::to_string(&a.points).unwrap(),
        serde_json::to_string(&b.points).unwrap()
    );
}
