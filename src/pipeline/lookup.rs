//! Class index → food name and nutrition for the on-device model.
//!
//! Covers a handful of the model's 1000 ImageNet classes. A miss is the
//! normal case and resolves to an "Unrecognized" result.

use crate::models::NutritionRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoodInfo {
    pub name: &'static str,
    /// Per serving: kcal, then grams of protein, carbs, fat.
    pub nutrition: NutritionRecord,
}

const fn entry(
    class_index: usize,
    name: &'static str,
    calories: f64,
    protein: f64,
    carbs: f64,
    fat: f64,
) -> (usize, FoodInfo) {
    (
        class_index,
        FoodInfo {
            name,
            nutrition: NutritionRecord::new(calories, protein, carbs, fat),
        },
    )
}

/// Sorted by class index.
const CANONICAL_ENTRIES: &[(usize, FoodInfo)] = &[
    entry(508, "Keyboard Komputer", 0.0, 0.0, 0.0, 0.0),
    entry(564, "Pisang (Banana)", 105.0, 1.3, 27.0, 0.3),
    entry(898, "Botol Minum", 0.0, 0.0, 0.0, 0.0),
    entry(933, "Cheeseburger", 303.0, 15.0, 30.0, 14.0),
    entry(934, "Hotdog", 290.0, 10.0, 25.0, 18.0),
    entry(948, "Apel (Granny Smith)", 52.0, 0.3, 14.0, 0.2),
    entry(950, "Jeruk", 47.0, 0.9, 12.0, 0.1),
    entry(954, "Pisang (V1)", 105.0, 1.3, 27.0, 0.3),
    entry(963, "Pizza", 266.0, 11.0, 33.0, 10.0),
];

/// Read-only, fixed at build time.
#[derive(Debug, Clone, Copy)]
pub struct FoodLookupTable {
    entries: &'static [(usize, FoodInfo)],
}

impl FoodLookupTable {
    pub const fn canonical() -> Self {
        Self {
            entries: CANONICAL_ENTRIES,
        }
    }

    pub fn get(&self, class_index: usize) -> Option<&FoodInfo> {
        self.entries
            .binary_search_by_key(&class_index, |(idx, _)| *idx)
            .ok()
            .map(|pos| &self.entries[pos].1)
    }

    pub fn contains(&self, class_index: usize) -> bool {
        self.get(class_index).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FoodInfo)> {
        self.entries.iter().map(|(idx, info)| (*idx, info))
    }
}

impl Default for FoodLookupTable {
    fn default() -> Self {
        Self::canonical()
    }
}
