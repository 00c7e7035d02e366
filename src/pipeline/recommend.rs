//! Simple health advice derived from nutrition values.
//!
//! Same thresholds the classification backend applies, so on-device
//! results can carry comparable advice when enabled.

use crate::models::NutritionRecord;

const HIGH_CALORIES: f64 = 400.0;
const LOW_CALORIES: f64 = 100.0;
const EXCELLENT_PROTEIN: f64 = 20.0;
const GOOD_PROTEIN: f64 = 10.0;
const HIGH_FAT: f64 = 20.0;

const SEPARATOR: &str = " | ";

/// Build the recommendation text for one serving.
///
/// Unknown nutrients count as zero. Never empty.
pub fn recommend(nutrition: &NutritionRecord) -> String {
    let calories = nutrition.calories.value().unwrap_or(0.0);
    let protein = nutrition.protein.value().unwrap_or(0.0);
    let fat = nutrition.fat.value().unwrap_or(0.0);

    let mut advice = Vec::new();

    if calories > HIGH_CALORIES {
        advice.push("High in calories, limit portions");
    } else if calories < LOW_CALORIES {
        advice.push("Low in calories, good for dieting");
    }

    if protein > EXCELLENT_PROTEIN {
        advice.push("Excellent protein source");
    } else if protein > GOOD_PROTEIN {
        advice.push("Good amount of protein");
    }

    if fat > HIGH_FAT {
        advice.push("High in fat, eat in moderation");
    }

    if advice.is_empty() {
        advice.push("Balanced choice, enjoy!");
    }

    advice.join(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_calorie_fruit() {
        let banana = NutritionRecord::new(105.0, 1.3, 27.0, 0.3);
        assert_eq!(recommend(&banana), "Balanced choice, enjoy!");

        let apple = NutritionRecord::new(52.0, 0.3, 14.0, 0.2);
        assert_eq!(recommend(&apple), "Low in calories, good for dieting");
    }

    #[test]
    fn multiple_rules_are_joined() {
        let burger = NutritionRecord::new(540.0, 25.0, 40.0, 28.0);
        assert_eq!(
            recommend(&burger),
            "High in calories, limit portions | Excellent protein source | High in fat, eat in moderation"
        );
    }

    #[test]
    fn moderate_protein() {
        let pizza = NutritionRecord::new(266.0, 11.0, 33.0, 10.0);
        assert_eq!(recommend(&pizza), "Good amount of protein");
    }

    #[test]
    fn unknown_values_read_as_zero() {
        assert_eq!(
            recommend(&NutritionRecord::unknown()),
            "Low in calories, good for dieting"
        );
    }
}
