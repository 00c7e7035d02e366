use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Placeholder shown for a nutrient the source could not provide.
pub const UNKNOWN_PLACEHOLDER: &str = "?";

/// A single nutrient amount. Calories are kcal, macros are grams.
///
/// Data sources disagree on representation (`1.3` vs `"1.3g"`); both are
/// accepted on input and collapse to `Known`. `Unknown` serializes as `"?"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Nutrient {
    Known(f64),
    Unknown,
}

impl Nutrient {
    /// Parse a wire value such as `"105"`, `"1.3g"`, `"27 g"` or `"105 kcal"`.
    /// Anything without a leading number (including `"?"`) is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let numeric_end = trimmed
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == ','))
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());
        let numeric = trimmed[..numeric_end].replace(',', ".");

        match numeric.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::Known(value),
            _ => Self::Unknown,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Known(v) => Some(*v),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Render as a gram amount: `"1.3g"`, or `"?"` when unknown.
    pub fn as_grams(&self) -> String {
        match self {
            Self::Known(v) => format!("{v}g"),
            Self::Unknown => UNKNOWN_PLACEHOLDER.to_string(),
        }
    }
}

impl From<f64> for Nutrient {
    fn from(value: f64) -> Self {
        Self::Known(value)
    }
}

impl From<Option<f64>> for Nutrient {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl fmt::Display for Nutrient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str(UNKNOWN_PLACEHOLDER),
        }
    }
}

impl Serialize for Nutrient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(v) => serializer.serialize_f64(*v),
            Self::Unknown => serializer.serialize_str(UNKNOWN_PLACEHOLDER),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireNutrient {
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Nutrient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Option::<WireNutrient>::deserialize(deserializer)?;
        Ok(match wire {
            Some(WireNutrient::Number(v)) => Self::Known(v),
            Some(WireNutrient::Text(s)) => Self::parse(&s),
            None => Self::Unknown,
        })
    }
}

/// Per-serving nutrition facts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    #[serde(default = "unknown")]
    pub calories: Nutrient,
    #[serde(default = "unknown")]
    pub protein: Nutrient,
    #[serde(default = "unknown")]
    pub carbs: Nutrient,
    #[serde(default = "unknown")]
    pub fat: Nutrient,
}

fn unknown() -> Nutrient {
    Nutrient::Unknown
}

impl NutritionRecord {
    pub const fn new(calories: f64, protein: f64, carbs: f64, fat: f64) -> Self {
        Self {
            calories: Nutrient::Known(calories),
            protein: Nutrient::Known(protein),
            carbs: Nutrient::Known(carbs),
            fat: Nutrient::Known(fat),
        }
    }

    /// All four nutrients unknown, rendered as `"?"`.
    pub fn unknown() -> Self {
        Self {
            calories: Nutrient::Unknown,
            protein: Nutrient::Unknown,
            carbs: Nutrient::Unknown,
            fat: Nutrient::Unknown,
        }
    }

    pub fn is_fully_unknown(&self) -> bool {
        [self.calories, self.protein, self.carbs, self.fat]
            .iter()
            .all(|n| !n.is_known())
    }
}
