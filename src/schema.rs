use serde::{Deserialize, Serialize};

pub const FEATURE_COUNT: usize = 18;

/// Column order the estimator is trained on. Both the training pipeline and
/// the HTTP layer build vectors from this constant and nothing else.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "age",
    "pace",
    "shooting",
    "passing",
    "dribbling",
    "defending",
    "physicality",
    "height",
    "weight",
    "tackles",
    "interceptions",
    "vision",
    "ball_control",
    "reactions",
    "stamina",
    "aggression",
    "balance",
    "composure",
];

/// Source dataset header for each entry of `FEATURE_NAMES`.
pub const SOURCE_COLUMNS: [&str; FEATURE_COUNT] = [
    "Age",
    "SprintSpeed",
    "Finishing",
    "ShortPassing",
    "Dribbling",
    "Marking",
    "Strength",
    "Height",
    "Weight",
    "StandingTackle",
    "Interceptions",
    "Vision",
    "BallControl",
    "Reactions",
    "Stamina",
    "Aggression",
    "Balance",
    "Composure",
];

pub const HEIGHT_INDEX: usize = 7;
pub const WEIGHT_INDEX: usize = 8;

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// Fixed-order numeric encoding of a player. Every value is finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Option<Self> {
        if values.iter().all(|v| v.is_finite()) {
            Some(Self(values))
        } else {
            None
        }
    }

    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let arr: [f64; FEATURE_COUNT] = values.try_into().ok()?;
        Self::new(arr)
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|idx| self.0[idx])
    }

    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.len() != FEATURE_COUNT {
            return Err(format!(
                "expected {FEATURE_COUNT} feature values, got {}",
                values.len()
            ));
        }
        Self::from_slice(&values).ok_or_else(|| "feature values must be finite".to_string())
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(v: FeatureVector) -> Self {
        v.0.to_vec()
    }
}
