use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};

const CM_PER_INCH: f64 = 2.54;
const KG_PER_LB: f64 = 0.453592;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` is not a finite number: {value}")]
    NotNumeric { field: String, value: String },
    #[error("invalid height `{0}`, expected feet'inches")]
    InvalidHeight(String),
    #[error("invalid weight `{0}`, expected <pounds>lbs")]
    InvalidWeight(String),
}

/// One row of the source dataset, before any cleaning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPlayerRecord {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Nationality", default)]
    pub nationality: Option<String>,
    #[serde(rename = "Club", default)]
    pub club: Option<String>,
    #[serde(rename = "Overall", default, deserialize_with = "csv::invalid_option")]
    pub overall: Option<f64>,
    #[serde(rename = "Age", default, deserialize_with = "csv::invalid_option")]
    pub age: Option<f64>,
    #[serde(rename = "SprintSpeed", default, deserialize_with = "csv::invalid_option")]
    pub sprint_speed: Option<f64>,
    #[serde(rename = "Finishing", default, deserialize_with = "csv::invalid_option")]
    pub finishing: Option<f64>,
    #[serde(rename = "ShortPassing", default, deserialize_with = "csv::invalid_option")]
    pub short_passing: Option<f64>,
    #[serde(rename = "Dribbling", default, deserialize_with = "csv::invalid_option")]
    pub dribbling: Option<f64>,
    #[serde(rename = "Marking", default, deserialize_with = "csv::invalid_option")]
    pub marking: Option<f64>,
    #[serde(rename = "Strength", default, deserialize_with = "csv::invalid_option")]
    pub strength: Option<f64>,
    #[serde(rename = "Height", default)]
    pub height: Option<String>,
    #[serde(rename = "Weight", default)]
    pub weight: Option<String>,
    #[serde(rename = "StandingTackle", default, deserialize_with = "csv::invalid_option")]
    pub standing_tackle: Option<f64>,
    #[serde(rename = "Interceptions", default, deserialize_with = "csv::invalid_option")]
    pub interceptions: Option<f64>,
    #[serde(rename = "Vision", default, deserialize_with = "csv::invalid_option")]
    pub vision: Option<f64>,
    #[serde(rename = "BallControl", default, deserialize_with = "csv::invalid_option")]
    pub ball_control: Option<f64>,
    #[serde(rename = "Reactions", default, deserialize_with = "csv::invalid_option")]
    pub reactions: Option<f64>,
    #[serde(rename = "Stamina", default, deserialize_with = "csv::invalid_option")]
    pub stamina: Option<f64>,
    #[serde(rename = "Aggression", default, deserialize_with = "csv::invalid_option")]
    pub aggression: Option<f64>,
    #[serde(rename = "Balance", default, deserialize_with = "csv::invalid_option")]
    pub balance: Option<f64>,
    #[serde(rename = "Composure", default, deserialize_with = "csv::invalid_option")]
    pub composure: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerIdentity {
    pub id: Option<String>,
    pub name: Option<String>,
    pub nationality: Option<String>,
    pub club: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlayer {
    pub identity: PlayerIdentity,
    pub features: FeatureVector,
    pub rating: Option<f64>,
}

/// `"F'I"` to centimeters, rounded half to even.
pub fn convert_height(raw: &str) -> Option<f64> {
    let mut parts = raw.split('\'');
    let feet = parse_int(parts.next()?)?;
    let inches = parse_int(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    let total_inches = feet.checked_mul(12)?.checked_add(inches)?;
    Some((total_inches as f64 * CM_PER_INCH).round_ties_even())
}

/// `"<int>lbs"` to kilograms.
pub fn convert_weight(raw: &str) -> Option<f64> {
    let pounds = parse_int(raw.trim().strip_suffix("lbs")?)?;
    Some((pounds as f64 * KG_PER_LB).round_ties_even())
}

fn parse_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

pub fn normalize(record: &RawPlayerRecord) -> Result<NormalizedPlayer, NormalizeError> {
    let height = match record.height.as_deref() {
        Some(raw) => convert_height(raw).ok_or_else(|| NormalizeError::InvalidHeight(raw.into()))?,
        None => return Err(NormalizeError::MissingField("height".into())),
    };
    let weight = match record.weight.as_deref() {
        Some(raw) => convert_weight(raw).ok_or_else(|| NormalizeError::InvalidWeight(raw.into()))?,
        None => return Err(NormalizeError::MissingField("weight".into())),
    };

    let raw_values: [Option<f64>; FEATURE_COUNT] = [
        record.age,
        record.sprint_speed,
        record.finishing,
        record.short_passing,
        record.dribbling,
        record.marking,
        record.strength,
        Some(height),
        Some(weight),
        record.standing_tackle,
        record.interceptions,
        record.vision,
        record.ball_control,
        record.reactions,
        record.stamina,
        record.aggression,
        record.balance,
        record.composure,
    ];

    let mut values = [0.0; FEATURE_COUNT];
    for (idx, raw) in raw_values.iter().enumerate() {
        let name = FEATURE_NAMES[idx];
        let value = raw.ok_or_else(|| NormalizeError::MissingField(name.into()))?;
        if !value.is_finite() {
            return Err(NormalizeError::NotNumeric {
                field: name.into(),
                value: value.to_string(),
            });
        }
        values[idx] = value;
    }

    let features = FeatureVector::new(values).ok_or_else(|| NormalizeError::NotNumeric {
        field: "features".into(),
        value: format!("{values:?}"),
    })?;

    Ok(NormalizedPlayer {
        identity: PlayerIdentity {
            id: non_blank(record.id.as_deref()),
            name: non_blank(record.name.as_deref()),
            nationality: non_blank(record.nationality.as_deref()),
            club: non_blank(record.club.as_deref()),
        },
        features,
        rating: record.overall.filter(|v| v.is_finite()),
    })
}

/// Builds a vector from a request body, looking fields up by name so JSON
/// key order never matters. Unknown keys are ignored.
pub fn normalize_json(body: &Map<String, Value>) -> Result<FeatureVector, NormalizeError> {
    let mut values = [0.0; FEATURE_COUNT];
    for (idx, name) in FEATURE_NAMES.iter().enumerate() {
        values[idx] = required_number(body, name)?;
    }
    FeatureVector::new(values).ok_or_else(|| NormalizeError::NotNumeric {
        field: "features".into(),
        value: format!("{values:?}"),
    })
}

pub fn required_number(body: &Map<String, Value>, field: &str) -> Result<f64, NormalizeError> {
    match body.get(field) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(field.into())),
        Some(value) => json_number(field, value),
    }
}

/// Accepts JSON numbers and numeric strings; anything else is rejected.
pub fn json_number(field: &str, value: &Value) -> Result<f64, NormalizeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| NormalizeError::NotNumeric {
            field: field.into(),
            value: value.to_string(),
        })
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_conversion_matches_reference_values() {
        assert_eq!(convert_height("5'10"), Some(178.0));
        assert_eq!(convert_height("6'2"), Some(188.0));
        assert_eq!(convert_height(" 5'7 "), Some(170.0));
        // 75 inches is exactly 190.5 cm; ties go to the even neighbour.
        assert_eq!(convert_height("6'3"), Some(190.0));
    }

    #[test]
    fn malformed_heights_are_invalid() {
        for raw in ["", "5-10", "510", "5'", "'10", "5'10\"", "5.5'10", "a'b", "5'10'1"] {
            assert_eq!(convert_height(raw), None, "{raw:?}");
        }
    }

    #[test]
    fn weight_conversion_requires_lbs_suffix() {
        assert_eq!(convert_weight("160lbs"), Some(73.0));
        assert_eq!(convert_weight("159lbs"), Some(72.0));
        assert_eq!(convert_weight("160"), None);
        assert_eq!(convert_weight("160.5lbs"), None);
        assert_eq!(convert_weight("lbs"), None);
        assert_eq!(convert_weight(""), None);
    }

    #[test]
    fn json_numbers_accept_numeric_strings_only() {
        assert_eq!(json_number("age", &Value::from(25)), Ok(25.0));
        assert_eq!(json_number("age", &Value::from("25.5")), Ok(25.5));
        assert!(json_number("age", &Value::from("fast")).is_err());
        assert!(json_number("age", &Value::Bool(true)).is_err());
        assert!(json_number("age", &Value::Array(vec![])).is_err());
    }
}
