use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::{EntityError, Result};

pub type EntityId = u64;
pub type RevisionId = u64;

/// One field item: column name to JSON value.
pub type FieldItem = Map<String, JsonValue>;
pub type FieldItemList = Vec<FieldItem>;

/// Language code used when an entity has no language.
pub const LANGCODE_NOT_SPECIFIED: &str = "und";

const MACHINE_NAME_MAX_LENGTH: usize = 32;

static MACHINE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").expect("machine name pattern is valid"));

/// Checks that `name` is a lowercase machine name usable in ids and table names.
pub fn validate_machine_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MACHINE_NAME_MAX_LENGTH {
        return Err(EntityError::Validation(format!(
            "{} name '{}' must be between 1 and {} characters",
            kind, name, MACHINE_NAME_MAX_LENGTH
        )));
    }
    if !MACHINE_NAME.is_match(name) {
        return Err(EntityError::Validation(format!(
            "{} name '{}' may only contain lowercase letters, digits and underscores",
            kind, name
        )));
    }
    Ok(())
}

/// Maximum number of items a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Cardinality {
    Limited(u32),
    Unlimited,
}

impl Cardinality {
    pub const UNLIMITED: i64 = -1;

    pub fn is_multiple(&self) -> bool {
        !matches!(self, Self::Limited(1))
    }

    /// Whether `count` items fit.
    pub fn allows(&self, count: usize) -> bool {
        match self {
            Self::Limited(max) => count <= *max as usize,
            Self::Unlimited => true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Limited(0) => Err(EntityError::Validation(
                "Cardinality must be a positive integer or unlimited".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::Limited(1)
    }
}

impl From<i64> for Cardinality {
    fn from(value: i64) -> Self {
        if value < 0 {
            Self::Unlimited
        } else {
            Self::Limited(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }
}

impl From<Cardinality> for i64 {
    fn from(value: Cardinality) -> Self {
        match value {
            Cardinality::Limited(n) => i64::from(n),
            Cardinality::Unlimited => Cardinality::UNLIMITED,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Normalizes caller input into a list of items.
///
/// A scalar becomes `[{main_property: scalar}]`, an object becomes a single
/// item and an array is normalized element by element.
pub fn normalize_items(main_property: &str, input: JsonValue) -> FieldItemList {
    match input {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(values) => values
            .into_iter()
            .flat_map(|value| normalize_items(main_property, value))
            .collect(),
        JsonValue::Object(map) => vec![map],
        scalar => {
            let mut item = Map::new();
            item.insert(main_property.to_string(), scalar);
            vec![item]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cardinality_serde_uses_integer_form() {
        let unlimited: Cardinality = serde_json::from_value(json!(-1)).unwrap();
        assert_eq!(unlimited, Cardinality::Unlimited);
        assert_eq!(serde_json::to_value(Cardinality::Limited(3)).unwrap(), json!(3));
        assert!(Cardinality::Limited(0).validate().is_err());
        assert!(Cardinality::Limited(2).allows(2));
        assert!(!Cardinality::Limited(2).allows(3));
    }

    #[test]
    fn test_machine_name_validation() {
        assert!(validate_machine_name("Field", "field_tags").is_ok());
        assert!(validate_machine_name("Field", "Field-Tags").is_err());
        assert!(validate_machine_name("Field", "").is_err());
        assert!(validate_machine_name("Field", &"a".repeat(33)).is_err());
    }

    #[test]
    fn test_normalize_items() {
        let items = normalize_items("value", json!(["a", {"value": "b", "format": "plain"}]));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["value"], json!("a"));
        assert_eq!(items[1]["format"], json!("plain"));
        assert!(normalize_items("value", JsonValue::Null).is_empty());
    }
}
