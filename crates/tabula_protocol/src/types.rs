//! Protocol payload types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

// ============================================================================
// Property types
// ============================================================================

/// Column type. Closed set; the wire tokens are the lowercase names.
///
/// Declaration order is the tie-break priority used by majority-vote
/// inference: earlier variants win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Integer,
    Number,
    Boolean,
    DateTime,
    String,
}

impl PropertyType {
    /// All types in priority order.
    pub const ALL: [PropertyType; 5] = [
        PropertyType::Integer,
        PropertyType::Number,
        PropertyType::Boolean,
        PropertyType::DateTime,
        PropertyType::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::DateTime => "datetime",
            PropertyType::String => "string",
        }
    }

    /// Position in the tie-break order (0 = highest priority).
    pub fn priority(&self) -> usize {
        *self as usize
    }

    /// Whether a column declared as `self` admits a value observed as `observed`.
    ///
    /// Equal types always match. Integers are numbers, and any text is a string.
    pub fn accepts(&self, observed: PropertyType) -> bool {
        match (self, observed) {
            (declared, observed) if *declared == observed => true,
            (PropertyType::Number, PropertyType::Integer) => true,
            (PropertyType::String, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownPropertyType(s.to_string()))
    }
}

// ============================================================================
// Schemas
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
}

impl Property {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
        }
    }
}

/// Ordered property names: the merge and dedup key for schemas.
pub type Signature = Vec<String>;

/// A discovered tabular shape.
///
/// Property order fixes the column index of every value in a
/// [`PublishRecord`] produced for this schema. `settings` lists the source
/// files that contributed to it, in merge order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub properties: Vec<Property>,
    #[serde(default)]
    pub settings: Vec<String>,
}

impl Schema {
    pub fn new(name: impl Into<String>, properties: Vec<Property>) -> Self {
        Self {
            name: name.into(),
            properties,
            settings: Vec::new(),
        }
    }

    pub fn signature(&self) -> Signature {
        self.properties.iter().map(|p| p.name.clone()).collect()
    }

    /// Same property names in the same order, types ignored.
    pub fn signature_eq(&self, other: &Schema) -> bool {
        self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .zip(&other.properties)
                .all(|(a, b)| a.name == b.name)
    }

    /// Same property names and types in the same order.
    pub fn fully_eq(&self, other: &Schema) -> bool {
        self.properties == other.properties
    }

    pub fn property_types(&self) -> Vec<PropertyType> {
        self.properties.iter().map(|p| p.property_type).collect()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, prop) in self.properties.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: {}", prop.name, prop.property_type)?;
        }
        write!(f, " }}")
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverRequest {
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiscoverResponse {
    pub schemas: Vec<Schema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub pattern: String,
    pub schema: Schema,
    /// Milliseconds the caller is willing to wait for the whole stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// One row of a publish stream.
///
/// `data` holds one value per schema property, in property order. A value
/// is null when the cell failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub invalid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: Vec<serde_json::Value>,
}

impl PublishRecord {
    pub fn valid(data: Vec<serde_json::Value>) -> Self {
        Self {
            invalid: false,
            error: None,
            data,
        }
    }

    pub fn invalid(data: Vec<serde_json::Value>, error: impl Into<String>) -> Self {
        Self {
            invalid: true,
            error: Some(error.into()),
            data,
        }
    }
}

impl fmt::Display for PublishRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = serde_json::to_string(&self.data).map_err(|_| fmt::Error)?;
        write!(f, "invalid: {}, data: {}", self.invalid, data)?;
        if let Some(error) = &self.error {
            write!(f, ", error: {}", error)?;
        }
        Ok(())
    }
}

/// Trailer of a successful publish stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PublishSummary {
    pub records: u64,
    /// Rows dropped because their cell count did not match the schema.
    pub skipped_rows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileRead,
    BadRequest,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn animals() -> Schema {
        Schema::new(
            "animals",
            vec![
                Property::new("id", PropertyType::Integer),
                Property::new("name", PropertyType::String),
                Property::new("extinct", PropertyType::Boolean),
            ],
        )
    }

    #[test]
    fn test_property_type_tokens() {
        assert_eq!(serde_json::to_string(&PropertyType::DateTime).unwrap(), "\"datetime\"");
        assert_eq!(
            serde_json::from_str::<PropertyType>("\"number\"").unwrap(),
            PropertyType::Number
        );
        assert!(serde_json::from_str::<PropertyType>("\"date\"").is_err());
        assert!("float".parse::<PropertyType>().is_err());
        assert_eq!("boolean".parse::<PropertyType>().unwrap(), PropertyType::Boolean);
    }

    #[test]
    fn test_priority_order() {
        let mut shuffled = vec![
            PropertyType::String,
            PropertyType::Boolean,
            PropertyType::Integer,
            PropertyType::DateTime,
            PropertyType::Number,
        ];
        shuffled.sort();
        assert_eq!(shuffled, PropertyType::ALL.to_vec());
        assert_eq!(PropertyType::Integer.priority(), 0);
        assert_eq!(PropertyType::String.priority(), 4);
    }

    #[test]
    fn test_accepts() {
        assert!(PropertyType::Number.accepts(PropertyType::Integer));
        assert!(!PropertyType::Integer.accepts(PropertyType::Number));
        assert!(PropertyType::String.accepts(PropertyType::Boolean));
        assert!(!PropertyType::Boolean.accepts(PropertyType::String));
        assert!(PropertyType::DateTime.accepts(PropertyType::DateTime));
    }

    #[test]
    fn test_signature_vs_full_equality() {
        let a = animals();
        let mut b = animals();
        b.name = "zoo".to_string();
        b.properties[0].property_type = PropertyType::String;

        assert!(a.signature_eq(&b));
        assert!(!a.fully_eq(&b));

        b.properties.pop();
        assert!(!a.signature_eq(&b));
        assert_eq!(a.signature(), vec!["id", "name", "extinct"]);
    }

    #[test]
    fn test_schema_wire_shape() {
        let mut schema = animals();
        schema.settings.push("/data/animals.csv".to_string());
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["properties"][0], json!({"name": "id", "type": "integer"}));
        assert_eq!(value["settings"], json!(["/data/animals.csv"]));

        let without_settings: Schema =
            serde_json::from_value(json!({"name": "x", "properties": []})).unwrap();
        assert!(without_settings.settings.is_empty());
    }

    #[test]
    fn test_record_wire_shape() {
        let ok = PublishRecord::valid(vec![json!(1), json!("a")]);
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value, json!({"invalid": false, "data": [1, "a"]}));

        let bad = PublishRecord::invalid(vec![json!(1), serde_json::Value::Null], "boom");
        let value = serde_json::to_value(&bad).unwrap();
        assert_eq!(value["error"], json!("boom"));
        assert!(value["data"][1].is_null());
    }
}
