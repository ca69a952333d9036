//! The properties JSON document produced by `ExtractProperties` (spec.md
//! §4.5). `PropertyValue` is a tagged variant over the wire `valueType`
//! enumeration rather than a subclass hierarchy (§9 design note).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever the document shape changes incompatibly.
pub const PROPERTIES_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesDocument {
    pub schema_version: u32,
    pub extracted_at: DateTime<Utc>,
    pub total_elements: usize,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub entity_label: String,
    pub global_id: String,
    pub name: Option<String>,
    pub type_name: String,
    pub description: Option<String>,
    pub object_type: Option<String>,
    pub type_object_name: Option<String>,
    pub type_object_type: Option<String>,
    pub property_sets: Vec<PropertySet>,
    pub quantity_sets: Vec<QuantitySet>,
    pub type_property_sets: Vec<PropertySet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySet {
    pub name: String,
    pub global_id: Option<String>,
    pub is_type_property: bool,
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantitySet {
    pub name: String,
    pub global_id: Option<String>,
    pub quantities: Vec<Property>,
}

/// `{name, value?, valueType, unit?}`. Shared by `properties` and
/// `quantities` arrays — the source distinguishes them by container, not by
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    #[serde(flatten)]
    pub value: PropertyValue,
    pub unit: Option<String>,
}

/// One entry per `valueType`. Models the source's `IfcPropertySingleValue` /
/// `IfcPropertyEnumeratedValue` / `IfcPropertyBoundedValue` /
/// `IfcPropertyListValue` / `IfcPropertyTableValue` / `IfcComplexProperty`
/// hierarchy as a tagged variant instead of subclassing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "valueType", rename_all = "lowercase")]
pub enum PropertyValue {
    String { value: String },
    Integer { value: i64 },
    Double { value: f64 },
    Boolean { value: bool },
    Enumeration { value: String },
    Range { value: (f64, f64) },
    List { value: Vec<serde_json::Value> },
    Table { value: Vec<serde_json::Value> },
    Complex { value: serde_json::Value },
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_serializes_with_flattened_value_type() {
        let prop = Property {
            name: "Reference".to_string(),
            value: PropertyValue::String {
                value: "abc".to_string(),
            },
            unit: None,
        };
        let json = serde_json::to_value(&prop).unwrap();
        assert_eq!(json["valueType"], "string");
        assert_eq!(json["value"], "abc");
        assert_eq!(json["name"], "Reference");
    }

    #[test]
    fn unknown_value_omits_the_value_field() {
        let prop = Property {
            name: "Mystery".to_string(),
            value: PropertyValue::Unknown,
            unit: None,
        };
        let json = serde_json::to_value(&prop).unwrap();
        assert_eq!(json["valueType"], "unknown");
        assert!(json.get("value").is_none());
    }
}
