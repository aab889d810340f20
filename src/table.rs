use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Rows of GeoJSON features, the tabular shape of every geometry result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    /// One feature per geometry, with the given properties.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Option<Geometry>, JsonObject)>,
    {
        let features = rows
            .into_iter()
            .map(|(geometry, properties)| Feature {
                bbox: None,
                geometry,
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
            .collect();
        Self { features }
    }

    /// Reads an API result: a FeatureCollection, a bare list of features, or null
    /// (an empty table).
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(items) => {
                let features = items
                    .into_iter()
                    .map(serde_json::from_value::<Feature>)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::UnexpectedResponse(format!("invalid feature: {e}")))?;
                Ok(Self { features })
            }
            other => {
                let collection: FeatureCollection = serde_json::from_value(other).map_err(|e| {
                    Error::UnexpectedResponse(format!("expected a GeoJSON FeatureCollection: {e}"))
                })?;
                Ok(Self {
                    features: collection.features,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn geometries(&self) -> impl Iterator<Item = Option<&Geometry>> {
        self.features.iter().map(|f| f.geometry.as_ref())
    }

    /// Value of property `name` for every row, `None` where it is absent.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.features
            .iter()
            .map(move |f| f.properties.as_ref().and_then(|p| p.get(name)))
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features.clone(),
            foreign_members: None,
        }
    }

    pub(crate) fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.to_feature_collection())?)
    }
}

/// A named, persistable table.
///
/// The row data and the descriptive fields are separate members; nothing is
/// attached to the rows themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub description: String,
    #[serde(default, deserialize_with = "embedded_json")]
    pub metadata: Value,
    #[serde(default, rename = "data", deserialize_with = "embedded_rows")]
    pub rows: Vec<JsonObject>,
}

// The API sometimes ships `data` and `metadata` as JSON-encoded strings.
fn embedded_json<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Value, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(serde_json::from_str(&s).unwrap_or(Value::String(s))),
        other => Ok(other),
    }
}

fn nullable_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn embedded_rows<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<JsonObject>, D::Error> {
    match embedded_json(d)? {
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}

impl DataFrame {
    pub fn new(name: impl Into<String>, rows: Vec<JsonObject>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            metadata: Value::Null,
            rows,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Builds a dataframe from the properties of a feature table, dropping geometry.
    pub fn from_features(name: impl Into<String>, table: &FeatureTable) -> Self {
        let rows = table
            .features
            .iter()
            .map(|f| f.properties.clone().unwrap_or_default())
            .collect();
        Self::new(name, rows)
    }
}
