#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the OpenCellID ingestion pipeline.
//!
//! A [`Record`] is one parsed row of the cell tower dump, a [`Batch`] is a
//! bounded group of records handed from the decoder to the loader, and a
//! [`GeoPoint`] is the nested `coords` value the normalizer builds out of
//! the raw `lon`/`lat` columns.

pub mod config;
pub mod progress;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw longitude column name in the source dump.
pub const LON_FIELD: &str = "lon";

/// Raw latitude column name in the source dump.
pub const LAT_FIELD: &str = "lat";

/// Field that holds the normalized [`GeoPoint`].
pub const COORDS_FIELD: &str = "coords";

/// A two-coordinate location, serialized as
/// `{"type": "Point", "lon": .., "lat": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Point")]
pub struct GeoPoint {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl GeoPoint {
    /// The `type` discriminator stored alongside the coordinates.
    pub const KIND: &'static str = "Point";

    #[must_use]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// A single scalar (or point) value inside a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Empty cell.
    Null,
    /// Whole number column value.
    Integer(i64),
    /// Floating point column value.
    Float(f64),
    /// Anything that did not parse as a number.
    Text(String),
    /// Normalized location.
    Point(GeoPoint),
}

impl FieldValue {
    /// Returns the value as `f64` if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Null | Self::Text(_) | Self::Point(_) => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<GeoPoint> for FieldValue {
    fn from(value: GeoPoint) -> Self {
        Self::Point(value)
    }
}

/// One row of the source table keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Sets `field`, returning the previous value if there was one.
    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// An ordered, bounded group of records. Only a memory-control unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    #[must_use]
    pub const fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
}

impl FromIterator<Record> for Batch {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Batch {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_point_serializes_with_type_tag() {
        let json = serde_json::to_value(GeoPoint::new(10.5, -20.25)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "Point", "lon": 10.5, "lat": -20.25})
        );
        assert_eq!(json["type"], GeoPoint::KIND);
    }

    #[test]
    fn record_serializes_as_flat_document() {
        let record: Record = [
            ("mcc", FieldValue::Integer(262)),
            ("radio", FieldValue::from("LTE")),
            ("coords", FieldValue::Point(GeoPoint::new(1.0, 2.0))),
            ("unit", FieldValue::Null),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "coords": {"type": "Point", "lon": 1.0, "lat": 2.0},
                "mcc": 262,
                "radio": "LTE",
                "unit": null
            })
        );
    }

    #[test]
    fn integer_values_widen_to_f64() {
        assert_eq!(FieldValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Float(3.5).as_f64(), Some(3.5));
        assert_eq!(FieldValue::from("3.5").as_f64(), None);
        assert_eq!(FieldValue::Null.as_f64(), None);
    }

    #[test]
    fn batch_preserves_record_order() {
        let batch: Batch = (0..4)
            .map(|i| {
                [("cell", FieldValue::Integer(i))]
                    .into_iter()
                    .collect::<Record>()
            })
            .collect();

        let cells: Vec<_> = batch.iter().map(|r| r.get("cell").cloned()).collect();
        assert_eq!(
            cells,
            (0..4).map(|i| Some(FieldValue::Integer(i))).collect::<Vec<_>>()
        );
    }
}
