//! Column types for document fields.
//!
//! A collection table gets one column per document field. Column types only
//! ever widen: `BIGINT` -> `DOUBLE` -> `VARCHAR`. Point fields are a fixed
//! struct and never mix with scalars.

use std::collections::BTreeMap;
use std::fmt;

use opencellid_models::{Batch, FieldValue};

use crate::StoreError;

/// SQL type of a [`opencellid_models::GeoPoint`] column.
pub const POINT_SQL: &str = r#"STRUCT("type" VARCHAR, lon DOUBLE, lat DOUBLE)"#;

/// Column every collection table carries to record arrival order.
pub const ID_COLUMN: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Double,
    Text,
    Point,
}

impl ColumnType {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Integer => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Text => "VARCHAR",
            Self::Point => POINT_SQL,
        }
    }

    /// Type of a single value; `None` for nulls, which fit any column.
    #[must_use]
    pub const fn of(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => None,
            FieldValue::Integer(_) => Some(Self::Integer),
            FieldValue::Float(_) => Some(Self::Double),
            FieldValue::Text(_) => Some(Self::Text),
            FieldValue::Point(_) => Some(Self::Point),
        }
    }

    /// Maps a `DuckDB` `data_type` string back to a column type.
    #[must_use]
    pub fn from_sql(data_type: &str) -> Self {
        let upper = data_type.trim().to_ascii_uppercase();
        if upper.starts_with("STRUCT") {
            Self::Point
        } else if matches!(
            upper.as_str(),
            "BIGINT" | "INTEGER" | "SMALLINT" | "TINYINT" | "HUGEINT"
        ) {
            Self::Integer
        } else if matches!(upper.as_str(), "DOUBLE" | "FLOAT" | "REAL") || upper.starts_with("DECIMAL")
        {
            Self::Double
        } else {
            Self::Text
        }
    }

    /// The narrowest type able to hold values of both types, or `None` if a
    /// point meets a scalar.
    #[must_use]
    pub const fn widen(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Self::Point, Self::Point) => Some(Self::Point),
            (Self::Point, _) | (_, Self::Point) => None,
            (Self::Text, _) | (_, Self::Text) => Some(Self::Text),
            (Self::Double, _) | (_, Self::Double) => Some(Self::Double),
            (Self::Integer, Self::Integer) => Some(Self::Integer),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Double => "float",
            Self::Text => "text",
            Self::Point => "point",
        };
        f.write_str(name)
    }
}

/// Every field used by the batch with the widest type seen for it.
///
/// Fields that are null in every record map to `None`.
///
/// # Errors
///
/// Returns [`StoreError::ReservedField`] if a record uses [`ID_COLUMN`] and
/// [`StoreError::TypeConflict`] if a field mixes points and scalars.
pub fn batch_columns(
    collection: &str,
    batch: &Batch,
) -> Result<BTreeMap<String, Option<ColumnType>>, StoreError> {
    let mut columns: BTreeMap<String, Option<ColumnType>> = BTreeMap::new();

    for record in batch {
        for (field, value) in record.iter() {
            if field == ID_COLUMN {
                return Err(StoreError::ReservedField(field.to_string()));
            }

            let slot = columns.entry(field.to_string()).or_insert(None);
            let Some(incoming) = ColumnType::of(value) else {
                continue;
            };

            *slot = match *slot {
                None => Some(incoming),
                Some(existing) => Some(existing.widen(incoming).ok_or_else(|| {
                    StoreError::TypeConflict {
                        collection: collection.to_string(),
                        field: field.to_string(),
                        existing,
                        incoming,
                    }
                })?),
            };
        }
    }

    Ok(columns)
}
