//! Folds the flat `lon`/`lat` fields of a record into a `coords` point.
//!
//! A record is only rewritten when both coordinates are numeric. Anything
//! else (a missing field, an empty cell, text) leaves the record exactly as
//! decoded, so it is stored without `coords` and stays out of spatial
//! queries.

use opencellid_models::{Batch, COORDS_FIELD, FieldValue, GeoPoint, LAT_FIELD, LON_FIELD, Record};

/// Returns the normalized copy of `record`.
#[must_use]
pub fn normalize_record(record: &Record) -> Record {
    into_normalized(record.clone())
}

/// Normalizes `record` in place of the original.
#[must_use]
pub fn into_normalized(mut record: Record) -> Record {
    let lon = record.get(LON_FIELD).and_then(FieldValue::as_f64);
    let lat = record.get(LAT_FIELD).and_then(FieldValue::as_f64);

    if let (Some(lon), Some(lat)) = (lon, lat) {
        record.remove(LON_FIELD);
        record.remove(LAT_FIELD);
        record.insert(COORDS_FIELD, GeoPoint::new(lon, lat));
    }

    record
}

/// Returns a new batch with every record normalized. `batch` is not touched.
#[must_use]
pub fn normalize_batch(batch: &Batch) -> Batch {
    batch.iter().map(normalize_record).collect()
}

/// Consuming form of [`normalize_batch`] used on the decode stream.
#[must_use]
pub fn normalize_owned_batch(batch: Batch) -> Batch {
    batch.into_iter().map(into_normalized).collect()
}

/// Field names normalized documents carry for a dump with these `headers`.
#[must_use]
pub fn normalized_fields(headers: &[String]) -> Vec<String> {
    let has = |name: &str| headers.iter().any(|h| h == name);
    if !(has(LON_FIELD) && has(LAT_FIELD)) {
        return headers.to_vec();
    }

    headers
        .iter()
        .filter(|h| *h != LON_FIELD && *h != LAT_FIELD)
        .cloned()
        .chain(std::iter::once(COORDS_FIELD.to_string()))
        .collect()
}
