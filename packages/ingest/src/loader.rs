//! Bulk loader: replace-or-append a collection, then provision indexes.

use std::collections::BTreeMap;
use std::sync::Arc;

use opencellid_database::schema::ColumnType;
use opencellid_database::{DocumentStore, IndexKind};
use opencellid_decode::DecodeError;
use opencellid_models::progress::ProgressCallback;
use opencellid_models::{Batch, COORDS_FIELD};

use crate::IngestError;

/// How a load treats the existing collection and which fields it indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Drop the collection (documents and indexes) before inserting.
    pub drop: bool,
    /// Fields that get an ascending index once all documents are in.
    pub index_fields: Vec<String>,
}

/// What a load did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub batches: u64,
    pub documents: u64,
    /// Indexes this load created; already existing ones are not listed.
    pub indexes_created: Vec<String>,
}

/// Loads normalized `batches` into `collection`.
///
/// The drop and every insert run as one store load: a batch that fails to
/// decode or insert rolls all of it back, leaving the collection, its
/// documents and its indexes as they were. `fields` are the document fields
/// the artifact declares; they create the collection when the artifact has
/// no rows, so the indexes exist either way.
///
/// Once the load is committed the spatial index on `coords` is ensured,
/// followed by one ascending index per entry of
/// [`LoadOptions::index_fields`].
///
/// # Errors
///
/// * [`IngestError::ParseFailed`] if a batch cannot be decoded. Nothing is
///   written.
/// * [`IngestError::LoadFailed`] if a drop or insert fails (nothing is
///   written) or an index operation fails (documents stay, indexes may be
///   missing).
pub fn load<S, I>(
    store: &mut S,
    collection: &str,
    fields: &[String],
    batches: I,
    options: &LoadOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<LoadSummary, IngestError>
where
    S: DocumentStore + ?Sized,
    I: IntoIterator<Item = Result<Batch, DecodeError>>,
{
    store
        .begin_load()
        .map_err(IngestError::load_failed(collection))?;

    let mut summary = match load_documents(store, collection, fields, batches, options, progress) {
        Ok(summary) => summary,
        Err(e) => {
            log::warn!("{collection}: load failed, rolling back");
            if let Err(rollback) = store.rollback_load() {
                log::error!("{collection}: rollback failed: {rollback}");
            }
            progress.finish_and_clear();
            return Err(e);
        }
    };

    store
        .commit_load()
        .map_err(IngestError::load_failed(collection))?;

    let exists = store
        .collection_exists(collection)
        .map_err(IngestError::load_failed(collection))?;
    if !exists {
        log::warn!("{collection}: no fields and no documents, skipping indexes");
        progress.finish("no documents loaded".to_string());
        return Ok(summary);
    }

    progress.set_message(format!("indexing {collection}"));

    let indexes = std::iter::once((COORDS_FIELD, IndexKind::Geo2d)).chain(
        options
            .index_fields
            .iter()
            .map(|field| (field.as_str(), IndexKind::Ascending)),
    );

    for (field, kind) in indexes {
        let created = store
            .ensure_index(collection, field, kind)
            .map_err(IngestError::load_failed(collection))?;
        if created {
            log::info!("{collection}: created {kind} index on {field}");
            summary
                .indexes_created
                .push(format!("{collection}_{field}_{kind}"));
        } else {
            log::debug!("{collection}: {kind} index on {field} already exists");
        }
    }

    progress.finish(format!("{} documents loaded", summary.documents));

    Ok(summary)
}

/// The part of [`load`] that runs inside the store load.
fn load_documents<S, I>(
    store: &mut S,
    collection: &str,
    fields: &[String],
    batches: I,
    options: &LoadOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<LoadSummary, IngestError>
where
    S: DocumentStore + ?Sized,
    I: IntoIterator<Item = Result<Batch, DecodeError>>,
{
    if options.drop {
        log::info!("Dropping collection {collection}");
        store
            .drop_collection(collection)
            .map_err(IngestError::load_failed(collection))?;
    }

    let mut summary = LoadSummary::default();

    for batch in batches {
        let batch = batch?;
        let inserted = store
            .insert_many(collection, &batch)
            .map_err(IngestError::load_failed(collection))?;

        summary.batches += 1;
        summary.documents += inserted;
        progress.inc(inserted);
        log::debug!(
            "{collection}: batch {} stored {inserted} documents ({} total)",
            summary.batches,
            summary.documents,
        );
    }

    if !fields.is_empty() {
        let created = store
            .ensure_collection(collection, &field_types(fields))
            .map_err(IngestError::load_failed(collection))?;
        if created {
            log::info!("{collection}: created empty collection");
        }
    }

    Ok(summary)
}

/// Known column types of the declared fields: only `coords` is fixed.
fn field_types(fields: &[String]) -> BTreeMap<String, Option<ColumnType>> {
    fields
        .iter()
        .map(|field| {
            let ty = (field == COORDS_FIELD).then_some(ColumnType::Point);
            (field.clone(), ty)
        })
        .collect()
}
