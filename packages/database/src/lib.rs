#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Destination store for normalized cell tower documents.
//!
//! [`DocumentStore`] is the small set of primitives the bulk loader needs:
//! run a load as one unit, drop a collection, insert a batch atomically, and
//! ensure an index.
//! [`duckdb_store::DuckDbStore`] implements it on an embedded `DuckDB`
//! database where each collection is a table whose columns follow the
//! document fields.

pub mod duckdb_store;
pub mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use opencellid_models::Batch;

use crate::schema::ColumnType;

pub use duckdb_store::DuckDbStore;

/// Kind of index to ensure on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKind {
    /// Ordinary ascending index on a scalar field.
    Ascending,
    /// Two-dimensional index over the `lon`/`lat` of a point field.
    Geo2d,
}

impl IndexKind {
    /// Suffix used in index names (`mcc_1`, `coords_2d`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "1",
            Self::Geo2d => "2d",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::Ascending),
            "2d" => Ok(Self::Geo2d),
            other => Err(StoreError::Catalog(format!("unknown index kind '{other}'"))),
        }
    }
}

/// A provisioned index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexSpec {
    /// Store-wide index name, `{collection}_{field}_{kind}`.
    pub name: String,
    /// Indexed field.
    pub field: String,
    pub kind: IndexKind,
}

impl IndexSpec {
    #[must_use]
    pub fn new(collection: &str, field: &str, kind: IndexKind) -> Self {
        Self {
            name: format!("{collection}_{field}_{kind}"),
            field: field.to_string(),
            kind,
        }
    }
}

/// Bulk-insert and index primitives of a document store.
pub trait DocumentStore {
    /// Starts a load. Every drop, insert, and schema change up to
    /// [`Self::commit_load`] or [`Self::rollback_load`] becomes visible
    /// together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a load is already open or the store cannot
    /// start one.
    fn begin_load(&mut self) -> Result<(), StoreError>;

    /// Makes the open load permanent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if no load is open or the commit fails.
    fn commit_load(&mut self) -> Result<(), StoreError>;

    /// Discards everything the open load did.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if no load is open or the rollback fails.
    fn rollback_load(&mut self) -> Result<(), StoreError>;

    /// Whether the collection holds (or has held) documents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    /// Creates an empty collection with the given fields if it does not
    /// exist. Fields without a known type hold text until documents arrive.
    ///
    /// Returns `true` if the collection was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the collection cannot be created.
    fn ensure_collection(
        &mut self,
        collection: &str,
        fields: &BTreeMap<String, Option<ColumnType>>,
    ) -> Result<bool, StoreError>;

    /// Irrecoverably removes every document and index of the collection.
    /// Dropping a missing collection is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the drop fails.
    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError>;

    /// Appends every record of `batch` as one document, in order. Either the
    /// whole batch is stored or none of it is.
    ///
    /// Returns the number of documents inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any document cannot be stored.
    fn insert_many(&mut self, collection: &str, batch: &Batch) -> Result<u64, StoreError>;

    /// Makes sure an index of `kind` exists on `field`. Calling it again with
    /// the same arguments is a no-op.
    ///
    /// Returns `true` if the index was created by this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the collection or field does not exist or
    /// the index cannot be built.
    fn ensure_index(
        &mut self,
        collection: &str,
        field: &str,
        kind: IndexKind,
    ) -> Result<bool, StoreError>;

    /// Number of documents in the collection (0 if it does not exist).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the count query fails.
    fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;

    /// Indexes ensured on the collection, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the index catalog cannot be read.
    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError>;
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A field's values cannot share one column type.
    #[error("field '{field}' in '{collection}' holds {existing} values, cannot store {incoming}")]
    TypeConflict {
        /// Collection name.
        collection: String,
        /// Field name.
        field: String,
        /// Column type already in the store.
        existing: ColumnType,
        /// Type of the incoming value.
        incoming: ColumnType,
    },

    /// A document uses a field name the store reserves.
    #[error("field name '{0}' is reserved")]
    ReservedField(String),

    /// A collection name the store cannot use.
    #[error("invalid collection name '{0}'")]
    InvalidName(String),

    /// Index requested on a collection that was never created.
    #[error("collection '{0}' does not exist")]
    MissingCollection(String),

    /// Index requested on a field no document has.
    #[error("collection '{collection}' has no field '{field}'")]
    UnknownField {
        /// Collection name.
        collection: String,
        /// Field name.
        field: String,
    },

    /// Load session misuse.
    #[error("{0}")]
    Session(&'static str),

    /// The index catalog holds something unexpected.
    #[error("index catalog error: {0}")]
    Catalog(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_follow_field_and_kind() {
        assert_eq!(
            IndexSpec::new("cell_towers", "mcc", IndexKind::Ascending).name,
            "cell_towers_mcc_1"
        );
        assert_eq!(
            IndexSpec::new("cell_towers", "coords", IndexKind::Geo2d).name,
            "cell_towers_coords_2d"
        );
    }

    #[test]
    fn index_kind_parses_its_own_suffix() {
        for kind in [IndexKind::Ascending, IndexKind::Geo2d] {
            assert_eq!(kind.as_str().parse::<IndexKind>().unwrap(), kind);
        }
        assert!("hashed".parse::<IndexKind>().is_err());
    }
}
