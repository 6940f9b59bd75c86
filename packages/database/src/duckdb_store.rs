//! `DuckDB` implementation of [`DocumentStore`].
//!
//! Each collection is a table named after it. Document fields become
//! columns, `GeoPoint`s are stored as a `STRUCT("type", lon, lat)` column,
//! and an `_id` column fed by a per-collection sequence records arrival
//! order. Ensured indexes are tracked in the `_indexes` catalog table.
//!
//! A load session is one `DuckDB` transaction. `DuckDB` cannot build an
//! index on a table with uncommitted rows, so indexes that a schema change
//! has to drop during a session are rebuilt from the catalog on commit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use duckdb::Connection;
use duckdb::types::Value;
use opencellid_models::{Batch, FieldValue, GeoPoint};

use crate::schema::{self, ColumnType, ID_COLUMN, POINT_SQL};
use crate::{DocumentStore, IndexKind, IndexSpec, StoreError};

/// Catalog of ensured indexes.
const CATALOG_TABLE: &str = "_indexes";

/// Upper bound on bound parameters per INSERT statement.
const MAX_PARAMS_PER_STATEMENT: usize = 30_000;

/// Upper bound on rows per INSERT statement.
const MAX_ROWS_PER_STATEMENT: usize = 5_000;

/// A document store backed by one `DuckDB` database.
///
/// The connection is closed when the store is dropped, which also rolls
/// back a load that was never committed.
pub struct DuckDbStore {
    conn: Connection,
    /// Column types per collection, loaded lazily from the catalog.
    schemas: BTreeMap<String, BTreeMap<String, ColumnType>>,
    /// Whether a load transaction is open.
    in_load: bool,
    /// Collections whose indexes were dropped inside the open load.
    suspended: BTreeSet<String>,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("schemas", &self.schemas)
            .field("in_load", &self.in_load)
            .finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created, the file
    /// cannot be opened, or the index catalog cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened DuckDB store at {}", path.display());
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `DuckDB` cannot be initialized.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(&format!(
            "SET threads = 4;

             CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (
                collection TEXT NOT NULL,
                name TEXT NOT NULL,
                field TEXT NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (collection, name)
             );"
        ))?;

        Ok(Self {
            conn,
            schemas: BTreeMap::new(),
            in_load: false,
            suspended: BTreeSet::new(),
        })
    }

    /// The underlying connection, for ad-hoc inspection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection, reporting any error `DuckDB` raises on close.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `DuckDB` fails to close cleanly.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::DuckDb(e))
    }

    /// Field names stored in the collection (without `_id`), in name order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the catalog query fails.
    pub fn fields(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .table_columns(collection)?
            .map(|columns| columns.into_keys().collect())
            .unwrap_or_default())
    }

    /// Names of the indexes `DuckDB` actually holds for the collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn physical_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT index_name FROM duckdb_indexes()
             WHERE table_name = ? ORDER BY index_name",
        )?;
        let rows = stmt.query_map([collection], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn table_columns(
        &self,
        collection: &str,
    ) -> Result<Option<BTreeMap<String, ColumnType>>, StoreError> {
        if !self.collection_exists(collection)? {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns
             WHERE table_schema = 'main' AND table_name = ?
             ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut columns = BTreeMap::new();
        for row in rows {
            let (name, data_type) = row?;
            if name != ID_COLUMN {
                columns.insert(name, ColumnType::from_sql(&data_type));
            }
        }

        Ok(Some(columns))
    }

    fn cached_columns(
        &mut self,
        collection: &str,
    ) -> Result<Option<BTreeMap<String, ColumnType>>, StoreError> {
        if let Some(columns) = self.schemas.get(collection) {
            return Ok(Some(columns.clone()));
        }

        let loaded = self.table_columns(collection)?;
        if let Some(columns) = &loaded {
            self.schemas
                .insert(collection.to_string(), columns.clone());
        }
        Ok(loaded)
    }

    /// Creates or evolves the collection table so it can hold every column
    /// of the incoming batch. Returns the column type for each incoming
    /// field.
    fn sync_schema(
        &mut self,
        collection: &str,
        incoming: &BTreeMap<String, Option<ColumnType>>,
    ) -> Result<BTreeMap<String, ColumnType>, StoreError> {
        let result = self.sync_schema_inner(collection, incoming);
        if result.is_err() {
            // DDL may have partially applied; reload on next use.
            self.schemas.remove(collection);
        }
        result
    }

    fn sync_schema_inner(
        &mut self,
        collection: &str,
        incoming: &BTreeMap<String, Option<ColumnType>>,
    ) -> Result<BTreeMap<String, ColumnType>, StoreError> {
        let Some(mut current) = self.cached_columns(collection)? else {
            let columns: BTreeMap<String, ColumnType> = incoming
                .iter()
                .map(|(field, ty)| (field.clone(), ty.unwrap_or(ColumnType::Text)))
                .collect();
            self.create_collection(collection, &columns)?;
            self.schemas
                .insert(collection.to_string(), columns.clone());
            return Ok(columns);
        };

        let table = quote_ident(collection);
        let mut alterations = Vec::new();
        let mut empty = None;

        for (field, incoming_type) in incoming {
            match (current.get(field).copied(), *incoming_type) {
                (None, ty) => {
                    let ty = ty.unwrap_or(ColumnType::Text);
                    log::debug!("{collection}: adding field '{field}' ({ty})");
                    alterations.push(format!(
                        "ALTER TABLE {table} ADD COLUMN {} {};",
                        quote_ident(field),
                        ty.sql()
                    ));
                    current.insert(field.clone(), ty);
                }
                (Some(existing), Some(ty)) if existing != ty => {
                    let is_empty = match empty {
                        Some(is_empty) => is_empty,
                        None => {
                            let is_empty = self.count_documents(collection)? == 0;
                            empty = Some(is_empty);
                            is_empty
                        }
                    };

                    // Columns of an empty collection take whatever the first
                    // documents hold.
                    let target = if is_empty {
                        ty
                    } else {
                        match existing.widen(ty) {
                            Some(widened) if widened == existing => continue,
                            Some(widened) => widened,
                            None => {
                                return Err(StoreError::TypeConflict {
                                    collection: collection.to_string(),
                                    field: field.clone(),
                                    existing,
                                    incoming: ty,
                                });
                            }
                        }
                    };

                    log::info!("{collection}: changing field '{field}' from {existing} to {target}");
                    alterations.push(format!(
                        "ALTER TABLE {table} ALTER COLUMN {} SET DATA TYPE {};",
                        quote_ident(field),
                        target.sql()
                    ));
                    current.insert(field.clone(), target);
                }
                _ => {}
            }
        }

        if !alterations.is_empty() {
            self.alter_collection(collection, &alterations)?;
        }

        let types = incoming
            .keys()
            .filter_map(|field| current.get(field).map(|ty| (field.clone(), *ty)))
            .collect();
        self.schemas.insert(collection.to_string(), current);

        Ok(types)
    }

    /// Runs schema changes with the collection's indexes out of the way,
    /// since `DuckDB` refuses to alter a column an index depends on.
    fn alter_collection(&mut self, collection: &str, alterations: &[String]) -> Result<(), StoreError> {
        let indexes = self.list_indexes(collection)?;

        for index in &indexes {
            self.conn
                .execute_batch(&format!("DROP INDEX IF EXISTS {};", quote_ident(&index.name)))?;
        }
        for ddl in alterations {
            self.conn.execute_batch(ddl)?;
        }

        if indexes.is_empty() {
            return Ok(());
        }

        if self.in_load {
            log::debug!("{collection}: {} indexes rebuilt on commit", indexes.len());
            self.suspended.insert(collection.to_string());
        } else {
            self.rebuild_indexes(collection)?;
        }
        Ok(())
    }

    /// Recreates every catalog index of the collection that is missing.
    fn rebuild_indexes(&self, collection: &str) -> Result<(), StoreError> {
        if !self.collection_exists(collection)? {
            return Ok(());
        }
        for index in self.list_indexes(collection)? {
            self.conn
                .execute_batch(&index_ddl(collection, &index.field, index.kind))?;
        }
        Ok(())
    }

    fn create_collection(
        &self,
        collection: &str,
        columns: &BTreeMap<String, ColumnType>,
    ) -> Result<(), StoreError> {
        let sequence = sequence_name(collection);
        let mut ddl = format!(
            "CREATE SEQUENCE IF NOT EXISTS {sequence} START 1;
             CREATE TABLE {} ({} BIGINT DEFAULT nextval('{sequence}')",
            quote_ident(collection),
            quote_ident(ID_COLUMN),
        );
        for (field, ty) in columns {
            ddl.push_str(&format!(", {} {}", quote_ident(field), ty.sql()));
        }
        ddl.push_str(");");

        log::debug!("Creating collection {collection} with {} fields", columns.len());
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }
}

impl DocumentStore for DuckDbStore {
    fn begin_load(&mut self) -> Result<(), StoreError> {
        if self.in_load {
            return Err(StoreError::Session("a load is already in progress"));
        }
        self.conn.execute_batch("BEGIN TRANSACTION;")?;
        self.in_load = true;
        Ok(())
    }

    fn commit_load(&mut self) -> Result<(), StoreError> {
        if !self.in_load {
            return Err(StoreError::Session("no load in progress"));
        }
        self.conn.execute_batch("COMMIT;")?;
        self.in_load = false;

        for collection in std::mem::take(&mut self.suspended) {
            log::info!("{collection}: rebuilding indexes");
            self.rebuild_indexes(&collection)?;
        }
        Ok(())
    }

    fn rollback_load(&mut self) -> Result<(), StoreError> {
        if !self.in_load {
            return Err(StoreError::Session("no load in progress"));
        }
        self.in_load = false;
        self.suspended.clear();
        self.schemas.clear();
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let count: i64 = self
            .conn
            .prepare(
                "SELECT COUNT(*) FROM information_schema.tables
                 WHERE table_schema = 'main' AND table_name = ?",
            )?
            .query_row([collection], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn ensure_collection(
        &mut self,
        collection: &str,
        fields: &BTreeMap<String, Option<ColumnType>>,
    ) -> Result<bool, StoreError> {
        validate_collection_name(collection)?;
        if self.cached_columns(collection)?.is_some() {
            return Ok(false);
        }
        self.sync_schema(collection, fields)?;
        Ok(true)
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        validate_collection_name(collection)?;

        if self.in_load {
            drop_statements(&self.conn, collection)?;
        } else {
            let tx = self.conn.transaction()?;
            drop_statements(&tx, collection)?;
            tx.commit()?;
        }

        self.schemas.remove(collection);
        self.suspended.remove(collection);
        log::info!("Dropped collection {collection}");
        Ok(())
    }

    fn insert_many(&mut self, collection: &str, batch: &Batch) -> Result<u64, StoreError> {
        validate_collection_name(collection)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let incoming = schema::batch_columns(collection, batch)?;
        let columns = self.sync_schema(collection, &incoming)?;
        let fields: Vec<(&str, ColumnType)> =
            columns.iter().map(|(f, ty)| (f.as_str(), *ty)).collect();

        if self.in_load {
            insert_rows(&self.conn, collection, &fields, batch)
        } else {
            let tx = self.conn.transaction()?;
            let inserted = insert_rows(&tx, collection, &fields, batch)?;
            tx.commit()?;
            Ok(inserted)
        }
    }

    fn ensure_index(
        &mut self,
        collection: &str,
        field: &str,
        kind: IndexKind,
    ) -> Result<bool, StoreError> {
        validate_collection_name(collection)?;

        let Some(columns) = self.cached_columns(collection)? else {
            return Err(StoreError::MissingCollection(collection.to_string()));
        };

        match kind {
            IndexKind::Geo2d => match columns.get(field) {
                Some(ColumnType::Point) => {}
                Some(existing) => {
                    return Err(StoreError::TypeConflict {
                        collection: collection.to_string(),
                        field: field.to_string(),
                        existing: *existing,
                        incoming: ColumnType::Point,
                    });
                }
                None => {
                    // No document had a location yet; the column still
                    // has to exist for the index.
                    let ddl = format!(
                        "ALTER TABLE {} ADD COLUMN {} {POINT_SQL};",
                        quote_ident(collection),
                        quote_ident(field),
                    );
                    self.alter_collection(collection, &[ddl])?;
                    if let Some(cached) = self.schemas.get_mut(collection) {
                        cached.insert(field.to_string(), ColumnType::Point);
                    }
                }
            },
            IndexKind::Ascending => {
                if !columns.contains_key(field) {
                    return Err(StoreError::UnknownField {
                        collection: collection.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }

        let spec = IndexSpec::new(collection, field, kind);
        let known: i64 = self
            .conn
            .prepare(&format!(
                "SELECT COUNT(*) FROM {CATALOG_TABLE} WHERE collection = ? AND name = ?"
            ))?
            .query_row([collection, spec.name.as_str()], |row| row.get(0))?;

        self.conn.execute_batch(&index_ddl(collection, field, kind))?;

        if known > 0 {
            return Ok(false);
        }

        self.conn.execute(
            &format!(
                "INSERT INTO {CATALOG_TABLE} (collection, name, field, kind) VALUES (?, ?, ?, ?)
                 ON CONFLICT DO NOTHING"
            ),
            duckdb::params![collection, spec.name, spec.field, kind.as_str()],
        )?;
        log::debug!("Created index {} on {collection}", spec.name);

        Ok(true)
    }

    fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        validate_collection_name(collection)?;
        if !self.collection_exists(collection)? {
            return Ok(0);
        }

        let count: i64 = self
            .conn
            .prepare(&format!("SELECT COUNT(*) FROM {}", quote_ident(collection)))?
            .query_row([], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT name, field, kind FROM {CATALOG_TABLE}
             WHERE collection = ? ORDER BY name"
        ))?;
        let rows = stmt.query_map([collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        rows.map(|row| {
            let (name, field, kind) = row?;
            Ok(IndexSpec {
                name,
                field,
                kind: kind.parse()?,
            })
        })
        .collect()
    }
}

fn drop_statements(conn: &Connection, collection: &str) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {};
         DROP SEQUENCE IF EXISTS {};",
        quote_ident(collection),
        sequence_name(collection),
    ))?;
    conn.execute(
        &format!("DELETE FROM {CATALOG_TABLE} WHERE collection = ?"),
        [collection],
    )?;
    Ok(())
}

/// Inserts `batch` with chunked multi-row INSERTs on `conn`.
fn insert_rows(
    conn: &Connection,
    collection: &str,
    fields: &[(&str, ColumnType)],
    batch: &Batch,
) -> Result<u64, StoreError> {
    let table = quote_ident(collection);
    let column_list = fields
        .iter()
        .map(|(f, _)| quote_ident(f))
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / (fields.len() * 2).max(1))
        .clamp(1, MAX_ROWS_PER_STATEMENT);
    let point = format!(
        "{{'type': '{}', 'lon': CAST(? AS DOUBLE), 'lat': CAST(? AS DOUBLE)}}",
        GeoPoint::KIND
    );

    let mut inserted = 0u64;

    for chunk in batch.records().chunks(rows_per_statement) {
        let mut sql = format!("INSERT INTO {table} ({column_list}) VALUES ");
        let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * fields.len());

        for (i, record) in chunk.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (j, (field, column_type)) in fields.iter().enumerate() {
                if j > 0 {
                    sql.push_str(", ");
                }
                let value = record.get(field).unwrap_or(&FieldValue::Null);
                push_value(&mut sql, &mut params, &point, value, *column_type);
            }
            sql.push(')');
        }

        let mut stmt = conn.prepare(&sql)?;
        for (idx, value) in params.iter().enumerate() {
            stmt.raw_bind_parameter(idx + 1, value)?;
        }
        let rows = stmt.raw_execute()?;
        inserted += u64::try_from(rows).unwrap_or(0);
    }

    Ok(inserted)
}

/// Appends the VALUES expression for one field and its bound parameters.
/// `point` is the expression for a point, binding `lon` then `lat`.
fn push_value(
    sql: &mut String,
    params: &mut Vec<Value>,
    point: &str,
    value: &FieldValue,
    column_type: ColumnType,
) {
    match value {
        FieldValue::Point(p) => {
            sql.push_str(point);
            params.push(Value::Double(p.lon));
            params.push(Value::Double(p.lat));
        }
        FieldValue::Null if column_type == ColumnType::Point => sql.push_str("NULL"),
        scalar => {
            sql.push('?');
            params.push(scalar_value(scalar, column_type));
        }
    }
}

/// Converts a scalar into the `DuckDB` value for a column of `column_type`.
#[allow(clippy::cast_precision_loss)]
fn scalar_value(value: &FieldValue, column_type: ColumnType) -> Value {
    match value {
        FieldValue::Null | FieldValue::Point(_) => Value::Null,
        FieldValue::Integer(v) => match column_type {
            ColumnType::Double => Value::Double(*v as f64),
            ColumnType::Text => Value::Text(v.to_string()),
            ColumnType::Integer | ColumnType::Point => Value::BigInt(*v),
        },
        FieldValue::Float(v) => match column_type {
            ColumnType::Text => Value::Text(v.to_string()),
            ColumnType::Integer | ColumnType::Double | ColumnType::Point => Value::Double(*v),
        },
        FieldValue::Text(v) => Value::Text(v.clone()),
    }
}

/// DDL for the index of `kind` on `field`; safe to run repeatedly.
fn index_ddl(collection: &str, field: &str, kind: IndexKind) -> String {
    let index = quote_ident(&IndexSpec::new(collection, field, kind).name);
    let table = quote_ident(collection);
    let column = quote_ident(field);
    match kind {
        IndexKind::Geo2d => format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {table} \
             ((struct_extract({column}, 'lon')), (struct_extract({column}, 'lat')));"
        ),
        IndexKind::Ascending => format!("CREATE INDEX IF NOT EXISTS {index} ON {table} ({column});"),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sequence_name(collection: &str) -> String {
    format!("{collection}_id_seq")
}

/// Collection names double as table and sequence names, so they are kept
/// to `[A-Za-z0-9_]`, may not start with a digit, and the leading-underscore
/// namespace belongs to the store.
fn validate_collection_name(collection: &str) -> Result<(), StoreError> {
    let valid = collection
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use opencellid_models::{GeoPoint, Record};

    use super::*;

    const TOWERS: &str = "cell_towers";

    fn tower(cell: i64, coords: Option<(f64, f64)>) -> Record {
        let mut record: Record = [
            ("radio", FieldValue::from("LTE")),
            ("mcc", FieldValue::Integer(262)),
            ("net", FieldValue::Integer(1)),
            ("area", FieldValue::Integer(100)),
            ("cell", FieldValue::Integer(cell)),
        ]
        .into_iter()
        .collect();
        if let Some((lon, lat)) = coords {
            record.insert("coords", GeoPoint::new(lon, lat));
        }
        record
    }

    fn towers(cells: std::ops::Range<i64>) -> Batch {
        cells
            .map(|c| {
                #[allow(clippy::cast_precision_loss)]
                let f = c as f64;
                tower(c, Some((f, f + 0.5)))
            })
            .collect()
    }

    fn cells_in_order(store: &DuckDbStore) -> Vec<i64> {
        let mut stmt = store
            .connection()
            .prepare("SELECT cell FROM cell_towers ORDER BY _id")
            .unwrap();
        let cells = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        cells
    }

    #[test]
    fn inserts_documents_in_arrival_order() {
        let mut store = DuckDbStore::open_in_memory().unwrap();

        assert_eq!(store.insert_many(TOWERS, &towers(0..3)).unwrap(), 3);
        assert_eq!(store.insert_many(TOWERS, &towers(3..5)).unwrap(), 2);

        assert_eq!(store.count_documents(TOWERS).unwrap(), 5);
        assert_eq!(cells_in_order(&store), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn stores_points_as_nested_structs() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let batch: Batch = vec![tower(1, Some((13.25, 52.5))), tower(2, None)]
            .into_iter()
            .collect();
        store.insert_many(TOWERS, &batch).unwrap();

        let (kind, lon, lat): (String, f64, f64) = store
            .connection()
            .query_row(
                "SELECT struct_extract(coords, 'type'), struct_extract(coords, 'lon'),
                        struct_extract(coords, 'lat')
                 FROM cell_towers WHERE cell = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(kind, "Point");
        assert!((lon - 13.25).abs() < f64::EPSILON);
        assert!((lat - 52.5).abs() < f64::EPSILON);

        let missing: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM cell_towers WHERE coords IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(missing, 1);
    }

    #[test]
    fn drop_removes_documents_and_indexes() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..3)).unwrap();
        store.ensure_index(TOWERS, "mcc", IndexKind::Ascending).unwrap();

        store.drop_collection(TOWERS).unwrap();

        assert!(!store.collection_exists(TOWERS).unwrap());
        assert_eq!(store.count_documents(TOWERS).unwrap(), 0);
        assert!(store.list_indexes(TOWERS).unwrap().is_empty());
        assert!(store.physical_indexes(TOWERS).unwrap().is_empty());

        // The collection can be rebuilt from scratch.
        store.insert_many(TOWERS, &towers(0..2)).unwrap();
        assert_eq!(cells_in_order(&store), vec![0, 1]);
    }

    #[test]
    fn dropping_a_missing_collection_is_fine() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.drop_collection(TOWERS).unwrap();
    }

    #[test]
    fn ensure_index_is_idempotent() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..3)).unwrap();

        assert!(store.ensure_index(TOWERS, "cell", IndexKind::Ascending).unwrap());
        assert!(!store.ensure_index(TOWERS, "cell", IndexKind::Ascending).unwrap());
        assert!(store.ensure_index(TOWERS, "coords", IndexKind::Geo2d).unwrap());
        assert!(!store.ensure_index(TOWERS, "coords", IndexKind::Geo2d).unwrap());

        let indexes = store.list_indexes(TOWERS).unwrap();
        assert_eq!(
            indexes,
            vec![
                IndexSpec::new(TOWERS, "cell", IndexKind::Ascending),
                IndexSpec::new(TOWERS, "coords", IndexKind::Geo2d),
            ]
        );
        assert_eq!(
            store.physical_indexes(TOWERS).unwrap(),
            vec!["cell_towers_cell_1", "cell_towers_coords_2d"]
        );
    }

    #[test]
    fn spatial_index_without_any_location_adds_the_field() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let batch: Batch = vec![tower(1, None)].into_iter().collect();
        store.insert_many(TOWERS, &batch).unwrap();

        store.ensure_index(TOWERS, "coords", IndexKind::Geo2d).unwrap();

        assert!(store.fields(TOWERS).unwrap().contains(&"coords".to_string()));
        assert_eq!(
            store.physical_indexes(TOWERS).unwrap(),
            vec!["cell_towers_coords_2d"]
        );
    }

    #[test]
    fn index_on_unknown_field_fails() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..1)).unwrap();

        let err = store
            .ensure_index(TOWERS, "psc", IndexKind::Ascending)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }

    #[test]
    fn index_on_missing_collection_fails() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let err = store
            .ensure_index(TOWERS, "mcc", IndexKind::Ascending)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingCollection(_)));
    }

    #[test]
    fn widens_columns_and_adds_new_fields() {
        let mut store = DuckDbStore::open_in_memory().unwrap();

        let first: Batch = vec![[("cell", FieldValue::Integer(1)), ("range", FieldValue::Integer(100))]
            .into_iter()
            .collect::<Record>()]
        .into_iter()
        .collect();
        let second: Batch = vec![[
            ("cell", FieldValue::Integer(2)),
            ("range", FieldValue::Float(1.5)),
            ("samples", FieldValue::Integer(9)),
        ]
        .into_iter()
        .collect::<Record>()]
        .into_iter()
        .collect();

        store.insert_many(TOWERS, &first).unwrap();
        store.insert_many(TOWERS, &second).unwrap();

        assert_eq!(store.fields(TOWERS).unwrap(), vec!["cell", "range", "samples"]);

        let mut stmt = store
            .connection()
            .prepare("SELECT range, samples FROM cell_towers ORDER BY _id")
            .unwrap();
        let rows: Vec<(f64, Option<i64>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(rows, vec![(100.0, None), (1.5, Some(9))]);
    }

    #[test]
    fn conflicting_batch_stores_nothing() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..2)).unwrap();

        let bad: Batch = vec![
            tower(10, None),
            [("cell", FieldValue::Integer(11)), ("coords", FieldValue::from("n/a"))]
                .into_iter()
                .collect(),
        ]
        .into_iter()
        .collect();

        let err = store.insert_many(TOWERS, &bad).unwrap_err();
        assert!(matches!(err, StoreError::TypeConflict { .. }));
        assert_eq!(store.count_documents(TOWERS).unwrap(), 2);
    }

    #[test]
    fn rejects_unusable_collection_names() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        for name in ["", "_indexes", "1towers", "cell-towers", "towers; DROP"] {
            assert!(
                matches!(
                    store.insert_many(name, &towers(0..1)),
                    Err(StoreError::InvalidName(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn file_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("open_cell_id.duckdb");

        let mut store = DuckDbStore::open(&path).unwrap();
        store.insert_many(TOWERS, &towers(0..4)).unwrap();
        store.ensure_index(TOWERS, "mcc", IndexKind::Ascending).unwrap();
        store.close().unwrap();

        let store = DuckDbStore::open(&path).unwrap();
        assert_eq!(store.count_documents(TOWERS).unwrap(), 4);
        assert_eq!(
            store.list_indexes(TOWERS).unwrap(),
            vec![IndexSpec::new(TOWERS, "mcc", IndexKind::Ascending)]
        );
    }

    fn column_type(store: &DuckDbStore, field: &str) -> String {
        store
            .connection()
            .query_row(
                "SELECT data_type FROM information_schema.columns
                 WHERE table_name = 'cell_towers' AND column_name = ?",
                [field],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn fractional_cell() -> Batch {
        let mut record = tower(0, Some((1.0, 2.0)));
        record.insert("cell", FieldValue::Float(2.5));
        vec![record].into_iter().collect()
    }

    #[test]
    fn widening_an_indexed_field_keeps_its_index() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..3)).unwrap();
        store.ensure_index(TOWERS, "coords", IndexKind::Geo2d).unwrap();
        store.ensure_index(TOWERS, "cell", IndexKind::Ascending).unwrap();

        assert_eq!(store.insert_many(TOWERS, &fractional_cell()).unwrap(), 1);

        assert_eq!(store.count_documents(TOWERS).unwrap(), 4);
        assert_eq!(column_type(&store, "cell"), "DOUBLE");
        assert_eq!(
            store.physical_indexes(TOWERS).unwrap(),
            vec!["cell_towers_cell_1", "cell_towers_coords_2d"]
        );
    }

    #[test]
    fn indexes_dropped_for_a_schema_change_return_on_commit() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..3)).unwrap();
        store.ensure_index(TOWERS, "cell", IndexKind::Ascending).unwrap();

        store.begin_load().unwrap();
        store.insert_many(TOWERS, &towers(3..5)).unwrap();
        store.insert_many(TOWERS, &fractional_cell()).unwrap();
        store.commit_load().unwrap();

        assert_eq!(store.count_documents(TOWERS).unwrap(), 6);
        assert_eq!(
            store.physical_indexes(TOWERS).unwrap(),
            vec!["cell_towers_cell_1"]
        );
    }

    #[test]
    fn rolled_back_load_leaves_the_collection_as_it_was() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert_many(TOWERS, &towers(0..3)).unwrap();
        store.ensure_index(TOWERS, "mcc", IndexKind::Ascending).unwrap();

        store.begin_load().unwrap();
        store.drop_collection(TOWERS).unwrap();
        store.insert_many(TOWERS, &towers(10..11)).unwrap();
        store.rollback_load().unwrap();

        assert_eq!(cells_in_order(&store), vec![0, 1, 2]);
        assert_eq!(
            store.list_indexes(TOWERS).unwrap(),
            vec![IndexSpec::new(TOWERS, "mcc", IndexKind::Ascending)]
        );
        assert_eq!(store.physical_indexes(TOWERS).unwrap(), vec!["cell_towers_mcc_1"]);

        store.insert_many(TOWERS, &towers(3..4)).unwrap();
        assert_eq!(cells_in_order(&store), vec![0, 1, 2, 3]);
    }

    #[test]
    fn load_sessions_do_not_nest() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        assert!(matches!(store.commit_load(), Err(StoreError::Session(_))));

        store.begin_load().unwrap();
        assert!(matches!(store.begin_load(), Err(StoreError::Session(_))));
        store.rollback_load().unwrap();
        assert!(matches!(store.rollback_load(), Err(StoreError::Session(_))));
    }

    #[test]
    fn empty_collection_takes_the_types_of_its_first_documents() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let fields: BTreeMap<String, Option<ColumnType>> = [
            ("mcc".to_string(), None),
            ("cell".to_string(), None),
            ("coords".to_string(), Some(ColumnType::Point)),
        ]
        .into_iter()
        .collect();

        assert!(store.ensure_collection(TOWERS, &fields).unwrap());
        assert!(!store.ensure_collection(TOWERS, &fields).unwrap());
        store.ensure_index(TOWERS, "coords", IndexKind::Geo2d).unwrap();
        store.ensure_index(TOWERS, "mcc", IndexKind::Ascending).unwrap();
        assert_eq!(column_type(&store, "mcc"), "VARCHAR");

        store.insert_many(TOWERS, &towers(0..2)).unwrap();

        assert_eq!(column_type(&store, "mcc"), "BIGINT");
        assert_eq!(column_type(&store, "cell"), "BIGINT");
        assert_eq!(
            store.physical_indexes(TOWERS).unwrap(),
            vec!["cell_towers_coords_2d", "cell_towers_mcc_1"]
        );
    }
}
