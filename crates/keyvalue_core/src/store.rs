use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use crate::error::{KeyValueError, Result, is_missing_table};
use crate::listing::MSG_TABLE_RECREATED;
use crate::reconcile::ReplaceSet;
use crate::triple::{OwnerId, Triple};

pub const TABLE_NAME: &str = "keyvalue";
pub const INDEX_NAME: &str = "keyvalueindex";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS keyvalue (
    article_id INTEGER NOT NULL,
    kvcategory TEXT NOT NULL,
    kvkey TEXT NOT NULL,
    kvvalue TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS keyvalueindex ON keyvalue(article_id, kvcategory);
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub rows: usize,
    pub owners: usize,
    pub categories: usize,
}

/// Persistence collaborator for reconciled key values.
///
/// Implementations provision their schema on first use and must apply a
/// [`ReplaceSet`] atomically: readers see the owner's old rows or the new
/// ones, never a mix.
pub trait TripleStore {
    /// Returns the number of rows inserted.
    fn replace_all(&mut self, set: &ReplaceSet) -> Result<usize>;

    /// Triples of `category` ordered by `(key, value)`.
    fn list_by_category(&mut self, category: &str) -> Result<Vec<Triple>>;

    /// Categories with their row counts, ordered by category.
    fn list_categories(&mut self) -> Result<Vec<CategoryCount>>;

    /// Every stored triple ordered by `(category, key, value)`.
    fn list_all(&mut self) -> Result<Vec<Triple>>;

    /// Triples owned by `owner` ordered by `(category, key)`.
    fn list_by_owner(&mut self, owner: OwnerId) -> Result<Vec<Triple>>;
}

pub struct SqliteStore {
    connection: Connection,
    path: Option<PathBuf>,
    schema_ready: bool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self::from_connection(connection, Some(db_path.to_path_buf())))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?, None))
    }

    fn from_connection(connection: Connection, path: Option<PathBuf>) -> Self {
        Self {
            connection,
            path,
            schema_ready: false,
        }
    }

    /// Creates the table and its index when missing. Returns `true` when
    /// the table had to be created.
    pub fn ensure_schema(&mut self) -> Result<bool> {
        if self.schema_ready {
            return Ok(false);
        }
        let created = self.provision()?;
        self.schema_ready = true;
        Ok(created)
    }

    pub fn schema_exists(&self) -> Result<bool> {
        table_exists(&self.connection, TABLE_NAME)
    }

    pub fn stats(&mut self) -> Result<StoreStats> {
        self.execute(|connection| {
            let (rows, owners, categories): (i64, i64, i64) = connection.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT article_id), COUNT(DISTINCT kvcategory)
                 FROM keyvalue",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(StoreStats {
                rows: to_count(rows),
                owners: to_count(owners),
                categories: to_count(categories),
            })
        })
    }

    /// Runs `operation` against a provisioned schema. If the table vanished
    /// since it was last checked, it is created again and `operation` is
    /// retried exactly once.
    fn execute<T, F>(&mut self, mut operation: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        self.ensure_schema()?;
        match operation(&mut self.connection) {
            Err(err) if err.is_schema_missing() => {
                tracing::warn!(table = TABLE_NAME, "{MSG_TABLE_RECREATED}");
                self.schema_ready = false;
                self.ensure_schema()?;
                operation(&mut self.connection).map_err(|retry_err| match retry_err {
                    KeyValueError::Storage(source) | KeyValueError::ReplaceFailed { source, .. }
                        if is_missing_table(&source) =>
                    {
                        KeyValueError::SchemaMissing(source)
                    }
                    other => other,
                })
            }
            other => other,
        }
    }

    // The batch is idempotent, so it also backfills the index on tables
    // created without it.
    fn provision(&mut self) -> Result<bool> {
        let existed = table_exists(&self.connection, TABLE_NAME)?;
        let transaction = self.connection.transaction()?;
        transaction.execute_batch(SCHEMA_SQL)?;
        transaction.commit()?;
        if !existed {
            tracing::info!(
                table = TABLE_NAME,
                index = INDEX_NAME,
                db = ?self.path,
                "created keyvalue table"
            );
        }
        Ok(!existed)
    }
}

impl TripleStore for SqliteStore {
    fn replace_all(&mut self, set: &ReplaceSet) -> Result<usize> {
        let owner = set.owner_id();
        let inserted = self.execute(|connection| {
            apply_replace(connection, set)
                .map_err(|source| KeyValueError::ReplaceFailed { owner, source })
        })?;
        tracing::debug!(owner = owner.0, rows = inserted, "replaced key values");
        Ok(inserted)
    }

    fn list_by_category(&mut self, category: &str) -> Result<Vec<Triple>> {
        self.execute(|connection| {
            query_triples(
                connection,
                "SELECT kvcategory, kvkey, kvvalue
                 FROM keyvalue
                 WHERE kvcategory = ?1
                 ORDER BY kvkey ASC, kvvalue ASC",
                params![category],
            )
        })
    }

    fn list_categories(&mut self) -> Result<Vec<CategoryCount>> {
        self.execute(|connection| {
            let mut statement = connection.prepare(
                "SELECT kvcategory, COUNT(*) AS count
                 FROM keyvalue
                 GROUP BY kvcategory
                 ORDER BY kvcategory ASC",
            )?;
            let rows = statement.query_map([], |row| {
                let category: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok(CategoryCount {
                    category,
                    count: to_count(count),
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn list_all(&mut self) -> Result<Vec<Triple>> {
        self.execute(|connection| {
            query_triples(
                connection,
                "SELECT kvcategory, kvkey, kvvalue
                 FROM keyvalue
                 ORDER BY kvcategory ASC, kvkey ASC, kvvalue ASC",
                [],
            )
        })
    }

    fn list_by_owner(&mut self, owner: OwnerId) -> Result<Vec<Triple>> {
        self.execute(|connection| {
            query_triples(
                connection,
                "SELECT kvcategory, kvkey, kvvalue
                 FROM keyvalue
                 WHERE article_id = ?1
                 ORDER BY kvcategory ASC, kvkey ASC",
                params![owner.0],
            )
        })
    }
}

fn apply_replace(
    connection: &mut Connection,
    set: &ReplaceSet,
) -> std::result::Result<usize, rusqlite::Error> {
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    transaction.execute(
        "DELETE FROM keyvalue WHERE article_id = ?1",
        params![set.owner_id().0],
    )?;
    let mut inserted = 0usize;
    {
        let mut statement = transaction.prepare(
            "INSERT INTO keyvalue (article_id, kvcategory, kvkey, kvvalue)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for row in set.rows() {
            inserted += statement.execute(params![
                row.owner_id.0,
                row.triple.category,
                row.triple.key,
                row.triple.value,
            ])?;
        }
    }
    transaction.commit()?;
    Ok(inserted)
}

fn query_triples<P: rusqlite::Params>(
    connection: &Connection,
    sql: &str,
    parameters: P,
) -> Result<Vec<Triple>> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map(parameters, |row| {
        Ok(Triple {
            category: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    let found = connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn to_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}
