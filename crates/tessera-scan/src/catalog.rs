use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tessera_source::DocumentSource;

use crate::bind::SCAN_FUNCTION_NAME;
use crate::error::ScanError;

/// System databases hidden when listing schemas without a pinned database.
const SYSTEM_DATABASES: &[&str] = &["admin", "local", "config"];

/// A catalog presenting one attached document store.
///
/// Holds two advisory caches behind separate mutexes: collection names per
/// database and per-collection view info (the SQL text wrapping a
/// collection as a virtual table). Cache reads copy out under the lock; no
/// lock is ever held across a source call. A miss just forces the
/// expensive path.
pub struct DocumentCatalog<S: DocumentSource> {
    source: Arc<S>,
    connection_uri: String,
    /// When set, only this database is exposed as a schema.
    database: Option<String>,
    collection_cache: Mutex<HashMap<String, Vec<String>>>,
    view_cache: Mutex<HashMap<String, String>>,
}

impl<S: DocumentSource> DocumentCatalog<S> {
    pub fn new(source: Arc<S>, connection_uri: &str, database: Option<String>) -> Self {
        DocumentCatalog {
            source,
            connection_uri: connection_uri.to_string(),
            database,
            collection_cache: Mutex::new(HashMap::new()),
            view_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Databases exposed as schemas. A listing failure recovers to an
    /// empty list so ATTACH succeeds; queries against the missing
    /// database fail later with a driver error.
    pub fn schema_names(&self) -> Vec<String> {
        if let Some(database) = &self.database {
            return match self.source.list_collections(database) {
                Ok(_) => vec![database.clone()],
                Err(e) => {
                    tracing::warn!(database = %database, error = %e, "schema scan failed");
                    vec![]
                }
            };
        }
        match self.source.list_databases() {
            Ok(names) => names
                .into_iter()
                .filter(|n| !SYSTEM_DATABASES.contains(&n.as_str()))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "database listing failed");
                vec![]
            }
        }
    }

    /// Collection names for a database, cached after the first listing.
    pub fn collection_names(&self, database: &str) -> Result<Vec<String>, ScanError> {
        {
            let cache = self.collection_cache.lock().unwrap();
            if let Some(names) = cache.get(database) {
                return Ok(names.clone());
            }
        }
        let names = self.source.list_collections(database)?;
        tracing::debug!(database = %database, count = names.len(), "cached collection list");
        let mut cache = self.collection_cache.lock().unwrap();
        cache.insert(database.to_string(), names.clone());
        Ok(names)
    }

    /// Look up a collection by name (case-insensitive), the way schema
    /// entry resolution does.
    pub fn find_collection(
        &self,
        database: &str,
        name: &str,
    ) -> Result<Option<String>, ScanError> {
        let names = self.collection_names(database)?;
        Ok(names.into_iter().find(|n| n.eq_ignore_ascii_case(name)))
    }

    /// The SQL text wrapping a collection as a virtual table, cached per
    /// collection.
    pub fn view_sql(&self, database: &str, collection: &str) -> String {
        let key = format!("{database}.{collection}");
        {
            let cache = self.view_cache.lock().unwrap();
            if let Some(sql) = cache.get(&key) {
                return sql.clone();
            }
        }
        let sql = format!(
            "SELECT * FROM {SCAN_FUNCTION_NAME}('{}', '{}', '{}')",
            escape_sql_string(&self.connection_uri),
            escape_sql_string(database),
            escape_sql_string(collection),
        );
        let mut cache = self.view_cache.lock().unwrap();
        cache.insert(key, sql.clone());
        sql
    }

    /// Invalidate both caches. Collection lock first, then view-info lock;
    /// safe while scans run, since only future lookups are affected.
    pub fn clear_cache(&self) {
        let mut collections = self.collection_cache.lock().unwrap();
        collections.clear();
        drop(collections);
        let mut views = self.view_cache.lock().unwrap();
        views.clear();
        tracing::debug!("cleared catalog caches");
    }

    // The bridge is read-only; every write surface is rejected.

    pub fn create_table(&self, _name: &str) -> Result<(), ScanError> {
        Err(ScanError::NotImplemented(
            "CREATE TABLE is not supported for document catalogs".into(),
        ))
    }

    pub fn create_index(&self, _name: &str) -> Result<(), ScanError> {
        Err(ScanError::NotImplemented(
            "CREATE INDEX is not supported for document catalogs".into(),
        ))
    }

    pub fn insert(&self, _collection: &str) -> Result<(), ScanError> {
        Err(ScanError::NotImplemented(
            "INSERT is not supported for document catalogs".into(),
        ))
    }

    pub fn update(&self, _collection: &str) -> Result<(), ScanError> {
        Err(ScanError::NotImplemented(
            "UPDATE is not supported for document catalogs".into(),
        ))
    }

    pub fn delete(&self, _collection: &str) -> Result<(), ScanError> {
        Err(ScanError::NotImplemented(
            "DELETE is not supported for document catalogs".into(),
        ))
    }
}

/// Double single quotes for embedding in SQL text.
fn escape_sql_string(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '\'' {
            escaped.push('\'');
        }
        escaped.push(c);
    }
    escaped
}

/// The `mongo_clear_cache()` table function: invalidate a catalog's caches
/// and report one boolean row.
pub fn clear_cache<S: DocumentSource>(catalog: &DocumentCatalog<S>) -> bool {
    catalog.clear_cache();
    true
}
