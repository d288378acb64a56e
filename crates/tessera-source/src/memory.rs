use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use bson::{Bson, Document};

use crate::error::SourceError;
use crate::matcher::{self, lookup_path};
use crate::pipeline;
use crate::source::{DocumentSource, FindOptions};
use crate::driver;

type Collections = HashMap<String, Vec<Document>>;

#[derive(Default)]
struct Inner {
    databases: RwLock<HashMap<String, Collections>>,
}

/// In-process document store.
///
/// Connections are keyed by uri: two `connect` calls with the same uri share
/// the same data, mirroring how a wire driver's connection pool points at one
/// server. Used by tests and embedded deployments.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Inner>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<Inner>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl MemorySource {
    pub fn insert_many(&self, db: &str, collection: &str, docs: Vec<Document>) {
        let mut databases = self.inner.databases.write().unwrap();
        databases
            .entry(db.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    pub fn create_database(&self, db: &str) {
        let mut databases = self.inner.databases.write().unwrap();
        databases.entry(db.to_string()).or_default();
    }

    pub fn create_collection(&self, db: &str, collection: &str) {
        let mut databases = self.inner.databases.write().unwrap();
        databases
            .entry(db.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
    }

    /// Drop everything behind this uri. Used by tests that reuse a uri.
    pub fn clear(&self) {
        self.inner.databases.write().unwrap().clear();
    }

    fn snapshot(&self, db: &str, collection: &str) -> Vec<Document> {
        let databases = self.inner.databases.read().unwrap();
        databases
            .get(db)
            .and_then(|c| c.get(collection))
            .cloned()
            .unwrap_or_default()
    }
}

pub struct MemoryCursor {
    docs: std::vec::IntoIter<Document>,
}

impl Iterator for MemoryCursor {
    type Item = Result<Document, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next().map(Ok)
    }
}

impl DocumentSource for MemorySource {
    type Cursor = MemoryCursor;

    fn connect(uri: &str) -> Result<Self, SourceError> {
        driver::global();
        if !uri.contains("://") {
            return Err(SourceError::InvalidUri(uri.to_string()));
        }
        let mut registry = registry().lock().unwrap();
        let inner = registry
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(Inner::default()))
            .clone();
        Ok(MemorySource { inner })
    }

    fn list_databases(&self) -> Result<Vec<String>, SourceError> {
        let databases = self.inner.databases.read().unwrap();
        let mut names: Vec<String> = databases.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn list_collections(&self, db: &str) -> Result<Vec<String>, SourceError> {
        let databases = self.inner.databases.read().unwrap();
        let mut names: Vec<String> = databases
            .get(db)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    fn find_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, SourceError> {
        for document in self.snapshot(db, collection) {
            if matcher::matches(&filter, &document)? {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }

    fn find(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<Self::Cursor, SourceError> {
        let mut result = Vec::new();
        for document in self.snapshot(db, collection) {
            if matcher::matches(&filter, &document)? {
                result.push(document);
            }
            if let Some(limit) = options.limit {
                if limit > 0 && result.len() as i64 >= limit {
                    break;
                }
            }
        }
        if let Some(projection) = &options.projection {
            result = result
                .into_iter()
                .map(|d| apply_projection(&d, projection))
                .collect();
        }
        Ok(MemoryCursor {
            docs: result.into_iter(),
        })
    }

    fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Self::Cursor, SourceError> {
        let docs = self.snapshot(db, collection);
        let result = pipeline::run_pipeline(&pipeline, docs)?;
        Ok(MemoryCursor {
            docs: result.into_iter(),
        })
    }
}

/// Apply an inclusion projection, rebuilding nested documents for dotted
/// paths. `_id` is included unless explicitly suppressed with `_id: 0`.
fn apply_projection(document: &Document, projection: &Document) -> Document {
    let mut out = Document::new();
    let mut id_requested = false;
    for (path, flag) in projection.iter() {
        let include = !matches!(flag, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false));
        if path == "_id" {
            id_requested = true;
            if !include {
                continue;
            }
        }
        if !include {
            continue;
        }
        if let Some(value) = lookup_path(document, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    if !id_requested {
        if let Some(id) = document.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    out
}

fn insert_path(target: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            if !matches!(target.get(head), Some(Bson::Document(_))) {
                target.insert(head.to_string(), Document::new());
            }
            if let Some(Bson::Document(sub)) = target.get_mut(head) {
                insert_path(sub, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn connect_shares_data_per_uri() {
        let a = MemorySource::connect("mem://share").unwrap();
        a.insert_many("db", "t", vec![doc! { "_id": 1 }]);
        let b = MemorySource::connect("mem://share").unwrap();
        let rows: Vec<_> = b
            .find("db", "t", doc! {}, FindOptions::default())
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn invalid_uri_rejected() {
        assert!(matches!(
            MemorySource::connect("no-scheme"),
            Err(SourceError::InvalidUri(_))
        ));
    }

    #[test]
    fn find_respects_filter_and_limit() {
        let src = MemorySource::connect("mem://find").unwrap();
        src.insert_many(
            "db",
            "t",
            vec![
                doc! { "_id": 1, "x": 1 },
                doc! { "_id": 2, "x": 2 },
                doc! { "_id": 3, "x": 2 },
            ],
        );
        let opts = FindOptions {
            limit: Some(1),
            projection: None,
        };
        let rows: Vec<_> = src
            .find("db", "t", doc! { "x": 2 }, opts)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![doc! { "_id": 2, "x": 2 }]);
    }

    #[test]
    fn projection_rebuilds_nested_paths() {
        let src = MemorySource::connect("mem://proj").unwrap();
        src.insert_many(
            "db",
            "t",
            vec![doc! { "_id": 1, "addr": { "city": "X", "zip": "10" }, "other": 5 }],
        );
        let opts = FindOptions {
            limit: None,
            projection: Some(doc! { "addr.city": 1, "_id": 1 }),
        };
        let rows: Vec<_> = src
            .find("db", "t", doc! {}, opts)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![doc! { "addr": { "city": "X" }, "_id": 1 }]);
    }

    #[test]
    fn list_names_are_sorted() {
        let src = MemorySource::connect("mem://list").unwrap();
        src.create_collection("db", "zebra");
        src.create_collection("db", "apple");
        assert_eq!(src.list_collections("db").unwrap(), vec!["apple", "zebra"]);
        assert_eq!(src.list_collections("missing").unwrap(), Vec::<String>::new());
    }
}
