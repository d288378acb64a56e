use bson::Document;

use crate::error::SourceError;

/// Options for a `find` cursor.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Maximum number of documents the cursor will yield.
    pub limit: Option<i64>,
    /// Inclusion projection applied server-side.
    pub projection: Option<Document>,
}

/// A streaming cursor over documents.
pub trait DocCursor: Iterator<Item = Result<Document, SourceError>> {}

impl<T> DocCursor for T where T: Iterator<Item = Result<Document, SourceError>> {}

/// Backend seam for the document database.
///
/// The scan layer is generic over this trait; production deployments wire a
/// real driver behind it, tests use [`MemorySource`](crate::MemorySource).
pub trait DocumentSource: Send + Sync + Sized {
    type Cursor: DocCursor;

    /// Open a connection. Must initialize the process-wide driver first.
    fn connect(uri: &str) -> Result<Self, SourceError>;

    fn list_databases(&self) -> Result<Vec<String>, SourceError>;

    fn list_collections(&self, db: &str) -> Result<Vec<String>, SourceError>;

    fn find_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, SourceError>;

    fn find(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<Self::Cursor, SourceError>;

    fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Self::Cursor, SourceError>;

    fn collection<'a>(&'a self, db: &'a str, name: &'a str) -> CollectionRef<'a, Self> {
        CollectionRef {
            source: self,
            db,
            name,
        }
    }
}

/// A `(source, database, collection)` handle.
pub struct CollectionRef<'a, S: DocumentSource> {
    source: &'a S,
    db: &'a str,
    name: &'a str,
}

impl<'a, S: DocumentSource> Clone for CollectionRef<'a, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, S: DocumentSource> Copy for CollectionRef<'a, S> {}

impl<'a, S: DocumentSource> CollectionRef<'a, S> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn find_one(&self, filter: Document) -> Result<Option<Document>, SourceError> {
        self.source.find_one(self.db, self.name, filter)
    }

    pub fn find(&self, filter: Document, options: FindOptions) -> Result<S::Cursor, SourceError> {
        self.source.find(self.db, self.name, filter, options)
    }

    pub fn aggregate(&self, pipeline: Vec<Document>) -> Result<S::Cursor, SourceError> {
        self.source.aggregate(self.db, self.name, pipeline)
    }
}
