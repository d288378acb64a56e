pub mod driver;
mod error;
pub mod matcher;
mod memory;
pub mod pipeline;
mod source;

pub use bson::{Bson, Document};
pub use error::SourceError;
pub use memory::{MemoryCursor, MemorySource};
pub use source::{CollectionRef, DocCursor, DocumentSource, FindOptions};
