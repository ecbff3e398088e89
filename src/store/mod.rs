//! Document store contract.
//!
//! The query layer only ever reads: a filtered, projected, sorted and paginated
//! `find`, and a `count` over the same filter.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use bson::Document as BsonDocument;

use crate::errors::DbError;
use crate::query::FindOptions;

#[async_trait]
pub trait Store: Send + Sync {
    /// Documents of `collection` matching `filter`, in store order unless `opts.sort` is set.
    async fn find(
        &self,
        collection: &str,
        filter: &BsonDocument,
        opts: &FindOptions,
    ) -> Result<Vec<BsonDocument>, DbError>;

    /// Number of documents of `collection` matching `filter`, ignoring pagination.
    async fn count(&self, collection: &str, filter: &BsonDocument) -> Result<u64, DbError>;
}
