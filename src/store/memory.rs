use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, oid::ObjectId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::Store;
use crate::document::StoredDocument;
use crate::errors::DbError;
use crate::query::{FindOptions, apply_projection, compare_docs, eval_filter, parse_filter, uses_where};

/// In-process store keeping each collection as an insertion-ordered vector.
///
/// Filters are evaluated with the crate's own evaluator, so `$where` is
/// rejected with a store error.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<BsonDocument>>>,
    find_calls: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw store document, assigning `_id` when absent.
    pub fn insert(&self, collection: &str, mut doc: BsonDocument) -> ObjectId {
        let id = match doc.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            _ => {
                let id = ObjectId::new();
                doc.insert("_id", id);
                id
            }
        };
        self.collections.write().entry(collection.to_string()).or_default().push(doc);
        id
    }

    pub fn insert_document(&self, collection: &str, doc: &StoredDocument) -> ObjectId {
        self.insert(collection, doc.to_bson())
    }

    /// Wrap and insert a payload.
    ///
    /// # Errors
    /// `InvalidArgument` if the payload has no `uid` or the identity fields are empty.
    pub fn insert_payload(
        &self,
        collection: &str,
        content_type_uid: &str,
        locale: &str,
        payload: BsonDocument,
    ) -> Result<ObjectId, DbError> {
        let doc = StoredDocument::new(content_type_uid, locale, payload)?;
        Ok(self.insert_document(collection, &doc))
    }

    /// Number of `find` calls served so far.
    #[must_use]
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, Vec::len)
    }

    fn matching(&self, collection: &str, filter: &BsonDocument) -> Result<Vec<BsonDocument>, DbError> {
        let filter = parse_filter(filter).map_err(|e| DbError::store(e.to_string()))?;
        if uses_where(&filter) {
            return Err(DbError::store("$where expressions are not supported by the memory store"));
        }
        let guard = self.collections.read();
        Ok(guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| eval_filter(d, &filter)).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &BsonDocument,
        opts: &FindOptions,
    ) -> Result<Vec<BsonDocument>, DbError> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        let mut docs = self.matching(collection, filter)?;
        if let Some(sort) = &opts.sort {
            docs.sort_by(|a, b| compare_docs(a, b, sort));
        }
        let skip = usize::try_from(opts.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        // A zero limit means no limit.
        let limit = match opts.limit {
            None | Some(0) => usize::MAX,
            Some(l) => usize::try_from(l).unwrap_or(usize::MAX),
        };
        let page = docs.into_iter().skip(skip).take(limit);
        let out = match &opts.projection {
            Some(p) => page.map(|d| apply_projection(&d, p)).collect::<Result<Vec<_>, _>>()?,
            None => page.collect(),
        };
        log::debug!("memory store: find on '{collection}' returned {} docs", out.len());
        Ok(out)
    }

    async fn count(&self, collection: &str, filter: &BsonDocument) -> Result<u64, DbError> {
        let n = self.matching(collection, filter)?.len();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }
}
