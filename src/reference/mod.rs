//! Reference expansion and reference-predicate filtering.

mod resolver;
mod scan;
mod semijoin;

pub use resolver::ReferenceResolver;
pub use scan::{Location, Segment, eligible, scan};
pub use semijoin::filter_by_references;

use bson::{Document as BsonDocument, doc};
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::document::{CONTENT_TYPE_KEY, LOCALE_KEY, NodeKey, UID_KEY, into_payload, key_of};
use crate::errors::DbError;
use crate::logger::QUERY_TARGET;
use crate::query::FindOptions;
use crate::store::Store;

/// Fetch payloads for `keys`, one `find` per `(content_type_uid, locale)` partition.
///
/// All partitions are issued together and awaited as one unit; the first
/// store error fails the whole batch.
pub(crate) async fn fetch_batch(
    store: &dyn Store,
    collection: &str,
    keys: &BTreeSet<NodeKey>,
    projection: Option<&BsonDocument>,
) -> Result<HashMap<NodeKey, BsonDocument>, DbError> {
    let mut partitions: BTreeMap<(&str, &str), Vec<&str>> = BTreeMap::new();
    for key in keys {
        partitions
            .entry((key.content_type_uid.as_str(), key.locale.as_str()))
            .or_default()
            .push(key.uid.as_str());
    }
    if partitions.is_empty() {
        return Ok(HashMap::new());
    }
    log::debug!(target: QUERY_TARGET, "batched lookup: {} keys in {} partitions", keys.len(), partitions.len());

    let opts = FindOptions { projection: projection.cloned(), ..FindOptions::default() };
    let lookups = partitions.iter().map(|((ct, locale), uids)| {
        let filter = doc! {
            CONTENT_TYPE_KEY: *ct,
            LOCALE_KEY: *locale,
            UID_KEY: {"$in": uids.clone()},
        };
        let opts = &opts;
        async move { store.find(collection, &filter, opts).await }
    });
    let batches = try_join_all(lookups).await?;

    let mut found = HashMap::new();
    for raw in batches.into_iter().flatten() {
        if let Some(key) = key_of(&raw) {
            found.entry(key).or_insert_with(|| into_payload(raw));
        }
    }
    Ok(found)
}
