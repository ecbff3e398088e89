use bson::Document as BsonDocument;
use std::collections::{BTreeMap, BTreeSet};

use super::fetch_batch;
use super::scan::scan;
use crate::document::{NodeKey, PAYLOAD_KEY, key_of};
use crate::errors::DbError;
use crate::logger::QUERY_TARGET;
use crate::query::{Filter, eval_filter};
use crate::store::Store;

/// Group `<reference path>.<field>` keys by the longest reference path prefixing them.
///
/// Within one document reference paths never nest, but across documents they
/// can: `meta` may be a descriptor in one owner and a sub-document holding a
/// `meta.author` descriptor in another. `None` means some key names no
/// reference path, so nothing can match.
fn split_by_path(predicate: &Filter, paths: &BTreeSet<String>) -> Option<BTreeMap<String, Filter>> {
    let mut groups: BTreeMap<String, Filter> = BTreeMap::new();
    for (key, pred) in &predicate.fields {
        let (path, field) = paths
            .iter()
            .filter_map(|p| key.strip_prefix(p.as_str())?.strip_prefix('.').map(|field| (p, field)))
            .max_by_key(|(p, _)| p.len())?;
        groups.entry(path.clone()).or_default().fields.push((field.to_string(), pred.clone()));
    }
    Some(groups)
}

/// Keep the raw documents whose referenced documents satisfy `predicate`.
///
/// Every reference path named by the predicate must have at least one
/// referenced document matching that path's conditions. Order is preserved and
/// the descriptors themselves are left untouched.
///
/// Field parts are evaluated against the referenced document as stored: its own
/// reference fields are still descriptors, so `authors.publisher.name` can only
/// match a literal `name` key under the `publisher` descriptor, which never exists.
///
/// # Errors
/// Propagates the first `StoreError` from the batched lookup.
pub async fn filter_by_references(
    store: &dyn Store,
    collection: &str,
    locale: &str,
    docs: Vec<BsonDocument>,
    predicate: &Filter,
) -> Result<Vec<BsonDocument>, DbError> {
    // Per owner: reference path -> target keys.
    let mut edges: Vec<BTreeMap<String, Vec<NodeKey>>> = Vec::with_capacity(docs.len());
    let mut paths = BTreeSet::new();
    for raw in &docs {
        let owner_locale = key_of(raw).map_or_else(|| locale.to_string(), |k| k.locale);
        let mut by_path: BTreeMap<String, Vec<NodeKey>> = BTreeMap::new();
        if let Ok(payload) = raw.get_document(PAYLOAD_KEY) {
            for loc in scan(payload) {
                let target_locale = loc.descriptor.locale.clone().unwrap_or_else(|| owner_locale.clone());
                let keys = by_path.entry(loc.path.clone()).or_default();
                keys.extend(
                    loc.descriptor
                        .values
                        .iter()
                        .map(|uid| NodeKey::new(&loc.descriptor.reference_to, &target_locale, uid)),
                );
                paths.insert(loc.path);
            }
        }
        edges.push(by_path);
    }

    let Some(groups) = split_by_path(predicate, &paths) else {
        log::debug!(target: QUERY_TARGET, "reference predicate names no reference field; nothing matches");
        return Ok(Vec::new());
    };

    let wanted: BTreeSet<NodeKey> = edges
        .iter()
        .flat_map(|by_path| groups.keys().filter_map(move |p| by_path.get(p)).flatten().cloned())
        .collect();
    let found = fetch_batch(store, collection, &wanted, None).await?;

    let kept: Vec<BsonDocument> = docs
        .into_iter()
        .zip(edges)
        .filter(|(_, by_path)| {
            groups.iter().all(|(path, filter)| {
                by_path.get(path).is_some_and(|keys| {
                    keys.iter().filter_map(|k| found.get(k)).any(|payload| eval_filter(payload, filter))
                })
            })
        })
        .map(|(raw, _)| raw)
        .collect();
    log::debug!(target: QUERY_TARGET, "reference predicate kept {} documents", kept.len());
    Ok(kept)
}
