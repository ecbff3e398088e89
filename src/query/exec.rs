//! Terminal calls: run the compiled query, expand references, shape the envelope.

use bson::{Document as BsonDocument, doc};

use super::builder::Query;
use super::eval::apply_projection;
use super::state::CompiledQuery;
use super::types::FindOptions;
use crate::document::{CONTENT_TYPE_KEY, ContentTypeClass, SCHEMAS_UID, UID_KEY, into_payload};
use crate::errors::DbError;
use crate::logger::QUERY_TARGET;
use crate::reference::{ReferenceResolver, filter_by_references};
use crate::shaper::Envelope;
use crate::store::Store;

fn page(docs: Vec<BsonDocument>, skip: u64, limit: u64) -> Vec<BsonDocument> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    docs.into_iter().skip(skip).take(limit).collect()
}

fn total(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Owning documents after the reference predicate, before pagination.
/// Projection is applied afterwards so the predicate sees every reference field.
async fn semi_joined(store: &dyn Store, q: &CompiledQuery) -> Result<Vec<BsonDocument>, DbError> {
    let Some(predicate) = &q.reference_query else {
        return store.find(&q.collection, &q.filter, &q.options).await;
    };
    let opts = FindOptions { projection: None, ..q.options.clone() };
    let docs = store.find(&q.collection, &q.filter, &opts).await?;
    filter_by_references(store, &q.collection, &q.locale, docs, predicate).await
}

async fn fetch_schema(store: &dyn Store, q: &CompiledQuery) -> Result<Option<BsonDocument>, DbError> {
    let filter = doc! { CONTENT_TYPE_KEY: SCHEMAS_UID, UID_KEY: q.content_type_uid.as_str() };
    let opts = FindOptions { projection: Some(doc! {"_id": 0}), limit: Some(1), ..FindOptions::default() };
    let found = store.find(&q.collection, &filter, &opts).await?;
    Ok(found.into_iter().next().map(into_payload))
}

async fn run_find(store: &dyn Store, q: &CompiledQuery) -> Result<Envelope, DbError> {
    let mut docs = semi_joined(store, q).await?;
    let count = match (q.include_count, q.deferred_page) {
        (false, _) => None,
        (true, Some(_)) => Some(total(docs.len())),
        (true, None) => Some(store.count(&q.collection, &q.filter).await?),
    };
    if let Some((skip, limit)) = q.deferred_page {
        docs = page(docs, skip, limit);
        if let Some(projection) = &q.options.projection {
            docs = docs.iter().map(|d| apply_projection(d, projection)).collect::<Result<_, _>>()?;
        }
    }

    let payloads = ReferenceResolver::new(
        store,
        &q.collection,
        &q.reference_projection,
        &q.expand,
        q.reference_depth,
        &q.locale,
    )
    .resolve(docs)
    .await?;

    let schema = if q.include_schema && q.class == ContentTypeClass::Entry {
        fetch_schema(store, q).await?
    } else {
        None
    };
    Ok(Envelope::shape(q, payloads, count, schema))
}

async fn run_count(store: &dyn Store, q: &CompiledQuery) -> Result<Envelope, DbError> {
    let n = if q.reference_query.is_some() {
        total(semi_joined(store, q).await?.len())
    } else {
        store.count(&q.collection, &q.filter).await?
    };
    Ok(Envelope::count_only(q, n))
}

impl Query {
    fn compile(mut self, op: &str) -> Result<(std::sync::Arc<dyn Store>, CompiledQuery), DbError> {
        if self.state.content_type_uid.is_none() {
            return Err(DbError::PreconditionFailed(format!(
                "{op}() requires contentType(), asset() or schema() first"
            )));
        }
        let compiled = self.state.normalize(&self.config);
        self.state.cleanup();
        log::debug!(target: QUERY_TARGET, "{op}: {} filter={}", compiled.content_type_uid, compiled.filter);
        Ok((self.store, compiled))
    }

    /// Run the query and shape its results.
    ///
    /// # Errors
    /// `PreconditionFailed` when unscoped; any `StoreError` from the store, including
    /// reference lookups.
    pub async fn find(self) -> Result<Envelope, DbError> {
        let (store, q) = self.compile("find")?;
        let out = run_find(store.as_ref(), &q).await;
        match &out {
            Ok(env) => log::info!(
                target: QUERY_TARGET,
                "find {} [{}]: {} results",
                env.content_type_uid,
                env.locale,
                if q.single { usize::from(env.item().is_some()) } else { env.items().len() }
            ),
            Err(e) => log::warn!(target: QUERY_TARGET, "find {} failed: {e}", q.content_type_uid),
        }
        out
    }

    /// [`Query::find`] with singular arity.
    ///
    /// # Errors
    /// As [`Query::find`].
    pub async fn find_one(mut self) -> Result<Envelope, DbError> {
        self.state.single = true;
        self.find().await
    }

    /// Number of matching documents, ignoring pagination.
    ///
    /// # Errors
    /// As [`Query::find`].
    pub async fn count(self) -> Result<Envelope, DbError> {
        let (store, q) = self.compile("count")?;
        let out = run_count(store.as_ref(), &q).await;
        if let Err(e) = &out {
            log::warn!(target: QUERY_TARGET, "count {} failed: {e}", q.content_type_uid);
        }
        out
    }
}
