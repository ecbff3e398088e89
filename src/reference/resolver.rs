use bson::{Bson, Document as BsonDocument};
use std::collections::{BTreeSet, HashMap};
use std::mem;

use super::fetch_batch;
use super::scan::{Segment, eligible, join, scan, set_at};
use crate::document::{
    EMBEDDED_CONTENT_TYPE_KEY, NodeKey, ReferenceDescriptor, into_payload, key_of,
    public_content_type_uid,
};
use crate::errors::DbError;
use crate::logger::QUERY_TARGET;
use crate::query::ExpandMode;
use crate::store::Store;

/// What replaces one descriptor occurrence.
#[derive(Debug)]
enum Target {
    Node(usize),
    /// Left as a descriptor: the target is already on the expansion path.
    Unexpanded(Bson),
}

#[derive(Debug)]
struct Attachment {
    segments: Vec<Segment>,
    to_many: bool,
    targets: Vec<Target>,
}

/// One embedded occurrence of a document. The same stored document may appear
/// as several nodes, once per place it is attached.
#[derive(Debug)]
struct Node {
    key: Option<NodeKey>,
    payload: BsonDocument,
    parent: Option<usize>,
    /// Dotted path of this node from its root result document.
    prefix: String,
    attachments: Vec<Attachment>,
}

/// Replaces reference descriptors with the documents they name.
///
/// Expansion runs breadth-first. Each depth gathers every eligible descriptor
/// of the current frontier, fetches the distinct targets with one lookup per
/// `(content_type_uid, locale)` partition, and only then moves to the next
/// depth. A target already present on its owner's ancestor chain is attached
/// as an unexpanded descriptor, which bounds expansion on cyclic graphs.
pub struct ReferenceResolver<'a> {
    store: &'a dyn Store,
    collection: &'a str,
    projection: &'a BsonDocument,
    expand: &'a ExpandMode,
    max_depth: usize,
    locale: &'a str,
    nodes: Vec<Node>,
    fetched: HashMap<NodeKey, BsonDocument>,
}

impl std::fmt::Debug for ReferenceResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("collection", &self.collection)
            .field("expand", &self.expand)
            .field("max_depth", &self.max_depth)
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl<'a> ReferenceResolver<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn Store,
        collection: &'a str,
        projection: &'a BsonDocument,
        expand: &'a ExpandMode,
        max_depth: usize,
        locale: &'a str,
    ) -> Self {
        Self {
            store,
            collection,
            projection,
            expand,
            max_depth,
            locale,
            nodes: Vec::new(),
            fetched: HashMap::new(),
        }
    }

    /// Expand references in raw store documents and return their payloads.
    ///
    /// # Errors
    /// Propagates the first `StoreError` from any lookup; nothing partial is returned.
    pub async fn resolve(mut self, docs: Vec<BsonDocument>) -> Result<Vec<BsonDocument>, DbError> {
        let roots = docs.len();
        for raw in docs {
            let key = key_of(&raw);
            self.nodes.push(Node {
                key,
                payload: into_payload(raw),
                parent: None,
                prefix: String::new(),
                attachments: Vec::new(),
            });
        }
        if *self.expand != ExpandMode::None {
            let mut frontier: Vec<usize> = (0..roots).collect();
            let mut depth = 0;
            while depth < self.max_depth && !frontier.is_empty() {
                frontier = self.expand_level(&frontier).await?;
                depth += 1;
            }
            if !frontier.is_empty() {
                log::warn!(target: QUERY_TARGET, "reference expansion stopped at depth limit {}", self.max_depth);
            }
            log::debug!(target: QUERY_TARGET, "references expanded to depth {depth}: {} nodes", self.nodes.len());
        }
        Ok(self.assemble(roots))
    }

    fn on_path(&self, mut idx: usize, key: &NodeKey) -> bool {
        loop {
            let node = &self.nodes[idx];
            if node.key.as_ref() == Some(key) {
                return true;
            }
            match node.parent {
                Some(p) => idx = p,
                None => return false,
            }
        }
    }

    fn owner_locale(&self, idx: usize) -> String {
        self.nodes[idx].key.as_ref().map_or_else(|| self.locale.to_string(), |k| k.locale.clone())
    }

    async fn expand_level(&mut self, frontier: &[usize]) -> Result<Vec<usize>, DbError> {
        struct Pending {
            owner: usize,
            segments: Vec<Segment>,
            path: String,
            descriptor: ReferenceDescriptor,
            raw: Bson,
            keys: Vec<NodeKey>,
        }

        let mut pending = Vec::new();
        let mut wanted = BTreeSet::new();
        for &owner in frontier {
            let locale = self.owner_locale(owner);
            for loc in scan(&self.nodes[owner].payload) {
                let path = join(&self.nodes[owner].prefix, &loc.path);
                if !eligible(self.expand, &path) {
                    continue;
                }
                let locale = loc.descriptor.locale.clone().unwrap_or_else(|| locale.clone());
                let keys: Vec<NodeKey> = loc
                    .descriptor
                    .values
                    .iter()
                    .map(|uid| NodeKey::new(&loc.descriptor.reference_to, &locale, uid))
                    .collect();
                for key in &keys {
                    if !self.fetched.contains_key(key) && !self.on_path(owner, key) {
                        wanted.insert(key.clone());
                    }
                }
                pending.push(Pending {
                    owner,
                    segments: loc.segments,
                    path,
                    descriptor: loc.descriptor,
                    raw: loc.raw,
                    keys,
                });
            }
        }

        let found = fetch_batch(self.store, self.collection, &wanted, Some(self.projection)).await?;
        self.fetched.extend(found);

        let mut next = Vec::new();
        for p in pending {
            let mut targets = Vec::with_capacity(p.keys.len());
            for key in p.keys {
                if self.on_path(p.owner, &key) {
                    log::warn!(target: QUERY_TARGET, "reference cycle at {key} ({}): left unexpanded", p.path);
                    let raw =
                        if p.descriptor.to_many { p.descriptor.narrowed(&key.uid) } else { p.raw.clone() };
                    targets.push(Target::Unexpanded(raw));
                    continue;
                }
                let Some(payload) = self.fetched.get(&key) else { continue };
                let mut payload = payload.clone();
                payload.insert(EMBEDDED_CONTENT_TYPE_KEY, public_content_type_uid(&key.content_type_uid));
                let idx = self.nodes.len();
                self.nodes.push(Node {
                    key: Some(key),
                    payload,
                    parent: Some(p.owner),
                    prefix: p.path.clone(),
                    attachments: Vec::new(),
                });
                targets.push(Target::Node(idx));
                next.push(idx);
            }
            self.nodes[p.owner].attachments.push(Attachment {
                segments: p.segments,
                to_many: p.descriptor.to_many,
                targets,
            });
        }
        Ok(next)
    }

    /// Children always follow their parents in the arena, so a reverse sweep
    /// finishes every child before its parent takes it.
    fn assemble(mut self, roots: usize) -> Vec<BsonDocument> {
        for idx in (0..self.nodes.len()).rev() {
            let attachments = mem::take(&mut self.nodes[idx].attachments);
            if attachments.is_empty() {
                continue;
            }
            let mut payload = mem::take(&mut self.nodes[idx].payload);
            for att in attachments {
                let mut values: Vec<Bson> = att
                    .targets
                    .into_iter()
                    .map(|t| match t {
                        Target::Node(child) => Bson::Document(mem::take(&mut self.nodes[child].payload)),
                        Target::Unexpanded(raw) => raw,
                    })
                    .collect();
                let value = if att.to_many {
                    Bson::Array(values)
                } else if values.is_empty() {
                    Bson::Null
                } else {
                    values.swap_remove(0)
                };
                set_at(&mut payload, &att.segments, value);
            }
            self.nodes[idx].payload = payload;
        }
        self.nodes.into_iter().take(roots).map(|n| n.payload).collect()
    }
}
