use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, doc};
use contentlite::query::FindOptions;
use contentlite::{Config, DbError, MemoryStore, Stack, Store};
use std::sync::Arc;

fn author(uid: &str, name: &str) -> BsonDocument {
    doc! {"uid": uid, "name": name, "publisher": {"reference_to": "publisher", "values": "p1"}}
}

fn refs(ct: &str, uids: &[&str]) -> Bson {
    Bson::Document(doc! {"reference_to": ct, "values": uids.to_vec()})
}

fn library() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let put = |ct: &str, payload: BsonDocument| {
        store.insert_payload("contents", ct, "en-us", payload).unwrap();
    };
    put("publisher", doc! {"uid": "p1", "name": "Acme"});
    put("author", author("a1", "Ann"));
    put("author", author("a2", "Bob"));
    put("author", author("a10", "Ten"));
    put("category", doc! {"uid": "c1", "title": "Rust"});
    put("blog", doc! {"uid": "b1", "n": 1, "authors": refs("author", &["a2", "a1"]), "category": {"reference_to": "category", "values": "c1"}});
    put("blog", doc! {"uid": "b2", "n": 2, "authors": refs("author", &["a1", "ghost", "a2"]), "category": {"reference_to": "category", "values": "nope"}});
    put("blog", doc! {"uid": "b3", "n": 3, "authors": refs("author", &["a10"]), "category": {"reference_to": "category", "values": "c1"}});
    store
}

fn stack_with(store: Arc<dyn Store>, config: Config) -> Stack {
    Stack::new(store, config).unwrap()
}

fn uids(items: &Bson) -> Vec<&str> {
    items
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d.as_document().unwrap().get_str("uid").unwrap())
        .collect()
}

#[tokio::test]
async fn descriptors_pass_through_without_include() {
    let s = stack_with(library(), Config::default());
    let env = s.content_type("blog").unwrap().entry(Some("b1")).unwrap().find().await.unwrap();
    assert_eq!(env.item().unwrap().get("authors"), Some(&refs("author", &["a2", "a1"])));
}

#[tokio::test]
async fn include_attaches_in_value_order_and_skips_missing() {
    let s = stack_with(library(), Config::default());
    let env = s
        .content_type("blog")
        .unwrap()
        .include(&["authors", "category"])
        .unwrap()
        .ascending(Some("n"))
        .unwrap()
        .find()
        .await
        .unwrap();
    let items = env.items();
    assert_eq!(uids(items[0].get("authors").unwrap()), vec!["a2", "a1"]);
    assert_eq!(uids(items[1].get("authors").unwrap()), vec!["a1", "a2"]);
    assert_eq!(items[1].get("category"), Some(&Bson::Null));

    let category = items[0].get_document("category").unwrap();
    assert_eq!(category.get_str("title").unwrap(), "Rust");
    assert_eq!(category.get_str("_content_type_uid").unwrap(), "category");

    // `authors.publisher` was not requested.
    let first = items[0].get_array("authors").unwrap()[0].as_document().unwrap();
    assert_eq!(first.get("publisher"), Some(&Bson::Document(doc! {"reference_to": "publisher", "values": "p1"})));
}

#[tokio::test]
async fn nested_include_paths_expand_through_parents() {
    let s = stack_with(library(), Config::default());
    let env = s
        .content_type("blog")
        .unwrap()
        .entry(Some("b3"))
        .unwrap()
        .include(&["authors.publisher"])
        .unwrap()
        .find()
        .await
        .unwrap();
    let entry = env.item().unwrap();
    let a10 = entry.get_array("authors").unwrap()[0].as_document().unwrap();
    assert_eq!(a10.get_document("publisher").unwrap().get_str("name").unwrap(), "Acme");
    // Not on any include path.
    assert!(entry.get_document("category").unwrap().contains_key("reference_to"));
}

#[tokio::test]
async fn exclude_references_wins_over_include() {
    let s = stack_with(library(), Config { include_references: true, ..Config::default() });
    let env = s
        .content_type("blog")
        .unwrap()
        .entry(Some("b3"))
        .unwrap()
        .include(&["authors"])
        .unwrap()
        .exclude_references()
        .unwrap()
        .find()
        .await
        .unwrap();
    assert_eq!(env.item().unwrap().get("authors"), Some(&refs("author", &["a10"])));
}

#[tokio::test]
async fn lookups_are_batched_per_partition_and_depth() {
    let store = library();
    let s = stack_with(store.clone(), Config::default());
    let env = s.content_type("blog").unwrap().include_references().unwrap().find().await.unwrap();
    assert_eq!(env.items().len(), 3);
    // Initial query, then depth 1 (author, category), then depth 2 (publisher).
    assert_eq!(store.find_calls(), 4);
}

#[tokio::test]
async fn batching_is_independent_of_result_size() {
    let store = Arc::new(MemoryStore::new());
    store.insert_payload("contents", "author", "en-us", doc! {"uid": "a1"}).unwrap();
    for i in 0..25 {
        let payload = doc! {"uid": format!("b{i}"), "authors": refs("author", &["a1"])};
        store.insert_payload("contents", "blog", "en-us", payload).unwrap();
    }
    let s = stack_with(store.clone(), Config::default());
    let env = s.content_type("blog").unwrap().include(&["authors"]).unwrap().find().await.unwrap();
    assert!(env.items().iter().all(|d| d.get_array("authors").unwrap().len() == 1));
    assert_eq!(store.find_calls(), 2);
}

#[tokio::test]
async fn cycles_terminate_with_an_unexpanded_descriptor() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_payload("contents", "author", "en-us", doc! {"uid": "a1", "friends": refs("author", &["a2"])})
        .unwrap();
    store
        .insert_payload("contents", "author", "en-us", doc! {"uid": "a2", "friends": refs("author", &["a1"])})
        .unwrap();
    let s = stack_with(store, Config { reference_depth: 50, ..Config::default() });
    let env = s
        .content_type("author")
        .unwrap()
        .entry(Some("a1"))
        .unwrap()
        .include_references()
        .unwrap()
        .find()
        .await
        .unwrap();
    let a2 = env.item().unwrap().get_array("friends").unwrap()[0].as_document().unwrap();
    assert_eq!(a2.get_str("uid").unwrap(), "a2");
    let back = a2.get_array("friends").unwrap();
    assert_eq!(back, &vec![Bson::Document(doc! {"reference_to": "author", "values": ["a1"]})]);
}

#[tokio::test]
async fn cyclic_elements_keep_their_locale_override() {
    let store = Arc::new(MemoryStore::new());
    let friends = |uid: &str| doc! {"reference_to": "author", "values": [uid], "locale": "fr-fr"};
    store.insert_payload("contents", "author", "fr-fr", doc! {"uid": "a1", "friends": friends("a2")}).unwrap();
    store.insert_payload("contents", "author", "fr-fr", doc! {"uid": "a2", "friends": friends("a1")}).unwrap();
    let s = stack_with(store, Config::default());
    let env = s
        .content_type("author")
        .unwrap()
        .language("fr-fr")
        .unwrap()
        .entry(Some("a1"))
        .unwrap()
        .include_references()
        .unwrap()
        .find()
        .await
        .unwrap();
    let a2 = env.item().unwrap().get_array("friends").unwrap()[0].as_document().unwrap();
    assert_eq!(a2.get_str("uid").unwrap(), "a2");
    assert_eq!(a2.get_array("friends").unwrap(), &vec![Bson::Document(friends("a1"))]);
}

#[tokio::test]
async fn self_reference_stays_a_descriptor() {
    let store = Arc::new(MemoryStore::new());
    let me = doc! {"reference_to": "author", "values": "a1"};
    store.insert_payload("contents", "author", "en-us", doc! {"uid": "a1", "me": me.clone()}).unwrap();
    let s = stack_with(store, Config { include_references: true, ..Config::default() });
    let env = s.content_type("author").unwrap().find().await.unwrap();
    assert_eq!(env.items()[0].get_document("me").unwrap(), &me);
}

#[tokio::test]
async fn depth_limit_leaves_deeper_descriptors() {
    let s = stack_with(library(), Config { reference_depth: 1, ..Config::default() });
    let env = s
        .content_type("blog")
        .unwrap()
        .entry(Some("b3"))
        .unwrap()
        .include_references()
        .unwrap()
        .find()
        .await
        .unwrap();
    let a10 = env.item().unwrap().get_array("authors").unwrap()[0].as_document().unwrap();
    assert!(a10.get_document("publisher").unwrap().contains_key("reference_to"));
}

#[tokio::test]
async fn descriptor_locale_overrides_owner_locale() {
    let store = Arc::new(MemoryStore::new());
    store.insert_payload("contents", "author", "fr-fr", doc! {"uid": "a1", "name": "Anne"}).unwrap();
    store.insert_payload("contents", "author", "en-us", doc! {"uid": "a1", "name": "Ann"}).unwrap();
    let by = doc! {"reference_to": "author", "values": "a1", "locale": "fr-fr"};
    store.insert_payload("contents", "blog", "en-us", doc! {"uid": "b1", "by": by}).unwrap();
    let s = stack_with(store, Config::default());
    let env = s.content_type("blog").unwrap().include(&["by"]).unwrap().find_one().await.unwrap();
    assert_eq!(env.item().unwrap().get_document("by").unwrap().get_str("name").unwrap(), "Anne");
}

#[tokio::test]
async fn query_references_keeps_matching_owners() {
    let s = stack_with(library(), Config::default());
    let env = s
        .content_type("blog")
        .unwrap()
        .query_references(&doc! {"authors.uid": "a10"})
        .unwrap()
        .include(&["authors"])
        .unwrap()
        .find()
        .await
        .unwrap();
    let items = env.items();
    assert_eq!(items.len(), 1);
    assert_eq!(uids(items[0].get("authors").unwrap()), vec!["a10"]);
}

#[tokio::test]
async fn query_references_paginates_after_filtering() {
    let s = stack_with(library(), Config::default());
    let env = s
        .content_type("blog")
        .unwrap()
        .query_references(&doc! {"authors.name": {"$in": ["Ann", "Bob"]}})
        .unwrap()
        .ascending(Some("n"))
        .unwrap()
        .skip(1)
        .unwrap()
        .limit(5)
        .unwrap()
        .include_count()
        .find()
        .await
        .unwrap();
    let items = env.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("uid").unwrap(), "b2");
    assert_eq!(env.count, Some(2));
    // The reference field keeps its stored shape.
    assert!(items[0].get_document("authors").unwrap().contains_key("reference_to"));

    let none = s
        .content_type("blog")
        .unwrap()
        .query_references(&doc! {"reviewers.uid": "a1"})
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(none.count, Some(0));
}

#[tokio::test]
async fn query_references_matches_the_deepest_reference_path() {
    let store = Arc::new(MemoryStore::new());
    store.insert_payload("contents", "author", "en-us", doc! {"uid": "a1", "name": "Ann"}).unwrap();
    store.insert_payload("contents", "meta", "en-us", doc! {"uid": "m1", "author": "Ann"}).unwrap();
    // `meta` is a descriptor here...
    store
        .insert_payload("contents", "page", "en-us", doc! {"uid": "p1", "meta": {"reference_to": "meta", "values": "m1"}})
        .unwrap();
    // ...and a plain sub-document holding the `meta.author` descriptor here.
    store
        .insert_payload(
            "contents",
            "page",
            "en-us",
            doc! {"uid": "p2", "meta": {"author": {"reference_to": "author", "values": "a1"}}},
        )
        .unwrap();
    let s = stack_with(store, Config::default());
    let env = s
        .content_type("page")
        .unwrap()
        .query_references(&doc! {"meta.author.name": "Ann"})
        .unwrap()
        .find()
        .await
        .unwrap();
    let uids: Vec<&str> = env.items().iter().map(|d| d.get_str("uid").unwrap()).collect();
    assert_eq!(uids, vec!["p2"]);
}

#[tokio::test]
async fn query_references_does_not_look_through_nested_descriptors() {
    let s = stack_with(library(), Config::default());
    let env = s
        .content_type("blog")
        .unwrap()
        .query_references(&doc! {"authors.publisher.name": "Acme"})
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(env.count, Some(0));
}

/// Fails every batched reference lookup.
struct FailingLookups(MemoryStore);

#[async_trait]
impl Store for FailingLookups {
    async fn find(
        &self,
        collection: &str,
        filter: &BsonDocument,
        opts: &FindOptions,
    ) -> Result<Vec<BsonDocument>, DbError> {
        if filter.get_document("uid").is_ok_and(|u| u.contains_key("$in")) {
            return Err(DbError::StoreError("connection reset".into()));
        }
        self.0.find(collection, filter, opts).await
    }

    async fn count(&self, collection: &str, filter: &BsonDocument) -> Result<u64, DbError> {
        self.0.count(collection, filter).await
    }
}

#[tokio::test]
async fn lookup_failures_abort_the_query() {
    let inner = MemoryStore::new();
    inner.insert_payload("contents", "blog", "en-us", doc! {"uid": "b1", "authors": refs("author", &["a1"])}).unwrap();
    let s = stack_with(Arc::new(FailingLookups(inner)), Config::default());
    let res = s.content_type("blog").unwrap().include(&["authors"]).unwrap().find().await;
    assert!(matches!(res, Err(DbError::StoreError(msg)) if msg == "connection reset"));

    // Without expansion there is nothing to look up.
    let ok = s.content_type("blog").unwrap().find().await.unwrap();
    assert_eq!(ok.items().len(), 1);
}
