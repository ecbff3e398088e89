use bson::{Bson, Document as BsonDocument, doc};
use contentlite::{Config, MemoryStore, Stack};
use proptest::prelude::*;
use std::sync::Arc;

fn stack() -> Stack {
    Stack::new(Arc::new(MemoryStore::new()), Config::default()).unwrap()
}

fn predicate() -> impl Strategy<Value = BsonDocument> {
    ("[a-c]", 0i32..5).prop_map(|(field, n)| doc! {field: n})
}

fn tag() -> impl Strategy<Value = Bson> {
    prop_oneof![
        "[a-z]{1,4}".prop_map(Bson::String),
        any::<i32>().prop_map(Bson::Int32),
        Just(Bson::Null),
        any::<bool>().prop_map(Bson::Boolean),
    ]
}

proptest! {
    #[test]
    fn prop_and_calls_accumulate_like_one_call(
        groups in proptest::collection::vec(proptest::collection::vec(predicate(), 1..4), 1..4)
    ) {
        let mut chained = stack().content_type("blog").unwrap();
        for g in &groups {
            chained = chained.and(g.clone()).unwrap();
        }
        let all: Vec<BsonDocument> = groups.into_iter().flatten().collect();
        let single = stack().content_type("blog").unwrap().and(all).unwrap();
        prop_assert_eq!(&chained.state().filter, &single.state().filter);
    }

    #[test]
    fn prop_or_calls_accumulate_like_one_call(
        a in proptest::collection::vec(predicate(), 1..4),
        b in proptest::collection::vec(predicate(), 1..4),
    ) {
        let chained = stack().content_type("blog").unwrap().or(a.clone()).unwrap().or(b.clone()).unwrap();
        let single = stack().content_type("blog").unwrap().or([a, b].concat()).unwrap();
        prop_assert_eq!(chained.state().filter.to_document(), single.state().filter.to_document());
    }

    #[test]
    fn prop_tags_ignore_non_strings(values in proptest::collection::vec(tag(), 1..8)) {
        let strings: Vec<Bson> = values.iter().filter(|v| matches!(v, Bson::String(_))).cloned().collect();
        let mixed = stack().content_type("blog").unwrap().tags(values).unwrap();
        let rendered = mixed.state().filter.to_document();
        prop_assert_eq!(rendered, doc! {"tags": {"$in": strings.clone()}});
        if !strings.is_empty() {
            let clean = stack().content_type("blog").unwrap().tags(strings).unwrap();
            prop_assert_eq!(&mixed.state().filter, &clean.state().filter);
        }
    }
}
