use contentlite::{Config, DbError, MemoryStore, Stack};
use std::io::Write;
use std::sync::Arc;

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contentlite.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "locales = [\"fr-fr\"]\nlimit = 10\ninclude_references = true\n[projections]\n_version = 0").unwrap();
    let cfg = Config::from_file(&path).unwrap();
    assert_eq!(cfg.default_locale(), "fr-fr");
    assert_eq!(cfg.limit, 10);
    assert!(cfg.include_references);
    assert_eq!(cfg.projections.get("_version"), Some(&0));
    assert_eq!(cfg.collection_name, "contents");
}

#[test]
fn malformed_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "limit = [").unwrap();
    assert!(matches!(Config::from_file(&path), Err(DbError::Toml(_))));
    assert!(matches!(Config::from_file(&dir.path().join("missing.toml")), Err(DbError::Io(_))));
}

#[test]
fn stack_rejects_invalid_config() {
    let store = Arc::new(MemoryStore::new());
    let err = Stack::new(store, Config { locales: vec![], ..Config::default() }).unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}

#[tokio::test]
async fn config_defaults_flow_into_queries() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        let payload = bson::doc! {"uid": format!("p{i}"), "secret": "x", "title": "t"};
        store.insert_payload("pages", "page", "de-de", payload).unwrap();
    }
    let mut cfg = Config { locales: vec!["de-de".into()], collection_name: "pages".into(), limit: 2, ..Config::default() };
    cfg.projections.insert("secret".into(), 0);
    let stack = Stack::new(store, cfg).unwrap();

    let env = stack.content_type("page").unwrap().find().await.unwrap();
    assert_eq!(env.locale, "de-de");
    assert_eq!(env.items().len(), 2);
    assert!(env.items().iter().all(|d| !d.contains_key("secret")));

    let env = stack.content_type("page").unwrap().limit(4).unwrap().skip(3).unwrap().find().await.unwrap();
    assert_eq!(env.items().len(), 2);
}
