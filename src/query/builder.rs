//! Fluent query builder.
//!
//! Every call validates its arguments synchronously and returns the builder back
//! (`Result<Self, DbError>`), so chains read `q.content_type("blog")?.limit(5)?`.
//! Terminal calls consume the builder; its state does not outlive the query.

use bson::{Bson, Document as BsonDocument};
use std::sync::Arc;

use super::parse::parse_filter;
use super::state::{QueryState, SortKey};
use super::types::{CmpOp, Condition, Filter, Order, Predicate};
use crate::config::Config;
use crate::document::{ASSETS_UID, SCHEMAS_UID};
use crate::errors::DbError;
use crate::store::Store;

/// Field holding entry tags.
pub const TAGS_FIELD: &str = "tags";

/// One logical query against the store. Not reusable once a terminal call runs.
pub struct Query {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: Arc<Config>,
    pub(crate) state: QueryState,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("state", &self.state).finish_non_exhaustive()
    }
}

fn require_key(op: &str, key: &str) -> Result<(), DbError> {
    if key.is_empty() {
        return Err(DbError::invalid(format!("{op}: field key must be a non-empty string")));
    }
    Ok(())
}

fn require_non_empty<T>(op: &str, items: &[T]) -> Result<(), DbError> {
    if items.is_empty() {
        return Err(DbError::invalid(format!("{op}: expected a non-empty array")));
    }
    Ok(())
}

fn field_names(op: &str, fields: &[&str]) -> Result<(), DbError> {
    require_non_empty(op, fields)?;
    if fields.iter().any(|f| f.is_empty()) {
        return Err(DbError::invalid(format!("{op}: field names must be non-empty strings")));
    }
    Ok(())
}

fn pagination(op: &str, n: i64) -> Result<u64, DbError> {
    u64::try_from(n).map_err(|_| DbError::invalid(format!("{op}: expected a non-negative number, got {n}")))
}

impl Query {
    pub(crate) fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config, state: QueryState::default() }
    }

    /// Read-only view of the accumulated state.
    #[must_use]
    pub const fn state(&self) -> &QueryState {
        &self.state
    }

    fn scoped(&self, op: &str) -> Result<(), DbError> {
        if self.state.content_type_uid.is_none() {
            return Err(DbError::PreconditionFailed(format!(
                "{op}() requires contentType(), asset() or schema() first"
            )));
        }
        Ok(())
    }

    fn predicate(mut self, op: &str, filter: Filter) -> Result<Self, DbError> {
        self.scoped(op)?;
        self.state.filter.merge(filter);
        Ok(self)
    }

    fn compare(self, op: &str, key: &str, cmp: CmpOp, value: impl Into<Bson>) -> Result<Self, DbError> {
        require_key(op, key)?;
        self.predicate(op, Filter::condition(key, Condition::Cmp { op: cmp, value: value.into() }))
    }

    // --- scoping ---

    /// # Errors
    /// `InvalidArgument` if `uid` is empty.
    pub fn content_type(mut self, uid: &str) -> Result<Self, DbError> {
        if uid.is_empty() {
            return Err(DbError::invalid("contentType: uid must be a non-empty string"));
        }
        self.state.content_type_uid = Some(uid.to_string());
        Ok(self)
    }

    /// Scope to assets; with a uid, target that single asset.
    ///
    /// # Errors
    /// `InvalidArgument` if `uid` is given but empty.
    pub fn asset(mut self, uid: Option<&str>) -> Result<Self, DbError> {
        self.state.content_type_uid = Some(ASSETS_UID.to_string());
        self.single_target("asset", uid)?;
        Ok(self)
    }

    #[must_use]
    pub fn assets(mut self) -> Self {
        self.state.content_type_uid = Some(ASSETS_UID.to_string());
        self.state.single = false;
        self
    }

    /// Scope to content-type schemas; with a uid, target that single schema.
    ///
    /// # Errors
    /// `InvalidArgument` if `uid` is given but empty.
    pub fn schema(mut self, uid: Option<&str>) -> Result<Self, DbError> {
        self.state.content_type_uid = Some(SCHEMAS_UID.to_string());
        self.single_target("schema", uid)?;
        Ok(self)
    }

    #[must_use]
    pub fn schemas(mut self) -> Self {
        self.state.content_type_uid = Some(SCHEMAS_UID.to_string());
        self.state.single = false;
        self
    }

    /// Return a single entry (by uid when given).
    ///
    /// # Errors
    /// `PreconditionFailed` before `content_type`; `InvalidArgument` on an empty uid.
    pub fn entry(mut self, uid: Option<&str>) -> Result<Self, DbError> {
        self.scoped("entry")?;
        self.single_target("entry", uid)?;
        Ok(self)
    }

    /// # Errors
    /// `PreconditionFailed` before `content_type`.
    pub fn entries(mut self) -> Result<Self, DbError> {
        self.scoped("entries")?;
        self.state.single = false;
        Ok(self)
    }

    fn single_target(&mut self, op: &str, uid: Option<&str>) -> Result<(), DbError> {
        if let Some(uid) = uid {
            if uid.is_empty() {
                return Err(DbError::invalid(format!("{op}: uid must be a non-empty string")));
            }
            self.state.uid = Some(uid.to_string());
        }
        self.state.single = true;
        Ok(())
    }

    /// # Errors
    /// `InvalidArgument` on an empty locale.
    pub fn language(mut self, locale: &str) -> Result<Self, DbError> {
        if locale.is_empty() {
            return Err(DbError::invalid("language: locale must be a non-empty string"));
        }
        self.state.locale = Some(locale.to_string());
        Ok(self)
    }

    // --- predicates ---

    /// # Errors
    /// `InvalidArgument` on an empty key; `PreconditionFailed` before scoping.
    pub fn less_than(self, key: &str, value: impl Into<Bson>) -> Result<Self, DbError> {
        self.compare("lessThan", key, CmpOp::Lt, value)
    }

    /// # Errors
    /// See [`Query::less_than`].
    pub fn less_than_or_equal_to(self, key: &str, value: impl Into<Bson>) -> Result<Self, DbError> {
        self.compare("lessThanOrEqualTo", key, CmpOp::Lte, value)
    }

    /// # Errors
    /// See [`Query::less_than`].
    pub fn greater_than(self, key: &str, value: impl Into<Bson>) -> Result<Self, DbError> {
        self.compare("greaterThan", key, CmpOp::Gt, value)
    }

    /// # Errors
    /// See [`Query::less_than`].
    pub fn greater_than_or_equal_to(self, key: &str, value: impl Into<Bson>) -> Result<Self, DbError> {
        self.compare("greaterThanOrEqualTo", key, CmpOp::Gte, value)
    }

    /// # Errors
    /// See [`Query::less_than`].
    pub fn not_equal_to(self, key: &str, value: impl Into<Bson>) -> Result<Self, DbError> {
        self.compare("notEqualTo", key, CmpOp::Ne, value)
    }

    /// # Errors
    /// `InvalidArgument` on an empty key or empty value list.
    pub fn contained_in(self, key: &str, values: Vec<Bson>) -> Result<Self, DbError> {
        require_key("containedIn", key)?;
        require_non_empty("containedIn", &values)?;
        self.predicate("containedIn", Filter::condition(key, Condition::In(values)))
    }

    /// # Errors
    /// `InvalidArgument` on an empty key or empty value list.
    pub fn not_contained_in(self, key: &str, values: Vec<Bson>) -> Result<Self, DbError> {
        require_key("notContainedIn", key)?;
        require_non_empty("notContainedIn", &values)?;
        self.predicate("notContainedIn", Filter::condition(key, Condition::Nin(values)))
    }

    /// # Errors
    /// `InvalidArgument` on an empty key.
    pub fn exists(self, key: &str) -> Result<Self, DbError> {
        require_key("exists", key)?;
        self.predicate("exists", Filter::condition(key, Condition::Exists(true)))
    }

    /// # Errors
    /// `InvalidArgument` on an empty key.
    pub fn not_exists(self, key: &str) -> Result<Self, DbError> {
        require_key("notExists", key)?;
        self.predicate("notExists", Filter::condition(key, Condition::Exists(false)))
    }

    /// Pattern match; `options` defaults to `"g"`.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty key or pattern.
    pub fn regex(self, key: &str, pattern: &str, options: Option<&str>) -> Result<Self, DbError> {
        require_key("regex", key)?;
        if pattern.is_empty() {
            return Err(DbError::invalid("regex: pattern must be a non-empty string"));
        }
        let cond = Condition::Regex {
            pattern: pattern.to_string(),
            options: options.unwrap_or("g").to_string(),
        };
        self.predicate("regex", Filter::condition(key, cond))
    }

    /// Entries carrying any of the given tags. Non-string elements are dropped.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty list.
    pub fn tags(self, values: Vec<Bson>) -> Result<Self, DbError> {
        require_non_empty("tags", &values)?;
        let tags: Vec<Bson> = values.into_iter().filter(|v| matches!(v, Bson::String(_))).collect();
        self.predicate("tags", Filter::condition(TAGS_FIELD, Condition::In(tags)))
    }

    /// `$and` over raw predicate documents.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty list or an unparseable predicate.
    pub fn and(self, predicates: Vec<BsonDocument>) -> Result<Self, DbError> {
        let operands = Self::operands("and", &predicates)?;
        self.predicate("and", Filter::and_of(operands))
    }

    /// `$or` over raw predicate documents.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty list or an unparseable predicate.
    pub fn or(self, predicates: Vec<BsonDocument>) -> Result<Self, DbError> {
        let operands = Self::operands("or", &predicates)?;
        self.predicate("or", Filter::or_of(operands))
    }

    fn operands(op: &str, predicates: &[BsonDocument]) -> Result<Vec<Filter>, DbError> {
        require_non_empty(op, predicates)?;
        predicates.iter().map(parse_filter).collect()
    }

    /// Store-evaluated expression (`$where`). Only stores that run expressions honour it.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty expression.
    pub fn where_expr(self, expression: &str) -> Result<Self, DbError> {
        if expression.is_empty() {
            return Err(DbError::invalid("where: expression must be a non-empty string"));
        }
        let filter = Filter { where_expr: Some(expression.to_string()), ..Filter::default() };
        self.predicate("where", filter)
    }

    /// Merge a raw native predicate (payload-relative paths) into the filter.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty or unparseable predicate.
    pub fn query(self, predicate: &BsonDocument) -> Result<Self, DbError> {
        if predicate.is_empty() {
            return Err(DbError::invalid("query: expected a non-empty predicate object"));
        }
        let filter = parse_filter(predicate)?;
        self.predicate("query", filter)
    }

    /// Keep only owning documents whose referenced documents satisfy `predicate`.
    /// Keys are `<reference path>.<field of the referenced payload>`. The field part
    /// sees the referenced document as stored, so it cannot reach through that
    /// document's own references.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty predicate, combinators, or keys without a field part.
    pub fn query_references(mut self, predicate: &BsonDocument) -> Result<Self, DbError> {
        self.scoped("queryReferences")?;
        if predicate.is_empty() {
            return Err(DbError::invalid("queryReferences: expected a non-empty predicate object"));
        }
        let filter = parse_filter(predicate)?;
        if !filter.and.is_empty() || !filter.or.is_empty() || filter.where_expr.is_some() {
            return Err(DbError::invalid("queryReferences: only field predicates are supported"));
        }
        if let Some((k, _)) = filter.fields.iter().find(|(k, _)| !k.contains('.')) {
            return Err(DbError::invalid(format!(
                "queryReferences: '{k}' must be '<reference>.<field>'"
            )));
        }
        self.state.reference_query.merge(filter);
        Ok(self)
    }

    /// Shorthand for an equality predicate through [`Query::query`].
    ///
    /// # Errors
    /// `InvalidArgument` on an empty key.
    pub fn equal_to(self, key: &str, value: impl Into<Bson>) -> Result<Self, DbError> {
        require_key("equalTo", key)?;
        self.predicate("equalTo", Filter::field(key, Predicate::Value(value.into())))
    }

    // --- projection, sort, pagination ---

    /// # Errors
    /// `InvalidArgument` on an empty list or empty field names.
    pub fn only(mut self, fields: &[&str]) -> Result<Self, DbError> {
        self.scoped("only")?;
        field_names("only", fields)?;
        self.state.projection.extend(fields.iter().map(|f| ((*f).to_string(), 1)));
        Ok(self)
    }

    /// # Errors
    /// `InvalidArgument` on an empty list or empty field names.
    pub fn except(mut self, fields: &[&str]) -> Result<Self, DbError> {
        self.scoped("except")?;
        field_names("except", fields)?;
        self.state.projection.extend(fields.iter().map(|f| ((*f).to_string(), 0)));
        Ok(self)
    }

    /// # Errors
    /// `InvalidArgument` unless `n` is positive.
    pub fn limit(mut self, n: i64) -> Result<Self, DbError> {
        let n = pagination("limit", n)?;
        if n == 0 {
            return Err(DbError::invalid("limit: expected a positive number, got 0"));
        }
        self.state.limit = Some(n);
        Ok(self)
    }

    /// # Errors
    /// `InvalidArgument` on a negative number.
    pub fn skip(mut self, n: i64) -> Result<Self, DbError> {
        self.state.skip = Some(pagination("skip", n)?);
        Ok(self)
    }

    /// Sort ascending by `field`, or by the configured default field.
    ///
    /// # Errors
    /// `InvalidArgument` if `field` is given but empty.
    pub fn ascending(self, field: Option<&str>) -> Result<Self, DbError> {
        self.sort("ascending", field, Order::Asc)
    }

    /// # Errors
    /// See [`Query::ascending`].
    pub fn descending(self, field: Option<&str>) -> Result<Self, DbError> {
        self.sort("descending", field, Order::Desc)
    }

    fn sort(mut self, op: &str, field: Option<&str>, order: Order) -> Result<Self, DbError> {
        if let Some(f) = field {
            require_key(op, f)?;
        }
        self.state.sort = Some(SortKey { field: field.map(ToString::to_string), order });
        Ok(self)
    }

    // --- references and output flags ---

    /// Expand the reference fields at these dotted paths.
    ///
    /// # Errors
    /// `InvalidArgument` on an empty list or empty paths; `PreconditionFailed` before scoping.
    pub fn include(mut self, paths: &[&str]) -> Result<Self, DbError> {
        self.scoped("include")?;
        field_names("include", paths)?;
        self.state.include_paths.extend(paths.iter().map(ToString::to_string));
        Ok(self)
    }

    /// Expand every reference field, depth-bounded by configuration.
    ///
    /// # Errors
    /// `PreconditionFailed` before scoping.
    pub fn include_references(mut self) -> Result<Self, DbError> {
        self.scoped("includeReferences")?;
        self.state.include_all = true;
        Ok(self)
    }

    /// # Errors
    /// `PreconditionFailed` before scoping.
    pub fn exclude_references(mut self) -> Result<Self, DbError> {
        self.scoped("excludeReferences")?;
        self.state.exclude_references = true;
        Ok(self)
    }

    #[must_use]
    pub fn include_count(mut self) -> Self {
        self.state.include_count = true;
        self
    }

    #[must_use]
    pub fn include_schema(mut self) -> Self {
        self.state.include_schema = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bson::doc;

    fn query() -> Query {
        Query::new(Arc::new(MemoryStore::new()), Arc::new(Config::default()))
    }

    fn blog() -> Query {
        query().content_type("blog").unwrap()
    }

    #[test]
    fn entry_before_content_type_fails() {
        assert!(matches!(query().entry(None), Err(DbError::PreconditionFailed(_))));
        assert!(matches!(query().entries(), Err(DbError::PreconditionFailed(_))));
        assert!(matches!(query().less_than("a", 1), Err(DbError::PreconditionFailed(_))));
        assert!(matches!(query().include(&["a"]), Err(DbError::PreconditionFailed(_))));
    }

    #[test]
    fn asset_and_schema_scope_themselves() {
        let q = query().asset(Some("img")).unwrap();
        assert_eq!(q.state().content_type_uid.as_deref(), Some("_assets"));
        assert!(q.state().single);
        assert!(query().schemas().entries().is_ok());
    }

    #[test]
    fn argument_validation() {
        assert!(matches!(query().content_type(""), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().less_than("", 1), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().contained_in("a", vec![]), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().only(&[]), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().limit(-1), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().limit(0), Err(DbError::InvalidArgument(_))));
        assert!(blog().skip(0).is_ok());
        assert!(matches!(blog().skip(-3), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().and(vec![]), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().tags(vec![]), Err(DbError::InvalidArgument(_))));
        assert!(matches!(blog().query_references(&doc! {"authors": "a1"}), Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn tags_drop_non_strings() {
        let a = blog().tags(vec!["a".into(), 1.into(), "b".into()]).unwrap();
        let b = blog().tags(vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(a.state().filter, b.state().filter);
        assert_eq!(a.state().filter.to_document(), doc! {"tags": {"$in": ["a", "b"]}});
    }

    #[test]
    fn predicates_accumulate() {
        let q = blog()
            .less_than("age", 10)
            .unwrap()
            .greater_than("age", 2)
            .unwrap()
            .exists("title")
            .unwrap()
            .regex("title", "^he", None)
            .unwrap()
            .and(vec![doc! {"a": 1}])
            .unwrap()
            .and(vec![doc! {"b": 2}])
            .unwrap();
        assert_eq!(
            q.state().filter.to_document(),
            doc! {
                "age": {"$lt": 10, "$gt": 2},
                "title": {"$exists": true, "$regex": "^he", "$options": "g"},
                "$and": [{"a": 1}, {"b": 2}],
            }
        );
    }

    #[test]
    fn last_sort_wins() {
        let q = blog().ascending(Some("title")).unwrap().descending(None).unwrap();
        assert_eq!(q.state().sort, Some(SortKey { field: None, order: Order::Desc }));
    }

    #[test]
    fn only_and_except_record_projection() {
        let q = blog().only(&["title", "uid"]).unwrap().except(&["body"]).unwrap();
        assert_eq!(
            q.state().projection,
            vec![("title".to_string(), 1), ("uid".to_string(), 1), ("body".to_string(), 0)]
        );
    }
}
