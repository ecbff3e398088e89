//! Per-query accumulated state and its normalization against configuration.

use bson::{Document as BsonDocument, doc};
use std::collections::BTreeSet;

use super::types::{Filter, FindOptions, Order, SortSpec};
use crate::config::Config;
use crate::document::{CONTENT_TYPE_KEY, ContentTypeClass, LOCALE_KEY, PAYLOAD_KEY, UID_KEY};

/// Sort request; a missing field falls back to the configured default at normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: Option<String>,
    pub order: Order,
}

/// Everything one logical query has accumulated. Owned by a single [`super::Query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub content_type_uid: Option<String>,
    pub locale: Option<String>,
    pub uid: Option<String>,
    pub filter: Filter,
    /// Payload-relative projection, in call order (`1` include, `0` exclude).
    pub projection: Vec<(String, i32)>,
    pub sort: Option<SortKey>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub include_paths: BTreeSet<String>,
    pub include_all: bool,
    /// Semi-join predicate; keys are `<reference path>.<referenced field>`.
    pub reference_query: Filter,
    pub single: bool,
    pub include_count: bool,
    pub include_schema: bool,
    pub exclude_references: bool,
}

/// Which reference fields a query expands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandMode {
    None,
    All,
    Paths(BTreeSet<String>),
}

/// QueryState after defaults are resolved: ready to hand to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub collection: String,
    pub content_type_uid: String,
    pub locale: String,
    pub class: ContentTypeClass,
    pub filter: BsonDocument,
    pub options: FindOptions,
    pub single: bool,
    pub include_count: bool,
    pub include_schema: bool,
    pub expand: ExpandMode,
    pub reference_depth: usize,
    pub reference_query: Option<Filter>,
    /// `(skip, limit)` applied in memory when a semi-join is present.
    pub deferred_page: Option<(u64, u64)>,
    /// Default projection for referenced documents.
    pub reference_projection: BsonDocument,
}

fn payload_path(field: &str) -> String {
    format!("{PAYLOAD_KEY}.{field}")
}

/// Render a payload-relative projection natively; `_id` is always excluded.
pub(crate) fn render_projection(entries: &[(String, i32)]) -> BsonDocument {
    let mut out = doc! { "_id": 0 };
    if entries.iter().any(|(_, v)| *v == 1) {
        for key in [CONTENT_TYPE_KEY, LOCALE_KEY, UID_KEY] {
            out.insert(key, 1);
        }
    }
    for (field, v) in entries {
        out.insert(payload_path(field), *v);
    }
    out
}

impl QueryState {
    /// Reset to a blank query.
    pub fn cleanup(&mut self) {
        *self = Self::default();
    }

    /// Resolve defaults (call site > config) and render the native query.
    ///
    /// The content type must already be set; the builder guarantees it.
    #[must_use]
    pub fn normalize(&self, config: &Config) -> CompiledQuery {
        let content_type_uid = self.content_type_uid.clone().unwrap_or_default();
        let class = ContentTypeClass::of(&content_type_uid);
        let locale = self.locale.clone().unwrap_or_else(|| config.default_locale().to_string());

        let mut filter = doc! { CONTENT_TYPE_KEY: content_type_uid.as_str() };
        if class != ContentTypeClass::Schema {
            filter.insert(LOCALE_KEY, locale.as_str());
        }
        if let Some(uid) = &self.uid {
            filter.insert(UID_KEY, uid.as_str());
        }
        for (k, v) in self.filter.to_native(PAYLOAD_KEY) {
            filter.insert(k, v);
        }

        let defaults: Vec<(String, i32)> =
            config.projections.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let projection = if self.projection.iter().any(|(_, v)| *v == 1) {
            render_projection(&self.projection)
        } else {
            let mut merged = defaults.clone();
            merged.extend(self.projection.iter().cloned());
            render_projection(&merged)
        };

        let sort = self.sort.as_ref().map(|s| {
            let field = s.field.as_deref().unwrap_or(&config.default_sort_field);
            vec![SortSpec { field: payload_path(field), order: s.order }]
        });

        let reference_query =
            (!self.reference_query.is_empty()).then(|| self.reference_query.clone());
        let skip = self.skip.unwrap_or(config.skip);
        let limit = if self.single { 1 } else { self.limit.unwrap_or(config.limit) };
        // With a semi-join, pagination happens after the in-memory filter pass.
        let (deferred_page, limit, skip) = if reference_query.is_some() {
            (Some((skip, limit)), None, None)
        } else {
            (None, Some(limit), Some(skip))
        };

        let expand = if self.exclude_references {
            ExpandMode::None
        } else if !self.include_paths.is_empty() && !self.include_all {
            ExpandMode::Paths(self.include_paths.clone())
        } else if self.include_all || config.include_references {
            ExpandMode::All
        } else {
            ExpandMode::None
        };

        CompiledQuery {
            collection: config.collection_name.clone(),
            content_type_uid,
            locale,
            class,
            filter,
            options: FindOptions { projection: Some(projection), sort, limit, skip },
            single: self.single,
            include_count: self.include_count,
            include_schema: self.include_schema,
            expand,
            reference_depth: config.reference_depth,
            reference_query,
            deferred_page,
            reference_projection: render_projection(&defaults),
        }
    }
}
