//! Response envelope construction.

use bson::{Bson, Document as BsonDocument};

use crate::document::{ContentTypeClass, public_content_type_uid};
use crate::errors::DbError;
use crate::query::CompiledQuery;

/// The response of one terminal call.
///
/// Serialized as `{<entry|entries|asset|assets|content_type|content_types>: .., content_type_uid, locale, count?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    key: &'static str,
    /// `None` for count-only responses.
    result: Option<Bson>,
    pub count: Option<u64>,
    pub content_type_uid: String,
    pub locale: String,
    /// Schema of the queried content type, when requested.
    pub content_type: Option<BsonDocument>,
}

impl Envelope {
    /// Shape resolved payloads: singular queries unwrap to one object or null.
    #[must_use]
    pub fn shape(
        query: &CompiledQuery,
        payloads: Vec<BsonDocument>,
        count: Option<u64>,
        content_type: Option<BsonDocument>,
    ) -> Self {
        let (key, result) = if query.single {
            let first = payloads.into_iter().next().map_or(Bson::Null, Bson::Document);
            (query.class.singular_key(), first)
        } else {
            (query.class.plural_key(), Bson::Array(payloads.into_iter().map(Bson::Document).collect()))
        };
        Self {
            key,
            result: Some(result),
            count,
            content_type_uid: public_content_type_uid(&query.content_type_uid).to_string(),
            locale: query.locale.clone(),
            content_type: content_type.filter(|_| query.class == ContentTypeClass::Entry),
        }
    }

    #[must_use]
    pub fn count_only(query: &CompiledQuery, count: u64) -> Self {
        Self {
            key: query.class.plural_key(),
            result: None,
            count: Some(count),
            content_type_uid: public_content_type_uid(&query.content_type_uid).to_string(),
            locale: query.locale.clone(),
            content_type: None,
        }
    }

    /// Envelope key carrying the result (`entries`, `asset`, ...).
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// The single result of a singular query.
    #[must_use]
    pub fn item(&self) -> Option<&BsonDocument> {
        self.result.as_ref()?.as_document()
    }

    /// Results of a plural query; empty for singular or count-only envelopes.
    #[must_use]
    pub fn items(&self) -> Vec<&BsonDocument> {
        match &self.result {
            Some(Bson::Array(items)) => items.iter().filter_map(Bson::as_document).collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn to_document(&self) -> BsonDocument {
        let mut out = BsonDocument::new();
        if let Some(result) = &self.result {
            out.insert(self.key, result.clone());
        }
        if let Some(schema) = &self.content_type {
            out.insert("content_type", schema.clone());
        }
        out.insert("content_type_uid", self.content_type_uid.as_str());
        out.insert("locale", self.locale.as_str());
        if let Some(n) = self.count {
            out.insert("count", i64::try_from(n).unwrap_or(i64::MAX));
        }
        out
    }

    /// # Errors
    /// Returns `Json` if a value has no JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value, DbError> {
        Ok(serde_json::to_value(Bson::Document(self.to_document()))?)
    }
}
