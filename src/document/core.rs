use bson::{Bson, Document as BsonDocument, doc};
use serde::{Deserialize, Serialize};

use crate::document::types::{
    CONTENT_TYPE_KEY, LOCALE_KEY, NodeKey, PAYLOAD_KEY, REFERENCE_TO_KEY, REFERENCE_VALUES_KEY,
    UID_KEY,
};
use crate::errors::DbError;

/// A document as kept by the store: identity fields plus the user payload.
///
/// The payload repeats `uid` so that stripped results still carry it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub content_type_uid: String,
    pub locale: String,
    pub uid: String,
    pub data: BsonDocument,
}

impl StoredDocument {
    /// Wrap a payload; the uid is read from the payload's `uid` field.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if any identity field is missing or empty.
    pub fn new(
        content_type_uid: impl Into<String>,
        locale: impl Into<String>,
        data: BsonDocument,
    ) -> Result<Self, DbError> {
        let content_type_uid = content_type_uid.into();
        let locale = locale.into();
        let uid = match data.get(UID_KEY) {
            Some(Bson::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(DbError::invalid("payload requires a non-empty string 'uid'")),
        };
        if content_type_uid.is_empty() || locale.is_empty() {
            return Err(DbError::invalid("content_type_uid and locale must be non-empty"));
        }
        Ok(Self { content_type_uid, locale, uid, data })
    }

    #[must_use]
    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.content_type_uid, &self.locale, &self.uid)
    }

    /// Render the store representation (without `_id`, which the store assigns).
    #[must_use]
    pub fn to_bson(&self) -> BsonDocument {
        doc! {
            CONTENT_TYPE_KEY: self.content_type_uid.as_str(),
            LOCALE_KEY: self.locale.as_str(),
            UID_KEY: self.uid.as_str(),
            PAYLOAD_KEY: self.data.clone(),
        }
    }
}

/// Identity of a raw store document, if its wrapper fields survived projection.
#[must_use]
pub fn key_of(raw: &BsonDocument) -> Option<NodeKey> {
    let ct = raw.get(CONTENT_TYPE_KEY)?.as_str()?;
    let locale = raw.get(LOCALE_KEY)?.as_str()?;
    let uid = raw.get(UID_KEY)?.as_str()?;
    Some(NodeKey::new(ct, locale, uid))
}

/// Strip the store wrapper, keeping only the payload.
#[must_use]
pub fn into_payload(mut raw: BsonDocument) -> BsonDocument {
    match raw.remove(PAYLOAD_KEY) {
        Some(Bson::Document(d)) => d,
        _ => BsonDocument::new(),
    }
}

/// A payload field shaped as `{reference_to, values}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    pub reference_to: String,
    pub values: Vec<String>,
    /// `values` was an array (to-many edge).
    pub to_many: bool,
    pub locale: Option<String>,
}

impl ReferenceDescriptor {
    /// Recognise the reference shape; any other value yields `None`.
    #[must_use]
    pub fn parse(value: &Bson) -> Option<Self> {
        let d = value.as_document()?;
        if d.keys().any(|k| !matches!(k.as_str(), REFERENCE_TO_KEY | REFERENCE_VALUES_KEY | LOCALE_KEY))
        {
            return None;
        }
        let reference_to = d.get(REFERENCE_TO_KEY)?.as_str()?.to_string();
        let locale = match d.get(LOCALE_KEY) {
            None => None,
            Some(Bson::String(s)) => Some(s.clone()),
            Some(_) => return None,
        };
        let (values, to_many) = match d.get(REFERENCE_VALUES_KEY)? {
            Bson::String(s) => (vec![s.clone()], false),
            Bson::Array(items) => {
                (items.iter().filter_map(Bson::as_str).map(ToString::to_string).collect(), true)
            }
            _ => return None,
        };
        Some(Self { reference_to, values, to_many, locale })
    }

    /// This descriptor restricted to one of its targets, same shape and locale.
    /// Used when a single element of an edge is left unexpanded.
    #[must_use]
    pub fn narrowed(&self, uid: &str) -> Bson {
        let mut d = BsonDocument::new();
        d.insert(REFERENCE_TO_KEY, self.reference_to.as_str());
        if self.to_many {
            d.insert(REFERENCE_VALUES_KEY, vec![uid]);
        } else {
            d.insert(REFERENCE_VALUES_KEY, uid);
        }
        if let Some(locale) = &self.locale {
            d.insert(LOCALE_KEY, locale.as_str());
        }
        Bson::Document(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_payload_uid() {
        assert!(StoredDocument::new("blog", "en-us", doc! {"title": "x"}).is_err());
        let d = StoredDocument::new("blog", "en-us", doc! {"uid": "b1", "title": "x"}).unwrap();
        assert_eq!(d.key(), NodeKey::new("blog", "en-us", "b1"));
        let raw = d.to_bson();
        assert_eq!(key_of(&raw), Some(d.key()));
        assert_eq!(into_payload(raw).get_str("title").unwrap(), "x");
    }

    #[test]
    fn parse_reference_shapes() {
        let one = ReferenceDescriptor::parse(&Bson::Document(
            doc! {"reference_to": "author", "values": "a1"},
        ))
        .unwrap();
        assert!(!one.to_many);
        assert_eq!(one.values, vec!["a1".to_string()]);

        let many = ReferenceDescriptor::parse(&Bson::Document(
            doc! {"reference_to": "author", "values": ["a1", 3, "a2"], "locale": "fr-fr"},
        ))
        .unwrap();
        assert!(many.to_many);
        assert_eq!(many.values, vec!["a1".to_string(), "a2".to_string()]);
        assert_eq!(many.locale.as_deref(), Some("fr-fr"));
        assert_eq!(
            many.narrowed("a2"),
            Bson::Document(doc! {"reference_to": "author", "values": ["a2"], "locale": "fr-fr"})
        );
        assert_eq!(one.narrowed("a1"), Bson::Document(doc! {"reference_to": "author", "values": "a1"}));
    }

    #[test]
    fn parse_rejects_lookalikes() {
        assert!(ReferenceDescriptor::parse(&Bson::String("a1".into())).is_none());
        assert!(
            ReferenceDescriptor::parse(&Bson::Document(doc! {"reference_to": "author"})).is_none()
        );
        assert!(
            ReferenceDescriptor::parse(&Bson::Document(
                doc! {"reference_to": "author", "values": "a1", "title": "t"}
            ))
            .is_none()
        );
    }
}
