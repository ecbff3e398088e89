use serde::{Deserialize, Serialize};

/// Internal content-type uid under which assets are stored.
pub const ASSETS_UID: &str = "_assets";
/// Public name of the asset content type in response envelopes.
pub const ASSETS_PUBLIC_UID: &str = "assets";
/// Internal content-type uid under which content-type schemas are stored.
pub const SCHEMAS_UID: &str = "_content_types";

/// Wrapper keys of a stored document.
pub const CONTENT_TYPE_KEY: &str = "content_type_uid";
pub const LOCALE_KEY: &str = "locale";
pub const UID_KEY: &str = "uid";
pub const PAYLOAD_KEY: &str = "data";

/// Key attached to embedded referenced documents.
pub const EMBEDDED_CONTENT_TYPE_KEY: &str = "_content_type_uid";

/// Reference descriptor keys.
pub const REFERENCE_TO_KEY: &str = "reference_to";
pub const REFERENCE_VALUES_KEY: &str = "values";

/// The class of a content type, which decides the envelope keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentTypeClass {
    Asset,
    Schema,
    Entry,
}

impl ContentTypeClass {
    #[must_use]
    pub fn of(content_type_uid: &str) -> Self {
        match content_type_uid {
            ASSETS_UID => Self::Asset,
            SCHEMAS_UID => Self::Schema,
            _ => Self::Entry,
        }
    }

    #[must_use]
    pub const fn singular_key(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Schema => "content_type",
            Self::Entry => "entry",
        }
    }

    #[must_use]
    pub const fn plural_key(self) -> &'static str {
        match self {
            Self::Asset => "assets",
            Self::Schema => "content_types",
            Self::Entry => "entries",
        }
    }
}

/// Rename internal content-type markers to their public names.
#[must_use]
pub fn public_content_type_uid(content_type_uid: &str) -> &str {
    if content_type_uid == ASSETS_UID { ASSETS_PUBLIC_UID } else { content_type_uid }
}

/// Identity of a stored document: unique per `(content_type_uid, locale, uid)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub content_type_uid: String,
    pub locale: String,
    pub uid: String,
}

impl NodeKey {
    pub fn new(
        content_type_uid: impl Into<String>,
        locale: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self { content_type_uid: content_type_uid.into(), locale: locale.into(), uid: uid.into() }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.content_type_uid, self.locale, self.uid)
    }
}
