mod core;
mod types;

pub use self::core::{ReferenceDescriptor, StoredDocument, into_payload, key_of};
pub use types::{
    ASSETS_PUBLIC_UID, ASSETS_UID, CONTENT_TYPE_KEY, ContentTypeClass, EMBEDDED_CONTENT_TYPE_KEY,
    LOCALE_KEY, NodeKey, PAYLOAD_KEY, REFERENCE_TO_KEY, REFERENCE_VALUES_KEY, SCHEMAS_UID,
    UID_KEY, public_content_type_uid,
};
