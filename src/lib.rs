pub mod config;
pub mod document;
pub mod errors;
pub mod logger;
pub mod query;
pub mod reference;
pub mod shaper;
pub mod store;

pub use crate::config::Config;
pub use crate::document::{NodeKey, ReferenceDescriptor, StoredDocument};
pub use crate::errors::DbError;
pub use crate::query::Query;
pub use crate::shaper::Envelope;
pub use crate::store::{MemoryStore, Store};

use std::sync::Arc;

/// Entry point: a shared store handle plus configuration.
///
/// Cheap to clone. Each [`Query`] it hands out owns its own state, so one stack
/// serves any number of concurrent queries.
#[derive(Clone)]
pub struct Stack {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Stack {
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Result<Self, DbError> {
        config.validate()?;
        log::info!(
            "stack ready: collection '{}', default locale '{}'",
            config.collection_name,
            config.default_locale()
        );
        Ok(Self { store, config: Arc::new(config) })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh, unscoped query.
    #[must_use]
    pub fn query(&self) -> Query {
        Query::new(Arc::clone(&self.store), Arc::clone(&self.config))
    }

    /// # Errors
    /// `InvalidArgument` on an empty uid.
    pub fn content_type(&self, uid: &str) -> Result<Query, DbError> {
        self.query().content_type(uid)
    }

    /// # Errors
    /// `InvalidArgument` if `uid` is given but empty.
    pub fn asset(&self, uid: Option<&str>) -> Result<Query, DbError> {
        self.query().asset(uid)
    }

    #[must_use]
    pub fn assets(&self) -> Query {
        self.query().assets()
    }

    /// # Errors
    /// `InvalidArgument` if `uid` is given but empty.
    pub fn schema(&self, uid: Option<&str>) -> Result<Query, DbError> {
        self.query().schema(uid)
    }

    #[must_use]
    pub fn schemas(&self) -> Query {
        self.query().schemas()
    }
}
