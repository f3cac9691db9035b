//! Connection type registry
//!
//! Maps a connection-type name to the constructors of its device family: one
//! for the connection (settings plus protocol adapter) and one per tag type.
//! This is the only place device families are wired in; the polling worker and
//! the manager never branch on a family.
//!
//! # Example
//!
//! ```rust
//! use process_link::params::Params;
//! use process_link::registry::ConnectionRegistry;
//!
//! let registry = ConnectionRegistry::with_builtin();
//! let family = registry.family("local").unwrap();
//!
//! let tag = family
//!     .new_tag(&Params::new().with("id", "t1").with("connection_id", "c1"))
//!     .unwrap();
//! assert_eq!(tag.tag_type(), "local");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::adapter::ProtocolAdapter;
use crate::connection::ConnectionSettings;
use crate::error::{ProcessLinkError, Result, UnknownType};
use crate::families;
use crate::params::Params;
use crate::tag::Tag;

/// Builds a tag of one family from its parameters
pub type TagConstructor = fn(&Params) -> Result<Arc<dyn Tag>>;

/// Builds the settings and adapter of a connection from its parameters
pub type ConnectionConstructor =
    Arc<dyn Fn(&Params) -> Result<ConnectionParts> + Send + Sync>;

/// What a connection constructor produces
pub struct ConnectionParts {
    pub settings: ConnectionSettings,
    pub adapter: Arc<dyn ProtocolAdapter>,
}

/// Constructors for one device family
#[derive(Clone)]
pub struct ConnectionFamily {
    connection_type: String,
    constructor: ConnectionConstructor,
    tag_types: HashMap<String, TagConstructor>,
    tag_parameters: Vec<String>,
}

impl ConnectionFamily {
    pub fn new<F>(connection_type: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Params) -> Result<ConnectionParts> + Send + Sync + 'static,
    {
        Self {
            connection_type: connection_type.into(),
            constructor: Arc::new(constructor),
            tag_types: HashMap::new(),
            tag_parameters: Vec::new(),
        }
    }

    /// Builder method: register a tag type
    pub fn tag_type(mut self, name: impl Into<String>, constructor: TagConstructor) -> Self {
        self.tag_types.insert(name.into(), constructor);
        self
    }

    /// Builder method: declare the parameters tags of this family accept
    pub fn tag_parameters(mut self, names: &[&str]) -> Self {
        self.tag_parameters = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn connection_type(&self) -> &str {
        &self.connection_type
    }

    pub fn tag_parameter_names(&self) -> &[String] {
        &self.tag_parameters
    }

    pub fn build_connection(&self, params: &Params) -> Result<ConnectionParts> {
        (self.constructor)(params)
    }

    /// Build a tag, resolving its constructor from `tag_type`
    ///
    /// A missing `tag_type` selects the family's own name.
    pub fn new_tag(&self, params: &Params) -> Result<Arc<dyn Tag>> {
        let tag_type = params
            .get_str("tag_type")?
            .unwrap_or(self.connection_type.as_str());

        let constructor = self.tag_types.get(tag_type).ok_or_else(|| {
            ProcessLinkError::UnknownType(UnknownType::Tag {
                connection_type: self.connection_type.clone(),
                tag_type: tag_type.to_string(),
            })
        })?;

        constructor(params)
    }
}

impl fmt::Debug for ConnectionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tag_types: Vec<_> = self.tag_types.keys().collect();
        tag_types.sort();
        f.debug_struct("ConnectionFamily")
            .field("connection_type", &self.connection_type)
            .field("tag_types", &tag_types)
            .finish()
    }
}

/// Registry of device families, keyed by connection type
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    families: HashMap<String, Arc<ConnectionFamily>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the families that need no external adapter
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(families::local::family());
        registry
    }

    /// Register a family, replacing any previous one with the same type
    pub fn register(&mut self, family: ConnectionFamily) {
        tracing::debug!(connection_type = %family.connection_type, "Registered connection family");
        self.families
            .insert(family.connection_type.clone(), Arc::new(family));
    }

    pub fn family(&self, connection_type: &str) -> Result<Arc<ConnectionFamily>> {
        self.families.get(connection_type).cloned().ok_or_else(|| {
            ProcessLinkError::UnknownType(UnknownType::Connection(connection_type.to_string()))
        })
    }

    /// Parameter names accepted by tags of a connection type
    pub fn tag_parameters(&self, connection_type: &str) -> Result<Vec<String>> {
        Ok(self.family(connection_type)?.tag_parameters.clone())
    }

    pub fn connection_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.families.keys().cloned().collect();
        types.sort();
        types
    }
}
