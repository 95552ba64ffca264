//! Defaultable core types: fields, request context, raw and normalized values.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod config;
pub mod keys;

pub use config::Config;
pub use keys::CacheKeyDeriver;

/// Metadata key marking a field whose submitted value is remembered.
pub const META_DEFAULT_LAST: &str = "defaultLast";
pub const META_VALUE: &str = "value";
pub const META_MORPH_TO_TYPE: &str = "morphToType";
pub const META_MORPH_TO_ID: &str = "morphToId";
pub const META_BELONGS_TO_ID: &str = "belongsToId";

/// Errors raised at the point of misuse (configuration-time or call-time).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefaultableError {
    #[error("field type [{type_identity}] cannot be defaulted")]
    Unsupported { type_identity: String },
    #[error("invalid default field behaviour handler for [{type_identity}]")]
    InvalidHandler { type_identity: String },
    #[error("value producer: {0}")]
    Producer(String),
    #[error("config: {0}")]
    Config(String),
}

pub type DefaultableResult<T> = Result<T, DefaultableError>;

/// Primary key of a referenced entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Str(String),
}

impl Id {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Id::Int(n) => serde_json::Value::from(*n),
            Id::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self { Id::Int(v) }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self { Id::Int(v as i64) }
}

impl From<u32> for Id {
    fn from(v: u32) -> Self { Id::Int(v as i64) }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self { Id::Str(v.to_string()) }
}

impl From<String> for Id {
    fn from(v: String) -> Self { Id::Str(v) }
}

/// Reference to a stored entity: its key plus a stable type key (e.g. `articles`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub key: Id,
    pub type_key: String,
}

impl EntityRef {
    pub fn new(key: impl Into<Id>, type_key: impl Into<String>) -> Self {
        Self { key: key.into(), type_key: type_key.into() }
    }
}

/// Untyped default or submitted payload. This is also the shape kept in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum RawValue {
    Null,
    Scalar(serde_json::Value),
    Entity(EntityRef),
    /// Polymorphic tuple: an entity or id plus a type reference.
    Pair { target: Box<RawValue>, type_ref: String },
}

impl RawValue {
    pub fn scalar(v: impl Into<serde_json::Value>) -> Self {
        match v.into() {
            serde_json::Value::Null => RawValue::Null,
            v => RawValue::Scalar(v),
        }
    }

    pub fn entity(key: impl Into<Id>, type_key: impl Into<String>) -> Self {
        RawValue::Entity(EntityRef::new(key, type_key))
    }

    pub fn pair(target: RawValue, type_ref: impl Into<String>) -> Self {
        RawValue::Pair { target: Box::new(target), type_ref: type_ref.into() }
    }

    pub fn is_null(&self) -> bool { matches!(self, RawValue::Null) }

    /// Identifier carried by this value, if any: an entity key or a scalar id.
    /// Pairs answer with their target's id.
    pub fn id(&self) -> Option<serde_json::Value> {
        match self {
            RawValue::Null => None,
            RawValue::Scalar(v) => Some(v.clone()),
            RawValue::Entity(e) => Some(e.key.to_json()),
            RawValue::Pair { target, .. } => target.id(),
        }
    }
}

/// Normalized metadata patch: metadata key to cache-safe primitive.
pub type MetaPatch = SmallVec<[(String, serde_json::Value); 2]>;

/// A form field as seen by the defaulting core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub type_identity: String,
    pub attribute: String,
    /// Supertype or capability identities, most specific first.
    #[serde(default)]
    pub lineage: Vec<String>,
    #[serde(default)]
    pub unsupported: bool,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Field {
    pub fn new(type_identity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            type_identity: type_identity.into(),
            attribute: attribute.into(),
            lineage: Vec::new(),
            unsupported: false,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_lineage<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lineage.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn unsupported(mut self, yes: bool) -> Self {
        self.unsupported = yes;
        self
    }

    /// Own type identity followed by the lineage.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.type_identity.as_str()).chain(self.lineage.iter().map(|s| s.as_str()))
    }

    pub fn answers_to(&self, identity: &str) -> bool {
        self.identities().any(|id| id == identity)
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_meta_patch(mut self, patch: MetaPatch) -> Self {
        self.meta.extend(patch);
        self
    }

    pub fn is_default_last(&self) -> bool {
        self.meta.get(META_DEFAULT_LAST).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// Per-request facts the core reads; built by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub principal_id: Option<String>,
    /// Resource identity, e.g. `posts`.
    pub resource: String,
    pub create_like: bool,
    /// Set when the form belongs to an action rather than a resource create form.
    pub action: Option<String>,
}

impl RequestContext {
    pub fn create(principal: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { principal_id: Some(principal.into()), resource: resource.into(), create_like: true, action: None }
    }

    pub fn update(principal: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { create_like: false, ..Self::create(principal, resource) }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

pub mod prelude {
    pub use super::{
        Config, DefaultableError, DefaultableResult, EntityRef, Field, Id, MetaPatch, RawValue,
        RequestContext, CacheKeyDeriver,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_serializes_as_tagged_json() {
        let v = RawValue::pair(RawValue::entity(7, "articles"), "articles");
        let s = serde_json::to_string(&v).unwrap();
        let back: RawValue = serde_json::from_str(&s).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.id(), Some(serde_json::json!(7)));
    }

    #[test]
    fn scalar_null_collapses_to_null() {
        assert!(RawValue::scalar(serde_json::Value::Null).is_null());
        assert_eq!(RawValue::scalar(5), RawValue::Scalar(serde_json::json!(5)));
    }

    #[test]
    fn field_identities_include_lineage() {
        let f = Field::new("morph_to_plus", "commentable").with_lineage(["morph_to"]);
        assert!(f.answers_to("morph_to"));
        assert!(f.answers_to("morph_to_plus"));
        assert!(!f.answers_to("belongs_to"));
    }

    #[test]
    fn default_last_marker_reads_bool() {
        let f = Field::new("text", "title");
        assert!(!f.is_default_last());
        assert!(f.with_meta(META_DEFAULT_LAST, true).is_default_last());
    }
}
