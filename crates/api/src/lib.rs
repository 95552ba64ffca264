//! Defaultable API façade (in-process).
//!
//! Hosts call [`DefaultResolver::apply_default`] / [`DefaultResolver::apply_last_value`]
//! while building create forms, and [`Recorder::record`] after a successful
//! submit so the next create form can start from the last value.

#![forbid(unsafe_code)]

use std::sync::Arc;

use defaultable_core::META_DEFAULT_LAST;
use defaultable_registry::{GenericNormalizer, HandlerRegistry, KindCatalog, Normalize};
use defaultable_store::{fetch_or_miss, LastValueStore};
use tracing::debug;

pub mod recorder;

pub use defaultable_core::prelude::*;
pub use defaultable_registry::Handler;
pub use recorder::{Recorder, Submission};

pub type Producer = Box<dyn Fn(&RequestContext) -> anyhow::Result<RawValue> + Send + Sync>;

/// Post-processing hook applied to the resolved value before normalization.
pub type PostProcess<'a> = &'a (dyn Fn(RawValue, &RequestContext) -> RawValue + Send + Sync);

/// A literal default or a producer evaluated against the request.
pub enum DefaultValue {
    Literal(RawValue),
    Producer(Producer),
}

impl DefaultValue {
    pub fn producer<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> anyhow::Result<RawValue> + Send + Sync + 'static,
    {
        DefaultValue::Producer(Box::new(f))
    }

    fn resolve(self, ctx: &RequestContext) -> DefaultableResult<RawValue> {
        match self {
            DefaultValue::Literal(v) => Ok(v),
            DefaultValue::Producer(f) => f(ctx).map_err(|e| DefaultableError::Producer(format!("{:#}", e))),
        }
    }
}

impl From<RawValue> for DefaultValue {
    fn from(v: RawValue) -> Self { DefaultValue::Literal(v) }
}

impl std::fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Decides and applies default values for fields on create-like requests.
pub struct DefaultResolver<S> {
    registry: Arc<HandlerRegistry>,
    kinds: Arc<KindCatalog>,
    store: S,
    keys: CacheKeyDeriver,
}

impl<S: LastValueStore> DefaultResolver<S> {
    pub fn new(registry: Arc<HandlerRegistry>, kinds: Arc<KindCatalog>, store: S, config: &Config) -> Self {
        Self { registry, kinds, store, keys: config.key_deriver() }
    }

    pub fn registry(&self) -> &HandlerRegistry { &self.registry }

    pub fn keys(&self) -> &CacheKeyDeriver { &self.keys }

    pub fn store(&self) -> &S { &self.store }

    /// Apply `value` as the field's default. Unsupported fields are always an error;
    /// outside create-like requests the field comes back untouched.
    pub fn apply_default(
        &self,
        ctx: &RequestContext,
        field: Field,
        value: impl Into<DefaultValue>,
        post: Option<PostProcess<'_>>,
    ) -> DefaultableResult<Field> {
        if self.registry.is_unsupported(&field) {
            return Err(DefaultableError::Unsupported { type_identity: field.type_identity });
        }
        if !ctx.create_like {
            return Ok(field);
        }

        let mut value = value.into().resolve(ctx)?;
        if let Some(post) = post {
            value = post(value, ctx);
        }

        let patch = match self.registry.resolve(&field)? {
            Some(n) => n.normalize(&value, &self.kinds),
            None => GenericNormalizer.normalize(&value, &self.kinds),
        };
        debug!(field = %field.attribute, ty = %field.type_identity, patch = ?patch, "applied default");
        Ok(field.with_meta_patch(patch))
    }

    /// Default the field to the principal's last submitted value, if one is remembered.
    /// The field is marked for re-recording either way. Unsupported fields are always
    /// an error, so they are never marked and never recorded.
    pub fn apply_last_value(
        &self,
        ctx: &RequestContext,
        field: Field,
        post: Option<PostProcess<'_>>,
    ) -> DefaultableResult<Field> {
        if self.registry.is_unsupported(&field) {
            return Err(DefaultableError::Unsupported { type_identity: field.type_identity });
        }
        let mut field = field;
        if ctx.create_like {
            let key = self.keys.derive(ctx, &field);
            if let Some(last) = fetch_or_miss(&self.store, &key) {
                field = self.apply_default(ctx, field, last, post)?;
            }
        }
        Ok(field.with_meta(META_DEFAULT_LAST, true))
    }

    /// Recorder sharing this resolver's key derivation and store.
    pub fn recorder(&self, config: &Config) -> Recorder<'_, S> {
        Recorder::new(&self.store, &self.keys, config.ttl)
    }
}
