//! Defaultable registry: which normalizer handles which field type.
//!
//! Entries are kept in registration order and matched first-wins against a
//! field's own type identity and its lineage, so a handler registered for a
//! base identity also covers derived field types. The table is copy-on-write:
//! readers load a snapshot without locking, registration swaps in a new one.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use defaultable_core::{DefaultableError, DefaultableResult, Field};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

pub mod normalize;

pub use normalize::{BelongsToNormalizer, GenericNormalizer, KindCatalog, MorphToNormalizer, Normalize};

pub const MORPH_TO: &str = "morph_to";
pub const BELONGS_TO: &str = "belongs_to";

/// List, read-only and file-like field types: nothing editable to default.
pub const BUILTIN_UNSUPPORTED: &[&str] = &[
    "has_many",
    "has_one",
    "belongs_to_many",
    "morph_many",
    "morph_to_many",
    "file",
    "image",
    "avatar",
    "heading",
];

/// How a registered field type is normalized.
#[derive(Clone)]
pub enum Handler {
    /// A normalizer instance.
    Direct(Arc<dyn Normalize>),
    /// A handler defined by name with [`HandlerRegistry::define`]; looked up at resolution time.
    Named(String),
}

impl Handler {
    pub fn direct<N: Normalize + 'static>(n: N) -> Self { Handler::Direct(Arc::new(n)) }
    pub fn named(name: impl Into<String>) -> Self { Handler::Named(name.into()) }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Direct(_) => f.write_str("Handler::Direct(..)"),
            Handler::Named(n) => write!(f, "Handler::Named({:?})", n),
        }
    }
}

#[derive(Clone, Default)]
struct Table {
    entries: Vec<(String, Handler)>,
    named: FxHashMap<String, Arc<dyn Normalize>>,
    unsupported: FxHashSet<String>,
}

pub struct HandlerRegistry {
    table: ArcSwap<Table>,
}

impl Default for HandlerRegistry {
    fn default() -> Self { Self::new() }
}

impl HandlerRegistry {
    /// Registry with the built-in polymorphic and direct reference handlers.
    pub fn new() -> Self {
        let me = Self::empty();
        me.register(MORPH_TO, Handler::direct(MorphToNormalizer));
        me.register(BELONGS_TO, Handler::direct(BelongsToNormalizer));
        for t in BUILTIN_UNSUPPORTED {
            me.mark_unsupported(*t);
        }
        me
    }

    /// Registry with no handlers and nothing marked unsupported.
    pub fn empty() -> Self {
        Self { table: ArcSwap::from_pointee(Table::default()) }
    }

    /// Later registrations for the same type replace the handler in place.
    pub fn register(&self, type_identity: impl Into<String>, handler: Handler) {
        self.register_many([type_identity.into()], handler);
    }

    pub fn register_many<I, S>(&self, types: I, handler: Handler)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        self.table.rcu(|cur| {
            let mut next = Table::clone(cur);
            for t in &types {
                match next.entries.iter_mut().find(|(k, _)| k == t) {
                    Some(slot) => slot.1 = handler.clone(),
                    None => next.entries.push((t.clone(), handler.clone())),
                }
            }
            next
        });
        debug!(types = ?types, handler = ?handler, "registered default handler");
    }

    /// Define a named handler for use with [`Handler::Named`].
    pub fn define<N: Normalize + 'static>(&self, name: impl Into<String>, normalizer: N) {
        let name = name.into();
        let n: Arc<dyn Normalize> = Arc::new(normalizer);
        self.table.rcu(|cur| {
            let mut next = Table::clone(cur);
            next.named.insert(name.clone(), Arc::clone(&n));
            next
        });
    }

    pub fn mark_unsupported(&self, type_identity: impl Into<String>) {
        let t = type_identity.into();
        self.table.rcu(|cur| {
            let mut next = Table::clone(cur);
            next.unsupported.insert(t.clone());
            next
        });
    }

    pub fn is_unsupported(&self, field: &Field) -> bool {
        if field.unsupported { return true; }
        let table = self.table.load();
        field.identities().any(|id| table.unsupported.contains(id))
    }

    /// First registered handler the field answers to, or `None` for the generic path.
    pub fn resolve(&self, field: &Field) -> DefaultableResult<Option<Arc<dyn Normalize>>> {
        let table = self.table.load();
        let Some((key, handler)) = table.entries.iter().find(|(k, _)| field.answers_to(k)) else {
            return Ok(None);
        };
        match handler {
            Handler::Direct(n) => Ok(Some(Arc::clone(n))),
            Handler::Named(name) => match table.named.get(name) {
                Some(n) => Ok(Some(Arc::clone(n))),
                None => Err(DefaultableError::InvalidHandler { type_identity: key.clone() }),
            },
        }
    }

    /// Registered type identities in match order.
    pub fn registered(&self) -> Vec<String> {
        self.table.load().entries.iter().map(|(k, _)| k.clone()).collect()
    }
}
