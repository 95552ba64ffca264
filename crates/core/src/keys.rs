//! Cache key derivation for remembered field values.
//!
//! Keys look like `{namespace}.{principal}.{md5(canonical)}` where the canonical
//! string is `resource::type::attribute`, with `action::` inserted after the
//! resource for action forms. The digest keeps keys bounded and free of
//! characters a cache backend may reject.

use crate::{Field, RequestContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyDeriver {
    namespace: String,
}

impl CacheKeyDeriver {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into() }
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    /// Composite string identifying the field within its resource (and action).
    pub fn canonical(ctx: &RequestContext, field: &Field) -> String {
        match ctx.action.as_deref() {
            Some(action) => format!("{}::{}::{}::{}", ctx.resource, action, field.type_identity, field.attribute),
            None => format!("{}::{}::{}", ctx.resource, field.type_identity, field.attribute),
        }
    }

    pub fn derive(&self, ctx: &RequestContext, field: &Field) -> String {
        let digest = md5::compute(Self::canonical(ctx, field).as_bytes());
        let principal = ctx.principal_id.as_deref().unwrap_or("");
        format!("{}.{}.{:x}", self.namespace, principal, digest)
    }
}

impl Default for CacheKeyDeriver {
    fn default() -> Self { Self::new(crate::config::DEFAULT_CACHE_KEY) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(attr: &str) -> Field { Field::new("belongs_to", attr) }

    #[test]
    fn same_inputs_same_key() {
        let d = CacheKeyDeriver::new("default_last");
        let ctx = RequestContext::create("U1", "posts");
        let a = d.derive(&ctx, &field("category_id"));
        let b = d.derive(&ctx, &field("category_id"));
        assert_eq!(a, b);
        assert!(a.starts_with("default_last.U1."));
        // 128-bit digest in lowercase hex
        let digest = a.rsplit('.').next().unwrap();
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn each_dimension_discriminates() {
        let d = CacheKeyDeriver::new("default_last");
        let base_ctx = RequestContext::create("U1", "posts");
        let base = d.derive(&base_ctx, &field("category_id"));

        assert_ne!(base, d.derive(&RequestContext::create("U2", "posts"), &field("category_id")));
        assert_ne!(base, d.derive(&RequestContext::create("U1", "pages"), &field("category_id")));
        assert_ne!(base, d.derive(&base_ctx, &field("author_id")));
        assert_ne!(base, d.derive(&base_ctx.clone().with_action("publish"), &field("category_id")));
        assert_ne!(base, d.derive(&base_ctx, &Field::new("select", "category_id")));
        assert_ne!(base, CacheKeyDeriver::new("other").derive(&base_ctx, &field("category_id")));
    }

    #[test]
    fn canonical_inserts_action_after_resource() {
        let ctx = RequestContext::create("U1", "posts");
        assert_eq!(CacheKeyDeriver::canonical(&ctx, &field("category_id")), "posts::belongs_to::category_id");
        let ctx = ctx.with_action("publish");
        assert_eq!(CacheKeyDeriver::canonical(&ctx, &field("category_id")), "posts::publish::belongs_to::category_id");
    }

    #[test]
    fn anonymous_principal_leaves_empty_segment() {
        let d = CacheKeyDeriver::new("ns");
        let ctx = RequestContext { principal_id: None, resource: "posts".into(), create_like: true, action: None };
        assert!(d.derive(&ctx, &field("x")).starts_with("ns.."));
    }
}
