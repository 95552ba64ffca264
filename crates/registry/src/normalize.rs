//! Value normalizers: reduce a raw default to cache-safe metadata primitives.

use defaultable_core::{
    MetaPatch, RawValue, META_BELONGS_TO_ID, META_MORPH_TO_ID, META_MORPH_TO_TYPE, META_VALUE,
};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use smallvec::smallvec;

/// Normalizes one category of field. Implementations never fail: input they
/// cannot interpret yields nulls.
pub trait Normalize: Send + Sync {
    fn normalize(&self, value: &RawValue, kinds: &KindCatalog) -> MetaPatch;
}

impl<F> Normalize for F
where
    F: Fn(&RawValue, &KindCatalog) -> MetaPatch + Send + Sync,
{
    fn normalize(&self, value: &RawValue, kinds: &KindCatalog) -> MetaPatch {
        self(value, kinds)
    }
}

/// Maps type references (model or resource names) to stable type keys.
#[derive(Debug, Clone, Default)]
pub struct KindCatalog {
    aliases: FxHashMap<String, String>,
}

impl KindCatalog {
    pub fn new() -> Self { Self::default() }

    /// Teach the catalog that `alias` names the kind whose stable key is `stable_key`.
    pub fn alias(mut self, alias: impl Into<String>, stable_key: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), stable_key.into());
        self
    }

    /// Known aliases resolve to their stable key; anything else is taken as a stable key already.
    pub fn stable_key<'a>(&'a self, type_ref: &'a str) -> &'a str {
        self.aliases.get(type_ref).map(|s| s.as_str()).unwrap_or(type_ref)
    }
}

/// Pass-through into `{value: v}` for plain fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericNormalizer;

impl Normalize for GenericNormalizer {
    fn normalize(&self, value: &RawValue, _kinds: &KindCatalog) -> MetaPatch {
        smallvec![(META_VALUE.to_string(), value.id().unwrap_or(Json::Null))]
    }
}

/// Polymorphic reference: `{morphToType, morphToId}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MorphToNormalizer;

impl Normalize for MorphToNormalizer {
    fn normalize(&self, value: &RawValue, kinds: &KindCatalog) -> MetaPatch {
        let (ty, id) = match value {
            RawValue::Pair { target, type_ref } => match target.as_ref() {
                RawValue::Entity(_) | RawValue::Scalar(_) => {
                    (Json::String(kinds.stable_key(type_ref).to_string()), target.id().unwrap_or(Json::Null))
                }
                // Malformed tuple
                _ => (Json::Null, Json::Null),
            },
            RawValue::Entity(e) => (Json::String(kinds.stable_key(&e.type_key).to_string()), e.key.to_json()),
            RawValue::Null | RawValue::Scalar(_) => (Json::Null, Json::Null),
        };
        smallvec![(META_MORPH_TO_TYPE.to_string(), ty), (META_MORPH_TO_ID.to_string(), id)]
    }
}

/// Direct reference: `{belongsToId}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BelongsToNormalizer;

impl Normalize for BelongsToNormalizer {
    fn normalize(&self, value: &RawValue, _kinds: &KindCatalog) -> MetaPatch {
        let id = match value {
            RawValue::Entity(e) => e.key.to_json(),
            RawValue::Scalar(v) => v.clone(),
            RawValue::Null | RawValue::Pair { .. } => Json::Null,
        };
        smallvec![(META_BELONGS_TO_ID.to_string(), id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(p: MetaPatch) -> Vec<(String, Json)> { p.into_vec() }

    #[test]
    fn belongs_to_entity_and_raw_id_agree() {
        let k = KindCatalog::new();
        let from_entity = BelongsToNormalizer.normalize(&RawValue::entity(42, "categories"), &k);
        let from_id = BelongsToNormalizer.normalize(&RawValue::scalar(42), &k);
        assert_eq!(as_map(from_entity.clone()), vec![("belongsToId".to_string(), json!(42))]);
        assert_eq!(from_entity, from_id);
    }

    #[test]
    fn morph_to_pair_with_entity() {
        let k = KindCatalog::new();
        let out = MorphToNormalizer.normalize(&RawValue::pair(RawValue::entity(7, "articles"), "articles"), &k);
        assert_eq!(
            as_map(out),
            vec![("morphToType".to_string(), json!("articles")), ("morphToId".to_string(), json!(7))]
        );
    }

    #[test]
    fn morph_to_resolves_known_alias() {
        let k = KindCatalog::new().alias("App\\Models\\Video", "videos");
        let out = MorphToNormalizer.normalize(&RawValue::pair(RawValue::scalar(3), "App\\Models\\Video"), &k);
        assert_eq!(out[0].1, json!("videos"));
        assert_eq!(out[1].1, json!(3));
    }

    #[test]
    fn morph_to_bare_entity_derives_both() {
        let k = KindCatalog::new();
        let out = MorphToNormalizer.normalize(&RawValue::entity("abc", "posts"), &k);
        assert_eq!(out[0].1, json!("posts"));
        assert_eq!(out[1].1, json!("abc"));
    }

    #[test]
    fn morph_to_null_and_malformed_yield_nulls() {
        let k = KindCatalog::new();
        for v in [
            RawValue::Null,
            RawValue::scalar(9),
            RawValue::pair(RawValue::Null, "posts"),
            RawValue::pair(RawValue::pair(RawValue::scalar(1), "a"), "b"),
        ] {
            let out = MorphToNormalizer.normalize(&v, &k);
            assert_eq!(out[0].1, Json::Null, "{:?}", v);
            assert_eq!(out[1].1, Json::Null, "{:?}", v);
        }
    }

    #[test]
    fn generic_passes_scalars_through() {
        let k = KindCatalog::new();
        assert_eq!(GenericNormalizer.normalize(&RawValue::scalar("draft"), &k)[0].1, json!("draft"));
        assert_eq!(GenericNormalizer.normalize(&RawValue::Null, &k)[0].1, Json::Null);
        // entity references never leak into metadata
        assert_eq!(GenericNormalizer.normalize(&RawValue::entity(5, "tags"), &k)[0].1, json!(5));
    }

    #[test]
    fn closures_are_normalizers() {
        let upper = |v: &RawValue, _: &KindCatalog| -> MetaPatch {
            let s = v.id().and_then(|j| j.as_str().map(|s| s.to_uppercase())).unwrap_or_default();
            smallvec![("value".to_string(), Json::String(s))]
        };
        assert_eq!(upper.normalize(&RawValue::scalar("x"), &KindCatalog::new())[0].1, json!("X"));
    }
}
