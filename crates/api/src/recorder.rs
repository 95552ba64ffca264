//! Submit-time recording of values for fields marked `defaultLast`.

use std::time::Duration;

use defaultable_core::{CacheKeyDeriver, Field, Id, RawValue, RequestContext};
use defaultable_store::{put_or_log, LastValueStore};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Submitted input keyed by field attribute.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    values: FxHashMap<String, RawValue>,
}

impl Submission {
    pub fn new() -> Self { Self::default() }

    pub fn set(mut self, attribute: impl Into<String>, value: RawValue) -> Self {
        self.values.insert(attribute.into(), value);
        self
    }

    /// Polymorphic input is kept as an (id, type) pair so it can be normalized again later.
    pub fn morph(self, attribute: impl Into<String>, id: impl Into<Id>, type_ref: impl Into<String>) -> Self {
        let target = match id.into() {
            Id::Int(n) => RawValue::scalar(n),
            Id::Str(s) => RawValue::scalar(s),
        };
        self.set(attribute, RawValue::pair(target, type_ref))
    }

    pub fn get(&self, attribute: &str) -> Option<&RawValue> { self.values.get(attribute) }
}

impl FromIterator<(String, RawValue)> for Submission {
    fn from_iter<T: IntoIterator<Item = (String, RawValue)>>(iter: T) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// Remembers submitted values after a successful create, attach or action run.
pub struct Recorder<'a, S> {
    store: &'a S,
    keys: &'a CacheKeyDeriver,
    ttl: Duration,
}

impl<'a, S: LastValueStore> Recorder<'a, S> {
    pub fn new(store: &'a S, keys: &'a CacheKeyDeriver, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// Write every marked field present in `submission`. Store failures never fail the
    /// submit; the return value counts writes that landed.
    pub fn record<'f, I>(&self, ctx: &RequestContext, fields: I, submission: &Submission) -> usize
    where
        I: IntoIterator<Item = &'f Field>,
    {
        let mut written = 0usize;
        for field in fields.into_iter().filter(|f| f.is_default_last()) {
            let Some(value) = submission.get(&field.attribute) else { continue };
            let key = self.keys.derive(ctx, field);
            if put_or_log(self.store, &key, value, self.ttl) {
                written += 1;
            }
        }
        counter!("lastvalue_recorded_total", written as u64);
        debug!(resource = %ctx.resource, action = ?ctx.action, written, "recorded last values");
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use defaultable_core::META_DEFAULT_LAST;
    use defaultable_store::MemoryStore;

    #[test]
    fn only_marked_and_present_fields_are_written() {
        let store = MemoryStore::new();
        let keys = CacheKeyDeriver::new("default_last");
        let rec = Recorder::new(&store, &keys, Duration::from_secs(60));
        let ctx = RequestContext::create("U1", "posts");
        let fields = vec![
            Field::new("belongs_to", "category_id").with_meta(META_DEFAULT_LAST, true),
            Field::new("text", "title"),
            Field::new("text", "slug").with_meta(META_DEFAULT_LAST, true),
        ];
        let sub = Submission::new()
            .set("category_id", RawValue::scalar(5))
            .set("title", RawValue::scalar("Hello"));
        assert_eq!(rec.record(&ctx, &fields, &sub), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&keys.derive(&ctx, &fields[0])).unwrap(), Some(RawValue::scalar(5)));
    }

    #[test]
    fn morph_submission_keeps_pair() {
        let sub = Submission::new().morph("commentable", 7, "articles");
        assert_eq!(sub.get("commentable"), Some(&RawValue::pair(RawValue::scalar(7), "articles")));
    }
}
