//! Object-identity cache: per-class buckets of implementation objects.
//!
//! The cache is the single owner of [`ObjectImpl`]s. A lookup for
//! `(class, id)` first probes the class's own bucket and then each bucket in
//! the class's subclass closure in insertion order, so an object created as
//! a subclass instance is found through any of its superclasses.
//!
//! A rename that collides with an existing UID displaces the prior entry
//! onto the *tangled* list instead of dropping it: outstanding handles keep
//! dereferencing safely, and write idempotence across reconciliation is
//! preserved. Tangled objects are destroyed only by [`ImplCache::clean`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::change::Change;
use crate::intern::ClassName;
use crate::object::{ObjectImpl, ObjectState};

/// Per-class mapping `UID -> implementation object`, plus the tangled list.
#[derive(Default)]
pub struct ImplCache {
    buckets: HashMap<ClassName, HashMap<String, Arc<ObjectImpl>>>,
    tangled: Vec<Arc<ObjectImpl>>,
    /// Subclass closure snapshot used for lookup fallback; refreshed by the
    /// facade whenever the inheritance index is rebuilt.
    subclasses: HashMap<ClassName, Vec<ClassName>>,
    cache_hits: u64,
    objects_read: u64,
}

impl ImplCache {
    pub fn new() -> Self {
        ImplCache::default()
    }

    /// Install the subclass closure used for lookup fallback.
    pub fn set_subclasses(&mut self, subclasses: HashMap<ClassName, Vec<ClassName>>) {
        self.subclasses = subclasses;
    }

    /// Look up `(class, id)`, probing the class bucket and then each
    /// subclass bucket in insertion order. Counts cache hits.
    pub fn get_impl(&mut self, class_name: &ClassName, id: &str) -> Option<Arc<ObjectImpl>> {
        if let Some(found) = self.buckets.get(class_name).and_then(|b| b.get(id)) {
            self.cache_hits += 1;
            tracing::debug!(id, class = %class_name, "found object in cache");
            return Some(found.clone());
        }
        if let Some(subclasses) = self.subclasses.get(class_name) {
            for subclass in subclasses {
                if let Some(found) = self.buckets.get(subclass).and_then(|b| b.get(id)) {
                    self.cache_hits += 1;
                    tracing::debug!(id, class = %subclass, "found object in subclass cache");
                    return Some(found.clone());
                }
            }
        }
        None
    }

    /// Look up `(class, id)` in the exact class bucket only.
    pub fn get_exact(&self, class_name: &ClassName, id: &str) -> Option<Arc<ObjectImpl>> {
        self.buckets.get(class_name).and_then(|b| b.get(id)).cloned()
    }

    /// Install an object under its class bucket. Counts object reads.
    pub fn put_impl(&mut self, obj: Arc<ObjectImpl>) {
        self.objects_read += 1;
        let class_name = obj.class_name().clone();
        let id = obj.uid();
        self.buckets.entry(class_name).or_default().insert(id, obj);
    }

    /// Move an object from `old` to `new` within its class bucket.
    ///
    /// A prior entry under `new` is demoted to Unknown state and pushed onto
    /// the tangled list before being replaced.
    pub fn rename_impl(&mut self, class_name: &ClassName, old: &str, new: &str) {
        let bucket = match self.buckets.get_mut(class_name) {
            Some(bucket) => bucket,
            None => return,
        };
        if let Some(renamed) = bucket.remove(old) {
            tracing::debug!(
                old,
                new,
                class = %class_name,
                "rename implementation object"
            );
            if let Some(displaced) = bucket.insert(new.to_string(), renamed) {
                displaced.invalidate(ObjectState::Unknown);
                self.tangled.push(displaced);
            }
        }
    }

    /// Apply one change record to the bucket of `class_name`.
    ///
    /// Created UIDs reset stale entries whatever their state; modified UIDs
    /// clear valid entries (forcing a re-read on next access) and reset
    /// invalid ones; removed UIDs are applied last so an object reported
    /// both modified and removed in one batch ends up deleted.
    pub fn apply_change(&mut self, class_name: &ClassName, change: &Change) {
        let bucket = match self.buckets.get(class_name) {
            Some(bucket) => bucket,
            None => return,
        };
        for id in &change.created {
            if let Some(obj) = bucket.get(id) {
                tracing::debug!(id = %id, class = %class_name, "re-set created implementation object");
                obj.reset();
            }
        }
        for id in &change.modified {
            if let Some(obj) = bucket.get(id) {
                tracing::debug!(id = %id, class = %class_name, "clear modified implementation object");
                let mut core = obj.lock();
                if core.state == ObjectState::Valid {
                    core.clear();
                } else {
                    core.clear();
                    core.state = ObjectState::Unknown;
                }
            }
        }
        for id in &change.removed {
            if let Some(obj) = bucket.get(id) {
                tracing::debug!(id = %id, class = %class_name, "set implementation object deleted");
                obj.invalidate(ObjectState::Deleted);
            }
        }
    }

    /// Invalidate every cached object (including tangled ones) into the
    /// given state with cleared fields. Used by abort.
    pub fn invalidate_all(&self, state: ObjectState) {
        for bucket in self.buckets.values() {
            for obj in bucket.values() {
                obj.invalidate(state);
            }
        }
        for obj in &self.tangled {
            obj.invalidate(state);
        }
    }

    /// Drop every cached and tangled object.
    pub fn clean(&mut self) {
        self.buckets.clear();
        self.tangled.clear();
    }

    /// Objects currently on the tangled list.
    pub fn tangled(&self) -> &[Arc<ObjectImpl>] {
        &self.tangled
    }

    /// Number of cache hits served so far.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Number of objects installed so far.
    pub fn objects_read(&self) -> u64 {
        self.objects_read
    }

    /// Snapshot of cached UIDs per class, for the profiling report.
    pub fn contents(&self) -> Vec<(String, Vec<String>)> {
        let mut result: Vec<(String, Vec<String>)> = self
            .buckets
            .iter()
            .map(|(class, bucket)| {
                let mut ids: Vec<String> = bucket.keys().cloned().collect();
                ids.sort();
                (class.as_str().to_string(), ids)
            })
            .collect();
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;

    fn obj(class: &str, id: &str) -> Arc<ObjectImpl> {
        ObjectImpl::new(
            intern::class_name(class),
            id,
            "test.db",
            ObjectState::Valid,
        )
    }

    fn cache_with_hierarchy() -> ImplCache {
        let mut cache = ImplCache::new();
        cache.set_subclasses(HashMap::from([(
            intern::class_name("Dummy"),
            vec![intern::class_name("Second"), intern::class_name("Third")],
        )]));
        cache
    }

    #[test]
    fn test_put_then_get() {
        let mut cache = cache_with_hierarchy();
        let o = obj("Dummy", "#1");
        cache.put_impl(o.clone());
        let found = cache.get_impl(&intern::class_name("Dummy"), "#1").unwrap();
        assert!(Arc::ptr_eq(&found, &o));
        assert_eq!(cache.cache_hits(), 1);
        assert_eq!(cache.objects_read(), 1);
    }

    #[test]
    fn test_subclass_fallback() {
        let mut cache = cache_with_hierarchy();
        let o = obj("Second", "#7");
        cache.put_impl(o.clone());
        // Lookup through the superclass finds the subclass entry.
        let found = cache.get_impl(&intern::class_name("Dummy"), "#7").unwrap();
        assert!(Arc::ptr_eq(&found, &o));
        // Lookup through an unrelated sibling misses.
        assert!(cache.get_impl(&intern::class_name("Third"), "#7").is_none());
    }

    #[test]
    fn test_rename_moves_entry() {
        let mut cache = cache_with_hierarchy();
        let dummy = intern::class_name("Dummy");
        let o = obj("Dummy", "#A");
        cache.put_impl(o.clone());
        cache.rename_impl(&dummy, "#A", "#B");
        assert!(cache.get_impl(&dummy, "#A").is_none());
        let found = cache.get_impl(&dummy, "#B").unwrap();
        assert!(Arc::ptr_eq(&found, &o));
        assert!(cache.tangled().is_empty());
    }

    #[test]
    fn test_rename_collision_tangles_displaced_object() {
        let mut cache = cache_with_hierarchy();
        let dummy = intern::class_name("Dummy");
        let a = obj("Dummy", "#A");
        let b = obj("Dummy", "#B");
        cache.put_impl(a.clone());
        cache.put_impl(b.clone());
        cache.rename_impl(&dummy, "#A", "#B");
        let found = cache.get_impl(&dummy, "#B").unwrap();
        assert!(Arc::ptr_eq(&found, &a));
        assert_eq!(cache.tangled().len(), 1);
        assert!(Arc::ptr_eq(&cache.tangled()[0], &b));
        assert_eq!(b.state(), ObjectState::Unknown);
    }

    #[test]
    fn test_apply_change_removed_wins_over_modified() {
        let mut cache = cache_with_hierarchy();
        let dummy = intern::class_name("Dummy");
        let o = obj("Dummy", "#1");
        cache.put_impl(o.clone());
        let change = Change {
            class_name: "Dummy".into(),
            created: vec![],
            modified: vec!["#1".into()],
            removed: vec!["#1".into()],
        };
        cache.apply_change(&dummy, &change);
        assert_eq!(o.state(), ObjectState::Deleted);
    }

    #[test]
    fn test_apply_change_resets_resurrected_object() {
        let mut cache = cache_with_hierarchy();
        let dummy = intern::class_name("Dummy");
        let o = obj("Dummy", "#1");
        o.invalidate(ObjectState::Deleted);
        cache.put_impl(o.clone());
        let change = Change {
            class_name: "Dummy".into(),
            created: vec!["#1".into()],
            modified: vec![],
            removed: vec![],
        };
        cache.apply_change(&dummy, &change);
        assert_eq!(o.state(), ObjectState::Unknown);
    }

    #[test]
    fn test_invalidate_all_covers_tangled() {
        let mut cache = cache_with_hierarchy();
        let dummy = intern::class_name("Dummy");
        let a = obj("Dummy", "#A");
        let b = obj("Dummy", "#B");
        cache.put_impl(a.clone());
        cache.put_impl(b.clone());
        cache.rename_impl(&dummy, "#A", "#B");
        cache.invalidate_all(ObjectState::Unknown);
        assert_eq!(a.state(), ObjectState::Unknown);
        assert_eq!(b.state(), ObjectState::Unknown);
    }

    #[test]
    fn test_clean_empties_everything() {
        let mut cache = cache_with_hierarchy();
        let dummy = intern::class_name("Dummy");
        cache.put_impl(obj("Dummy", "#A"));
        cache.put_impl(obj("Dummy", "#B"));
        cache.rename_impl(&dummy, "#A", "#B");
        cache.clean();
        assert!(cache.get_impl(&dummy, "#B").is_none());
        assert!(cache.tangled().is_empty());
    }
}
