//! Subscription records and the subscriber registry.
//!
//! The registry owns every live subscription. On each subscribe and
//! unsubscribe the facade recomputes the *union* criteria to install on the
//! backend: the backend then only reports changes at least one subscriber
//! cares about, and the dispatcher narrows each batch further per
//! subscriber.
//!
//! User callbacks run behind a panic firewall: a failing callback is
//! reported at error severity and never suppresses other subscribers.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::change::{Change, SubscriptionCriteria};
use crate::error::{ConfigError, Result};

/// Identifier returned by subscribe calls, used to unsubscribe.
pub type CallbackId = u64;

/// Change notification callback.
pub type NotifyCallback = Box<dyn Fn(&[Change]) + Send + Sync>;

/// Pre-change notification callback, invoked before each batch.
pub type PreNotifyCallback = Box<dyn Fn() + Send + Sync>;

pub(crate) struct CallbackSubscription {
    pub id: CallbackId,
    pub criteria: SubscriptionCriteria,
    pub callback: NotifyCallback,
}

pub(crate) struct PreCallbackSubscription {
    pub id: CallbackId,
    pub callback: PreNotifyCallback,
}

/// All live subscriptions of one facade, protected by the subscriber mutex.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: CallbackId,
    callbacks: Vec<Arc<CallbackSubscription>>,
    pre_callbacks: Vec<Arc<PreCallbackSubscription>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        SubscriberRegistry::default()
    }

    pub fn insert(&mut self, criteria: SubscriptionCriteria, callback: NotifyCallback) -> CallbackId {
        self.next_id += 1;
        let id = self.next_id;
        self.callbacks.push(Arc::new(CallbackSubscription {
            id,
            criteria,
            callback,
        }));
        id
    }

    pub fn insert_pre(&mut self, callback: PreNotifyCallback) -> CallbackId {
        self.next_id += 1;
        let id = self.next_id;
        self.pre_callbacks
            .push(Arc::new(PreCallbackSubscription { id, callback }));
        id
    }

    /// Remove one subscription (change or pre-change) by id.
    pub fn remove(&mut self, id: CallbackId) -> Result<()> {
        if let Some(pos) = self.callbacks.iter().position(|s| s.id == id) {
            self.callbacks.remove(pos);
            return Ok(());
        }
        if let Some(pos) = self.pre_callbacks.iter().position(|s| s.id == id) {
            self.pre_callbacks.remove(pos);
            return Ok(());
        }
        Err(ConfigError::generic(format!(
            "unsubscription failed for callback id {} (no such callback id found)",
            id
        )))
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
        self.pre_callbacks.clear();
    }

    pub fn has_callbacks(&self) -> bool {
        !self.callbacks.is_empty()
    }

    /// Snapshot of change subscriptions; taken under the subscriber mutex,
    /// iterated after release so callbacks may re-enter the facade.
    pub fn snapshot(&self) -> Vec<Arc<CallbackSubscription>> {
        self.callbacks.clone()
    }

    pub fn pre_snapshot(&self) -> Vec<Arc<PreCallbackSubscription>> {
        self.pre_callbacks.clone()
    }

    /// Compute the union criteria to install on the backend.
    ///
    /// If any subscriber wants everything, the union is "all changes"
    /// (empty-empty). Otherwise class subscriptions are unioned first, and
    /// object subscriptions are unioned only for classes not already
    /// subscribed wholesale.
    pub fn union_criteria(&self) -> (HashSet<String>, HashMap<String, HashSet<String>>) {
        let mut classes = HashSet::new();
        let mut objects: HashMap<String, HashSet<String>> = HashMap::new();

        if self
            .callbacks
            .iter()
            .any(|s| s.criteria.is_subscribe_all())
        {
            return (classes, objects);
        }

        for subscription in &self.callbacks {
            for class in subscription.criteria.classes() {
                classes.insert(class.clone());
            }
        }
        for subscription in &self.callbacks {
            for (class, ids) in subscription.criteria.objects() {
                if !classes.contains(class) {
                    objects
                        .entry(class.clone())
                        .or_default()
                        .extend(ids.iter().cloned());
                }
            }
        }
        (classes, objects)
    }
}

/// Invoke a user callback inside the panic firewall.
pub(crate) fn invoke_guarded(subscription: &CallbackSubscription, changes: &[Change]) {
    tracing::debug!(id = subscription.id, "invoke subscriber callback");
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (subscription.callback)(changes))) {
        tracing::error!(
            id = subscription.id,
            panic = panic_text(&panic),
            "user callback panicked"
        );
    }
}

/// Invoke a pre-change callback inside the panic firewall.
pub(crate) fn invoke_pre_guarded(subscription: &PreCallbackSubscription) {
    tracing::debug!(id = subscription.id, "invoke pre-change callback");
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (subscription.callback)())) {
        tracing::error!(
            id = subscription.id,
            panic = panic_text(&panic),
            "user pre-change callback panicked"
        );
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        *text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria_class(class: &str) -> SubscriptionCriteria {
        let mut c = SubscriptionCriteria::new();
        c.add_class(class);
        c
    }

    fn criteria_object(class: &str, id: &str) -> SubscriptionCriteria {
        let mut c = SubscriptionCriteria::new();
        c.add_object(class, id);
        c
    }

    #[test]
    fn test_union_subscribe_all_wins() {
        let mut registry = SubscriberRegistry::new();
        registry.insert(criteria_class("Dummy"), Box::new(|_: &[Change]| {}));
        registry.insert(SubscriptionCriteria::new(), Box::new(|_: &[Change]| {}));
        let (classes, objects) = registry.union_criteria();
        assert!(classes.is_empty());
        assert!(objects.is_empty());
    }

    #[test]
    fn test_union_merges_classes_and_objects() {
        let mut registry = SubscriberRegistry::new();
        registry.insert(criteria_class("Dummy"), Box::new(|_: &[Change]| {}));
        registry.insert(criteria_object("Dummy", "#1"), Box::new(|_: &[Change]| {}));
        registry.insert(criteria_object("Second", "#2"), Box::new(|_: &[Change]| {}));
        let (classes, objects) = registry.union_criteria();
        assert_eq!(classes, HashSet::from(["Dummy".to_string()]));
        // Object subscription for a wholesale-subscribed class is absorbed.
        assert!(!objects.contains_key("Dummy"));
        assert_eq!(
            objects.get("Second").unwrap(),
            &HashSet::from(["#2".to_string()])
        );
    }

    #[test]
    fn test_remove_unknown_id_is_an_error() {
        let mut registry = SubscriberRegistry::new();
        assert!(registry.remove(42).is_err());
    }

    #[test]
    fn test_remove_pre_callback() {
        let mut registry = SubscriberRegistry::new();
        let id = registry.insert_pre(Box::new(|| {}));
        assert!(registry.remove(id).is_ok());
        assert!(registry.pre_snapshot().is_empty());
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let mut registry = SubscriberRegistry::new();
        registry.insert(
            SubscriptionCriteria::new(),
            Box::new(|_: &[Change]| panic!("callback exploded")),
        );
        let snapshot = registry.snapshot();
        // Must not propagate the panic.
        invoke_guarded(&snapshot[0], &[]);
    }
}
