//! Change records and subscription criteria.
//!
//! A backend reports modifications as a batch of per-class [`Change`]
//! records. The dispatcher runs every batch through cache coherence and then
//! delivers a per-subscriber view filtered by that subscriber's
//! [`SubscriptionCriteria`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object::ConfigObject;

// ============================================================================
// Change
// ============================================================================

/// What happened to an object within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeAction {
    Created,
    Modified,
    Removed,
}

/// Changes reported for one class: created, modified and removed UIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub class_name: String,
    pub created: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl Change {
    pub fn new(class_name: impl Into<String>) -> Self {
        Change {
            class_name: class_name.into(),
            ..Change::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Record `id` under `action` in the batch, creating the per-class
    /// record on first use.
    pub fn add(
        changes: &mut Vec<Change>,
        class_name: &str,
        id: &str,
        action: ChangeAction,
    ) {
        let position = match changes.iter().position(|c| c.class_name == class_name) {
            Some(position) => position,
            None => {
                changes.push(Change::new(class_name));
                changes.len() - 1
            }
        };
        let record = &mut changes[position];
        let list = match action {
            ChangeAction::Created => &mut record.created,
            ChangeAction::Modified => &mut record.modified,
            ChangeAction::Removed => &mut record.removed,
        };
        list.push(id.to_string());
    }
}

fn print_uids(f: &mut fmt::Formatter<'_>, uids: &[String], what: &str) -> fmt::Result {
    write!(f, "  * {} {}", uids.len(), what)?;
    for (n, uid) in uids.iter().enumerate() {
        write!(f, "{}\"{}\"", if n == 0 { ": " } else { ", " }, uid)?;
    }
    writeln!(f)
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " changes for class '{}' include:", self.class_name)?;
        print_uids(f, &self.modified, "modified object(s)")?;
        print_uids(f, &self.created, "created object(s)")?;
        print_uids(f, &self.removed, "removed object(s)")
    }
}

// ============================================================================
// Subscription criteria
// ============================================================================

/// Filter describing what a subscriber wants to hear about.
///
/// Two parts: a set of class names subscribed wholesale, and a per-class set
/// of object UIDs. Both empty means "all changes".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCriteria {
    classes: BTreeSet<String>,
    objects: BTreeMap<String, BTreeSet<String>>,
}

impl SubscriptionCriteria {
    pub fn new() -> Self {
        SubscriptionCriteria::default()
    }

    /// Build criteria from the raw class/object sets a backend works with.
    pub fn from_parts(
        classes: HashSet<String>,
        objects: HashMap<String, HashSet<String>>,
    ) -> Self {
        SubscriptionCriteria {
            classes: classes.into_iter().collect(),
            objects: objects
                .into_iter()
                .map(|(class, ids)| (class, ids.into_iter().collect()))
                .collect(),
        }
    }

    /// Subscribe to every change of a class.
    pub fn add_class(&mut self, class_name: impl Into<String>) {
        self.classes.insert(class_name.into());
    }

    /// Subscribe to changes of one object.
    pub fn add_object(&mut self, class_name: impl Into<String>, id: impl Into<String>) {
        self.objects
            .entry(class_name.into())
            .or_default()
            .insert(id.into());
    }

    /// Subscribe to changes of the object behind a handle.
    pub fn add(&mut self, object: &ConfigObject) {
        if let (Some(class), Some(id)) = (object.class_name_opt(), object.uid_opt()) {
            self.add_object(class.as_str(), id);
        }
    }

    pub fn remove_class(&mut self, class_name: &str) {
        self.classes.remove(class_name);
    }

    pub fn remove_object(&mut self, class_name: &str, id: &str) {
        if let Some(ids) = self.objects.get_mut(class_name) {
            ids.remove(id);
            if ids.is_empty() {
                self.objects.remove(class_name);
            }
        }
    }

    pub fn classes(&self) -> &BTreeSet<String> {
        &self.classes
    }

    pub fn objects(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.objects
    }

    /// Empty-empty criteria subscribe to every change.
    pub fn is_subscribe_all(&self) -> bool {
        self.classes.is_empty() && self.objects.is_empty()
    }

    /// Compute the part of a batch this subscriber should observe.
    ///
    /// A class subscription copies the per-class record verbatim. An object
    /// subscription copies only modified and removed UIDs from its set;
    /// creations cannot be filtered per object since the id was unknown at
    /// subscription time, so they are delivered through class subscriptions
    /// only. Classes matching neither part are dropped.
    pub fn filter(&self, changes: &[Change]) -> Vec<Change> {
        if self.is_subscribe_all() {
            return changes.to_vec();
        }
        let mut result = Vec::new();
        for change in changes {
            if self.classes.contains(&change.class_name) {
                result.push(change.clone());
            } else if let Some(ids) = self.objects.get(&change.class_name) {
                let mut filtered = Change::new(&change.class_name);
                for id in &change.modified {
                    if ids.contains(id) {
                        filtered.modified.push(id.clone());
                    }
                }
                for id in &change.removed {
                    if ids.contains(id) {
                        filtered.removed.push(id.clone());
                    }
                }
                if !filtered.is_empty() {
                    result.push(filtered);
                }
            }
        }
        result
    }
}

impl fmt::Display for SubscriptionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subscription criteria:")?;
        if self.classes.is_empty() {
            writeln!(f, "  classes subscription: (null)")?;
        } else {
            writeln!(f, "  classes subscription:")?;
            for class in &self.classes {
                writeln!(f, "    \"{}\"", class)?;
            }
        }
        if self.objects.is_empty() {
            write!(f, "  objects subscription: (null)")?;
        } else {
            writeln!(f, "  objects subscription:")?;
            for (class, ids) in &self.objects {
                writeln!(f, "    objects of class \"{}\":", class)?;
                for id in ids {
                    writeln!(f, "      \"{}\"", id)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<Change> {
        vec![Change {
            class_name: "Dummy".into(),
            created: vec!["#X".into(), "#Y".into()],
            modified: vec!["#X".into()],
            removed: vec!["#Z".into()],
        }]
    }

    #[test]
    fn test_add_merges_per_class() {
        let mut changes = Vec::new();
        Change::add(&mut changes, "Dummy", "#1", ChangeAction::Created);
        Change::add(&mut changes, "Dummy", "#2", ChangeAction::Removed);
        Change::add(&mut changes, "Second", "#3", ChangeAction::Modified);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].created, vec!["#1"]);
        assert_eq!(changes[0].removed, vec!["#2"]);
        assert_eq!(changes[1].modified, vec!["#3"]);
    }

    #[test]
    fn test_class_subscription_gets_full_record() {
        let mut criteria = SubscriptionCriteria::new();
        criteria.add_class("Dummy");
        let filtered = criteria.filter(&batch());
        assert_eq!(filtered, batch());
    }

    #[test]
    fn test_object_subscription_drops_creations_and_foreign_ids() {
        let mut criteria = SubscriptionCriteria::new();
        criteria.add_object("Dummy", "#X");
        let filtered = criteria.filter(&batch());
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].created.is_empty());
        assert_eq!(filtered[0].modified, vec!["#X"]);
        assert!(filtered[0].removed.is_empty());
    }

    #[test]
    fn test_unrelated_class_filtered_out() {
        let mut criteria = SubscriptionCriteria::new();
        criteria.add_class("Third");
        assert!(criteria.filter(&batch()).is_empty());
    }

    #[test]
    fn test_subscribe_all_passes_everything() {
        let criteria = SubscriptionCriteria::new();
        assert!(criteria.is_subscribe_all());
        assert_eq!(criteria.filter(&batch()), batch());
    }

    #[test]
    fn test_remove_object_prunes_empty_class() {
        let mut criteria = SubscriptionCriteria::new();
        criteria.add_object("Dummy", "#X");
        criteria.remove_object("Dummy", "#X");
        assert!(criteria.is_subscribe_all());
    }
}
