//! Class-name interning for pointer-speed identity checks.
//!
//! Class names are the hottest map keys in the library: every object lookup,
//! cast check and cache-coherence pass keys on them. Interning each distinct
//! name once as an [`Arc<str>`] makes equality a pointer comparison in the
//! common case and lets the inheritance maps share a single allocation per
//! class across the whole process.
//!
//! The interner never evicts: the set of class names is small and fixed by
//! the loaded schema.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;

lazy_static! {
    static ref INTERNER: DashMap<String, ClassName> = DashMap::new();
}

/// Intern a class name, returning the canonical shared instance.
///
/// The same input string always returns a [`ClassName`] whose backing
/// allocation is pointer-identical to every earlier result.
pub fn class_name(name: &str) -> ClassName {
    if let Some(existing) = INTERNER.get(name) {
        return existing.clone();
    }
    let interned = ClassName(Arc::from(name));
    INTERNER.insert(name.to_string(), interned.clone());
    interned
}

/// An interned class name.
///
/// Equality first compares the backing pointers (always true for two
/// interned copies of the same name) and falls back to string comparison,
/// so non-interned instances built by deserialization still compare sanely.
#[derive(Debug, Clone)]
pub struct ClassName(Arc<str>);

impl ClassName {
    /// The name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pointer identity with another interned name.
    #[inline]
    pub fn ptr_eq(&self, other: &ClassName) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ClassName {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ClassName {}

impl Hash for ClassName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for ClassName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Borrow<str> for ClassName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interned_names_share_pointer() {
        let a = class_name("Dummy");
        let b = class_name("Dummy");
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_names_differ() {
        let a = class_name("Dummy");
        let b = class_name("Second");
        assert!(!a.ptr_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_map_lookup_by_str() {
        use std::collections::HashMap;
        let mut map: HashMap<ClassName, u32> = HashMap::new();
        map.insert(class_name("Dummy"), 1);
        assert_eq!(map.get("Dummy"), Some(&1));
        assert_eq!(map.get("Second"), None);
    }

    #[test]
    fn test_non_interned_equality_falls_back_to_string() {
        let a = class_name("Third");
        let b = ClassName(Arc::from("Third"));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
    }
}
