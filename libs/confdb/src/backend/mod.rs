//! The backend contract: operations a storage plug-in must implement.
//!
//! The facade never inspects concrete backend types; everything flows
//! through the [`Backend`] trait object obtained from a plugin factory. A
//! backend materialises objects into the core-owned [`ImplCache`] passed to
//! its read operations, so object identity is maintained in exactly one
//! place regardless of which backend produced the data.
//!
//! Change notifications travel the other way: at subscription time the core
//! hands the backend a pair of dispatch hooks; the backend invokes them from
//! a thread of its choosing whenever committed modifications are observed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::ImplCache;
use crate::change::Change;
use crate::error::Result;
use crate::object::ObjectImpl;
use crate::schema::ClassInfo;
use crate::value::{RelValue, Value};

pub mod memory;

/// Dispatch hook a backend calls with each committed change batch.
pub type ChangeHook = Arc<dyn Fn(Vec<Change>) + Send + Sync>;

/// Dispatch hook a backend calls immediately before each change batch.
pub type PreChangeHook = Arc<dyn Fn() + Send + Sync>;

/// One recorded database version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Version identifier (backend-defined: hash, sequence number, ...).
    pub id: String,
    /// User that committed the version.
    pub user: String,
    /// Commit time as seconds since the Unix epoch.
    pub timestamp: u64,
    /// Commit message.
    pub comment: String,
    /// Database files touched by the version.
    pub files: Vec<String>,
}

/// How a version query interprets its `since` / `until` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    ByDate,
    ById,
    ByTag,
}

/// Abstract operations over one storage implementation.
///
/// All mutating operations act on the working copy; `commit` publishes it
/// and `abort` discards it. Errors are reported through [`crate::ConfigError`];
/// the facade adds operation context before re-raising.
pub trait Backend: Send + std::fmt::Debug {
    // ------------------------------------------------------------------
    // Database lifecycle
    // ------------------------------------------------------------------

    /// Open a named database.
    fn open_db(&mut self, name: &str) -> Result<()>;

    /// Close the open database.
    fn close_db(&mut self) -> Result<()>;

    /// True when a database is open.
    fn loaded(&self) -> bool;

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// The transitive superclass closure for every known class. Classes
    /// without superclasses map to an empty list.
    fn get_superclasses(&self) -> Result<HashMap<String, Vec<String>>>;

    /// Class description, either direct-only or with inherited attributes,
    /// relationships and the transitive superclass list merged in.
    fn get_class_info(&self, class_name: &str, direct_only: bool) -> Result<ClassInfo>;

    // ------------------------------------------------------------------
    // Object reads
    // ------------------------------------------------------------------

    /// Read one object of `class_name` (or a subclass) into the cache.
    /// `rlevel` bounds eager reference traversal; `rclasses`, when present,
    /// restricts traversal to references of the named classes.
    fn get_object(
        &mut self,
        cache: &mut ImplCache,
        class_name: &str,
        id: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Arc<ObjectImpl>>;

    /// Read all objects of `class_name` and its subclasses matching the
    /// backend-opaque `query` (empty selects all).
    fn get_objects(
        &mut self,
        cache: &mut ImplCache,
        class_name: &str,
        query: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>>;

    /// Traverse from `from` along the backend-opaque `query`.
    fn get_path(
        &mut self,
        cache: &mut ImplCache,
        from: &Arc<ObjectImpl>,
        query: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>>;

    /// Re-read the fields of one already-materialised object.
    fn refresh(&mut self, obj: &Arc<ObjectImpl>) -> Result<()>;

    /// Existence check without materialisation.
    fn test_object(
        &mut self,
        class_name: &str,
        id: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<bool>;

    /// Objects referencing `obj` through `relationship` (`"*"` for any),
    /// optionally restricted to composite relationships.
    fn referenced_by(
        &mut self,
        cache: &mut ImplCache,
        obj: &Arc<ObjectImpl>,
        relationship: &str,
        composite_only: bool,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>>;

    /// Materialise every stored object into the cache.
    fn prefetch_all_data(&mut self, cache: &mut ImplCache) -> Result<()>;

    // ------------------------------------------------------------------
    // Object writes
    // ------------------------------------------------------------------

    /// Create an object in database file `at`.
    fn create_object(
        &mut self,
        cache: &mut ImplCache,
        at: &str,
        class_name: &str,
        id: &str,
    ) -> Result<Arc<ObjectImpl>>;

    /// Destroy an object, cascading over composite relationships.
    fn destroy_object(&mut self, cache: &mut ImplCache, obj: &Arc<ObjectImpl>) -> Result<()>;

    /// Write one attribute, validating type and multiplicity against the
    /// schema.
    fn set_attribute(&mut self, obj: &Arc<ObjectImpl>, name: &str, value: Value) -> Result<()>;

    /// Write one relationship, validating cardinality and target classes.
    fn set_relationship(&mut self, obj: &Arc<ObjectImpl>, name: &str, value: RelValue)
        -> Result<()>;

    /// Change an object's UID in the store. The facade performs the cache
    /// re-indexing; the backend only rewrites its own records.
    fn rename_object(&mut self, obj: &Arc<ObjectImpl>, new_id: &str) -> Result<()>;

    // ------------------------------------------------------------------
    // Databases, includes, versions
    // ------------------------------------------------------------------

    /// Whether the named database accepts writes.
    fn is_writable(&self, db_name: &str) -> Result<bool>;

    /// Create a new database including the given ones, and make it the open
    /// database.
    fn create_db(&mut self, db_name: &str, includes: &[String]) -> Result<()>;

    fn add_include(&mut self, db_name: &str, include: &str) -> Result<()>;

    fn remove_include(&mut self, db_name: &str, include: &str) -> Result<()>;

    fn get_includes(&self, db_name: &str) -> Result<Vec<String>>;

    /// Databases with uncommitted modifications.
    fn get_updated_dbs(&self) -> Result<Vec<String>>;

    /// Versions committed since the previous call.
    fn get_changes(&mut self) -> Result<Vec<Version>>;

    /// Archived versions between `since` and `until`.
    fn get_versions(
        &mut self,
        since: &str,
        until: &str,
        kind: VersionKind,
        skip_irrelevant: bool,
    ) -> Result<Vec<Version>>;

    // ------------------------------------------------------------------
    // Commit / abort
    // ------------------------------------------------------------------

    /// Credentials used for subsequent commits.
    fn set_commit_credentials(&mut self, user: &str, password: &str) -> Result<()>;

    /// Publish the working copy. Returns true when something was committed.
    fn commit(&mut self, message: &str) -> Result<bool>;

    /// Discard the working copy.
    fn abort(&mut self) -> Result<()>;

    // ------------------------------------------------------------------
    // Change subscription
    // ------------------------------------------------------------------

    /// Install the union subscription criteria and the dispatch hooks.
    /// Empty class and object sets subscribe to every change.
    fn subscribe(
        &mut self,
        classes: HashSet<String>,
        objects: HashMap<String, HashSet<String>>,
        hook: ChangeHook,
        pre_hook: PreChangeHook,
    ) -> Result<()>;

    /// Remove any installed subscription.
    fn unsubscribe(&mut self) -> Result<()>;
}
