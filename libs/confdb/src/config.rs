//! The `Configuration` facade.
//!
//! One `Configuration` owns a backend instance (resolved through the plugin
//! loader), the object-identity cache, the inheritance index, the schema
//! caches, the generated-wrapper caches and the subscription registry. It is
//! safe for concurrent callers.
//!
//! ## Locking discipline
//!
//! Five mutex tiers, always acquired in this order:
//!
//! 1. template mutex - generated wrapper caches;
//! 2. implementation mutex - object cache, inheritance index, schema
//!    caches and the backend handle;
//! 3. actions mutex - internal [`ConfigAction`] observers;
//! 4. subscriber mutex - subscription records;
//! 5. per-object mutex - the fields of one implementation object.
//!
//! The dispatcher snapshots the subscriber list and invokes user callbacks
//! with no facade locks held, so callbacks may freely call back into the
//! facade.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{ChangeHook, PreChangeHook, Version, VersionKind};
use crate::backend::Backend;
use crate::cache::ImplCache;
use crate::change::{Change, SubscriptionCriteria};
use crate::dal::{self, TemplateCache};
use crate::error::{ConfigError, Result};
use crate::intern::{self, ClassName};
use crate::notify::{self, CallbackId, SubscriberRegistry};
use crate::object::{ConfigObject, ObjectImpl, ObjectState};
use crate::plugin::{self, BackendSpec, PluginHandle};
use crate::schema::ClassInfo;
use crate::value::{ObjectRef, RelValue, Scalar, Value};

// ============================================================================
// Observers and converters
// ============================================================================

/// Internal observer notified around consistency-sensitive operations.
///
/// Actions run before user callbacks and are meant for caches that must stay
/// coherent with the database, not for application logic.
pub trait ConfigAction: Send + Sync {
    /// A database was (re)loaded.
    fn load(&self) {}

    /// The database is being unloaded.
    fn unload(&self) {}

    /// An object identity changed (currently: rename).
    fn update(&self, _obj: &ConfigObject, _name: &str) {}

    /// A change batch is being dispatched.
    fn notify(&self, _changes: &[Change]) {}
}

/// Converter applied to string attribute reads, e.g. to expand substitution
/// variables whose on-disk encoding differs from the native value.
/// Arguments: raw value, owning object, attribute name.
pub type StringConverter = Arc<dyn Fn(&str, &ConfigObject, &str) -> String + Send + Sync>;

// ============================================================================
// Internal state
// ============================================================================

#[derive(Default)]
struct TemplateState {
    caches: HashMap<ClassName, Box<dyn TemplateCache>>,
}

/// Everything guarded by the implementation mutex.
pub(crate) struct ImplState {
    pub backend: Box<dyn Backend>,
    pub cache: ImplCache,
    pub superclasses: HashMap<ClassName, Vec<ClassName>>,
    pub subclasses: HashMap<ClassName, Vec<ClassName>>,
    direct_desc: HashMap<String, Arc<ClassInfo>>,
    all_desc: HashMap<String, Arc<ClassInfo>>,
}

impl ImplState {
    /// Re-read the superclass closure from the backend and rebuild the
    /// subclass closure by inversion. Called after load, create,
    /// add_include, remove_include and abort.
    fn rebuild_closure(&mut self) -> Result<()> {
        let raw = self.backend.get_superclasses()?;
        let mut superclasses: HashMap<ClassName, Vec<ClassName>> = HashMap::new();
        let mut subclasses: HashMap<ClassName, Vec<ClassName>> = HashMap::new();
        for (class, supers) in &raw {
            let class = intern::class_name(class);
            subclasses.entry(class.clone()).or_default();
            superclasses.insert(
                class,
                supers.iter().map(|s| intern::class_name(s)).collect(),
            );
        }
        for (class, supers) in &superclasses {
            for superclass in supers {
                let entry = subclasses.entry(superclass.clone()).or_default();
                if !entry.contains(class) {
                    entry.push(class.clone());
                }
            }
        }
        self.cache.set_subclasses(subclasses.clone());
        self.superclasses = superclasses;
        self.subclasses = subclasses;
        Ok(())
    }

    fn clear_schema_caches(&mut self) {
        self.direct_desc.clear();
        self.all_desc.clear();
    }
}

pub(crate) struct ConfigurationInner {
    spec: BackendSpec,
    tmpl: Mutex<TemplateState>,
    db: Mutex<ImplState>,
    actions: Mutex<Vec<Arc<dyn ConfigAction>>>,
    subscribers: Mutex<SubscriberRegistry>,
    converters: Mutex<Vec<StringConverter>>,
    _plugin: PluginHandle,
}

impl ConfigurationInner {
    fn tmpl_lock(&self) -> MutexGuard<'_, TemplateState> {
        self.tmpl.lock().expect("template mutex poisoned")
    }

    fn db_lock(&self) -> MutexGuard<'_, ImplState> {
        self.db.lock().expect("implementation mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Services used by object handles
    // ------------------------------------------------------------------

    pub(crate) fn refresh_object(&self, obj: &Arc<ObjectImpl>) -> Result<()> {
        let mut db = self.db_lock();
        db.backend.refresh(obj)
    }

    pub(crate) fn write_attribute(
        &self,
        obj: &Arc<ObjectImpl>,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let mut db = self.db_lock();
        db.backend.set_attribute(obj, name, value)
    }

    pub(crate) fn write_relationship(
        &self,
        obj: &Arc<ObjectImpl>,
        name: &str,
        value: RelValue,
    ) -> Result<()> {
        let mut db = self.db_lock();
        db.backend.set_relationship(obj, name, value)
    }

    pub(crate) fn resolve_ref(&self, target: &ObjectRef) -> Result<Arc<ObjectImpl>> {
        let mut db = self.db_lock();
        let state = &mut *db;
        state
            .backend
            .get_object(&mut state.cache, &target.class_name, &target.id, 0, None)
    }

    pub(crate) fn referenced_by(
        &self,
        obj: &Arc<ObjectImpl>,
        relationship: &str,
        composite_only: bool,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>> {
        let mut db = self.db_lock();
        let state = &mut *db;
        state.backend.referenced_by(
            &mut state.cache,
            obj,
            relationship,
            composite_only,
            rlevel,
            rclasses,
        )
    }

    pub(crate) fn class_info(
        &self,
        class_name: &str,
        direct_only: bool,
    ) -> Result<Arc<ClassInfo>> {
        let mut db = self.db_lock();
        let memo = if direct_only {
            &db.direct_desc
        } else {
            &db.all_desc
        };
        if let Some(info) = memo.get(class_name) {
            return Ok(info.clone());
        }
        let info = db
            .backend
            .get_class_info(class_name, direct_only)
            .map_err(|e| {
                e.wrap(format!(
                    "failed to get description of class '{}'",
                    class_name
                ))
            })?;
        let info = Arc::new(info);
        let memo = if direct_only {
            &mut db.direct_desc
        } else {
            &mut db.all_desc
        };
        memo.insert(class_name.to_string(), info.clone());
        Ok(info)
    }

    pub(crate) fn apply_string_converters(
        &self,
        obj: &ConfigObject,
        attr_name: &str,
        value: Value,
    ) -> Value {
        let converters = self
            .converters
            .lock()
            .expect("converter mutex poisoned")
            .clone();
        if converters.is_empty() {
            return value;
        }
        let convert = |scalar: Scalar| match scalar {
            Scalar::String(mut text) => {
                for converter in &converters {
                    text = converter(&text, obj, attr_name);
                }
                Scalar::String(text)
            }
            other => other,
        };
        match value {
            Value::Single(scalar) => Value::Single(convert(scalar)),
            Value::Vector(scalars) => {
                Value::Vector(scalars.into_iter().map(convert).collect())
            }
        }
    }

    pub(crate) fn rename_object(&self, obj: &Arc<ObjectImpl>, new_id: &str) -> Result<()> {
        let mut tmpl = self.tmpl_lock();
        let mut db = self.db_lock();
        let old_id = {
            let core = obj.lock();
            if core.state == ObjectState::Deleted {
                return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id));
            }
            core.id.clone()
        };
        db.backend.rename_object(obj, new_id).map_err(|e| {
            e.wrap(format!(
                "failed to rename object '{}@{}' to '{}'",
                old_id,
                obj.class_name(),
                new_id
            ))
        })?;
        obj.lock().id = new_id.to_string();
        let class_name = obj.class_name().clone();
        tracing::debug!(
            old = %old_id,
            new = new_id,
            class = %class_name,
            "rename object"
        );
        db.cache.rename_impl(&class_name, &old_id, new_id);

        // Wrapper caches of the class and its superclasses may index by UID.
        let mut targets = vec![class_name.clone()];
        if let Some(supers) = db.superclasses.get(&class_name) {
            targets.extend(supers.iter().cloned());
        }
        for target in &targets {
            if let Some(cache) = tmpl.caches.get_mut(target) {
                cache.rename(&old_id, new_id);
            }
        }
        Ok(())
    }

    pub(crate) fn action_on_update(&self, obj: &ConfigObject, name: &str) {
        let actions = self.actions.lock().expect("actions mutex poisoned");
        for action in actions.iter() {
            action.update(obj, name);
        }
    }

    // ------------------------------------------------------------------
    // Change dispatch
    // ------------------------------------------------------------------

    /// Entry point for backend change notifications.
    pub(crate) fn system_notify(&self, changes: Vec<Change>) {
        tracing::debug!(classes = changes.len(), "enter change dispatch");

        {
            let _db = self.db_lock();
            let actions = self.actions.lock().expect("actions mutex poisoned");
            for action in actions.iter() {
                action.notify(&changes);
            }
        }

        {
            let mut tmpl = self.tmpl_lock();
            let mut db = self.db_lock();
            Self::update_cache(&mut tmpl, &mut db, &changes);
        }

        // Snapshot under the subscriber mutex, invoke after release: user
        // callbacks may re-enter the facade.
        let snapshot = {
            let subscribers = self.subscribers.lock().expect("subscriber mutex poisoned");
            if !subscribers.has_callbacks() {
                return;
            }
            subscribers.snapshot()
        };

        if snapshot.len() == 1 {
            // The backend-side criteria equal this subscriber's criteria,
            // so the batch is already filtered.
            notify::invoke_guarded(&snapshot[0], &changes);
            return;
        }
        for subscription in &snapshot {
            let filtered = subscription.criteria.filter(&changes);
            if filtered.is_empty() {
                continue;
            }
            notify::invoke_guarded(subscription, &filtered);
        }
    }

    /// Entry point for backend pre-change notifications. Pre-change
    /// callbacks run with the subscriber mutex held and must not
    /// subscribe or unsubscribe.
    pub(crate) fn system_pre_notify(&self) {
        let subscribers = self.subscribers.lock().expect("subscriber mutex poisoned");
        for subscription in subscribers.pre_snapshot() {
            notify::invoke_pre_guarded(&subscription);
        }
    }

    /// Cache coherence: apply each change record to the class itself, its
    /// superclasses and its subclasses, then run the wrapper update hooks
    /// over the same set.
    fn update_cache(tmpl: &mut TemplateState, db: &mut ImplState, changes: &[Change]) {
        for change in changes {
            let class_name = intern::class_name(&change.class_name);
            let targets = Self::hierarchy(db, &class_name);
            for target in &targets {
                db.cache.apply_change(target, change);
            }
        }
        for change in changes {
            let class_name = intern::class_name(&change.class_name);
            let targets = Self::hierarchy(db, &class_name);
            for target in &targets {
                if let Some(cache) = tmpl.caches.get_mut(target) {
                    tracing::debug!(class = %target, "update wrapper cache");
                    cache.update(change);
                }
            }
        }
    }

    fn hierarchy(db: &ImplState, class_name: &ClassName) -> Vec<ClassName> {
        let mut targets = vec![class_name.clone()];
        if let Some(supers) = db.superclasses.get(class_name) {
            targets.extend(supers.iter().cloned());
        }
        if let Some(subs) = db.subclasses.get(class_name) {
            targets.extend(subs.iter().cloned());
        }
        targets
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Schema-driven facade over one pluggable storage backend.
///
/// # Example
///
/// ```rust,ignore
/// use confdb::Configuration;
///
/// let db = Configuration::new("memory")?;
/// db.load("setup.data")?;
/// let object = db.get("Application", "monitor")?;
/// let timeout: u32 = object.get_val("Timeout")?;
/// ```
pub struct Configuration {
    inner: Arc<ConfigurationInner>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration").finish_non_exhaustive()
    }
}

impl Configuration {
    /// Create a facade from a backend spec (`NAME` or `NAME:PARAMS`).
    ///
    /// An empty spec falls back to the [`crate::ENV_BACKEND`] environment
    /// variable; having neither is an error. When the backend opens a
    /// database from its parameter string, the inheritance index is built
    /// immediately.
    pub fn new(spec: &str) -> Result<Configuration> {
        let spec = BackendSpec::parse(spec)?;
        let (backend, plugin) = plugin::load_backend(&spec)?;
        let inner = Arc::new(ConfigurationInner {
            spec,
            tmpl: Mutex::new(TemplateState::default()),
            db: Mutex::new(ImplState {
                backend,
                cache: ImplCache::new(),
                superclasses: HashMap::new(),
                subclasses: HashMap::new(),
                direct_desc: HashMap::new(),
                all_desc: HashMap::new(),
            }),
            actions: Mutex::new(Vec::new()),
            subscribers: Mutex::new(SubscriberRegistry::new()),
            converters: Mutex::new(Vec::new()),
            _plugin: plugin,
        });
        let conf = Configuration { inner };
        {
            let mut db = conf.inner.db_lock();
            if db.backend.loaded() {
                db.rebuild_closure()?;
                if crate::env_flag(crate::ENV_PREFETCH_ALL_DATA) {
                    let state = &mut *db;
                    state
                        .backend
                        .prefetch_all_data(&mut state.cache)
                        .map_err(|e| e.wrap("prefetch all data failed"))?;
                }
            }
        }
        Ok(conf)
    }

    fn object(&self, obj: Arc<ObjectImpl>) -> ConfigObject {
        ConfigObject::from_parts(Arc::downgrade(&self.inner), obj)
    }

    // ------------------------------------------------------------------
    // Database lifecycle
    // ------------------------------------------------------------------

    /// True when a database is open.
    pub fn loaded(&self) -> bool {
        self.inner.db_lock().backend.loaded()
    }

    /// Open a database. An empty name falls back to the spec's parameter
    /// string and then to the [`crate::ENV_DB_NAME`] environment variable.
    pub fn load(&self, db_name: &str) -> Result<()> {
        let name = if !db_name.is_empty() {
            db_name.to_string()
        } else if !self.inner.spec.params.is_empty() {
            self.inner.spec.params.clone()
        } else {
            std::env::var(crate::ENV_DB_NAME)
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ConfigError::generic("no database name was provided"))?
        };

        let mut db = self.inner.db_lock();
        {
            let actions = self.inner.actions.lock().expect("actions mutex poisoned");
            for action in actions.iter() {
                action.load();
            }
        }
        db.backend.open_db(&name)?;
        db.rebuild_closure()?;
        if crate::env_flag(crate::ENV_PREFETCH_ALL_DATA) {
            let state = &mut *db;
            state
                .backend
                .prefetch_all_data(&mut state.cache)
                .map_err(|e| e.wrap("prefetch all data failed"))?;
        }
        tracing::info!(db = %name, "database loaded");
        Ok(())
    }

    /// Close the database, dropping every cache, subscription and
    /// converter.
    pub fn unload(&self) -> Result<()> {
        let mut tmpl = self.inner.tmpl_lock();
        let mut db = self.inner.db_lock();
        if !db.backend.loaded() {
            return Err(ConfigError::generic("nothing to unload"));
        }
        {
            let actions = self.inner.actions.lock().expect("actions mutex poisoned");
            for action in actions.iter() {
                action.unload();
            }
        }
        tmpl.caches.clear();
        {
            let mut subscribers = self.inner.subscribers.lock().expect("subscriber mutex poisoned");
            subscribers.clear();
            db.backend.unsubscribe()?;
        }
        self.inner
            .converters
            .lock()
            .expect("converter mutex poisoned")
            .clear();
        db.superclasses.clear();
        db.subclasses.clear();
        db.clear_schema_caches();
        db.cache.clean();
        db.backend.close_db()
    }

    /// Create a new database including the given ones and open it.
    pub fn create_db(&self, db_name: &str, includes: &[String]) -> Result<()> {
        let mut db = self.inner.db_lock();
        if let Err(e) = db.backend.create_db(db_name, includes) {
            return Err(e.wrap(format!("failed to create database '{}'", db_name)));
        }
        db.rebuild_closure()
            .map_err(|e| e.wrap(format!("failed to create database '{}'", db_name)))
    }

    /// Whether a database accepts writes.
    pub fn is_writable(&self, db_name: &str) -> Result<bool> {
        let db = self.inner.db_lock();
        db.backend.is_writable(db_name).map_err(|e| {
            e.wrap(format!(
                "failed to get write access status for database '{}'",
                db_name
            ))
        })
    }

    /// Add an include to a database and rebuild the inheritance index.
    pub fn add_include(&self, db_name: &str, include: &str) -> Result<()> {
        let mut db = self.inner.db_lock();
        if let Err(e) = db.backend.add_include(db_name, include) {
            return Err(e.wrap(format!(
                "failed to add include '{}' to database '{}'",
                include, db_name
            )));
        }
        db.rebuild_closure().map_err(|e| {
            e.wrap(format!(
                "failed to add include '{}' to database '{}'",
                include, db_name
            ))
        })
    }

    /// Remove an include. Object visibility changes, so the template mutex
    /// is taken as well.
    pub fn remove_include(&self, db_name: &str, include: &str) -> Result<()> {
        let _tmpl = self.inner.tmpl_lock();
        let mut db = self.inner.db_lock();
        if let Err(e) = db.backend.remove_include(db_name, include) {
            return Err(e.wrap(format!(
                "failed to remove include '{}' from database '{}'",
                include, db_name
            )));
        }
        db.rebuild_closure().map_err(|e| {
            e.wrap(format!(
                "failed to remove include '{}' from database '{}'",
                include, db_name
            ))
        })
    }

    /// Includes of a database.
    pub fn get_includes(&self, db_name: &str) -> Result<Vec<String>> {
        let db = self.inner.db_lock();
        db.backend
            .get_includes(db_name)
            .map_err(|e| e.wrap(format!("failed to get includes of database '{}'", db_name)))
    }

    /// Databases with uncommitted modifications.
    pub fn get_updated_dbs(&self) -> Result<Vec<String>> {
        let db = self.inner.db_lock();
        db.backend
            .get_updated_dbs()
            .map_err(|e| e.wrap("get_updated_dbs failed"))
    }

    /// Credentials used for subsequent commits.
    pub fn set_commit_credentials(&self, user: &str, password: &str) -> Result<()> {
        let mut db = self.inner.db_lock();
        db.backend
            .set_commit_credentials(user, password)
            .map_err(|e| e.wrap("set_commit_credentials failed"))
    }

    /// Commit the working copy with a log message.
    pub fn commit(&self, message: &str) -> Result<bool> {
        tracing::debug!("call commit");
        let _tmpl = self.inner.tmpl_lock();
        let mut db = self.inner.db_lock();
        if !db.backend.loaded() {
            return Err(ConfigError::generic("no implementation loaded"));
        }
        db.backend.commit(message).map_err(|e| ConfigError::Commit {
            message: "commit failed".to_string(),
            cause: Some(anyhow::Error::new(e)),
        })
    }

    /// Discard the working copy. Every cached implementation object is
    /// invalidated and the inheritance index rebuilt.
    pub fn abort(&self) -> Result<()> {
        tracing::debug!("call abort");
        let mut tmpl = self.inner.tmpl_lock();
        let mut db = self.inner.db_lock();
        if !db.backend.loaded() {
            return Err(ConfigError::generic("no implementation loaded"));
        }
        db.backend.abort().map_err(|e| e.wrap("abort failed"))?;
        db.cache.invalidate_all(ObjectState::Unknown);
        for cache in tmpl.caches.values_mut() {
            cache.unread();
        }
        db.clear_schema_caches();
        db.rebuild_closure().map_err(|e| e.wrap("abort failed"))
    }

    /// Eagerly read every stored object into the cache.
    pub fn prefetch_all_data(&self) -> Result<()> {
        let _tmpl = self.inner.tmpl_lock();
        let mut db = self.inner.db_lock();
        let state = &mut *db;
        state
            .backend
            .prefetch_all_data(&mut state.cache)
            .map_err(|e| e.wrap("prefetch all data failed"))
    }

    /// Invalidate cached objects so the next access re-reads them.
    pub fn unread_all_objects(&self, unread_implementation_objects: bool) {
        let mut tmpl = self.inner.tmpl_lock();
        let db = self.inner.db_lock();
        if unread_implementation_objects {
            db.cache.invalidate_all(ObjectState::Unknown);
        }
        for cache in tmpl.caches.values_mut() {
            cache.unread();
        }
    }

    // ------------------------------------------------------------------
    // Object access
    // ------------------------------------------------------------------

    /// Read one object of a class (or any of its subclasses).
    pub fn get(&self, class_name: &str, id: &str) -> Result<ConfigObject> {
        self.get_with(class_name, id, 0, None)
    }

    /// [`Self::get`] with explicit read depth and reference-class filter.
    pub fn get_with(
        &self,
        class_name: &str,
        id: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<ConfigObject> {
        let mut db = self.inner.db_lock();
        let state = &mut *db;
        let obj = state
            .backend
            .get_object(&mut state.cache, class_name, id, rlevel, rclasses)
            .map_err(|e| e.wrap(format!("failed to get object '{}@{}'", id, class_name)))?;
        Ok(self.object(obj))
    }

    /// Read all objects of a class matching a backend-opaque query
    /// (empty selects all).
    pub fn get_objects(&self, class_name: &str, query: &str) -> Result<Vec<ConfigObject>> {
        self.get_objects_with(class_name, query, 0, None)
    }

    /// [`Self::get_objects`] with explicit read depth and filter.
    pub fn get_objects_with(
        &self,
        class_name: &str,
        query: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<ConfigObject>> {
        let mut db = self.inner.db_lock();
        let state = &mut *db;
        let objs = state
            .backend
            .get_objects(&mut state.cache, class_name, query, rlevel, rclasses)
            .map_err(|e| {
                let mut text = format!("failed to get objects of class '{}'", class_name);
                if !query.is_empty() {
                    text.push_str(&format!(" with query '{}'", query));
                }
                e.wrap(text)
            })?;
        Ok(objs.into_iter().map(|o| self.object(o)).collect())
    }

    /// Traverse from an object along a backend-opaque path query.
    pub fn get_path(&self, from: &ConfigObject, query: &str) -> Result<Vec<ConfigObject>> {
        self.get_path_with(from, query, 0, None)
    }

    /// [`Self::get_path`] with explicit read depth and filter.
    pub fn get_path_with(
        &self,
        from: &ConfigObject,
        query: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<ConfigObject>> {
        let obj = from.impl_object()?;
        let mut db = self.inner.db_lock();
        let state = &mut *db;
        let objs = state
            .backend
            .get_path(&mut state.cache, &obj, query, rlevel, rclasses)
            .map_err(|e| {
                e.wrap(format!(
                    "failed to get path '{}' from object '{}'",
                    query, from
                ))
            })?;
        Ok(objs.into_iter().map(|o| self.object(o)).collect())
    }

    /// Existence check without materialisation.
    pub fn test_object(&self, class_name: &str, id: &str) -> Result<bool> {
        self.test_object_with(class_name, id, 0, None)
    }

    /// [`Self::test_object`] with explicit read depth and filter.
    pub fn test_object_with(
        &self,
        class_name: &str,
        id: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<bool> {
        let mut db = self.inner.db_lock();
        db.backend
            .test_object(class_name, id, rlevel, rclasses)
            .map_err(|e| {
                e.wrap(format!(
                    "failed to test existence of object '{}@{}'",
                    id, class_name
                ))
            })
    }

    /// Create an object in database file `at`.
    pub fn create(&self, at: &str, class_name: &str, id: &str) -> Result<ConfigObject> {
        let mut db = self.inner.db_lock();
        let state = &mut *db;
        let obj = state
            .backend
            .create_object(&mut state.cache, at, class_name, id)
            .map_err(|e| e.wrap(format!("failed to create object '{}@{}'", id, class_name)))?;
        tracing::debug!(id, class = class_name, at, "object created");
        Ok(self.object(obj))
    }

    /// Create an object in the same database file as `at`.
    pub fn create_at(
        &self,
        at: &ConfigObject,
        class_name: &str,
        id: &str,
    ) -> Result<ConfigObject> {
        let file = at
            .contained_in()
            .map_err(|e| e.wrap(format!("failed to create object '{}@{}'", id, class_name)))?;
        self.create(&file, class_name, id)
    }

    /// Destroy an object, cascading over composite relationships.
    pub fn destroy(&self, object: &ConfigObject) -> Result<()> {
        let obj = object.impl_object()?;
        let description = object.to_string();
        let _tmpl = self.inner.tmpl_lock();
        let mut db = self.inner.db_lock();
        let state = &mut *db;
        state
            .backend
            .destroy_object(&mut state.cache, &obj)
            .map_err(|e| e.wrap(format!("failed to destroy object '{}'", description)))
    }

    // ------------------------------------------------------------------
    // Meta information
    // ------------------------------------------------------------------

    /// Class description, memoised per class in direct-only and
    /// all-inherited variants.
    pub fn get_class_info(&self, class_name: &str, direct_only: bool) -> Result<Arc<ClassInfo>> {
        self.inner.class_info(class_name, direct_only)
    }

    /// True when an object of class `source` can be used where `target` is
    /// expected: the classes are identical or `target` is an ancestor of
    /// `source`. False when `source` is not a loaded class.
    pub fn try_cast(&self, target: &str, source: &str) -> bool {
        let target = intern::class_name(target);
        let source = intern::class_name(source);
        if target.ptr_eq(&source) {
            return true;
        }
        let db = self.inner.db_lock();
        match db.superclasses.get(&source) {
            Some(supers) => supers.iter().any(|s| s.ptr_eq(&target)),
            None => false,
        }
    }

    /// Snapshot of the transitive superclass closure.
    pub fn superclasses(&self) -> HashMap<String, Vec<String>> {
        let db = self.inner.db_lock();
        db.superclasses
            .iter()
            .map(|(class, supers)| {
                (
                    class.as_str().to_string(),
                    supers.iter().map(|s| s.as_str().to_string()).collect(),
                )
            })
            .collect()
    }

    /// Snapshot of the transitive subclass closure.
    pub fn subclasses(&self) -> HashMap<String, Vec<String>> {
        let db = self.inner.db_lock();
        db.subclasses
            .iter()
            .map(|(class, subs)| {
                (
                    class.as_str().to_string(),
                    subs.iter().map(|s| s.as_str().to_string()).collect(),
                )
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    /// Versions committed since the previous call.
    pub fn get_changes(&self) -> Result<Vec<Version>> {
        let mut db = self.inner.db_lock();
        db.backend
            .get_changes()
            .map_err(|e| e.wrap("failed to get new versions"))
    }

    /// Archived versions between two bounds.
    pub fn get_versions(
        &self,
        since: &str,
        until: &str,
        kind: VersionKind,
        skip_irrelevant: bool,
    ) -> Result<Vec<Version>> {
        let mut db = self.inner.db_lock();
        db.backend
            .get_versions(since, until, kind, skip_irrelevant)
            .map_err(|e| e.wrap("failed to get versions"))
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to change notifications matching `criteria`.
    pub fn subscribe(
        &self,
        criteria: SubscriptionCriteria,
        callback: impl Fn(&[Change]) + Send + Sync + 'static,
    ) -> Result<CallbackId> {
        let mut db = self.inner.db_lock();
        let mut subscribers = self.inner.subscribers.lock().expect("subscriber mutex poisoned");
        let id = subscribers.insert(criteria, Box::new(callback));
        match self.reset_subscription(&mut db, &subscribers) {
            Ok(()) => Ok(id),
            Err(e) => {
                let _ = subscribers.remove(id);
                Err(e.wrap("subscription failed"))
            }
        }
    }

    /// Subscribe a callback invoked immediately before each change batch.
    /// Pre-change callbacks run with the subscriber mutex held and must not
    /// subscribe or unsubscribe.
    pub fn subscribe_pre(&self, callback: impl Fn() + Send + Sync + 'static) -> CallbackId {
        let mut subscribers = self.inner.subscribers.lock().expect("subscriber mutex poisoned");
        subscribers.insert_pre(Box::new(callback))
    }

    /// Remove one subscription.
    pub fn unsubscribe(&self, id: CallbackId) -> Result<()> {
        let mut db = self.inner.db_lock();
        let mut subscribers = self.inner.subscribers.lock().expect("subscriber mutex poisoned");
        subscribers.remove(id)?;
        self.reset_subscription(&mut db, &subscribers)
            .map_err(|e| e.wrap("unsubscription failed"))
    }

    /// Remove every subscription.
    pub fn unsubscribe_all(&self) -> Result<()> {
        let mut db = self.inner.db_lock();
        let mut subscribers = self.inner.subscribers.lock().expect("subscriber mutex poisoned");
        subscribers.clear();
        self.reset_subscription(&mut db, &subscribers)
            .map_err(|e| e.wrap("unsubscription failed"))
    }

    /// Recompute the union criteria and install them on the backend.
    fn reset_subscription(
        &self,
        db: &mut ImplState,
        subscribers: &SubscriberRegistry,
    ) -> Result<()> {
        if !subscribers.has_callbacks() {
            return db.backend.unsubscribe();
        }
        let (classes, objects) = subscribers.union_criteria();
        let weak = Arc::downgrade(&self.inner);
        let hook: ChangeHook = {
            let weak = weak.clone();
            Arc::new(move |changes: Vec<Change>| {
                if let Some(inner) = weak.upgrade() {
                    inner.system_notify(changes);
                }
            })
        };
        let pre_hook: PreChangeHook = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.system_pre_notify();
            }
        });
        db.backend.subscribe(classes, objects, hook, pre_hook)
    }

    // ------------------------------------------------------------------
    // Actions, converters, wrapper caches
    // ------------------------------------------------------------------

    /// Register an internal observer.
    pub fn add_action(&self, action: Arc<dyn ConfigAction>) {
        let mut actions = self.inner.actions.lock().expect("actions mutex poisoned");
        actions.push(action);
    }

    /// Remove a previously registered observer.
    pub fn remove_action(&self, action: &Arc<dyn ConfigAction>) {
        let mut actions = self.inner.actions.lock().expect("actions mutex poisoned");
        actions.retain(|a| !Arc::ptr_eq(a, action));
    }

    /// Register a converter applied to every string attribute read.
    pub fn register_converter(&self, converter: StringConverter) {
        let mut converters = self.inner.converters.lock().expect("converter mutex poisoned");
        converters.push(converter);
    }

    /// Instantiate the wrapper cache of a registered class so coherence
    /// hooks reach it. Generated wrapper code calls this on first access;
    /// with `upcast_unregistered` an unregistered class falls back to its
    /// first registered superclass.
    pub fn attach_template_cache(
        &self,
        class_name: &str,
        upcast_unregistered: bool,
    ) -> Result<()> {
        let mut tmpl = self.inner.tmpl_lock();
        let db = self.inner.db_lock();
        let class_name = intern::class_name(class_name);
        if tmpl.caches.contains_key(&class_name) {
            return Ok(());
        }
        let functions = dal::functions(&class_name, &db.superclasses, upcast_unregistered)?;
        tmpl.caches.insert(class_name, (functions.cache_factory)());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Export and diagnostics
    // ------------------------------------------------------------------

    /// Export the schema as a structured tree (see the export module).
    pub fn export_schema(
        &self,
        classes_filter: &str,
        direct_only: bool,
    ) -> Result<serde_json::Value> {
        crate::export::export_schema(self, classes_filter, direct_only)
    }

    /// Export object data as a structured tree (see the export module).
    pub fn export_data(
        &self,
        classes_filter: &str,
        objects_filter: &str,
        files_filter: &str,
        empty_array_item: &str,
    ) -> Result<serde_json::Value> {
        crate::export::export_data(
            self,
            classes_filter,
            objects_filter,
            files_filter,
            empty_array_item,
        )
    }

    /// Render the profiler report: object reads, cache hits and (when the
    /// profiling variable is set to `DEBUG`) every accessed object.
    pub fn print_profiling_info(&self) -> String {
        let db = self.inner.db_lock();
        let mut out = format!(
            "Configuration profiler report:\n  number of read objects: {}\n  number of cache hits: {}\n",
            db.cache.objects_read(),
            db.cache.cache_hits()
        );
        if std::env::var(crate::ENV_PROFILER_INFO).as_deref() == Ok("DEBUG") {
            out.push_str("  Details of accessed objects:\n");
            for (class, ids) in db.cache.contents() {
                out.push_str(&format!(
                    "    *** {} objects in class '{}' were accessed ***\n",
                    ids.len(),
                    class
                ));
                for id in ids {
                    out.push_str(&format!("     - object '{}'\n", id));
                }
            }
        }
        out
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Configuration object:\n  Inheritance Hierarchy (class - all it's superclasses):"
        )?;
        let mut classes: Vec<(String, Vec<String>)> = self.superclasses().into_iter().collect();
        classes.sort();
        for (class, supers) in classes {
            write!(f, "  * '{}' - ", class)?;
            if supers.is_empty() {
                write!(f, "(null)")?;
            } else {
                for (n, superclass) in supers.iter().enumerate() {
                    if n != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}'", superclass)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Drop for Configuration {
    fn drop(&mut self) {
        if std::env::var(crate::ENV_PROFILER_INFO).is_ok() {
            println!("{}", self.print_profiling_info());
        }
        if self.loaded() {
            if let Err(e) = self.unload() {
                tracing::error!(error = %e, "unload at configuration drop failed");
            }
        }
    }
}
