//! Bundled in-memory backend.
//!
//! Databases live in a process-global pool, mirroring how a file-based
//! backend sees one shared filesystem: schema databases are installed once
//! (immutable), data databases are created through the facade and *include*
//! schema databases to define their visible classes.
//!
//! Every database keeps a working copy and a committed snapshot of its
//! objects. `commit` diffs the two into a change batch, records a version
//! and delivers notifications through the registered dispatch hooks on a
//! separate thread; `abort` restores the committed snapshot.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;

use crate::backend::{Backend, ChangeHook, PreChangeHook, Version, VersionKind};
use crate::cache::ImplCache;
use crate::change::{Change, ChangeAction, SubscriptionCriteria};
use crate::error::{ConfigError, Result};
use crate::intern;
use crate::object::{ObjectImpl, ObjectState};
use crate::schema::{Cardinality, ClassInfo};
use crate::value::{ObjectRef, RelValue, Scalar, Value};

// ============================================================================
// Global database pool
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct StoredObject {
    class_name: String,
    attrs: BTreeMap<String, Value>,
    rels: BTreeMap<String, RelValue>,
}

/// class name -> UID -> object
type ObjectMap = BTreeMap<String, BTreeMap<String, StoredObject>>;

struct DbFile {
    writable: bool,
    includes: Vec<String>,
    classes: BTreeMap<String, ClassInfo>,
    objects: ObjectMap,
    committed: ObjectMap,
    versions: Vec<Version>,
}

type FileRef = (String, Arc<Mutex<DbFile>>);

/// One installed subscription. Listeners are pool-global: a commit made
/// through any backend instance notifies every subscribed instance whose
/// include closure overlaps the touched files, the way a database server
/// notifies all of its clients.
struct Listener {
    owner: u64,
    root: String,
    classes: HashSet<String>,
    objects: HashMap<String, HashSet<String>>,
    hook: ChangeHook,
    pre_hook: PreChangeHook,
}

static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    static ref POOL: Mutex<BTreeMap<String, Arc<Mutex<DbFile>>>> =
        Mutex::new(BTreeMap::new());
    static ref LISTENERS: Mutex<Vec<Listener>> = Mutex::new(Vec::new());
}

fn lock_file(file: &Arc<Mutex<DbFile>>) -> std::sync::MutexGuard<'_, DbFile> {
    file.lock().expect("memory database mutex poisoned")
}

/// Install an immutable schema database under a pool name.
///
/// Data databases reference it through their include list; its classes
/// become visible to every configuration that includes it.
pub fn install_schema(name: &str, classes: Vec<ClassInfo>) -> Result<()> {
    let mut pool = POOL.lock().expect("memory pool mutex poisoned");
    if pool.contains_key(name) {
        return Err(ConfigError::generic(format!(
            "database '{}' already exists",
            name
        )));
    }
    let classes = classes
        .into_iter()
        .map(|info| (info.name.clone(), info))
        .collect();
    pool.insert(
        name.to_string(),
        Arc::new(Mutex::new(DbFile {
            writable: false,
            includes: Vec::new(),
            classes,
            objects: ObjectMap::new(),
            committed: ObjectMap::new(),
            versions: Vec::new(),
        })),
    );
    tracing::debug!(name, "installed schema database");
    Ok(())
}

/// Remove a database from the pool. Returns false when absent.
pub fn remove_database(name: &str) -> bool {
    POOL.lock()
        .expect("memory pool mutex poisoned")
        .remove(name)
        .is_some()
}

/// Factory registered in the builtin plugin registry under the name
/// `memory`. A non-empty parameter string names a database to open.
pub fn create(params: &str) -> Result<Box<dyn Backend>> {
    let mut backend = MemoryBackend::new();
    if !params.is_empty() {
        backend.open_db(params)?;
    }
    Ok(Box::new(backend))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Schema view
// ============================================================================

/// Merged schema over one include closure, with transitive inheritance maps.
struct SchemaView {
    classes: BTreeMap<String, ClassInfo>,
    supers: HashMap<String, Vec<String>>,
    subs: HashMap<String, Vec<String>>,
}

impl SchemaView {
    fn build(files: &[FileRef]) -> SchemaView {
        let mut classes: BTreeMap<String, ClassInfo> = BTreeMap::new();
        for (_, file) in files {
            let guard = lock_file(file);
            for (name, info) in &guard.classes {
                classes.entry(name.clone()).or_insert_with(|| info.clone());
            }
        }

        fn resolve(
            name: &str,
            classes: &BTreeMap<String, ClassInfo>,
            memo: &mut HashMap<String, Vec<String>>,
            visiting: &mut HashSet<String>,
        ) -> Vec<String> {
            if let Some(done) = memo.get(name) {
                return done.clone();
            }
            if !visiting.insert(name.to_string()) {
                // Inheritance cycle; treat as no further ancestors.
                return Vec::new();
            }
            let mut result = Vec::new();
            if let Some(info) = classes.get(name) {
                for superclass in &info.superclasses {
                    if !result.contains(superclass) {
                        result.push(superclass.clone());
                    }
                    for indirect in resolve(superclass, classes, memo, visiting) {
                        if !result.contains(&indirect) {
                            result.push(indirect);
                        }
                    }
                }
            }
            visiting.remove(name);
            memo.insert(name.to_string(), result.clone());
            result
        }

        let mut supers: HashMap<String, Vec<String>> = HashMap::new();
        let mut visiting = HashSet::new();
        for name in classes.keys() {
            let resolved = resolve(name, &classes, &mut supers, &mut visiting);
            supers.insert(name.clone(), resolved);
        }

        let mut subs: HashMap<String, Vec<String>> =
            classes.keys().map(|c| (c.clone(), Vec::new())).collect();
        for (class, super_list) in &supers {
            for superclass in super_list {
                subs.entry(superclass.clone())
                    .or_default()
                    .push(class.clone());
            }
        }
        for list in subs.values_mut() {
            list.sort();
        }

        SchemaView {
            classes,
            supers,
            subs,
        }
    }

    fn class(&self, name: &str) -> Result<&ClassInfo> {
        self.classes
            .get(name)
            .ok_or_else(|| ConfigError::not_found("class", name))
    }

    /// Class description with inherited attributes, relationships and the
    /// transitive superclass list merged in. Inherited members come first;
    /// a subclass member with the same name overrides.
    fn merged_info(&self, name: &str) -> Result<ClassInfo> {
        let own = self.class(name)?;
        let mut merged = ClassInfo::new(&own.name);
        merged.description = own.description.clone();
        merged.is_abstract = own.is_abstract;
        merged.superclasses = self.supers.get(name).cloned().unwrap_or_default();

        let mut sources: Vec<&ClassInfo> = Vec::new();
        for superclass in merged.superclasses.iter().rev() {
            if let Some(info) = self.classes.get(superclass) {
                sources.push(info);
            }
        }
        sources.push(own);

        for source in sources {
            for attribute in &source.attributes {
                if let Some(slot) = merged
                    .attributes
                    .iter_mut()
                    .find(|a| a.name == attribute.name)
                {
                    *slot = attribute.clone();
                } else {
                    merged.attributes.push(attribute.clone());
                }
            }
            for relationship in &source.relationships {
                if let Some(slot) = merged
                    .relationships
                    .iter_mut()
                    .find(|r| r.name == relationship.name)
                {
                    *slot = relationship.clone();
                } else {
                    merged.relationships.push(relationship.clone());
                }
            }
        }
        Ok(merged)
    }

    /// True when an object of `actual` may stand where `target` is
    /// expected.
    fn assignable(&self, target: &str, actual: &str) -> bool {
        actual == target
            || self
                .supers
                .get(actual)
                .map_or(false, |s| s.iter().any(|c| c == target))
    }

    /// The classes sharing a UID namespace with `class`: itself, its
    /// ancestors, its descendants and the descendants of its ancestors.
    fn family(&self, class: &str) -> Vec<String> {
        let mut family = vec![class.to_string()];
        let mut roots = vec![class.to_string()];
        if let Some(supers) = self.supers.get(class) {
            for superclass in supers {
                roots.push(superclass.clone());
                if !family.contains(superclass) {
                    family.push(superclass.clone());
                }
            }
        }
        for root in roots {
            if let Some(subs) = self.subs.get(&root) {
                for subclass in subs {
                    if !family.contains(subclass) {
                        family.push(subclass.clone());
                    }
                }
            }
        }
        family
    }
}

// ============================================================================
// Backend implementation
// ============================================================================

/// In-memory storage backend over the process-global database pool.
#[derive(Debug)]
pub struct MemoryBackend {
    id: u64,
    root: Option<String>,
    user: String,
    seen_versions: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            root: None,
            user: String::new(),
            seen_versions: 0,
        }
    }

    fn root_name(&self) -> Result<String> {
        self.root
            .clone()
            .ok_or_else(|| ConfigError::generic("no database is open"))
    }

    /// The open database and its transitive includes, root first.
    fn closure_files(&self) -> Result<Vec<FileRef>> {
        let root = self.root_name()?;
        Self::closure_of(&root)
    }

    fn closure_of(root: &str) -> Result<Vec<FileRef>> {
        let pool = POOL.lock().expect("memory pool mutex poisoned");
        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let file = pool
                .get(&name)
                .cloned()
                .ok_or_else(|| ConfigError::not_found("database", &name))?;
            let includes = lock_file(&file).includes.clone();
            ordered.push((name, file));
            queue.extend(includes);
        }
        Ok(ordered)
    }

    /// Find `(class, id)` probing the class bucket and then each subclass
    /// bucket.
    fn find_stored(
        files: &[FileRef],
        view: &SchemaView,
        class_name: &str,
        id: &str,
    ) -> Option<(String, StoredObject)> {
        let mut targets = vec![class_name.to_string()];
        if let Some(subs) = view.subs.get(class_name) {
            targets.extend(subs.iter().cloned());
        }
        for target in &targets {
            for (file_name, file) in files {
                let guard = lock_file(file);
                if let Some(stored) = guard.objects.get(target).and_then(|b| b.get(id)) {
                    return Some((file_name.clone(), stored.clone()));
                }
            }
        }
        None
    }

    /// Find `(class, id)` in the exact class bucket only.
    fn find_exact(files: &[FileRef], class_name: &str, id: &str) -> Option<(String, StoredObject)> {
        for (file_name, file) in files {
            let guard = lock_file(file);
            if let Some(stored) = guard.objects.get(class_name).and_then(|b| b.get(id)) {
                return Some((file_name.clone(), stored.clone()));
            }
        }
        None
    }

    fn file_holding(files: &[FileRef], class_name: &str, id: &str) -> Option<FileRef> {
        for (file_name, file) in files {
            let guard = lock_file(file);
            if guard
                .objects
                .get(class_name)
                .map_or(false, |b| b.contains_key(id))
            {
                return Some((file_name.clone(), file.clone()));
            }
        }
        None
    }

    fn materialize(
        cache: &mut ImplCache,
        file_name: &str,
        id: &str,
        stored: &StoredObject,
    ) -> Arc<ObjectImpl> {
        let class_name = intern::class_name(&stored.class_name);
        let attrs: HashMap<String, Value> = stored
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let rels: HashMap<String, RelValue> = stored
            .rels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(existing) = cache.get_exact(&class_name, id) {
            existing.fill(file_name, attrs, rels);
            existing
        } else {
            let obj = ObjectImpl::new(class_name, id, file_name, ObjectState::Valid);
            obj.fill(file_name, attrs, rels);
            cache.put_impl(obj.clone());
            obj
        }
    }

    fn refs_of(value: &RelValue) -> Vec<&ObjectRef> {
        match value {
            RelValue::Single(None) => Vec::new(),
            RelValue::Single(Some(r)) => vec![r],
            RelValue::Multiple(refs) => refs.iter().collect(),
        }
    }

    /// Eagerly materialise referenced objects down to `depth` levels.
    fn prefetch_refs(
        cache: &mut ImplCache,
        view: &SchemaView,
        files: &[FileRef],
        from: &StoredObject,
        depth: u32,
        rclasses: Option<&[String]>,
        visited: &mut HashSet<(String, String)>,
    ) {
        if depth == 0 {
            return;
        }
        for value in from.rels.values() {
            for target in Self::refs_of(value) {
                if let Some(filter) = rclasses {
                    if !filter.iter().any(|c| view.assignable(c, &target.class_name)) {
                        continue;
                    }
                }
                if !visited.insert((target.class_name.clone(), target.id.clone())) {
                    continue;
                }
                if let Some((file_name, stored)) =
                    Self::find_exact(files, &target.class_name, &target.id)
                {
                    Self::materialize(cache, &file_name, &target.id, &stored);
                    Self::prefetch_refs(cache, view, files, &stored, depth - 1, rclasses, visited);
                }
            }
        }
    }

    fn collect_cascade(
        files: &[FileRef],
        view: &SchemaView,
        class_name: &str,
        id: &str,
        visited: &mut HashSet<(String, String)>,
        victims: &mut Vec<(String, String)>,
    ) -> Result<()> {
        if !visited.insert((class_name.to_string(), id.to_string())) {
            return Ok(());
        }
        let stored = match Self::find_exact(files, class_name, id) {
            Some((_, stored)) => stored,
            None => return Ok(()),
        };
        victims.push((class_name.to_string(), id.to_string()));
        let merged = view.merged_info(class_name)?;
        for relationship in &merged.relationships {
            if !relationship.is_aggregation {
                continue;
            }
            if let Some(value) = stored.rels.get(&relationship.name) {
                let targets: Vec<ObjectRef> =
                    Self::refs_of(value).into_iter().cloned().collect();
                for target in targets {
                    Self::collect_cascade(
                        files,
                        view,
                        &target.class_name,
                        &target.id,
                        visited,
                        victims,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Drop every reference to `(class, id)` from all stored objects.
    fn scrub_refs(files: &[FileRef], class_name: &str, id: &str) {
        for (_, file) in files {
            let mut guard = lock_file(file);
            for bucket in guard.objects.values_mut() {
                for stored in bucket.values_mut() {
                    for value in stored.rels.values_mut() {
                        match value {
                            RelValue::Single(slot) => {
                                if slot
                                    .as_ref()
                                    .map_or(false, |r| r.class_name == class_name && r.id == id)
                                {
                                    *slot = None;
                                }
                            }
                            RelValue::Multiple(refs) => {
                                refs.retain(|r| !(r.class_name == class_name && r.id == id));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Repoint every reference to `(class, old)` at `new`.
    fn rewrite_refs(files: &[FileRef], class_name: &str, old: &str, new: &str) {
        for (_, file) in files {
            let mut guard = lock_file(file);
            for bucket in guard.objects.values_mut() {
                for stored in bucket.values_mut() {
                    for value in stored.rels.values_mut() {
                        match value {
                            RelValue::Single(Some(r)) => {
                                if r.class_name == class_name && r.id == old {
                                    r.id = new.to_string();
                                }
                            }
                            RelValue::Single(None) => {}
                            RelValue::Multiple(refs) => {
                                for r in refs.iter_mut() {
                                    if r.class_name == class_name && r.id == old {
                                        r.id = new.to_string();
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn diff_objects(
        committed: &ObjectMap,
        working: &ObjectMap,
    ) -> Vec<(String, String, ChangeAction)> {
        let mut diffs = Vec::new();
        for (class, bucket) in working {
            for (id, stored) in bucket {
                match committed.get(class).and_then(|b| b.get(id)) {
                    None => diffs.push((class.clone(), id.clone(), ChangeAction::Created)),
                    Some(old) if old != stored => {
                        diffs.push((class.clone(), id.clone(), ChangeAction::Modified))
                    }
                    _ => {}
                }
            }
        }
        for (class, bucket) in committed {
            for id in bucket.keys() {
                if !working.get(class).map_or(false, |b| b.contains_key(id)) {
                    diffs.push((class.clone(), id.clone(), ChangeAction::Removed));
                }
            }
        }
        diffs
    }

    /// Deliver a committed batch to every listener whose include closure
    /// overlaps the touched files. Each delivery is filtered by that
    /// listener's installed criteria and runs on a dedicated thread, so the
    /// dispatcher never executes under the commit caller's locks.
    fn notify_listeners(touched: &[String], batch: &[Change]) {
        let listeners = LISTENERS.lock().expect("memory listener mutex poisoned");
        for listener in listeners.iter() {
            let closure = match Self::closure_of(&listener.root) {
                Ok(files) => files,
                Err(_) => continue,
            };
            if !closure.iter().any(|(name, _)| touched.contains(name)) {
                continue;
            }
            let criteria = SubscriptionCriteria::from_parts(
                listener.classes.clone(),
                listener.objects.clone(),
            );
            let filtered = criteria.filter(batch);
            if filtered.is_empty() {
                continue;
            }
            let hook = listener.hook.clone();
            let pre_hook = listener.pre_hook.clone();
            std::thread::Builder::new()
                .name("confdb-notify".to_string())
                .spawn(move || {
                    pre_hook();
                    hook(filtered);
                })
                .expect("failed to spawn notification thread");
        }
    }

    fn writable_file(files: &[FileRef], name: &str) -> Result<FileRef> {
        let found = files
            .iter()
            .find(|(file_name, _)| file_name == name)
            .cloned()
            .ok_or_else(|| ConfigError::not_found("database", name))?;
        if !lock_file(&found.1).writable {
            return Err(ConfigError::generic(format!(
                "database '{}' is not writable",
                name
            )));
        }
        Ok(found)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

impl Backend for MemoryBackend {
    fn open_db(&mut self, name: &str) -> Result<()> {
        Self::closure_of(name)?;
        self.root = Some(name.to_string());
        tracing::debug!(name, "opened memory database");
        Ok(())
    }

    fn close_db(&mut self) -> Result<()> {
        self.root = None;
        Ok(())
    }

    fn loaded(&self) -> bool {
        self.root.is_some()
    }

    fn get_superclasses(&self) -> Result<HashMap<String, Vec<String>>> {
        if self.root.is_none() {
            return Ok(HashMap::new());
        }
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        Ok(view.supers)
    }

    fn get_class_info(&self, class_name: &str, direct_only: bool) -> Result<ClassInfo> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        if direct_only {
            view.class(class_name).cloned()
        } else {
            view.merged_info(class_name)
        }
    }

    fn get_object(
        &mut self,
        cache: &mut ImplCache,
        class_name: &str,
        id: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Arc<ObjectImpl>> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        view.class(class_name)?;
        let interned = intern::class_name(class_name);
        if let Some(cached) = cache.get_impl(&interned, id) {
            if cached.state() == ObjectState::Valid {
                return Ok(cached);
            }
        }
        let (file_name, stored) = Self::find_stored(&files, &view, class_name, id)
            .ok_or_else(|| ConfigError::not_found("object", format!("{}@{}", id, class_name)))?;
        let obj = Self::materialize(cache, &file_name, id, &stored);
        if rlevel > 0 {
            let mut visited = HashSet::from([(stored.class_name.clone(), id.to_string())]);
            Self::prefetch_refs(cache, &view, &files, &stored, rlevel, rclasses, &mut visited);
        }
        Ok(obj)
    }

    fn get_objects(
        &mut self,
        cache: &mut ImplCache,
        class_name: &str,
        query: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        view.class(class_name)?;
        let mut targets = vec![class_name.to_string()];
        if let Some(subs) = view.subs.get(class_name) {
            targets.extend(subs.iter().cloned());
        }
        let mut found: Vec<(String, String, String, StoredObject)> = Vec::new();
        for target in &targets {
            for (file_name, file) in &files {
                let guard = lock_file(file);
                if let Some(bucket) = guard.objects.get(target) {
                    for (id, stored) in bucket {
                        // The query string is backend-opaque; this store
                        // treats it as a UID substring filter.
                        if !query.is_empty() && !id.contains(query) {
                            continue;
                        }
                        found.push((id.clone(), target.clone(), file_name.clone(), stored.clone()));
                    }
                }
            }
        }
        found.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        for (id, class, file_name, stored) in &found {
            visited.insert((class.clone(), id.clone()));
            result.push(Self::materialize(cache, file_name, id, stored));
        }
        if rlevel > 0 {
            for (_, _, _, stored) in &found {
                Self::prefetch_refs(cache, &view, &files, stored, rlevel, rclasses, &mut visited);
            }
        }
        Ok(result)
    }

    fn get_path(
        &mut self,
        cache: &mut ImplCache,
        from: &Arc<ObjectImpl>,
        query: &str,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        let class_name = from.class_name().as_str().to_string();
        let id = from.uid();
        let (_, stored) = Self::find_exact(&files, &class_name, &id)
            .ok_or_else(|| ConfigError::not_found("object", format!("{}@{}", id, class_name)))?;
        // The path query is backend-opaque; this store follows the
        // relationship with that name.
        let value = stored.rels.get(query).ok_or_else(|| {
            ConfigError::generic(format!(
                "object '{}@{}' has no relationship '{}'",
                id, class_name, query
            ))
        })?;
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        for target in Self::refs_of(value) {
            let (file_name, target_stored) =
                Self::find_exact(&files, &target.class_name, &target.id).ok_or_else(|| {
                    ConfigError::not_found(
                        "object",
                        format!("{}@{}", target.id, target.class_name),
                    )
                })?;
            visited.insert((target.class_name.clone(), target.id.clone()));
            result.push(Self::materialize(cache, &file_name, &target.id, &target_stored));
            if rlevel > 1 {
                Self::prefetch_refs(
                    cache,
                    &view,
                    &files,
                    &target_stored,
                    rlevel - 1,
                    rclasses,
                    &mut visited,
                );
            }
        }
        Ok(result)
    }

    fn refresh(&mut self, obj: &Arc<ObjectImpl>) -> Result<()> {
        let files = self.closure_files()?;
        let class_name = obj.class_name().as_str().to_string();
        let id = obj.uid();
        match Self::find_exact(&files, &class_name, &id) {
            Some((file_name, stored)) => {
                let attrs = stored
                    .attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let rels = stored
                    .rels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                obj.fill(&file_name, attrs, rels);
                Ok(())
            }
            None => Err(ConfigError::not_found(
                "object",
                format!("{}@{}", id, class_name),
            )),
        }
    }

    fn test_object(
        &mut self,
        class_name: &str,
        id: &str,
        _rlevel: u32,
        _rclasses: Option<&[String]>,
    ) -> Result<bool> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        view.class(class_name)?;
        Ok(Self::find_stored(&files, &view, class_name, id).is_some())
    }

    fn referenced_by(
        &mut self,
        cache: &mut ImplCache,
        obj: &Arc<ObjectImpl>,
        relationship: &str,
        composite_only: bool,
        _rlevel: u32,
        _rclasses: Option<&[String]>,
    ) -> Result<Vec<Arc<ObjectImpl>>> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        let class_name = obj.class_name().as_str().to_string();
        let id = obj.uid();
        let mut holders: Vec<(String, String)> = Vec::new();
        for (_, file) in &files {
            let guard = lock_file(file);
            for (holder_class, bucket) in &guard.objects {
                let merged = match view.merged_info(holder_class) {
                    Ok(merged) => merged,
                    Err(_) => continue,
                };
                for (holder_id, stored) in bucket {
                    for info in &merged.relationships {
                        if relationship != "*" && info.name != relationship {
                            continue;
                        }
                        if composite_only && !info.is_aggregation {
                            continue;
                        }
                        if let Some(value) = stored.rels.get(&info.name) {
                            if Self::refs_of(value)
                                .iter()
                                .any(|r| r.class_name == class_name && r.id == id)
                            {
                                holders.push((holder_class.clone(), holder_id.clone()));
                                break;
                            }
                        }
                    }
                }
            }
        }
        holders.sort();
        holders.dedup();
        let mut result = Vec::new();
        for (holder_class, holder_id) in holders {
            if let Some((file_name, stored)) = Self::find_exact(&files, &holder_class, &holder_id)
            {
                result.push(Self::materialize(cache, &file_name, &holder_id, &stored));
            }
        }
        Ok(result)
    }

    fn prefetch_all_data(&mut self, cache: &mut ImplCache) -> Result<()> {
        let files = self.closure_files()?;
        for (file_name, file) in &files {
            let snapshot: Vec<(String, StoredObject)> = {
                let guard = lock_file(file);
                guard
                    .objects
                    .values()
                    .flat_map(|bucket| {
                        bucket.iter().map(|(id, stored)| (id.clone(), stored.clone()))
                    })
                    .collect()
            };
            for (id, stored) in snapshot {
                Self::materialize(cache, file_name, &id, &stored);
            }
        }
        Ok(())
    }

    fn create_object(
        &mut self,
        cache: &mut ImplCache,
        at: &str,
        class_name: &str,
        id: &str,
    ) -> Result<Arc<ObjectImpl>> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        let info = view.class(class_name)?;
        if info.is_abstract {
            return Err(ConfigError::generic(format!(
                "cannot create object of abstract class '{}'",
                class_name
            )));
        }
        let (target_name, target) = Self::writable_file(&files, at)?;

        // UIDs are unique within the whole class hierarchy.
        for family_class in view.family(class_name) {
            if let Some((_, found)) = Self::find_exact(&files, &family_class, id) {
                return Err(ConfigError::generic(format!(
                    "object '{}@{}' already exists",
                    id, found.class_name
                )));
            }
        }

        let merged = view.merged_info(class_name)?;
        let mut attrs = BTreeMap::new();
        for attribute in &merged.attributes {
            let value = if attribute.is_multi_value {
                Value::Vector(Vec::new())
            } else {
                Value::Single(Scalar::parse(attribute.attr_type, &attribute.default_value)?)
            };
            attrs.insert(attribute.name.clone(), value);
        }
        let mut rels = BTreeMap::new();
        for relationship in &merged.relationships {
            let value = if relationship.cardinality.is_multiple() {
                RelValue::Multiple(Vec::new())
            } else {
                RelValue::Single(None)
            };
            rels.insert(relationship.name.clone(), value);
        }
        let stored = StoredObject {
            class_name: class_name.to_string(),
            attrs,
            rels,
        };
        lock_file(&target)
            .objects
            .entry(class_name.to_string())
            .or_default()
            .insert(id.to_string(), stored.clone());
        Ok(Self::materialize(cache, &target_name, id, &stored))
    }

    fn destroy_object(&mut self, cache: &mut ImplCache, obj: &Arc<ObjectImpl>) -> Result<()> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        let class_name = obj.class_name().as_str().to_string();
        let id = obj.uid();
        let mut victims = Vec::new();
        let mut visited = HashSet::new();
        Self::collect_cascade(&files, &view, &class_name, &id, &mut visited, &mut victims)?;
        if victims.is_empty() {
            return Err(ConfigError::not_found(
                "object",
                format!("{}@{}", id, class_name),
            ));
        }
        for (victim_class, victim_id) in &victims {
            for (_, file) in &files {
                let mut guard = lock_file(file);
                if let Some(bucket) = guard.objects.get_mut(victim_class) {
                    bucket.remove(victim_id);
                }
            }
            Self::scrub_refs(&files, victim_class, victim_id);
            if let Some(cached) = cache.get_exact(&intern::class_name(victim_class), victim_id) {
                cached.invalidate(ObjectState::Deleted);
            }
            tracing::debug!(id = %victim_id, class = %victim_class, "destroyed object");
        }
        Ok(())
    }

    fn set_attribute(&mut self, obj: &Arc<ObjectImpl>, name: &str, value: Value) -> Result<()> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        let class_name = obj.class_name().as_str().to_string();
        let id = obj.uid();
        let merged = view.merged_info(&class_name)?;
        let attribute = merged.attribute(name).ok_or_else(|| {
            ConfigError::generic(format!(
                "class '{}' has no attribute '{}'",
                class_name, name
            ))
        })?;
        match (&value, attribute.is_multi_value) {
            (Value::Single(_), true) => {
                return Err(ConfigError::generic(format!(
                    "attribute '{}' of class '{}' is multi-value, cannot set a single value",
                    name, class_name
                )))
            }
            (Value::Vector(_), false) => {
                return Err(ConfigError::generic(format!(
                    "attribute '{}' of class '{}' is single-value, cannot set a vector",
                    name, class_name
                )))
            }
            _ => {}
        }
        let scalars: Vec<&Scalar> = match &value {
            Value::Single(scalar) => vec![scalar],
            Value::Vector(scalars) => scalars.iter().collect(),
        };
        for scalar in scalars {
            if scalar.attr_type() != attribute.attr_type {
                return Err(ConfigError::generic(format!(
                    "cannot set {} value to attribute '{}' of type {}",
                    scalar.attr_type().describe(),
                    name,
                    attribute.attr_type.describe()
                )));
            }
        }
        let (_, file) = Self::file_holding(&files, &class_name, &id).ok_or_else(|| {
            ConfigError::not_found("object", format!("{}@{}", id, class_name))
        })?;
        {
            let mut guard = lock_file(&file);
            if !guard.writable {
                return Err(ConfigError::generic(format!(
                    "database holding object '{}@{}' is not writable",
                    id, class_name
                )));
            }
            let stored = guard
                .objects
                .get_mut(&class_name)
                .and_then(|b| b.get_mut(&id))
                .ok_or_else(|| {
                    ConfigError::not_found("object", format!("{}@{}", id, class_name))
                })?;
            stored.attrs.insert(name.to_string(), value.clone());
        }
        let mut core = obj.lock();
        if core.state == ObjectState::Valid {
            core.attrs.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn set_relationship(
        &mut self,
        obj: &Arc<ObjectImpl>,
        name: &str,
        value: RelValue,
    ) -> Result<()> {
        let files = self.closure_files()?;
        let view = SchemaView::build(&files);
        let class_name = obj.class_name().as_str().to_string();
        let id = obj.uid();
        let merged = view.merged_info(&class_name)?;
        let relationship = merged.relationship(name).ok_or_else(|| {
            ConfigError::generic(format!(
                "class '{}' has no relationship '{}'",
                class_name, name
            ))
        })?;
        match (&value, relationship.cardinality.is_multiple()) {
            (RelValue::Single(_), true) => {
                return Err(ConfigError::generic(format!(
                    "relationship '{}' of class '{}' is multi-value, cannot set a single object",
                    name, class_name
                )))
            }
            (RelValue::Multiple(_), false) => {
                return Err(ConfigError::generic(format!(
                    "relationship '{}' of class '{}' is single-value, cannot set a vector",
                    name, class_name
                )))
            }
            _ => {}
        }
        if relationship.cardinality == Cardinality::OnlyOne
            && matches!(value, RelValue::Single(None))
        {
            return Err(ConfigError::generic(format!(
                "relationship '{}' of class '{}' cannot be null",
                name, class_name
            )));
        }
        for target in Self::refs_of(&value) {
            if !view.assignable(&relationship.class_type, &target.class_name) {
                return Err(ConfigError::generic(format!(
                    "object '{}@{}' is not of class '{}'",
                    target.id, target.class_name, relationship.class_type
                )));
            }
            if Self::find_exact(&files, &target.class_name, &target.id).is_none() {
                return Err(ConfigError::not_found(
                    "object",
                    format!("{}@{}", target.id, target.class_name),
                ));
            }
        }
        let (_, file) = Self::file_holding(&files, &class_name, &id).ok_or_else(|| {
            ConfigError::not_found("object", format!("{}@{}", id, class_name))
        })?;
        {
            let mut guard = lock_file(&file);
            if !guard.writable {
                return Err(ConfigError::generic(format!(
                    "database holding object '{}@{}' is not writable",
                    id, class_name
                )));
            }
            let stored = guard
                .objects
                .get_mut(&class_name)
                .and_then(|b| b.get_mut(&id))
                .ok_or_else(|| {
                    ConfigError::not_found("object", format!("{}@{}", id, class_name))
                })?;
            stored.rels.insert(name.to_string(), value.clone());
        }
        let mut core = obj.lock();
        if core.state == ObjectState::Valid {
            core.rels.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn rename_object(&mut self, obj: &Arc<ObjectImpl>, new_id: &str) -> Result<()> {
        let files = self.closure_files()?;
        let class_name = obj.class_name().as_str().to_string();
        let old_id = obj.uid();
        let (_, file) = Self::file_holding(&files, &class_name, &old_id).ok_or_else(|| {
            ConfigError::not_found("object", format!("{}@{}", old_id, class_name))
        })?;
        {
            let mut guard = lock_file(&file);
            if !guard.writable {
                return Err(ConfigError::generic(format!(
                    "database holding object '{}@{}' is not writable",
                    old_id, class_name
                )));
            }
            let bucket = guard.objects.get_mut(&class_name).ok_or_else(|| {
                ConfigError::not_found("object", format!("{}@{}", old_id, class_name))
            })?;
            let stored = bucket.remove(&old_id).ok_or_else(|| {
                ConfigError::not_found("object", format!("{}@{}", old_id, class_name))
            })?;
            // A collision displaces the previous object, matching the
            // facade's rename policy.
            bucket.insert(new_id.to_string(), stored);
        }
        Self::rewrite_refs(&files, &class_name, &old_id, new_id);
        Ok(())
    }

    fn is_writable(&self, db_name: &str) -> Result<bool> {
        let pool = POOL.lock().expect("memory pool mutex poisoned");
        let file = pool
            .get(db_name)
            .ok_or_else(|| ConfigError::not_found("database", db_name))?;
        let writable = lock_file(file).writable;
        Ok(writable)
    }

    fn create_db(&mut self, db_name: &str, includes: &[String]) -> Result<()> {
        {
            let mut pool = POOL.lock().expect("memory pool mutex poisoned");
            if pool.contains_key(db_name) {
                return Err(ConfigError::generic(format!(
                    "database '{}' already exists",
                    db_name
                )));
            }
            for include in includes {
                if !pool.contains_key(include) {
                    return Err(ConfigError::not_found("database", include));
                }
            }
            pool.insert(
                db_name.to_string(),
                Arc::new(Mutex::new(DbFile {
                    writable: true,
                    includes: includes.to_vec(),
                    classes: BTreeMap::new(),
                    objects: ObjectMap::new(),
                    committed: ObjectMap::new(),
                    versions: Vec::new(),
                })),
            );
        }
        self.root = Some(db_name.to_string());
        tracing::debug!(name = db_name, "created memory database");
        Ok(())
    }

    fn add_include(&mut self, db_name: &str, include: &str) -> Result<()> {
        let (file, _) = {
            let pool = POOL.lock().expect("memory pool mutex poisoned");
            let file = pool
                .get(db_name)
                .cloned()
                .ok_or_else(|| ConfigError::not_found("database", db_name))?;
            let included = pool
                .get(include)
                .cloned()
                .ok_or_else(|| ConfigError::not_found("database", include))?;
            (file, included)
        };
        let mut guard = lock_file(&file);
        if !guard.writable {
            return Err(ConfigError::generic(format!(
                "database '{}' is not writable",
                db_name
            )));
        }
        if !guard.includes.iter().any(|i| i == include) {
            guard.includes.push(include.to_string());
        }
        Ok(())
    }

    fn remove_include(&mut self, db_name: &str, include: &str) -> Result<()> {
        let file = {
            let pool = POOL.lock().expect("memory pool mutex poisoned");
            pool.get(db_name)
                .cloned()
                .ok_or_else(|| ConfigError::not_found("database", db_name))?
        };
        let mut guard = lock_file(&file);
        let position = guard.includes.iter().position(|i| i == include).ok_or_else(|| {
            ConfigError::generic(format!(
                "database '{}' does not include '{}'",
                db_name, include
            ))
        })?;
        guard.includes.remove(position);
        Ok(())
    }

    fn get_includes(&self, db_name: &str) -> Result<Vec<String>> {
        let pool = POOL.lock().expect("memory pool mutex poisoned");
        let file = pool
            .get(db_name)
            .ok_or_else(|| ConfigError::not_found("database", db_name))?;
        let includes = lock_file(file).includes.clone();
        Ok(includes)
    }

    fn get_updated_dbs(&self) -> Result<Vec<String>> {
        let files = self.closure_files()?;
        Ok(files
            .iter()
            .filter(|(_, file)| {
                let guard = lock_file(file);
                guard.objects != guard.committed
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn get_changes(&mut self) -> Result<Vec<Version>> {
        let files = self.closure_files()?;
        let versions = lock_file(&files[0].1).versions.clone();
        let unseen = versions
            .get(self.seen_versions..)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        self.seen_versions = versions.len();
        Ok(unseen)
    }

    fn get_versions(
        &mut self,
        since: &str,
        until: &str,
        kind: VersionKind,
        skip_irrelevant: bool,
    ) -> Result<Vec<Version>> {
        let files = self.closure_files()?;
        let versions = lock_file(&files[0].1).versions.clone();
        let closure_names: HashSet<&String> = files.iter().map(|(name, _)| name).collect();
        let in_range = |version: &Version| -> bool {
            match kind {
                VersionKind::ById => {
                    let id: u64 = version.id.parse().unwrap_or(0);
                    let lo: u64 = since.parse().unwrap_or(0);
                    let hi: u64 = until.parse().unwrap_or(u64::MAX);
                    id >= lo && id <= hi
                }
                VersionKind::ByDate => {
                    let lo: u64 = since.parse().unwrap_or(0);
                    let hi: u64 = until.parse().unwrap_or(u64::MAX);
                    version.timestamp >= lo && version.timestamp <= hi
                }
                VersionKind::ByTag => version.id == since,
            }
        };
        Ok(versions
            .into_iter()
            .filter(in_range)
            .filter(|version| {
                !skip_irrelevant || version.files.iter().any(|f| closure_names.contains(f))
            })
            .collect())
    }

    fn set_commit_credentials(&mut self, user: &str, _password: &str) -> Result<()> {
        self.user = user.to_string();
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<bool> {
        let files = self.closure_files()?;
        let mut batch: Vec<Change> = Vec::new();
        let mut touched: Vec<String> = Vec::new();
        for (name, file) in &files {
            let mut guard = lock_file(file);
            let diffs = Self::diff_objects(&guard.committed, &guard.objects);
            if diffs.is_empty() {
                continue;
            }
            touched.push(name.clone());
            for (class, id, action) in diffs {
                Change::add(&mut batch, &class, &id, action);
            }
            guard.committed = guard.objects.clone();
        }
        if batch.is_empty() {
            tracing::debug!("commit found no changes");
            return Ok(false);
        }
        {
            let mut root = lock_file(&files[0].1);
            let version = Version {
                id: (root.versions.len() + 1).to_string(),
                user: if self.user.is_empty() {
                    "unknown".to_string()
                } else {
                    self.user.clone()
                },
                timestamp: now_secs(),
                comment: message.to_string(),
                files: touched.clone(),
            };
            root.versions.push(version);
        }
        tracing::info!(classes = batch.len(), "committed a change batch");
        Self::notify_listeners(&touched, &batch);
        Ok(true)
    }

    fn abort(&mut self) -> Result<()> {
        let files = self.closure_files()?;
        for (_, file) in &files {
            let mut guard = lock_file(file);
            guard.objects = guard.committed.clone();
        }
        tracing::debug!("working copy discarded");
        Ok(())
    }

    fn subscribe(
        &mut self,
        classes: HashSet<String>,
        objects: HashMap<String, HashSet<String>>,
        hook: ChangeHook,
        pre_hook: PreChangeHook,
    ) -> Result<()> {
        let root = self.root_name()?;
        let mut listeners = LISTENERS.lock().expect("memory listener mutex poisoned");
        listeners.retain(|listener| listener.owner != self.id);
        listeners.push(Listener {
            owner: self.id,
            root,
            classes,
            objects,
            hook,
            pre_hook,
        });
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        LISTENERS
            .lock()
            .expect("memory listener mutex poisoned")
            .retain(|listener| listener.owner != self.id);
        Ok(())
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeInfo, AttributeType, RelationshipInfo};

    fn fixture_classes() -> Vec<ClassInfo> {
        vec![
            ClassInfo::new("Base")
                .with_attribute(AttributeInfo::new("bool", AttributeType::Bool)),
            ClassInfo::new("Mid")
                .with_superclass("Base")
                .with_attribute(AttributeInfo::new("count", AttributeType::U32)),
            ClassInfo::new("Leaf")
                .with_superclass("Mid")
                .with_relationship(RelationshipInfo::new("Others", "Base", true, true, false, "")),
        ]
    }

    fn view_for(name: &str) -> (MemoryBackend, SchemaView) {
        install_schema(name, fixture_classes()).unwrap();
        let mut backend = MemoryBackend::new();
        backend.open_db(name).unwrap();
        let files = backend.closure_files().unwrap();
        let view = SchemaView::build(&files);
        (backend, view)
    }

    #[test]
    fn test_transitive_superclasses() {
        let (_backend, view) = view_for("mem_unit_supers");
        assert_eq!(
            view.supers.get("Leaf").unwrap(),
            &vec!["Mid".to_string(), "Base".to_string()]
        );
        assert_eq!(view.subs.get("Base").unwrap(), &vec!["Leaf".to_string(), "Mid".to_string()]);
    }

    #[test]
    fn test_merged_info_collects_inherited_members() {
        let (_backend, view) = view_for("mem_unit_merge");
        let merged = view.merged_info("Leaf").unwrap();
        assert!(merged.attribute("bool").is_some());
        assert!(merged.attribute("count").is_some());
        assert!(merged.relationship("Others").is_some());
        assert_eq!(
            merged.superclasses,
            vec!["Mid".to_string(), "Base".to_string()]
        );
    }

    #[test]
    fn test_family_spans_the_hierarchy() {
        let (_backend, view) = view_for("mem_unit_family");
        let family = view.family("Mid");
        assert!(family.contains(&"Base".to_string()));
        assert!(family.contains(&"Leaf".to_string()));
        assert!(family.contains(&"Mid".to_string()));
    }

    #[test]
    fn test_diff_objects_actions() {
        let stored = |class: &str| StoredObject {
            class_name: class.to_string(),
            attrs: BTreeMap::new(),
            rels: BTreeMap::new(),
        };
        let mut modified = stored("A");
        modified
            .attrs
            .insert("x".into(), Value::Single(Scalar::Bool(true)));

        let mut committed = ObjectMap::new();
        committed
            .entry("A".to_string())
            .or_default()
            .extend([("#1".to_string(), stored("A")), ("#2".to_string(), stored("A"))]);

        let mut working = ObjectMap::new();
        working.entry("A".to_string()).or_default().extend([
            ("#1".to_string(), modified),
            ("#3".to_string(), stored("A")),
        ]);

        let mut diffs = MemoryBackend::diff_objects(&committed, &working);
        diffs.sort();
        assert_eq!(
            diffs,
            vec![
                ("A".to_string(), "#1".to_string(), ChangeAction::Modified),
                ("A".to_string(), "#2".to_string(), ChangeAction::Removed),
                ("A".to_string(), "#3".to_string(), ChangeAction::Created),
            ]
        );
    }

    #[test]
    fn test_open_unknown_database_is_not_found() {
        let mut backend = MemoryBackend::new();
        let err = backend.open_db("mem_unit_missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
