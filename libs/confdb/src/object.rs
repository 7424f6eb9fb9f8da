//! Implementation objects and the typed object handle.
//!
//! An [`ObjectImpl`] is the single in-process record of one stored object:
//! it owns the last-read attribute and relationship values, carries the
//! object lifecycle state and is protected by its own mutex so reads of one
//! object proceed while another is being updated. Implementation objects are
//! owned by the per-class cache; handles hold non-owning `Arc`s into it.
//!
//! [`ConfigObject`] is the thin handle the public API hands out. Typed
//! getters read from the cached fields and refill invalid objects through
//! the backend; setters write through. A handle stays valid across renames
//! and deletions, reporting [`crate::ConfigError::DeletedObject`] once the
//! object is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::config::ConfigurationInner;
use crate::error::{ConfigError, Result};
use crate::intern::ClassName;
use crate::schema::{AttributeInfo, AttributeType};
use crate::value::{AttributeValue, ObjectRef, RelValue, Scalar, Value};

// ============================================================================
// ObjectImpl
// ============================================================================

/// Lifecycle state of an implementation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Cached fields reflect a successful read.
    Valid,
    /// Fields were invalidated; the next access re-reads from the backend.
    Unknown,
    /// The object was removed; every access raises `DeletedObject`.
    Deleted,
}

/// Mutable part of an implementation object, guarded by the object mutex.
#[derive(Debug)]
pub struct ObjectCore {
    pub state: ObjectState,
    pub id: String,
    /// Name of the database file/shard the object lives in.
    pub contained_in: String,
    pub attrs: HashMap<String, Value>,
    pub rels: HashMap<String, RelValue>,
}

impl ObjectCore {
    /// Drop cached fields, keeping state and identity.
    pub fn clear(&mut self) {
        self.attrs.clear();
        self.rels.clear();
    }
}

/// One live object. Created on first read, owned by the cache that indexed
/// it, destroyed only on cache teardown.
#[derive(Debug)]
pub struct ObjectImpl {
    class_name: ClassName,
    core: Mutex<ObjectCore>,
}

impl ObjectImpl {
    /// Create a fresh implementation object in the given state.
    pub fn new(class_name: ClassName, id: &str, contained_in: &str, state: ObjectState) -> Arc<Self> {
        Arc::new(ObjectImpl {
            class_name,
            core: Mutex::new(ObjectCore {
                state,
                id: id.to_string(),
                contained_in: contained_in.to_string(),
                attrs: HashMap::new(),
                rels: HashMap::new(),
            }),
        })
    }

    /// The interned class name. Fixed at creation; a rename changes the UID
    /// but never the class.
    #[inline]
    pub fn class_name(&self) -> &ClassName {
        &self.class_name
    }

    /// Lock the mutable core.
    pub fn lock(&self) -> MutexGuard<'_, ObjectCore> {
        self.core.lock().expect("object mutex poisoned")
    }

    /// Current UID.
    pub fn uid(&self) -> String {
        self.lock().id.clone()
    }

    /// Current state.
    pub fn state(&self) -> ObjectState {
        self.lock().state
    }

    /// Clear cached fields and force the given state.
    pub fn invalidate(&self, state: ObjectState) {
        let mut core = self.lock();
        core.clear();
        core.state = state;
    }

    /// Clear cached fields and mark for re-read, whatever the prior state.
    /// Used when a removed UID is re-created.
    pub fn reset(&self) {
        self.invalidate(ObjectState::Unknown);
    }

    /// Install freshly read fields and mark the object valid.
    /// Called by backends when materialising or refreshing an object.
    pub fn fill(
        &self,
        contained_in: &str,
        attrs: HashMap<String, Value>,
        rels: HashMap<String, RelValue>,
    ) {
        let mut core = self.lock();
        core.contained_in = contained_in.to_string();
        core.attrs = attrs;
        core.rels = rels;
        core.state = ObjectState::Valid;
    }
}

// ============================================================================
// ConfigObject
// ============================================================================

/// Typed handle over an implementation object.
///
/// Handles are cheap to clone and compare equal when they reference the same
/// implementation, or the same (UID, class name) pair, or are both null.
#[derive(Debug, Clone)]
pub struct ConfigObject {
    pub(crate) conf: Weak<ConfigurationInner>,
    pub(crate) obj: Option<Arc<ObjectImpl>>,
}

impl ConfigObject {
    /// The null handle.
    pub fn null() -> Self {
        ConfigObject {
            conf: Weak::new(),
            obj: None,
        }
    }

    pub(crate) fn from_parts(conf: Weak<ConfigurationInner>, obj: Arc<ObjectImpl>) -> Self {
        ConfigObject {
            conf,
            obj: Some(obj),
        }
    }

    /// True when the handle references no object.
    pub fn is_null(&self) -> bool {
        self.obj.is_none()
    }

    /// True when the referenced object is known to have been deleted.
    pub fn is_deleted(&self) -> bool {
        self.obj
            .as_ref()
            .map(|o| o.state() == ObjectState::Deleted)
            .unwrap_or(false)
    }

    /// The object UID.
    pub fn uid(&self) -> Result<String> {
        Ok(self.require_obj()?.uid())
    }

    /// The object's class name.
    pub fn class_name(&self) -> Result<ClassName> {
        Ok(self.require_obj()?.class_name().clone())
    }

    /// `uid@class` form used in messages and export trees.
    pub fn full_name(&self) -> Result<String> {
        let obj = self.require_obj()?;
        Ok(format!("{}@{}", obj.uid(), obj.class_name()))
    }

    /// UID without the error plumbing; `None` for a null handle.
    pub fn uid_opt(&self) -> Option<String> {
        self.obj.as_ref().map(|o| o.uid())
    }

    /// Class name without the error plumbing; `None` for a null handle.
    pub fn class_name_opt(&self) -> Option<ClassName> {
        self.obj.as_ref().map(|o| o.class_name().clone())
    }

    /// Name of the database file/shard the object lives in.
    pub fn contained_in(&self) -> Result<String> {
        let (conf, obj) = self.parts()?;
        {
            let core = obj.lock();
            if core.state == ObjectState::Deleted {
                return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id));
            }
            if core.state == ObjectState::Valid {
                return Ok(core.contained_in.clone());
            }
        }
        conf.refresh_object(&obj)?;
        let contained_in = obj.lock().contained_in.clone();
        Ok(contained_in)
    }

    pub(crate) fn impl_object(&self) -> Result<Arc<ObjectImpl>> {
        self.require_obj()
    }

    fn require_obj(&self) -> Result<Arc<ObjectImpl>> {
        self.obj
            .clone()
            .ok_or_else(|| ConfigError::generic("access to invalid (null) object"))
    }

    fn parts(&self) -> Result<(Arc<ConfigurationInner>, Arc<ObjectImpl>)> {
        let obj = self.require_obj()?;
        let conf = self
            .conf
            .upgrade()
            .ok_or_else(|| ConfigError::generic("configuration was destroyed"))?;
        Ok((conf, obj))
    }

    fn child(&self, obj: Arc<ObjectImpl>) -> ConfigObject {
        ConfigObject::from_parts(self.conf.clone(), obj)
    }

    // ------------------------------------------------------------------
    // Attribute access
    // ------------------------------------------------------------------

    /// Read a single-value attribute.
    pub fn get_val<T: AttributeValue>(&self, name: &str) -> Result<T> {
        match self.read_attribute(name)? {
            Value::Single(scalar) => T::from_scalar(&scalar).ok_or_else(|| {
                ConfigError::generic(format!(
                    "attribute '{}' of object '{}' holds {}, not {}",
                    name,
                    self,
                    scalar.attr_type().describe(),
                    T::TYPE.describe()
                ))
            }),
            Value::Vector(_) => Err(ConfigError::generic(format!(
                "attribute '{}' of object '{}' is multi-value, read as single value",
                name, self
            ))),
        }
    }

    /// Read a multi-value attribute.
    pub fn get_vec<T: AttributeValue>(&self, name: &str) -> Result<Vec<T>> {
        match self.read_attribute(name)? {
            Value::Vector(scalars) => scalars
                .iter()
                .map(|scalar| {
                    T::from_scalar(scalar).ok_or_else(|| {
                        ConfigError::generic(format!(
                            "attribute '{}' of object '{}' holds {}, not {}",
                            name,
                            self,
                            scalar.attr_type().describe(),
                            T::TYPE.describe()
                        ))
                    })
                })
                .collect(),
            Value::Single(_) => Err(ConfigError::generic(format!(
                "attribute '{}' of object '{}' is single-value, read as vector",
                name, self
            ))),
        }
    }

    /// Write a single-value attribute.
    pub fn set_val<T: AttributeValue>(&self, name: &str, value: T) -> Result<()> {
        self.write_attribute(name, Value::Single(value.into_scalar()))
    }

    /// Write a multi-value attribute.
    pub fn set_vec<T: AttributeValue>(&self, name: &str, values: Vec<T>) -> Result<()> {
        self.write_attribute(
            name,
            Value::Vector(values.into_iter().map(AttributeValue::into_scalar).collect()),
        )
    }

    /// Write an enumeration literal.
    pub fn set_enum(&self, name: &str, value: &str) -> Result<()> {
        self.write_attribute(name, Value::Single(Scalar::Enum(value.to_string())))
    }

    /// Write a vector of enumeration literals.
    pub fn set_enums(&self, name: &str, values: Vec<String>) -> Result<()> {
        self.write_attribute(
            name,
            Value::Vector(values.into_iter().map(Scalar::Enum).collect()),
        )
    }

    /// Write a date attribute.
    pub fn set_date(&self, name: &str, value: &str) -> Result<()> {
        self.write_attribute(name, Value::Single(Scalar::Date(value.to_string())))
    }

    /// Write a vector of dates.
    pub fn set_dates(&self, name: &str, values: Vec<String>) -> Result<()> {
        self.write_attribute(
            name,
            Value::Vector(values.into_iter().map(Scalar::Date).collect()),
        )
    }

    /// Write a time attribute.
    pub fn set_time(&self, name: &str, value: &str) -> Result<()> {
        self.write_attribute(name, Value::Single(Scalar::Time(value.to_string())))
    }

    /// Write a vector of times.
    pub fn set_times(&self, name: &str, values: Vec<String>) -> Result<()> {
        self.write_attribute(
            name,
            Value::Vector(values.into_iter().map(Scalar::Time).collect()),
        )
    }

    /// Write a class-name reference attribute.
    pub fn set_class(&self, name: &str, value: &str) -> Result<()> {
        self.write_attribute(name, Value::Single(Scalar::Class(value.to_string())))
    }

    /// Write a vector of class-name references.
    pub fn set_classes(&self, name: &str, values: Vec<String>) -> Result<()> {
        self.write_attribute(
            name,
            Value::Vector(values.into_iter().map(Scalar::Class).collect()),
        )
    }

    fn read_attribute(&self, name: &str) -> Result<Value> {
        let (conf, obj) = self.parts()?;
        {
            let core = obj.lock();
            match core.state {
                ObjectState::Deleted => {
                    return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id))
                }
                ObjectState::Valid => {
                    if let Some(value) = core.attrs.get(name) {
                        let value = value.clone();
                        drop(core);
                        return Ok(conf.apply_string_converters(self, name, value));
                    }
                }
                ObjectState::Unknown => {}
            }
        }
        conf.refresh_object(&obj)?;
        let value = {
            let core = obj.lock();
            if core.state == ObjectState::Deleted {
                return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id));
            }
            core.attrs.get(name).cloned().ok_or_else(|| {
                ConfigError::generic(format!(
                    "attribute '{}' is not declared for object '{}@{}'",
                    name,
                    core.id,
                    obj.class_name()
                ))
            })?
        };
        Ok(conf.apply_string_converters(self, name, value))
    }

    fn write_attribute(&self, name: &str, value: Value) -> Result<()> {
        let (conf, obj) = self.parts()?;
        {
            let core = obj.lock();
            if core.state == ObjectState::Deleted {
                return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id));
            }
        }
        conf.write_attribute(&obj, name, value).map_err(|e| {
            e.wrap(format!(
                "failed to set attribute '{}' of object '{}'",
                name, self
            ))
        })
    }

    // ------------------------------------------------------------------
    // Relationship access
    // ------------------------------------------------------------------

    /// Read a single-object relationship. A cleared zero-or-one
    /// relationship yields the null handle.
    pub fn get_obj(&self, name: &str) -> Result<ConfigObject> {
        let (conf, _) = self.parts()?;
        match self.read_relationship(name)? {
            RelValue::Single(None) => Ok(ConfigObject::null()),
            RelValue::Single(Some(target)) => {
                let resolved = conf.resolve_ref(&target).map_err(|e| {
                    e.wrap(format!(
                        "failed to get object of class '{}' via relationship '{}' of object '{}'",
                        target.class_name, name, self
                    ))
                })?;
                Ok(self.child(resolved))
            }
            RelValue::Multiple(_) => Err(ConfigError::generic(format!(
                "relationship '{}' of object '{}' is multi-value, read as single object",
                name, self
            ))),
        }
    }

    /// Read a multi-object relationship.
    pub fn get_objs(&self, name: &str) -> Result<Vec<ConfigObject>> {
        let (conf, _) = self.parts()?;
        match self.read_relationship(name)? {
            RelValue::Multiple(targets) => targets
                .iter()
                .map(|target| {
                    conf.resolve_ref(target)
                        .map(|resolved| self.child(resolved))
                        .map_err(|e| {
                            e.wrap(format!(
                                "failed to get object of class '{}' via relationship '{}' of object '{}'",
                                target.class_name, name, self
                            ))
                        })
                })
                .collect(),
            RelValue::Single(_) => Err(ConfigError::generic(format!(
                "relationship '{}' of object '{}' is single-value, read as vector",
                name, self
            ))),
        }
    }

    /// Write a single-object relationship; `None` clears it.
    pub fn set_obj(&self, name: &str, value: Option<&ConfigObject>) -> Result<()> {
        let target = match value {
            None => None,
            Some(other) => Some(other.object_ref()?),
        };
        self.write_relationship(name, RelValue::Single(target))
    }

    /// Write a multi-object relationship.
    pub fn set_objs(&self, name: &str, values: &[ConfigObject]) -> Result<()> {
        let targets = values
            .iter()
            .map(|other| other.object_ref())
            .collect::<Result<Vec<_>>>()?;
        self.write_relationship(name, RelValue::Multiple(targets))
    }

    fn object_ref(&self) -> Result<ObjectRef> {
        let obj = self.require_obj()?;
        Ok(ObjectRef::new(obj.class_name().as_str(), obj.uid()))
    }

    fn read_relationship(&self, name: &str) -> Result<RelValue> {
        let (conf, obj) = self.parts()?;
        {
            let core = obj.lock();
            match core.state {
                ObjectState::Deleted => {
                    return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id))
                }
                ObjectState::Valid => {
                    if let Some(value) = core.rels.get(name) {
                        return Ok(value.clone());
                    }
                }
                ObjectState::Unknown => {}
            }
        }
        conf.refresh_object(&obj)?;
        let core = obj.lock();
        if core.state == ObjectState::Deleted {
            return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id));
        }
        core.rels.get(name).cloned().ok_or_else(|| {
            ConfigError::generic(format!(
                "relationship '{}' is not declared for object '{}@{}'",
                name,
                core.id,
                obj.class_name()
            ))
        })
    }

    fn write_relationship(&self, name: &str, value: RelValue) -> Result<()> {
        let (conf, obj) = self.parts()?;
        {
            let core = obj.lock();
            if core.state == ObjectState::Deleted {
                return Err(ConfigError::deleted(obj.class_name().as_str(), &core.id));
            }
        }
        conf.write_relationship(&obj, name, value).map_err(|e| {
            e.wrap(format!(
                "failed to set relationship '{}' of object '{}'",
                name, self
            ))
        })
    }

    // ------------------------------------------------------------------
    // Identity changes and reverse lookup
    // ------------------------------------------------------------------

    /// Rename the object to a new UID.
    ///
    /// On a UID collision the prior object under the new UID is displaced
    /// into the tangled list, keeping outstanding handles dereferenceable.
    pub fn rename(&self, new_id: &str) -> Result<()> {
        let (conf, obj) = self.parts()?;
        conf.rename_object(&obj, new_id)?;
        conf.action_on_update(self, new_id);
        Ok(())
    }

    /// Objects referencing this one through `relationship` (`"*"` for any),
    /// optionally restricted to composite relationships.
    pub fn referenced_by(
        &self,
        relationship: &str,
        composite_only: bool,
    ) -> Result<Vec<ConfigObject>> {
        self.referenced_by_with(relationship, composite_only, 0, None)
    }

    /// [`Self::referenced_by`] with explicit read depth and class filter.
    pub fn referenced_by_with(
        &self,
        relationship: &str,
        composite_only: bool,
        rlevel: u32,
        rclasses: Option<&[String]>,
    ) -> Result<Vec<ConfigObject>> {
        let (conf, obj) = self.parts()?;
        let holders = conf
            .referenced_by(&obj, relationship, composite_only, rlevel, rclasses)
            .map_err(|e| {
                e.wrap(format!(
                    "failed to get objects referencing object '{}' via relationship '{}'",
                    self, relationship
                ))
            })?;
        Ok(holders.into_iter().map(|h| self.child(h)).collect())
    }

    // ------------------------------------------------------------------
    // Pretty printing
    // ------------------------------------------------------------------

    /// Render the object with every attribute and relationship, one field
    /// per line. Field read failures are captured in place so the dump
    /// always completes. Composite relationships are expanded recursively
    /// when the print-expanded-aggregations environment flag is set.
    pub fn print_ref(&self, prefix: &str, show_contained_in: bool) -> String {
        let mut out = String::new();
        self.print_ref_into(&mut out, prefix, show_contained_in);
        out
    }

    fn print_ref_into(&self, out: &mut String, prefix: &str, show_contained_in: bool) {
        use std::fmt::Write;

        if self.is_null() {
            let _ = write!(out, "{}(null)", prefix);
            return;
        }
        let uid = self.uid_opt().unwrap_or_default();
        let class = self
            .class_name_opt()
            .map(|c| c.as_str().to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "{}Object:", prefix);
        let _ = writeln!(out, "{}  id: '{}', class name: '{}'", prefix, uid, class);
        if show_contained_in {
            match self.contained_in() {
                Ok(file) => {
                    let _ = writeln!(out, "{}  contained in: '{}'", prefix, file);
                }
                Err(e) => {
                    let _ = writeln!(out, "{}  contained in: [bad_object] ({})", prefix, e);
                }
            }
        }
        let conf = match self.conf.upgrade() {
            Some(conf) => conf,
            None => {
                let _ = writeln!(out, "{}  cannot get schema description: configuration was destroyed", prefix);
                return;
            }
        };
        let info = match conf.class_info(&class, false) {
            Ok(info) => info,
            Err(e) => {
                let _ = writeln!(out, "{}  cannot get schema description: {}", prefix, e);
                return;
            }
        };
        for attribute in &info.attributes {
            let _ = writeln!(
                out,
                "{}  {}: {}",
                prefix,
                attribute.name,
                self.format_attribute(attribute)
            );
        }
        let expand = crate::env_flag(crate::ENV_PRINT_EXPAND_AGGREGATIONS);
        for relationship in &info.relationships {
            let multiple = relationship.cardinality.is_multiple();
            if !expand || !relationship.is_aggregation {
                let text = if multiple {
                    match self.get_objs(&relationship.name) {
                        Ok(objs) => {
                            let names: Vec<String> =
                                objs.iter().map(|o| format!("\"{}\"", o)).collect();
                            format!("({})", names.join(", "))
                        }
                        Err(e) => format!("[bad_object] ({})", e),
                    }
                } else {
                    match self.get_obj(&relationship.name) {
                        Ok(obj) => format!("\"{}\"", obj),
                        Err(e) => format!("[bad_object] ({})", e),
                    }
                };
                let _ = writeln!(out, "{}  {}: {}", prefix, relationship.name, text);
            } else {
                let _ = writeln!(out, "{}  {}:", prefix, relationship.name);
                let nested = format!("{}    ", prefix);
                let targets = if multiple {
                    self.get_objs(&relationship.name)
                } else {
                    self.get_obj(&relationship.name).map(|o| {
                        if o.is_null() {
                            Vec::new()
                        } else {
                            vec![o]
                        }
                    })
                };
                match targets {
                    Ok(objs) if objs.is_empty() => {
                        let _ = writeln!(out, "{}(null)", nested);
                    }
                    Ok(objs) => {
                        for target in objs {
                            target.print_ref_into(out, &nested, show_contained_in);
                        }
                    }
                    Err(e) => {
                        let _ = writeln!(out, "{}[bad_object] ({})", nested, e);
                    }
                }
            }
        }
    }

    fn format_attribute(&self, attribute: &AttributeInfo) -> String {
        match attribute.attr_type {
            AttributeType::Bool => self.format_typed::<bool>(attribute, None),
            AttributeType::S8 => self.format_typed::<i8>(attribute, None),
            AttributeType::U8 => self.format_typed::<u8>(attribute, None),
            AttributeType::S16 => self.format_typed::<i16>(attribute, None),
            AttributeType::U16 => self.format_typed::<u16>(attribute, None),
            AttributeType::S32 => self.format_typed::<i32>(attribute, None),
            AttributeType::U32 => self.format_typed::<u32>(attribute, None),
            AttributeType::S64 => self.format_typed::<i64>(attribute, None),
            AttributeType::U64 => self.format_typed::<u64>(attribute, None),
            AttributeType::Float => self.format_typed::<f32>(attribute, None),
            AttributeType::Double => self.format_typed::<f64>(attribute, None),
            AttributeType::String
            | AttributeType::Enum
            | AttributeType::Date
            | AttributeType::Time
            | AttributeType::Class => self.format_typed::<String>(attribute, Some('"')),
        }
    }

    fn format_typed<T: AttributeValue + fmt::Display>(
        &self,
        attribute: &AttributeInfo,
        quote: Option<char>,
    ) -> String {
        let quoted = |v: &T| match quote {
            Some(q) => format!("{}{}{}", q, v, q),
            None => v.to_string(),
        };
        if attribute.is_multi_value {
            match self.get_vec::<T>(&attribute.name) {
                Ok(values) => {
                    let items: Vec<String> = values.iter().map(quoted).collect();
                    format!("({})", items.join(", "))
                }
                Err(e) => format!(
                    "[bad_object] (could not get value of '{}': {})",
                    attribute.name, e
                ),
            }
        } else {
            match self.get_val::<T>(&attribute.name) {
                Ok(value) => quoted(&value),
                Err(e) => format!(
                    "[bad_object] (could not get value of '{}': {})",
                    attribute.name, e
                ),
            }
        }
    }
}

impl PartialEq for ConfigObject {
    fn eq(&self, other: &Self) -> bool {
        match (&self.obj, &other.obj) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.class_name() == b.class_name() && a.uid() == b.uid())
            }
            _ => false,
        }
    }
}

impl fmt::Display for ConfigObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.obj {
            None => f.write_str("(null)"),
            Some(obj) => {
                let core = obj.lock();
                if core.state == ObjectState::Deleted {
                    write!(f, "(deleted object {}@{})", core.id, obj.class_name())
                } else {
                    write!(f, "{}@{}", core.id, obj.class_name())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;

    fn imp(class: &str, id: &str) -> Arc<ObjectImpl> {
        ObjectImpl::new(intern::class_name(class), id, "test.db", ObjectState::Valid)
    }

    #[test]
    fn test_null_handles_are_equal() {
        assert_eq!(ConfigObject::null(), ConfigObject::null());
        assert!(ConfigObject::null().is_null());
    }

    #[test]
    fn test_same_impl_is_equal() {
        let a = imp("Dummy", "#1");
        let h1 = ConfigObject::from_parts(Weak::new(), a.clone());
        let h2 = ConfigObject::from_parts(Weak::new(), a);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_same_identity_is_equal() {
        let h1 = ConfigObject::from_parts(Weak::new(), imp("Dummy", "#1"));
        let h2 = ConfigObject::from_parts(Weak::new(), imp("Dummy", "#1"));
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_different_identity_is_not_equal() {
        let h1 = ConfigObject::from_parts(Weak::new(), imp("Dummy", "#1"));
        let h2 = ConfigObject::from_parts(Weak::new(), imp("Dummy", "#2"));
        let h3 = ConfigObject::from_parts(Weak::new(), imp("Second", "#1"));
        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
        assert_ne!(h1, ConfigObject::null());
    }

    #[test]
    fn test_invalidate_clears_fields() {
        let obj = imp("Dummy", "#1");
        obj.fill(
            "test.db",
            HashMap::from([("a".to_string(), Value::Single(Scalar::Bool(true)))]),
            HashMap::new(),
        );
        obj.invalidate(ObjectState::Unknown);
        let core = obj.lock();
        assert_eq!(core.state, ObjectState::Unknown);
        assert!(core.attrs.is_empty());
    }

    #[test]
    fn test_deleted_display() {
        let obj = imp("Dummy", "#1");
        obj.invalidate(ObjectState::Deleted);
        let handle = ConfigObject::from_parts(Weak::new(), obj);
        assert!(handle.is_deleted());
        assert_eq!(handle.to_string(), "(deleted object #1@Dummy)");
    }

    #[test]
    fn test_null_access_is_an_error() {
        let handle = ConfigObject::null();
        let err = handle.get_val::<bool>("bool").unwrap_err();
        assert!(err.to_string().contains("invalid (null) object"));
    }
}
