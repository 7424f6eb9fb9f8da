//! confdb - schema-driven configuration access with pluggable backends.
//!
//! The library offers a uniform facade over one of several storage
//! backends (in-memory store, file parser, remote database client).
//! Clients discover classes, read and mutate typed objects, group
//! mutations into commits and subscribe to change notifications.
//!
//! ## Module structure
//!
//! - `config` - the [`Configuration`] facade: locking, dispatch, lifecycle
//! - `object` - implementation objects and the [`ConfigObject`] handle
//! - `cache` - per-class object-identity cache with subclass fallback
//! - `schema` - immutable class/attribute/relationship descriptors
//! - `value` - typed attribute values and conversions
//! - `change` - change batches and subscription criteria
//! - `backend` - the backend contract and the bundled in-memory backend
//! - `plugin` - backend spec parsing and dynamic plug-in loading
//! - `dal` - registry surface consumed by generated typed wrappers
//! - `export` - schema and data export into structured trees
//!
//! ## Example
//!
//! ```rust,ignore
//! use confdb::{Configuration, SubscriptionCriteria};
//!
//! let db = Configuration::new("memory:setup.data")?;
//! let host = db.get("Host", "lab-42")?;
//! let cores: u32 = host.get_val("NumberOfCores")?;
//!
//! let mut criteria = SubscriptionCriteria::new();
//! criteria.add_class("Host");
//! db.subscribe(criteria, |changes| {
//!     for change in changes {
//!         println!("{}", change);
//!     }
//! })?;
//! ```

pub mod backend;
pub mod cache;
pub mod change;
pub mod config;
pub mod dal;
pub mod error;
mod export;
pub mod intern;
pub mod object;
pub mod plugin;
pub mod schema;
pub mod value;

mod notify;

pub use backend::{Backend, ChangeHook, PreChangeHook, Version, VersionKind};
pub use change::{Change, ChangeAction, SubscriptionCriteria};
pub use config::{ConfigAction, Configuration, StringConverter};
pub use error::{ConfigError, Result};
pub use intern::ClassName;
pub use notify::{CallbackId, NotifyCallback, PreNotifyCallback};
pub use object::{ConfigObject, ObjectImpl, ObjectState};
pub use plugin::{register_backend, BackendFactory, BackendSpec};
pub use schema::{AttributeInfo, AttributeType, Cardinality, ClassInfo, IntFormat, RelationshipInfo};
pub use value::{AttributeValue, ObjectRef, RelValue, Scalar, Value};

/// Default backend spec used when the constructor receives an empty one.
pub const ENV_BACKEND: &str = "CONFDB_BACKEND";

/// Default database name used when `load` receives an empty one.
pub const ENV_DB_NAME: &str = "CONFDB_DB_NAME";

/// When set, every load eagerly reads all data into the cache.
pub const ENV_PREFETCH_ALL_DATA: &str = "CONFDB_PREFETCH_ALL_DATA";

/// When set, pretty printing expands composite relationships recursively.
pub const ENV_PRINT_EXPAND_AGGREGATIONS: &str = "CONFDB_PRINT_EXPAND_AGGREGATIONS";

/// When set, the profiler report is dumped at facade drop; the literal
/// value `DEBUG` additionally lists every accessed object.
pub const ENV_PROFILER_INFO: &str = "CONFDB_PROFILER_INFO";

/// Presence check for boolean environment flags.
pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some()
}
