//! Module descriptors and the capability registry
//!
//! A module declares, by name, the ordered set of capabilities (trait
//! object types) it needs. Providers register constructors for those
//! capabilities under a provider name; the active configuration decides
//! which provider names take part. [`ModuleRegistry::resolve`] binds every
//! required capability to exactly one provider and the rest of the
//! collector looks the bindings up by type.
//!
//! ```
//! use std::sync::Arc;
//! use apm_collector::module::{ModuleDescriptor, ModuleRegistry};
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         "hello".to_string()
//!     }
//! }
//!
//! let mut registry = ModuleRegistry::new(["english"]);
//! registry
//!     .register(ModuleDescriptor::new("greeting").requires::<dyn Greeter>())
//!     .unwrap();
//! registry
//!     .provide::<dyn Greeter, _>("english", || Arc::new(English) as Arc<dyn Greeter>)
//!     .unwrap();
//! registry.resolve().unwrap();
//!
//! assert_eq!(registry.lookup::<dyn Greeter>().unwrap().greet(), "hello");
//! ```

pub mod error;
pub mod registry;

use std::any::TypeId;
use std::fmt;

pub use error::RegistryError;
pub use registry::{ModuleRegistry, ModuleSummary};

/// Provider name of the built-in implementations
pub const DEFAULT_PROVIDER: &str = "default";

/// Identifies a capability interface by the type of its trait object
#[derive(Clone, Copy)]
pub struct Capability {
    type_id: TypeId,
    name: &'static str,
}

impl Capability {
    /// Capability for the (usually unsized) type `T`, e.g. `dyn Trait`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for Capability {}

impl std::hash::Hash for Capability {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Static declaration of a functional module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    capabilities: Vec<Capability>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
        }
    }

    /// Append a required capability. Repeats are ignored.
    #[must_use]
    pub fn requires<T: ?Sized + 'static>(mut self) -> Self {
        let capability = Capability::of::<T>();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required capabilities in declaration order
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }
}
