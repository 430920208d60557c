//! Error types for module registration and capability resolution

use std::fmt;

/// Errors raised while wiring modules to providers
///
/// All of them are startup errors: a collector that hits one must not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A module with this name is already registered
    DuplicateModule(String),

    /// A required capability has no active provider
    UnresolvedCapability {
        module: String,
        capability: &'static str,
    },

    /// More than one active provider claims the same capability
    AmbiguousProvider {
        capability: &'static str,
        providers: Vec<String>,
    },

    /// Lookup before a successful `resolve()`
    NotResolved(&'static str),

    /// Lookup of a capability no registered module requires
    UnboundCapability(&'static str),

    /// Registration after a successful `resolve()`
    AlreadyResolved,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateModule(name) => {
                write!(f, "module '{}' is already registered", name)
            }
            RegistryError::UnresolvedCapability { module, capability } => write!(
                f,
                "module '{}' requires {} but no active provider offers it",
                module, capability
            ),
            RegistryError::AmbiguousProvider {
                capability,
                providers,
            } => write!(
                f,
                "{} is claimed by several active providers: {}",
                capability,
                providers.join(", ")
            ),
            RegistryError::NotResolved(capability) => {
                write!(f, "lookup of {} before the registry was resolved", capability)
            }
            RegistryError::UnboundCapability(capability) => {
                write!(f, "{} is not required by any registered module", capability)
            }
            RegistryError::AlreadyResolved => write!(f, "registry is already resolved"),
        }
    }
}

impl std::error::Error for RegistryError {}
