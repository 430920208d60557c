//! Startup-time binding of module capabilities to providers

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace};

use super::error::RegistryError;
use super::{Capability, ModuleDescriptor};

type Instance = Box<dyn Any + Send + Sync>;
type Constructor = Box<dyn FnOnce() -> Instance + Send + Sync>;

struct ProviderEntry {
    provider: String,
    capability: Capability,
    construct: Option<Constructor>,
}

struct Binding {
    provider: String,
    /// Always an `Arc<T>` for the capability's `T`
    instance: Instance,
}

/// A registered module and the providers its capabilities are bound to
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub capabilities: Vec<CapabilitySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySummary {
    pub capability: &'static str,
    /// `None` until the registry is resolved
    pub provider: Option<String>,
}

/// Service locator resolving module capabilities to provider instances
///
/// Lifecycle: `register` modules and `provide` constructors, call
/// `resolve` once, then `lookup`. Bindings never change after `resolve`,
/// so a resolved registry can be shared freely behind an `Arc`.
pub struct ModuleRegistry {
    active: HashSet<String>,
    modules: Vec<ModuleDescriptor>,
    providers: Vec<ProviderEntry>,
    bindings: HashMap<TypeId, Binding>,
    resolved: bool,
}

impl ModuleRegistry {
    /// Create a registry where only the given provider names are active
    pub fn new<I, S>(active_providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let active: HashSet<String> = active_providers.into_iter().map(Into::into).collect();
        debug!("creating module registry with active providers {active:?}");

        Self {
            active,
            modules: Vec::new(),
            providers: Vec::new(),
            bindings: HashMap::new(),
            resolved: false,
        }
    }

    /// Add a module to the process-wide module set
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<(), RegistryError> {
        if self.resolved {
            return Err(RegistryError::AlreadyResolved);
        }
        if self.modules.iter().any(|m| m.name() == descriptor.name()) {
            return Err(RegistryError::DuplicateModule(descriptor.name().to_string()));
        }

        debug!(
            "registered module '{}' requiring {} capabilities",
            descriptor.name(),
            descriptor.capabilities().len()
        );
        self.modules.push(descriptor);
        Ok(())
    }

    /// Offer a constructor for capability `T` under a provider name
    ///
    /// The constructor only runs if the provider is active and some module
    /// requires `T`.
    pub fn provide<T, F>(&mut self, provider: &str, construct: F) -> Result<(), RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce() -> Arc<T> + Send + Sync + 'static,
    {
        if self.resolved {
            return Err(RegistryError::AlreadyResolved);
        }

        let capability = Capability::of::<T>();
        trace!("provider '{provider}' offers {capability}");
        self.providers.push(ProviderEntry {
            provider: provider.to_string(),
            capability,
            construct: Some(Box::new(move || Box::new(construct()) as Instance)),
        });
        Ok(())
    }

    /// Bind every required capability to exactly one active provider
    ///
    /// All capabilities are checked before any constructor runs, so a
    /// failed resolve leaves the registry as it was. Calling `resolve`
    /// again after it succeeded does nothing.
    pub fn resolve(&mut self) -> Result<(), RegistryError> {
        if self.resolved {
            trace!("module registry already resolved");
            return Ok(());
        }

        let mut plan: Vec<(Capability, usize)> = Vec::new();
        for module in &self.modules {
            for capability in module.capabilities() {
                if plan.iter().any(|(planned, _)| planned == capability) {
                    continue;
                }

                let claims: Vec<usize> = self
                    .providers
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| {
                        entry.capability == *capability && self.active.contains(&entry.provider)
                    })
                    .map(|(index, _)| index)
                    .collect();

                match claims.as_slice() {
                    [] => {
                        return Err(RegistryError::UnresolvedCapability {
                            module: module.name().to_string(),
                            capability: capability.name(),
                        });
                    }
                    [index] => plan.push((*capability, *index)),
                    _ => {
                        return Err(RegistryError::AmbiguousProvider {
                            capability: capability.name(),
                            providers: claims
                                .iter()
                                .map(|index| self.providers[*index].provider.clone())
                                .collect(),
                        });
                    }
                }
            }
        }

        for (capability, index) in plan {
            let entry = &mut self.providers[index];
            let Some(construct) = entry.construct.take() else {
                continue;
            };
            debug!("binding {} to provider '{}'", capability, entry.provider);
            self.bindings.insert(
                capability.type_id(),
                Binding {
                    provider: entry.provider.clone(),
                    instance: construct(),
                },
            );
        }

        // constructors of unused providers are no longer needed
        self.providers.clear();
        self.resolved = true;

        info!(
            "module registry resolved: {} modules, {} capabilities bound",
            self.modules.len(),
            self.bindings.len()
        );
        Ok(())
    }

    /// Shared provider instance bound to capability `T`
    pub fn lookup<T>(&self) -> Result<Arc<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let capability = Capability::of::<T>();
        if !self.resolved {
            return Err(RegistryError::NotResolved(capability.name()));
        }

        self.bindings
            .get(&capability.type_id())
            .and_then(|binding| binding.instance.downcast_ref::<Arc<T>>())
            .cloned()
            .ok_or(RegistryError::UnboundCapability(capability.name()))
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Registered modules with the provider bound to each capability
    pub fn modules(&self) -> Vec<ModuleSummary> {
        self.modules
            .iter()
            .map(|module| ModuleSummary {
                name: module.name().to_string(),
                capabilities: module
                    .capabilities()
                    .iter()
                    .map(|capability| CapabilitySummary {
                        capability: capability.name(),
                        provider: self
                            .bindings
                            .get(&capability.type_id())
                            .map(|binding| binding.provider.clone()),
                    })
                    .collect(),
            })
            .collect()
    }
}
