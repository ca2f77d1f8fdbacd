//! Model router: maps capability ids to the providers that implement them.
//!
//! Handles provider registration, per-capability defaults, alias resolution,
//! and schema-validated execution on both sides of every provider call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use weft_core::capability::{CapabilityDescriptor, CapabilityRouter, ExecuteConfig, ModelProvider};
use weft_core::error::CapabilityError;
use weft_core::schema::validate_against_schema;

/// Providers backing one canonical capability.
struct CapabilityEntry {
    /// Provider used when a call names none
    default_provider: String,
    /// Provider ids in registration order
    providers: Vec<String>,
}

/// Routes capability calls to the correct provider.
pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    provider_order: Vec<String>,
    /// (provider id, capability id) → descriptor as exposed by that provider
    descriptors: HashMap<(String, String), CapabilityDescriptor>,
    capabilities: HashMap<String, CapabilityEntry>,
    aliases: HashMap<String, String>,
}

impl ModelRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            provider_order: Vec::new(),
            descriptors: HashMap::new(),
            capabilities: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register a provider and every capability it exposes.
    ///
    /// The first provider registered for a capability becomes its default.
    pub fn register_provider(
        &mut self,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<(), CapabilityError> {
        let provider_id = provider.id().to_string();
        if self.providers.contains_key(&provider_id) {
            return Err(CapabilityError::DuplicateProvider(provider_id));
        }

        let descriptors = provider.capabilities();
        for descriptor in descriptors {
            let capability = self.resolve(&descriptor.id);
            let entry = self
                .capabilities
                .entry(capability.clone())
                .or_insert_with(|| CapabilityEntry {
                    default_provider: provider_id.clone(),
                    providers: Vec::new(),
                });
            if !entry.providers.contains(&provider_id) {
                entry.providers.push(provider_id.clone());
            }
            debug!(provider = %provider_id, capability = %capability, "Registered capability");
            self.descriptors
                .insert((provider_id.clone(), capability), descriptor);
        }

        info!(provider = %provider_id, "Registered model provider");
        self.providers.insert(provider_id.clone(), provider);
        self.provider_order.push(provider_id);
        Ok(())
    }

    /// Make `alias` resolve to `canonical`. Fails if `canonical` is unknown.
    ///
    /// If `alias` was itself backed by providers, they are folded into the
    /// canonical capability after its existing providers.
    pub fn register_alias(&mut self, alias: &str, canonical: &str) -> Result<(), CapabilityError> {
        let canonical = self.resolve(canonical);
        if !self.capabilities.contains_key(&canonical) {
            return Err(CapabilityError::UnknownAliasTarget {
                alias: alias.to_string(),
                target: canonical,
            });
        }
        if alias == canonical {
            return Ok(());
        }

        if let Some(folded) = self.capabilities.remove(alias) {
            for provider_id in folded.providers {
                if let Some(descriptor) = self
                    .descriptors
                    .remove(&(provider_id.clone(), alias.to_string()))
                {
                    self.descriptors
                        .insert((provider_id.clone(), canonical.clone()), descriptor);
                }
                if let Some(entry) = self.capabilities.get_mut(&canonical) {
                    if !entry.providers.contains(&provider_id) {
                        entry.providers.push(provider_id);
                    }
                }
            }
        }

        // Anything already aliased to `alias` now points at the canonical id.
        for target in self.aliases.values_mut() {
            if target == alias {
                *target = canonical.clone();
            }
        }

        debug!(alias = %alias, canonical = %canonical, "Registered capability alias");
        self.aliases.insert(alias.to_string(), canonical);
        Ok(())
    }

    /// Resolve configured alias groups to one canonical id per group.
    ///
    /// The canonical id is the first id in the group already backed by a
    /// registered provider. Groups with no backed id are skipped.
    pub fn apply_alias_groups(&mut self, groups: &[Vec<String>]) -> Result<(), CapabilityError> {
        for group in groups {
            let Some(canonical) = group
                .iter()
                .find(|id| self.capabilities.contains_key(id.as_str()))
                .cloned()
            else {
                warn!(group = ?group, "No provider backs any capability in alias group, skipping");
                continue;
            };
            for id in group.iter().filter(|id| **id != canonical) {
                self.register_alias(id, &canonical)?;
            }
        }
        Ok(())
    }

    /// Change the default provider for a capability.
    pub fn set_default(
        &mut self,
        capability_id: &str,
        provider_id: &str,
    ) -> Result<(), CapabilityError> {
        let capability = self.resolve(capability_id);
        let entry = self
            .capabilities
            .get_mut(&capability)
            .ok_or_else(|| CapabilityError::NoProvider {
                capability: capability.clone(),
            })?;
        if !entry.providers.iter().any(|p| p == provider_id) {
            return Err(CapabilityError::CapabilityNotFound {
                capability,
                provider: provider_id.to_string(),
            });
        }
        entry.default_provider = provider_id.to_string();
        Ok(())
    }

    /// The default provider for a capability, if any.
    pub fn default_provider(&self, capability_id: &str) -> Option<&str> {
        self.capabilities
            .get(&self.resolve(capability_id))
            .map(|e| e.default_provider.as_str())
    }

    /// Every provider backing a capability, in registration order.
    pub fn providers_for(&self, capability_id: &str) -> Vec<String> {
        self.capabilities
            .get(&self.resolve(capability_id))
            .map(|e| e.providers.clone())
            .unwrap_or_default()
    }

    /// Get a provider by id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// All canonical capability ids, sorted.
    pub fn capabilities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.capabilities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All provider ids in registration order.
    pub fn provider_ids(&self) -> &[String] {
        &self.provider_order
    }

    /// Run every provider's `init` concurrently.
    pub async fn init_all(&self) -> Result<(), CapabilityError> {
        futures::future::try_join_all(self.ordered_providers().map(|p| async move {
            debug!(provider = %p.id(), "Initializing provider");
            p.init().await
        }))
        .await?;
        Ok(())
    }

    /// Run every provider's health check concurrently. Any failure is fatal.
    pub async fn check_health_all(&self) -> Result<(), CapabilityError> {
        futures::future::try_join_all(self.ordered_providers().map(|p| async move {
            p.check_health().await.map_err(|e| match e {
                unhealthy @ CapabilityError::Unhealthy { .. } => unhealthy,
                other => CapabilityError::Unhealthy {
                    provider: p.id().to_string(),
                    message: other.to_string(),
                },
            })
        }))
        .await?;
        Ok(())
    }

    fn ordered_providers(&self) -> impl Iterator<Item = &Arc<dyn ModelProvider>> {
        self.provider_order
            .iter()
            .filter_map(|id| self.providers.get(id))
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityRouter for ModelRouter {
    fn resolve(&self, id: &str) -> String {
        self.aliases.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn has_capability(&self, id: &str) -> bool {
        self.capabilities.contains_key(&self.resolve(id))
    }

    async fn execute(
        &self,
        capability_id: &str,
        input: Value,
        config: &ExecuteConfig,
        provider_id: Option<&str>,
    ) -> Result<Value, CapabilityError> {
        let capability = self.resolve(capability_id);

        let provider_id = match provider_id {
            Some(id) => id.to_string(),
            None => self
                .capabilities
                .get(&capability)
                .map(|e| e.default_provider.clone())
                .ok_or_else(|| CapabilityError::NoProvider {
                    capability: capability.clone(),
                })?,
        };

        let provider = self
            .providers
            .get(&provider_id)
            .ok_or_else(|| CapabilityError::UnknownProvider(provider_id.clone()))?;

        let descriptor = self
            .descriptors
            .get(&(provider_id.clone(), capability.clone()))
            .ok_or_else(|| CapabilityError::CapabilityNotFound {
                capability: capability.clone(),
                provider: provider_id.clone(),
            })?;

        validate_against_schema(&descriptor.input_schema, &input).map_err(|violations| {
            CapabilityError::InvalidInput {
                capability: capability.clone(),
                violations,
            }
        })?;

        debug!(capability = %capability, provider = %provider_id, "Executing capability");
        // Providers see the id they declared, which may be an alias of the canonical one.
        let output = provider.execute(&descriptor.id, input, config).await?;

        validate_against_schema(&descriptor.output_schema, &output).map_err(|violations| {
            CapabilityError::InvalidOutput {
                capability: capability.clone(),
                provider: provider_id.clone(),
                violations,
            }
        })?;

        Ok(output)
    }
}
