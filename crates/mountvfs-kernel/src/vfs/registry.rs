//! Live provider registry.
//!
//! Tracks every provider discovery has announced, so callers can mount or
//! look one up by address prefix or label instead of holding the object.

use dashmap::DashMap;
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::provider::Provider;

/// Providers currently available, keyed by address.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("addresses", &self.addresses())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any previous one with the same address.
    pub fn register(&self, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        self.providers
            .insert(provider.address().to_string(), provider)
    }

    /// Remove a provider by exact address.
    pub fn deregister(&self, address: &str) -> Option<Arc<dyn Provider>> {
        self.providers.remove(address).map(|(_, p)| p)
    }

    /// Look up by exact address.
    pub fn get(&self, address: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(address).map(|p| Arc::clone(p.value()))
    }

    /// Look up by exact address or unique address prefix.
    pub fn resolve(&self, prefix: &str) -> VfsResult<Arc<dyn Provider>> {
        if let Some(exact) = self.get(prefix) {
            return Ok(exact);
        }

        let mut matches = self
            .providers
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| Arc::clone(entry.value()));

        match (matches.next(), matches.next()) {
            (Some(found), None) => Ok(found),
            (Some(_), Some(_)) => Err(VfsError::AmbiguousAddress(prefix.to_string())),
            (None, _) => Err(VfsError::not_found(format!("no such provider: {prefix}"))),
        }
    }

    /// Look up by label, falling back to [`resolve`](Self::resolve).
    pub fn proxy(&self, filter: &str) -> VfsResult<Arc<dyn Provider>> {
        let labelled = self
            .providers
            .iter()
            .find(|entry| entry.value().label().as_deref() == Some(filter))
            .map(|entry| Arc::clone(entry.value()));
        match labelled {
            Some(provider) => Ok(provider),
            None => self.resolve(filter),
        }
    }

    /// Registered addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::providers::MemoryProvider;

    fn registry() -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MemoryProvider::with_address("a1f09c").with_label("boot")));
        registry.register(Arc::new(MemoryProvider::with_address("a1f7d2")));
        registry.register(Arc::new(MemoryProvider::with_address("7c2e11")));
        registry
    }

    #[test]
    fn test_resolve_prefix() {
        let registry = registry();
        assert_eq!(registry.resolve("7c").unwrap().address(), "7c2e11");
        assert_eq!(registry.resolve("a1f0").unwrap().address(), "a1f09c");
        assert!(matches!(registry.resolve("a1f"), Err(VfsError::AmbiguousAddress(_))));
        assert!(registry.resolve("ff").err().unwrap().is_not_found());
    }

    #[test]
    fn test_proxy_by_label() {
        let registry = registry();
        assert_eq!(registry.proxy("boot").unwrap().address(), "a1f09c");
        assert_eq!(registry.proxy("7c2").unwrap().address(), "7c2e11");
    }

    #[test]
    fn test_deregister() {
        let registry = registry();
        assert!(registry.deregister("7c2e11").is_some());
        assert!(registry.deregister("7c2e11").is_none());
        assert_eq!(registry.addresses(), vec!["a1f09c", "a1f7d2"]);
        assert_eq!(registry.len(), 2);
    }
}
