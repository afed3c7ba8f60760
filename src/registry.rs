//! C7: the atomically-swapped service snapshot.
//!
//! Readers acquire a reference without locking; the writer validates a
//! new list, then publishes it with a single atomic pointer swap. Old
//! snapshots are retained until their last reader (an `Arc` clone)
//! releases them.

use crate::dispatcher::Service;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate service name '{0}'")]
    DuplicateName(String),
    #[error("invalid host_regexp for service '{service}': {source}")]
    InvalidHostRegexp {
        service: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid path_regexp for service '{service}': {source}")]
    InvalidPathRegexp {
        service: String,
        #[source]
        source: regex::Error,
    },
}

/// Holds the current list of configured services behind an atomic
/// pointer. `update` validates and swaps; `snapshot` hands back a clone
/// of the `Arc` so a single request sees a consistent list throughout
/// its dispatch, even if a concurrent `update` happens mid-request.
pub struct ServiceRegistry {
    inner: ArcSwap<Vec<Service>>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<Service>) -> Result<Self, RegistryError> {
        validate(&services)?;
        Ok(Self {
            inner: ArcSwap::from_pointee(services),
        })
    }

    /// Returns the current snapshot. The caller holds a strong
    /// reference, so a concurrent `update` cannot invalidate it.
    pub fn snapshot(&self) -> Arc<Vec<Service>> {
        self.inner.load_full()
    }

    /// Validates `services` (unique names, well-formed regexps) and
    /// atomically swaps the snapshot. In-flight requests that already
    /// called `snapshot` keep using the old `Arc`.
    pub fn update(&self, services: Vec<Service>) -> Result<(), RegistryError> {
        validate(&services)?;
        self.inner.store(Arc::new(services));
        Ok(())
    }
}

fn validate(services: &[Service]) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for service in services {
        if !seen.insert(&service.name) {
            return Err(RegistryError::DuplicateName(service.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Backend;
    use std::time::Duration;

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            host_regexp: regex::Regex::new(".*").unwrap(),
            path_regexp: regex::Regex::new(".*").unwrap(),
            price_msat: 0,
            auth_required: false,
            capabilities: vec![],
            backend: Backend::Remote("http://backend.local".parse().unwrap()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = ServiceRegistry::new(vec![service("a"), service("a")]);
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[test]
    fn swap_replaces_snapshot_atomically() {
        let registry = ServiceRegistry::new(vec![service("a")]).unwrap();
        let old = registry.snapshot();
        registry.update(vec![service("a"), service("b")]).unwrap();
        let new = registry.snapshot();
        assert_eq!(old.len(), 1);
        assert_eq!(new.len(), 2);
    }

    #[test]
    fn update_rejects_duplicates_without_mutating_snapshot() {
        let registry = ServiceRegistry::new(vec![service("a")]).unwrap();
        let err = registry.update(vec![service("b"), service("b")]);
        assert!(err.is_err());
        assert_eq!(registry.snapshot().len(), 1);
    }
}
