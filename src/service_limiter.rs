//! C4: resolves a backend service name to the caveats that bind a token
//! to it. A pure function over C7's current snapshot; no state of its
//! own.

use crate::registry::ServiceRegistry;
use crate::token::Caveat;
use std::sync::Arc;

/// The caveats and price resolved for a service, ready for the minter to
/// prepend a `payment_hash` caveat and sign.
pub struct ResolvedService {
    pub price_msat: u64,
    pub caveats: Vec<Caveat>,
}

pub struct ServiceLimiter {
    registry: Arc<ServiceRegistry>,
}

impl ServiceLimiter {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Resolves `service_name` against the current snapshot. Returns
    /// `None` if no service with that name is configured, which the
    /// minter maps to `UnknownService`.
    pub fn resolve(&self, service_name: &str) -> Option<ResolvedService> {
        let snapshot = self.registry.snapshot();
        let service = snapshot.iter().find(|s| s.name == service_name)?;

        let mut caveats = vec![
            Caveat::new("services", format!("{}:0", service.name)),
            Caveat::new("price", service.price_msat.to_string()),
        ];
        if !service.capabilities.is_empty() {
            caveats.push(Caveat::new("capabilities", service.capabilities.join(",")));
        }

        Some(ResolvedService {
            price_msat: service.price_msat,
            caveats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Backend, Service};
    use std::time::Duration;

    fn registry_with(svc: Service) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(vec![svc]).unwrap())
    }

    fn service(name: &str, price_msat: u64, capabilities: Vec<String>) -> Service {
        Service {
            name: name.to_string(),
            host_regexp: regex::Regex::new(".*").unwrap(),
            path_regexp: regex::Regex::new(".*").unwrap(),
            price_msat,
            auth_required: true,
            capabilities,
            backend: Backend::Remote("http://backend.local".parse().unwrap()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn resolves_known_service_with_services_and_price_first() {
        let registry = registry_with(service("paid", 1000, vec![]));
        let limiter = ServiceLimiter::new(registry);
        let resolved = limiter.resolve("paid").unwrap();
        assert_eq!(resolved.price_msat, 1000);
        assert_eq!(resolved.caveats[0].key, "services");
        assert_eq!(resolved.caveats[1].key, "price");
    }

    #[test]
    fn unknown_service_resolves_to_none() {
        let registry = registry_with(service("paid", 1000, vec![]));
        let limiter = ServiceLimiter::new(registry);
        assert!(limiter.resolve("nonexistent").is_none());
    }

    #[test]
    fn includes_capabilities_caveat_when_present() {
        let registry = registry_with(service("paid", 1000, vec!["read".to_string()]));
        let limiter = ServiceLimiter::new(registry);
        let resolved = limiter.resolve("paid").unwrap();
        assert!(resolved.caveats.iter().any(|c| c.key == "capabilities"));
    }
}
