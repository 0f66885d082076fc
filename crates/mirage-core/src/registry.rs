//! Backend registry: (service, account, region) -> backend instance.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{BackendCell, BackendKey};
use crate::error::ServiceError;
use crate::regions::{DEFAULT_ACCOUNT_ID, DEFAULT_REGION};
use crate::service::ServiceCatalog;

/// Keyed store of live backends, created lazily on first access.
///
/// Exactly one backend exists per triple at any time: creation happens
/// under the map write lock, so concurrent first callers for a new triple
/// converge on one instance. `reset_all` discards every backend after
/// serializing against in-flight critical sections.
pub struct BackendRegistry {
    catalog: Arc<ServiceCatalog>,
    backends: RwLock<HashMap<BackendKey, Arc<BackendCell>>>,
}

impl BackendRegistry {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        Self {
            catalog,
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Existing backend for the triple, or a freshly created empty one.
    ///
    /// The region is validated against the service model first; an
    /// unknown region never creates a backend. Global services are keyed
    /// on the canonical placeholders so lookups stay uniform.
    pub fn get_backend(
        &self,
        service: &str,
        account: &str,
        region: &str,
    ) -> Result<Arc<BackendCell>, ServiceError> {
        let registration = self.catalog.get(service).ok_or_else(|| {
            ServiceError::unrecognized_operation(format!("Unknown service: {service}"))
        })?;

        if !registration.model.accepts_region(region) {
            return Err(ServiceError::region_not_found(region, service));
        }

        let key = if registration.model.global {
            BackendKey::new(service, DEFAULT_ACCOUNT_ID, DEFAULT_REGION)
        } else {
            BackendKey::new(service, account, region)
        };

        if let Some(cell) = self.backends.read().get(&key) {
            return Ok(Arc::clone(cell));
        }

        // First access for this triple. The write lock makes creation
        // atomic per key; a racing caller finds the entry already there.
        let mut backends = self.backends.write();
        let cell = backends
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(%key, "creating backend");
                Arc::new(BackendCell::new(
                    key.clone(),
                    (registration.make_backend)(&key.account, &key.region),
                ))
            });
        Ok(Arc::clone(cell))
    }

    /// Discard every backend, restoring the initial empty state.
    ///
    /// Stop-the-world relative to in-flight operations: each backend's
    /// mutex is acquired before the map is cleared, so an active critical
    /// section finishes before its backend is dropped.
    pub fn reset_all(&self) {
        let mut backends = self.backends.write();
        for cell in backends.values() {
            drop(cell.lock());
        }
        let count = backends.len();
        backends.clear();
        info!(discarded = count, "registry reset");
    }

    pub fn count(&self) -> usize {
        self.backends.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ActionContext, Backend};
    use crate::output::ActionOutput;
    use crate::service::{ProtocolFamily, ServiceModel};

    struct Counter {
        calls: u64,
    }

    impl Backend for Counter {
        fn invoke(&mut self, _ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
            self.calls += 1;
            Ok(ActionOutput::new(serde_json::json!({"calls": self.calls})))
        }
    }

    fn registry() -> BackendRegistry {
        let mut catalog = ServiceCatalog::new();
        catalog.register(
            ServiceModel {
                name: "svc",
                protocol: ProtocolFamily::RestJson,
                xml_namespace: None,
                target_prefix: None,
                routes: Vec::new(),
                global: false,
            },
            |_, _| Box::new(Counter { calls: 0 }),
        );
        BackendRegistry::new(Arc::new(catalog))
    }

    #[test]
    fn same_triple_returns_same_instance() {
        let registry = registry();
        let a = registry.get_backend("svc", "111111111111", "us-east-1").unwrap();
        let b = registry.get_backend("svc", "111111111111", "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn different_triples_are_independent() {
        let registry = registry();
        let a = registry.get_backend("svc", "111111111111", "us-east-1").unwrap();
        let b = registry.get_backend("svc", "111111111111", "us-west-2").unwrap();
        let c = registry.get_backend("svc", "222222222222", "us-east-1").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn unknown_region_never_creates_a_backend() {
        let registry = registry();
        let err = registry
            .get_backend("svc", "111111111111", "mars-north-1")
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::RegionNotFound);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn reset_restores_empty_state() {
        let registry = registry();
        registry.get_backend("svc", "111111111111", "us-east-1").unwrap();
        assert_eq!(registry.count(), 1);
        registry.reset_all();
        assert_eq!(registry.count(), 0);

        // A new lookup creates a fresh, empty backend.
        let cell = registry.get_backend("svc", "111111111111", "us-east-1").unwrap();
        assert_eq!(registry.count(), 1);
        drop(cell);
    }

    #[test]
    fn concurrent_first_access_converges() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.get_backend("svc", "111111111111", "eu-west-1").unwrap()
            }));
        }
        let cells: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for cell in &cells[1..] {
            assert!(Arc::ptr_eq(&cells[0], cell));
        }
        assert_eq!(registry.count(), 1);
    }
}
