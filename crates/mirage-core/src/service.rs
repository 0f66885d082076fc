//! Declarative service models and the explicitly-constructed catalog.
//!
//! A [`ServiceModel`] is read-only configuration: protocol family, wire
//! conventions, and (for REST families) the route table mapping HTTP
//! method + path template to an operation name. The [`ServiceCatalog`]
//! pairs each model with a backend factory and is passed by reference to
//! the resolver, registry and dispatcher. No global lookup.

use hyper::Method;
use std::collections::HashMap;

use crate::backend::Backend;
use crate::regions::is_valid_region;

/// Wire-serialization convention a service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    /// Form-encoded request with `Action` parameter, XML response.
    Query,
    /// `X-Amz-Target` header naming the operation, JSON both ways.
    JsonRpc,
    /// Operation inferred from method + path template, JSON bodies.
    RestJson,
    /// Operation inferred from method + path template, XML bodies.
    RestXml,
}

/// One REST route: method + path template -> operation name.
/// Templates use `{param}` segments and `{*param}` catch-alls.
#[derive(Debug, Clone)]
pub struct RouteDef {
    pub method: Method,
    pub template: &'static str,
    pub operation: &'static str,
}

impl RouteDef {
    pub fn new(method: Method, template: &'static str, operation: &'static str) -> Self {
        Self {
            method,
            template,
            operation,
        }
    }
}

/// Read-only description of one emulated service.
#[derive(Debug, Clone)]
pub struct ServiceModel {
    /// Service identifier and endpoint prefix (`ec2`, `s3`, ...).
    pub name: &'static str,
    pub protocol: ProtocolFamily,
    /// XML namespace stamped on response envelopes (Query / REST-XML).
    pub xml_namespace: Option<&'static str>,
    /// `X-Amz-Target` prefix (JSON-RPC only), e.g. `DynamoDB_20120810`.
    pub target_prefix: Option<&'static str>,
    /// Route table (REST families only).
    pub routes: Vec<RouteDef>,
    /// Region-naive services key on the canonical placeholder region.
    pub global: bool,
}

impl ServiceModel {
    /// Is this region acceptable for the service? Global services accept
    /// anything (they are keyed on the placeholder anyway).
    pub fn accepts_region(&self, region: &str) -> bool {
        self.global || is_valid_region(region)
    }
}

type BackendFactory = fn(account: &str, region: &str) -> Box<dyn Backend>;

/// One registered service: its model plus the backend constructor.
pub struct ServiceRegistration {
    pub model: ServiceModel,
    pub make_backend: BackendFactory,
}

/// The set of services this process emulates.
///
/// Constructed once at startup and shared by reference; all routing
/// and backend creation flows through it.
#[derive(Default)]
pub struct ServiceCatalog {
    services: HashMap<&'static str, ServiceRegistration>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ServiceModel, make_backend: BackendFactory) {
        let name = model.name;
        let previous = self.services.insert(
            name,
            ServiceRegistration {
                model,
                make_backend,
            },
        );
        debug_assert!(previous.is_none(), "service '{name}' registered twice");
    }

    pub fn get(&self, service: &str) -> Option<&ServiceRegistration> {
        self.services.get(service)
    }

    pub fn model(&self, service: &str) -> Option<&ServiceModel> {
        self.services.get(service).map(|r| &r.model)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.services.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
