//! Maps one request descriptor to (service, operation, region, account).

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use hyper::Method;

use crate::error::ServiceError;
use crate::regions::{looks_like_region, DEFAULT_REGION};
use crate::request::RequestDescriptor;
use crate::service::{ProtocolFamily, ServiceCatalog};

/// The resolver's verdict for one request.
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    pub service: String,
    pub operation: String,
    pub region: String,
    pub account: String,
    pub path_params: HashMap<String, String>,
}

/// Resolves requests against the catalog's service models.
///
/// REST route tables are compiled once into `matchit` routers, which give
/// deterministic most-specific matching (static segments beat parameters,
/// parameters beat catch-alls).
pub struct ActionResolver {
    catalog: Arc<ServiceCatalog>,
    rest_routers: HashMap<(&'static str, Method), matchit::Router<&'static str>>,
}

impl ActionResolver {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        let mut rest_routers: HashMap<(&'static str, Method), matchit::Router<&'static str>> =
            HashMap::new();
        for name in catalog.service_names().collect::<Vec<_>>() {
            let model = catalog.model(name).expect("name came from the catalog");
            if !matches!(
                model.protocol,
                ProtocolFamily::RestJson | ProtocolFamily::RestXml
            ) {
                continue;
            }
            for route in &model.routes {
                let router = rest_routers
                    .entry((model.name, route.method.clone()))
                    .or_default();
                router
                    .insert(route.template, route.operation)
                    .unwrap_or_else(|e| {
                        panic!(
                            "invalid route template {}/{} {}: {e}",
                            model.name, route.method, route.template
                        )
                    });
            }
        }
        Self {
            catalog,
            rest_routers,
        }
    }

    /// Identify the target of one request, or fail with
    /// `UnrecognizedOperation` before any backend is touched.
    pub fn resolve(&self, request: &RequestDescriptor) -> Result<ResolvedAction, ServiceError> {
        let service = self.service_from_host(request.host()).ok_or_else(|| {
            ServiceError::unrecognized_operation(format!(
                "No emulated service matches host '{}'",
                request.host()
            ))
        })?;
        let model = self
            .catalog
            .model(service)
            .expect("service_from_host only returns catalog entries");

        let region = region_from_host(request.host())
            .or_else(|| request.param("Region"))
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());
        let account = request.account_id();

        let (operation, path_params) = match model.protocol {
            ProtocolFamily::Query => (self.resolve_query(request)?, HashMap::new()),
            ProtocolFamily::JsonRpc => (self.resolve_json_rpc(model.target_prefix, request)?, HashMap::new()),
            ProtocolFamily::RestJson | ProtocolFamily::RestXml => {
                self.resolve_rest(model.name, request)?
            }
        };

        debug!(service, operation, %region, %account, "resolved action");
        Ok(ResolvedAction {
            service: service.to_owned(),
            operation,
            region,
            account,
            path_params,
        })
    }

    /// The endpoint prefix is the first host label that names a service
    /// in the catalog (`ec2.us-east-1.amazonaws.com` -> `ec2`; S3
    /// virtual-host addressing puts the bucket first, so any label may
    /// carry the prefix).
    fn service_from_host(&self, host: &str) -> Option<&'static str> {
        for label in host.split('.') {
            if let Some(model) = self.catalog.model(label) {
                return Some(model.name);
            }
        }
        None
    }

    fn resolve_query(&self, request: &RequestDescriptor) -> Result<String, ServiceError> {
        request.param("Action").ok_or_else(|| {
            ServiceError::unrecognized_operation("Missing 'Action' parameter in query request")
        })
    }

    fn resolve_json_rpc(
        &self,
        target_prefix: Option<&str>,
        request: &RequestDescriptor,
    ) -> Result<String, ServiceError> {
        let target = request.header("x-amz-target").ok_or_else(|| {
            ServiceError::unrecognized_operation("Missing X-Amz-Target header")
        })?;
        let (prefix, operation) = target.split_once('.').ok_or_else(|| {
            ServiceError::unrecognized_operation(format!("Malformed X-Amz-Target '{target}'"))
        })?;
        if let Some(expected) = target_prefix {
            if prefix != expected {
                return Err(ServiceError::unrecognized_operation(format!(
                    "Unexpected target prefix '{prefix}'"
                )));
            }
        }
        Ok(operation.to_owned())
    }

    fn resolve_rest(
        &self,
        service: &'static str,
        request: &RequestDescriptor,
    ) -> Result<(String, HashMap<String, String>), ServiceError> {
        // HEAD falls back to the GET table when no HEAD route exists,
        // mirroring how the real REST services treat it.
        let methods = if request.method() == Method::HEAD {
            vec![Method::HEAD, Method::GET]
        } else {
            vec![request.method().clone()]
        };
        for method in methods {
            let Some(router) = self.rest_routers.get(&(service, method)) else {
                continue;
            };
            if let Ok(matched) = router.at(request.path()) {
                let params: HashMap<String, String> = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return Ok(((*matched.value).to_owned(), params));
            }
        }
        Err(ServiceError::unrecognized_operation(format!(
            "No operation matches {} {} on service '{service}'",
            request.method(),
            request.path()
        )))
    }
}

/// Region from a subdomain label when the endpoint encodes it there.
fn region_from_host(host: &str) -> Option<String> {
    host.split('.')
        .find(|label| looks_like_region(label))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ActionContext, Backend};
    use crate::output::ActionOutput;
    use crate::service::{RouteDef, ServiceModel};
    use bytes::Bytes;
    use hyper::HeaderMap;

    struct NullBackend;

    impl Backend for NullBackend {
        fn invoke(&mut self, _ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
            Ok(ActionOutput::empty())
        }
    }

    fn resolver() -> ActionResolver {
        let mut catalog = ServiceCatalog::new();
        catalog.register(
            ServiceModel {
                name: "ec2",
                protocol: ProtocolFamily::Query,
                xml_namespace: Some("http://ec2.amazonaws.com/doc/2016-11-15/"),
                target_prefix: None,
                routes: Vec::new(),
                global: false,
            },
            |_, _| Box::new(NullBackend),
        );
        catalog.register(
            ServiceModel {
                name: "dynamodb",
                protocol: ProtocolFamily::JsonRpc,
                xml_namespace: None,
                target_prefix: Some("DynamoDB_20120810"),
                routes: Vec::new(),
                global: false,
            },
            |_, _| Box::new(NullBackend),
        );
        catalog.register(
            ServiceModel {
                name: "apigateway",
                protocol: ProtocolFamily::RestJson,
                xml_namespace: None,
                target_prefix: None,
                routes: vec![
                    RouteDef::new(Method::GET, "/restapis", "GetRestApis"),
                    RouteDef::new(Method::GET, "/restapis/{api_id}", "GetRestApi"),
                    RouteDef::new(
                        Method::GET,
                        "/restapis/{api_id}/resources",
                        "GetResources",
                    ),
                ],
                global: false,
            },
            |_, _| Box::new(NullBackend),
        );
        ActionResolver::new(Arc::new(catalog))
    }

    fn get(host: &str, path: &str) -> RequestDescriptor {
        RequestDescriptor::new(
            Method::GET,
            host,
            path,
            Vec::new(),
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    #[test]
    fn query_action_parameter() {
        let req = RequestDescriptor::new(
            Method::POST,
            "ec2.eu-west-1.amazonaws.com",
            "/",
            Vec::new(),
            HeaderMap::new(),
            Bytes::from_static(b"Action=DescribeInstances&Version=2016-11-15"),
        );
        let resolved = resolver().resolve(&req).unwrap();
        assert_eq!(resolved.service, "ec2");
        assert_eq!(resolved.operation, "DescribeInstances");
        assert_eq!(resolved.region, "eu-west-1");
    }

    #[test]
    fn json_rpc_target_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-target", "DynamoDB_20120810.CreateTable".parse().unwrap());
        let req = RequestDescriptor::new(
            Method::POST,
            "dynamodb.us-west-2.amazonaws.com",
            "/",
            Vec::new(),
            headers,
            Bytes::from_static(b"{}"),
        );
        let resolved = resolver().resolve(&req).unwrap();
        assert_eq!(resolved.operation, "CreateTable");
        assert_eq!(resolved.region, "us-west-2");
    }

    #[test]
    fn json_rpc_wrong_prefix_is_unrecognized() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-target", "Kinesis_20131202.PutRecord".parse().unwrap());
        let req = RequestDescriptor::new(
            Method::POST,
            "dynamodb.us-west-2.amazonaws.com",
            "/",
            Vec::new(),
            headers,
            Bytes::new(),
        );
        let err = resolver().resolve(&req).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnrecognizedOperation);
    }

    #[test]
    fn rest_template_specificity() {
        let r = resolver();
        // Literal segment wins over the parameterized sibling.
        let resolved = r
            .resolve(&get("apigateway.us-east-1.amazonaws.com", "/restapis"))
            .unwrap();
        assert_eq!(resolved.operation, "GetRestApis");

        let resolved = r
            .resolve(&get("apigateway.us-east-1.amazonaws.com", "/restapis/abc123"))
            .unwrap();
        assert_eq!(resolved.operation, "GetRestApi");
        assert_eq!(resolved.path_params["api_id"], "abc123");

        let resolved = r
            .resolve(&get(
                "apigateway.us-east-1.amazonaws.com",
                "/restapis/abc123/resources",
            ))
            .unwrap();
        assert_eq!(resolved.operation, "GetResources");
    }

    #[test]
    fn unknown_path_is_unrecognized() {
        let err = resolver()
            .resolve(&get("apigateway.us-east-1.amazonaws.com", "/nonsense"))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnrecognizedOperation);
    }

    #[test]
    fn unknown_host_is_unrecognized() {
        let err = resolver()
            .resolve(&get("example.com", "/"))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnrecognizedOperation);
    }

    #[test]
    fn region_defaults_when_host_has_none() {
        let req = RequestDescriptor::new(
            Method::POST,
            "ec2.amazonaws.com",
            "/",
            Vec::new(),
            HeaderMap::new(),
            Bytes::from_static(b"Action=DescribeInstances"),
        );
        let resolved = resolver().resolve(&req).unwrap();
        assert_eq!(resolved.region, DEFAULT_REGION);
    }
}
