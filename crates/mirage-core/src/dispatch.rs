//! The dispatch pipeline: resolve, locate, invoke, render.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::ActionContext;
use crate::error::ServiceError;
use crate::registry::BackendRegistry;
use crate::render::{render_error, render_success, RenderedResponse};
use crate::request::RequestDescriptor;
use crate::resolver::{ActionResolver, ResolvedAction};
use crate::service::{ProtocolFamily, ServiceCatalog, ServiceModel};

/// The complete engine: one of these per emulation scope (usually one
/// per process), constructed explicitly and shared by reference.
pub struct Dispatcher {
    catalog: Arc<ServiceCatalog>,
    resolver: ActionResolver,
    registry: BackendRegistry,
}

impl Dispatcher {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        Self {
            resolver: ActionResolver::new(Arc::clone(&catalog)),
            registry: BackendRegistry::new(Arc::clone(&catalog)),
            catalog,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Discard every backend; used between independent test runs.
    pub fn reset(&self) {
        self.registry.reset_all();
    }

    /// Run one request through the full pipeline and produce the exact
    /// wire response. Every failure mode renders as the target service's
    /// error envelope; nothing escapes unrendered.
    pub fn dispatch(&self, request: &RequestDescriptor) -> RenderedResponse {
        let request_id = uuid::Uuid::new_v4().to_string();

        let resolved = match self.resolver.resolve(request) {
            Ok(resolved) => resolved,
            Err(err) => {
                // No service identified: render in a neutral REST-JSON
                // envelope, or the service's own family when the host
                // told us that much.
                debug!(%err, host = request.host(), "resolution failed");
                let model = self.model_for_host(request.host());
                return render_error(model, &err, &request_id);
            }
        };

        let model = self
            .catalog
            .model(&resolved.service)
            .expect("resolver only produces catalog services");

        match self.invoke(&resolved, request) {
            Ok(output) => {
                match render_success(model, &resolved.operation, &output, &request_id) {
                    Ok(rendered) => rendered,
                    Err(err) => render_error(model, &err, &request_id),
                }
            }
            Err(err) => render_error(model, &err, &request_id),
        }
    }

    fn invoke(
        &self,
        resolved: &ResolvedAction,
        request: &RequestDescriptor,
    ) -> Result<crate::output::ActionOutput, ServiceError> {
        let cell = self.registry.get_backend(
            &resolved.service,
            &resolved.account,
            &resolved.region,
        )?;

        let ctx = ActionContext {
            operation: &resolved.operation,
            request,
            path_params: &resolved.path_params,
            region: &resolved.region,
            account: &resolved.account,
        };

        let mut backend = cell.lock();
        // Backend boundary: a panic inside an operation must surface as
        // Internal/500, never tear down the caller. parking_lot mutexes
        // do not poison, so the next call still goes through.
        let outcome = catch_unwind(AssertUnwindSafe(|| backend.invoke(&ctx)));
        drop(backend);

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(&panic);
                warn!(
                    service = resolved.service,
                    operation = resolved.operation,
                    detail,
                    "backend panicked"
                );
                Err(ServiceError::internal(format!(
                    "The service encountered an internal error while executing {}",
                    resolved.operation
                )))
            }
        }
    }

    /// Best-effort family for rendering pre-dispatch failures.
    fn model_for_host(&self, host: &str) -> &ServiceModel {
        host.split('.')
            .find_map(|label| self.catalog.model(label))
            .unwrap_or(&FALLBACK_MODEL)
    }
}

static FALLBACK_MODEL: ServiceModel = ServiceModel {
    name: "unknown",
    protocol: ProtocolFamily::RestJson,
    xml_namespace: None,
    target_prefix: None,
    routes: Vec::new(),
    global: false,
};

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}
