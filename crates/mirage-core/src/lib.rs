//! Mirage core: the dispatch-and-emulation engine.
//!
//! Mirage emulates the wire-level behavior of cloud-infrastructure APIs
//! so SDK clients can be tested without a live backend. This crate is the
//! engine: it captures an outbound request, resolves the target
//! (service, operation, region, account), routes it to an isolated
//! stateful backend, and renders the outcome in the service's exact wire
//! format. Concrete service backends live in `mirage-services`.
//!
//! Pipeline: [`intercept::Interceptor`] -> [`resolver::ActionResolver`]
//! -> [`registry::BackendRegistry`] -> [`backend::Backend`] ->
//! [`render`].

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod intercept;
pub mod output;
pub mod regions;
pub mod registry;
pub mod render;
pub mod request;
pub mod resolver;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod token;

pub use backend::{ActionContext, Backend, BackendCell, BackendKey};
pub use dispatch::Dispatcher;
pub use error::{ErrorKind, ServiceError};
pub use intercept::{InterceptGuard, Interceptor, MockHttpClient, TransportDisabled};
pub use output::ActionOutput;
pub use regions::{DEFAULT_ACCOUNT_ID, DEFAULT_REGION};
pub use registry::BackendRegistry;
pub use render::{RenderedResponse, REQUEST_ID_HEADER};
pub use request::{RequestDescriptor, ACCOUNT_ID_HEADER};
pub use resolver::{ActionResolver, ResolvedAction};
pub use service::{ProtocolFamily, RouteDef, ServiceCatalog, ServiceModel};
pub use state::{Applied, Transition, TransitionTable};
