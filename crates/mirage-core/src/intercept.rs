//! Interception layer: the in-process stand-in for the real transport.
//!
//! Activation is reference-counted so nested scoped activations compose:
//! each [`Interceptor::activate`] call returns a guard, and the transport
//! only deactivates when the last guard drops. While active,
//! [`MockHttpClient`] short-circuits every outbound call into the
//! dispatcher and hands back the rendered bytes as a synthetic HTTP
//! response; no network I/O ever happens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::{ready, Ready};
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response};
use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::request::RequestDescriptor;

/// Raised by the mock transport when emulation is not active: the
/// deactivated transport refuses rather than silently reaching the
/// network it replaced.
#[derive(Debug, thiserror::Error)]
#[error("mirage interception is not active; outbound call to {host} refused")]
pub struct TransportDisabled {
    pub host: String,
}

/// Shared activation state plus the engine it forwards to.
pub struct Interceptor {
    dispatcher: Arc<Dispatcher>,
    active: AtomicUsize,
}

impl Interceptor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            active: AtomicUsize::new(0),
        })
    }

    /// Enable interception for the guard's lifetime. Nested activations
    /// stack; the transport stays installed until every guard is gone.
    pub fn activate(self: &Arc<Self>) -> InterceptGuard {
        let depth = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(depth, "interception activated");
        InterceptGuard {
            interceptor: Arc::clone(self),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Synchronous entry: capture, dispatch, synthesize.
    pub fn handle(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Full<Bytes>>, TransportDisabled> {
        let (parts, body) = request.into_parts();
        let host = parts.uri.host().unwrap_or_default().to_owned();
        if !self.is_active() {
            return Err(TransportDisabled { host });
        }

        let bytes = body_bytes(body);
        let descriptor =
            RequestDescriptor::from_parts(parts.method, &parts.uri, parts.headers, bytes);
        let rendered = self.dispatcher.dispatch(&descriptor);

        let mut builder = Response::builder().status(rendered.status);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &rendered.headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.append(name, value);
                }
            }
        }
        let response = builder
            .body(Full::new(rendered.body))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
        Ok(response)
    }

    fn deactivate(&self) {
        let depth = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(depth, "interception deactivated");
    }
}

/// Keeps interception active while it lives.
pub struct InterceptGuard {
    interceptor: Arc<Interceptor>,
}

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        self.interceptor.deactivate();
    }
}

/// The transport clients plug in where their HTTP connector would go.
///
/// `tower::Service` is the seam: the whole pipeline is in-memory and
/// CPU-bound, so `call` completes immediately with a ready future.
#[derive(Clone)]
pub struct MockHttpClient {
    interceptor: Arc<Interceptor>,
}

impl MockHttpClient {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl tower::Service<Request<Full<Bytes>>> for MockHttpClient {
    type Response = Response<Full<Bytes>>;
    type Error = TransportDisabled;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Full<Bytes>>) -> Self::Future {
        ready(self.interceptor.handle(request))
    }
}

/// A `Full` body is a single frame; pull it out without a runtime.
fn body_bytes(body: Full<Bytes>) -> Bytes {
    use hyper::body::Body;
    let mut body = body;
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    match std::pin::Pin::new(&mut body).poll_frame(&mut cx) {
        Poll::Ready(Some(Ok(frame))) => frame.into_data().unwrap_or_default(),
        _ => Bytes::new(),
    }
}
