//! The backend contract and its per-triple locking cell.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

use crate::error::ServiceError;
use crate::output::ActionOutput;
use crate::request::RequestDescriptor;

/// Everything a backend method needs to know about one call.
pub struct ActionContext<'a> {
    pub operation: &'a str,
    pub request: &'a RequestDescriptor,
    /// Positional parameters extracted from a REST path template.
    pub path_params: &'a HashMap<String, String>,
    pub region: &'a str,
    pub account: &'a str,
}

impl ActionContext<'_> {
    /// Required path parameter; missing means the route table and the
    /// backend disagree, which is a defect.
    pub fn path_param(&self, name: &str) -> Result<&str, ServiceError> {
        self.path_params.get(name).map(String::as_str).ok_or_else(|| {
            ServiceError::internal(format!(
                "operation {} expected path parameter '{name}'",
                self.operation
            ))
        })
    }
}

/// One service's stateful emulation within one (account, region) scope.
///
/// `invoke` takes `&mut self`: every call runs inside the owning
/// [`BackendCell`]'s mutex, which is the per-backend critical section
/// that makes same-triple operations linearizable.
pub trait Backend: Send {
    fn invoke(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError>;
}

/// Identity of one backend: the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey {
    pub service: String,
    pub account: String,
    pub region: String,
}

impl BackendKey {
    pub fn new(
        service: impl Into<String>,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for BackendKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.account, self.region)
    }
}

/// A backend plus its exclusive critical section.
pub struct BackendCell {
    pub key: BackendKey,
    inner: Mutex<Box<dyn Backend>>,
}

impl BackendCell {
    pub fn new(key: BackendKey, backend: Box<dyn Backend>) -> Self {
        Self {
            key,
            inner: Mutex::new(backend),
        }
    }

    /// Enter the backend's critical section.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Backend>> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for BackendCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCell").field("key", &self.key).finish_non_exhaustive()
    }
}
