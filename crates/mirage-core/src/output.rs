//! Success payloads produced by backend operations.

use bytes::Bytes;
use hyper::StatusCode;
use serde_json::Value;

/// Structured result of a successful backend operation.
///
/// The body is an ordered tree (`serde_json` with `preserve_order`):
/// mappings keep insertion order so XML element order is deterministic.
/// Object-payload operations (S3 `GetObject`) bypass the tree and carry
/// raw bytes with their own content type.
#[derive(Debug, Clone)]
pub struct ActionOutput {
    pub(crate) body: OutputBody,
    pub(crate) status: StatusCode,
    /// Root element name for REST-XML rendering (the query family derives
    /// its root from the operation name instead).
    pub(crate) xml_root: Option<String>,
    pub(crate) extra_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub(crate) enum OutputBody {
    Structured(Value),
    Raw { bytes: Bytes, content_type: String },
    Empty,
}

impl ActionOutput {
    /// Structured payload, 200 OK.
    pub fn new(body: Value) -> Self {
        Self {
            body: OutputBody::Structured(body),
            status: StatusCode::OK,
            xml_root: None,
            extra_headers: Vec::new(),
        }
    }

    /// No body at all (204-style and S3 `DeleteObject`).
    pub fn empty() -> Self {
        Self {
            body: OutputBody::Empty,
            status: StatusCode::OK,
            xml_root: None,
            extra_headers: Vec::new(),
        }
    }

    /// Raw byte payload with an explicit content type.
    pub fn raw(bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            body: OutputBody::Raw {
                bytes,
                content_type: content_type.into(),
            },
            status: StatusCode::OK,
            xml_root: None,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Name the XML root element (REST-XML family only).
    pub fn with_xml_root(mut self, root: impl Into<String>) -> Self {
        self.xml_root = Some(root.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The structured body, if any. Raw and empty outputs return `None`.
    pub fn structured(&self) -> Option<&Value> {
        match &self.body {
            OutputBody::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// The raw byte body, if any.
    pub fn raw_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            OutputBody::Raw { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.extra_headers
    }
}
