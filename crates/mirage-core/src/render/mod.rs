//! Protocol-exact response rendering.
//!
//! One `render success` / `render error` pair per protocol family behind
//! a single entry point; the family is a closed variant on the service
//! model. Output is plain (status, headers, body) so the interception
//! layer or an external listener can hand it back unchanged.

mod json;
mod query;
mod rest_xml;
pub mod xml;

use bytes::Bytes;
use hyper::StatusCode;
use tracing::error;

use crate::error::ServiceError;
use crate::output::{ActionOutput, OutputBody};
use crate::service::{ProtocolFamily, ServiceModel};

pub const REQUEST_ID_HEADER: &str = "x-amzn-requestid";

/// Wire bytes plus status and headers for one completed dispatch.
#[derive(Debug, Clone)]
pub struct RenderedResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RenderedResponse {
    fn new(status: StatusCode, request_id: &str) -> Self {
        Self {
            status,
            headers: vec![(REQUEST_ID_HEADER.to_owned(), request_id.to_owned())],
            body: Bytes::new(),
        }
    }

    fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers
            .push(("content-type".to_owned(), content_type.to_owned()));
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Render a successful operation result in the service's family.
pub fn render_success(
    model: &ServiceModel,
    operation: &str,
    output: &ActionOutput,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    let mut rendered = match &output.body {
        // Raw payloads (object bodies) bypass family serialization.
        OutputBody::Raw {
            bytes,
            content_type,
        } => RenderedResponse::new(output.status(), request_id)
            .with_body(content_type, bytes.clone()),
        OutputBody::Empty => RenderedResponse::new(output.status(), request_id),
        OutputBody::Structured(value) => match model.protocol {
            ProtocolFamily::Query => {
                query::success(model, operation, value, output.status(), request_id)?
            }
            ProtocolFamily::RestXml => {
                rest_xml::success(model, output, value, request_id)?
            }
            ProtocolFamily::JsonRpc | ProtocolFamily::RestJson => {
                json::success(model.protocol, value, output.status(), request_id)?
            }
        },
    };
    for (name, value) in &output.extra_headers {
        rendered.headers.push((name.clone(), value.clone()));
    }
    Ok(rendered)
}

/// Render a typed failure in the service's family.
///
/// Never fails: the renderer's own serialization failures fall back to
/// a bare-status response rather than propagating.
pub fn render_error(
    model: &ServiceModel,
    err: &ServiceError,
    request_id: &str,
) -> RenderedResponse {
    let result = match model.protocol {
        ProtocolFamily::Query => query::error(err, request_id),
        ProtocolFamily::RestXml => rest_xml::error(err, request_id),
        ProtocolFamily::JsonRpc | ProtocolFamily::RestJson => {
            json::error(model.protocol, err, request_id)
        }
    };
    result.unwrap_or_else(|render_err| {
        error!(%render_err, "error envelope rendering failed");
        RenderedResponse::new(err.status(), request_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ProtocolFamily;
    use serde_json::json;

    fn model(protocol: ProtocolFamily) -> ServiceModel {
        ServiceModel {
            name: "svc",
            protocol,
            xml_namespace: Some("http://svc.amazonaws.com/doc/2020-01-01/"),
            target_prefix: None,
            routes: Vec::new(),
            global: false,
        }
    }

    #[test]
    fn query_success_wraps_operation_response() {
        let out = ActionOutput::new(json!({"instanceId": "i-123"}));
        let rendered =
            render_success(&model(ProtocolFamily::Query), "RunInstances", &out, "req-1")
                .unwrap();
        assert_eq!(rendered.status, StatusCode::OK);
        let body = rendered.body_text();
        assert!(body.contains("<RunInstancesResponse xmlns="));
        assert!(body.contains("<requestId>req-1</requestId>"));
        assert!(body.contains("<instanceId>i-123</instanceId>"));
        assert_eq!(rendered.header(REQUEST_ID_HEADER), Some("req-1"));
    }

    #[test]
    fn query_error_uses_ec2_envelope() {
        let err = ServiceError::not_found("InvalidInstanceID.NotFound", "does not exist")
            .with_status(StatusCode::BAD_REQUEST);
        let rendered = render_error(&model(ProtocolFamily::Query), &err, "req-2");
        assert_eq!(rendered.status, StatusCode::BAD_REQUEST);
        let body = rendered.body_text();
        assert!(body.contains("<Response><Errors><Error>"));
        assert!(body.contains("<Code>InvalidInstanceID.NotFound</Code>"));
        assert!(body.contains("<RequestID>req-2</RequestID>"));
    }

    #[test]
    fn rest_xml_error_envelope() {
        let err = ServiceError::not_found("NoSuchBucket", "The specified bucket does not exist");
        let rendered = render_error(&model(ProtocolFamily::RestXml), &err, "req-3");
        assert_eq!(rendered.status, StatusCode::NOT_FOUND);
        let body = rendered.body_text();
        assert!(body.contains("<Error><Code>NoSuchBucket</Code>"));
        assert!(body.contains("<Message>The specified bucket does not exist</Message>"));
    }

    #[test]
    fn json_rpc_error_uses_dunder_type() {
        let err = ServiceError::not_found("ResourceNotFoundException", "Requested resource not found")
            .with_status(StatusCode::BAD_REQUEST);
        let rendered = render_error(&model(ProtocolFamily::JsonRpc), &err, "req-4");
        assert_eq!(rendered.status, StatusCode::BAD_REQUEST);
        let parsed: serde_json::Value = serde_json::from_slice(&rendered.body).unwrap();
        assert_eq!(parsed["__type"], "ResourceNotFoundException");
        assert_eq!(parsed["message"], "Requested resource not found");
    }

    #[test]
    fn rest_json_error_sets_error_type_header() {
        let err = ServiceError::not_found("NotFoundException", "Invalid REST API identifier specified");
        let rendered = render_error(&model(ProtocolFamily::RestJson), &err, "req-5");
        assert_eq!(rendered.status, StatusCode::NOT_FOUND);
        assert_eq!(rendered.header("x-amzn-errortype"), Some("NotFoundException"));
        let parsed: serde_json::Value = serde_json::from_slice(&rendered.body).unwrap();
        assert_eq!(parsed["message"], "Invalid REST API identifier specified");
    }

    #[test]
    fn same_logical_error_renders_per_family() {
        let err = ServiceError::not_found("ResourceNotFoundException", "gone");
        let xml = render_error(&model(ProtocolFamily::Query), &err, "r");
        let json = render_error(&model(ProtocolFamily::JsonRpc), &err, "r");
        assert!(xml.body_text().contains("ResourceNotFoundException"));
        assert!(json.body_text().contains("ResourceNotFoundException"));
    }

    #[test]
    fn raw_output_passes_through() {
        let out = ActionOutput::raw(Bytes::from_static(b"hello"), "application/octet-stream");
        let rendered =
            render_success(&model(ProtocolFamily::RestXml), "GetObject", &out, "req-6").unwrap();
        assert_eq!(&rendered.body[..], b"hello");
        assert_eq!(rendered.header("content-type"), Some("application/octet-stream"));
    }

    #[test]
    fn rest_json_success_created_status() {
        let out = ActionOutput::new(json!({"id": "abc"})).with_status(StatusCode::CREATED);
        let rendered =
            render_success(&model(ProtocolFamily::RestJson), "CreateRestApi", &out, "req-7")
                .unwrap();
        assert_eq!(rendered.status, StatusCode::CREATED);
        let parsed: serde_json::Value = serde_json::from_slice(&rendered.body).unwrap();
        assert_eq!(parsed["id"], "abc");
    }
}
