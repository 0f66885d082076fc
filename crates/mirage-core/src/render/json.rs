//! JSON-family rendering: JSON-RPC (`X-Amz-Target` services) and
//! REST-JSON share the success path; error envelopes differ.

use hyper::StatusCode;
use serde_json::Value;

use super::RenderedResponse;
use crate::error::ServiceError;
use crate::service::ProtocolFamily;

fn content_type(protocol: ProtocolFamily) -> &'static str {
    match protocol {
        ProtocolFamily::JsonRpc => "application/x-amz-json-1.0",
        _ => "application/json",
    }
}

pub(super) fn success(
    protocol: ProtocolFamily,
    value: &Value,
    status: StatusCode,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| ServiceError::internal(format!("JSON serialization failed: {e}")))?;
    Ok(RenderedResponse::new(status, request_id).with_body(content_type(protocol), body))
}

pub(super) fn error(
    protocol: ProtocolFamily,
    err: &ServiceError,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    let (envelope, extra_header) = match protocol {
        // JSON-RPC carries the code in the body's `__type` field.
        ProtocolFamily::JsonRpc => (
            serde_json::json!({ "__type": err.code, "message": err.message }),
            None,
        ),
        // REST-JSON puts the code in a header and only the message in
        // the body.
        _ => (
            serde_json::json!({ "message": err.message }),
            Some(("x-amzn-errortype".to_owned(), err.code.clone())),
        ),
    };
    let body = serde_json::to_vec(&envelope)
        .map_err(|e| ServiceError::internal(format!("JSON serialization failed: {e}")))?;
    let mut rendered =
        RenderedResponse::new(err.status(), request_id).with_body(content_type(protocol), body);
    if let Some(header) = extra_header {
        rendered.headers.push(header);
    }
    Ok(rendered)
}
