//! Query-family rendering: XML envelope over a form-encoded request.
//!
//! Success is `<{Operation}Response xmlns=…>` with `requestId` leading
//! the payload fields. Errors use the EC2 envelope (the only query-family
//! service registered); see DESIGN.md for the recorded decision.

use hyper::StatusCode;
use serde_json::{Map, Value};

use super::{xml, RenderedResponse};
use crate::error::ServiceError;
use crate::service::ServiceModel;

const CONTENT_TYPE: &str = "text/xml;charset=UTF-8";

pub(super) fn success(
    model: &ServiceModel,
    operation: &str,
    value: &Value,
    status: StatusCode,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    let root = format!("{operation}Response");

    // requestId leads; preserve_order keeps it there.
    let mut envelope = Map::new();
    envelope.insert("requestId".to_owned(), Value::String(request_id.to_owned()));
    if let Value::Object(fields) = value {
        for (k, v) in fields {
            envelope.insert(k.clone(), v.clone());
        }
    }

    let body = xml::to_xml(&root, model.xml_namespace, &Value::Object(envelope))?;
    Ok(RenderedResponse::new(status, request_id).with_body(CONTENT_TYPE, body))
}

pub(super) fn error(
    err: &ServiceError,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    let envelope = serde_json::json!({
        "Errors": {
            "Error": {
                "Code": err.code,
                "Message": err.message,
            }
        },
        "RequestID": request_id,
    });
    let body = xml::to_xml("Response", None, &envelope)?;
    Ok(RenderedResponse::new(err.status(), request_id).with_body(CONTENT_TYPE, body))
}
