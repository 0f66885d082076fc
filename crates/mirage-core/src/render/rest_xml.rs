//! REST-XML family rendering (S3-style services).

use serde_json::Value;

use super::{xml, RenderedResponse};
use crate::error::ServiceError;
use crate::output::ActionOutput;
use crate::service::ServiceModel;

const CONTENT_TYPE: &str = "application/xml";

pub(super) fn success(
    model: &ServiceModel,
    output: &ActionOutput,
    value: &Value,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    // REST-XML operations name their own root element
    // (`ListAllMyBucketsResult`, `ListBucketResult`, ...).
    let root = output.xml_root.as_deref().ok_or_else(|| {
        ServiceError::internal("REST-XML output is missing its root element name")
    })?;
    let body = xml::to_xml(root, model.xml_namespace, value)?;
    Ok(RenderedResponse::new(output.status(), request_id).with_body(CONTENT_TYPE, body))
}

pub(super) fn error(
    err: &ServiceError,
    request_id: &str,
) -> Result<RenderedResponse, ServiceError> {
    let envelope = serde_json::json!({
        "Code": err.code,
        "Message": err.message,
        "RequestId": request_id,
    });
    let body = xml::to_xml("Error", None, &envelope)?;
    Ok(RenderedResponse::new(err.status(), request_id).with_body(CONTENT_TYPE, body))
}
