//! The normalized, immutable representation of one intercepted call.

use bytes::Bytes;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, Uri};
use serde_json::Value;

use crate::error::ServiceError;
use crate::regions::DEFAULT_ACCOUNT_ID;

/// Header the signing collaborator uses to hand us the caller's account
/// identity. Treated as an opaque string; never verified here.
pub const ACCOUNT_ID_HEADER: &str = "x-mirage-account-id";

/// One intercepted request, constructed once and never mutated.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    host: String,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestDescriptor {
    pub fn new(
        method: Method,
        host: impl Into<String>,
        path: impl Into<String>,
        query: Vec<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            host: host.into(),
            path: path.into(),
            query,
            headers,
            body,
        }
    }

    /// Build a descriptor from a full URI, splitting out host, path and
    /// query string. Convenience for the interception layer and tests.
    pub fn from_parts(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        let host = uri
            .host()
            .map(str::to_owned)
            .or_else(|| {
                headers
                    .get(hyper::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(|h| h.split(':').next().unwrap_or(h).to_owned())
            })
            .unwrap_or_default();
        let path = if uri.path().is_empty() { "/" } else { uri.path() };
        let query = uri
            .query()
            .map(parse_query_string)
            .unwrap_or_default();
        Self::new(method, host, path, query, headers, body)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v: &HeaderValue| v.to_str().ok())
    }

    /// First value of a URL query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Form fields from an `application/x-www-form-urlencoded` body.
    /// Query-protocol services carry `Action` and all parameters here.
    pub fn form_params(&self) -> Vec<(String, String)> {
        match std::str::from_utf8(&self.body) {
            Ok(text) => parse_query_string(text),
            Err(_) => Vec::new(),
        }
    }

    /// Parameter lookup across body form fields and the query string, in
    /// that order. This is how query-protocol parameters are addressed.
    pub fn param(&self, name: &str) -> Option<String> {
        self.form_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.query_param(name).map(str::to_owned))
    }

    /// All form/query parameters whose key starts with the given prefix,
    /// e.g. `InstanceId.1`, `InstanceId.2` for EC2 list members.
    pub fn params_with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .form_params()
            .into_iter()
            .chain(self.query.iter().cloned())
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Decode the body as JSON. Used by the JSON-RPC and REST-JSON
    /// families; an empty body decodes to an empty object.
    pub fn json_body(&self) -> Result<Value, ServiceError> {
        if self.body.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&self.body).map_err(|e| {
            ServiceError::invalid_parameter(
                "SerializationException",
                format!("Invalid JSON in request body: {e}"),
            )
        })
    }

    /// Account identity supplied by the signing collaborator, or the
    /// canonical placeholder.
    pub fn account_id(&self) -> String {
        self.header(ACCOUNT_ID_HEADER)
            .map(str::to_owned)
            .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_owned())
    }
}

/// Parse an URL-encoded key/value string, keeping duplicates and order.
pub fn parse_query_string(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| s.to_owned())
            };
            (decode(k), decode(v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(body: &str) -> RequestDescriptor {
        RequestDescriptor::new(
            Method::POST,
            "ec2.us-east-1.amazonaws.com",
            "/",
            vec![("Version".into(), "2016-11-15".into())],
            HeaderMap::new(),
            Bytes::from(body.to_owned()),
        )
    }

    #[test]
    fn form_params_decode_url_encoding() {
        let req = descriptor("Action=RunInstances&Tag.1.Value=hello+world%21");
        let params = req.form_params();
        assert_eq!(params[0], ("Action".into(), "RunInstances".into()));
        assert_eq!(params[1], ("Tag.1.Value".into(), "hello world!".into()));
    }

    #[test]
    fn param_prefers_body_over_query() {
        let req = descriptor("Action=StopInstances");
        assert_eq!(req.param("Action").as_deref(), Some("StopInstances"));
        assert_eq!(req.param("Version").as_deref(), Some("2016-11-15"));
        assert_eq!(req.param("Missing"), None);
    }

    #[test]
    fn prefixed_params_sort_by_key() {
        let req = descriptor("InstanceId.2=i-b&InstanceId.1=i-a");
        let members = req.params_with_prefix("InstanceId.");
        assert_eq!(members[0].1, "i-a");
        assert_eq!(members[1].1, "i-b");
    }

    #[test]
    fn from_parts_splits_uri() {
        let uri: Uri = "https://s3.us-east-1.amazonaws.com/test-bucket?list-type=2"
            .parse()
            .unwrap();
        let req =
            RequestDescriptor::from_parts(Method::GET, &uri, HeaderMap::new(), Bytes::new());
        assert_eq!(req.host(), "s3.us-east-1.amazonaws.com");
        assert_eq!(req.path(), "/test-bucket");
        assert_eq!(req.query_param("list-type"), Some("2"));
    }

    #[test]
    fn account_defaults_to_placeholder() {
        let req = descriptor("");
        assert_eq!(req.account_id(), DEFAULT_ACCOUNT_ID);

        let mut headers = HeaderMap::new();
        headers.insert(ACCOUNT_ID_HEADER, "111111111111".parse().unwrap());
        let req = RequestDescriptor::new(
            Method::GET,
            "s3.amazonaws.com",
            "/",
            Vec::new(),
            headers,
            Bytes::new(),
        );
        assert_eq!(req.account_id(), "111111111111");
    }

    #[test]
    fn empty_json_body_is_empty_object() {
        let req = descriptor("");
        assert_eq!(req.json_body().unwrap(), serde_json::json!({}));
    }
}
