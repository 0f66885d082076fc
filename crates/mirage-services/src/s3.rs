//! S3 emulation: a global bucket namespace with raw object payloads.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use hyper::{Method, StatusCode};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use mirage_core::{
    token, ActionContext, ActionOutput, Backend, ProtocolFamily, RouteDef, ServiceCatalog,
    ServiceError, ServiceModel, DEFAULT_REGION,
};

const XML_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

static BUCKET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").unwrap());

pub fn model() -> ServiceModel {
    ServiceModel {
        name: "s3",
        protocol: ProtocolFamily::RestXml,
        xml_namespace: Some(XML_NAMESPACE),
        target_prefix: None,
        routes: vec![
            RouteDef::new(Method::GET, "/", "ListBuckets"),
            RouteDef::new(Method::PUT, "/{bucket}", "CreateBucket"),
            RouteDef::new(Method::DELETE, "/{bucket}", "DeleteBucket"),
            RouteDef::new(Method::HEAD, "/{bucket}", "HeadBucket"),
            RouteDef::new(Method::GET, "/{bucket}", "ListObjects"),
            RouteDef::new(Method::PUT, "/{bucket}/{*key}", "PutObject"),
            RouteDef::new(Method::GET, "/{bucket}/{*key}", "GetObject"),
            RouteDef::new(Method::HEAD, "/{bucket}/{*key}", "HeadObject"),
            RouteDef::new(Method::DELETE, "/{bucket}/{*key}", "DeleteObject"),
        ],
        global: true,
    }
}

pub fn register(catalog: &mut ServiceCatalog) {
    catalog.register(model(), |account, _region| {
        Box::new(S3Backend::new(account))
    });
}

struct ObjectBlob {
    body: Bytes,
    etag: String,
    content_type: String,
    last_modified: DateTime<Utc>,
}

struct Bucket {
    region: String,
    creation_date: DateTime<Utc>,
    /// Keyed by object key; BTreeMap gives the lexicographic listing
    /// order the wire contract promises.
    objects: BTreeMap<String, ObjectBlob>,
}

/// The single global S3 scope for one account.
pub struct S3Backend {
    account: String,
    buckets: BTreeMap<String, Bucket>,
}

impl Backend for S3Backend {
    fn invoke(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        match ctx.operation {
            "ListBuckets" => self.list_buckets(),
            "CreateBucket" => self.create_bucket(ctx),
            "DeleteBucket" => self.delete_bucket(ctx),
            "HeadBucket" => self.head_bucket(ctx),
            "ListObjects" => self.list_objects(ctx),
            "PutObject" => self.put_object(ctx),
            "GetObject" => self.get_object(ctx),
            "HeadObject" => self.head_object(ctx),
            "DeleteObject" => self.delete_object(ctx),
            other => Err(ServiceError::unrecognized_operation(format!(
                "Unknown operation '{other}'"
            ))),
        }
    }
}

impl S3Backend {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_owned(),
            buckets: BTreeMap::new(),
        }
    }

    fn list_buckets(&mut self) -> Result<ActionOutput, ServiceError> {
        let buckets: Vec<Value> = self
            .buckets
            .iter()
            .map(|(name, bucket)| {
                json!({
                    "Name": name,
                    "CreationDate": timestamp(bucket.creation_date),
                })
            })
            .collect();
        Ok(ActionOutput::new(json!({
            "Owner": { "ID": self.account, "DisplayName": self.account },
            "Buckets": { "Bucket": buckets },
        }))
        .with_xml_root("ListAllMyBucketsResult"))
    }

    fn create_bucket(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let name = ctx.path_param("bucket")?;
        if !BUCKET_NAME.is_match(name) {
            return Err(ServiceError::invalid_parameter(
                "InvalidBucketName",
                "The specified bucket is not valid.",
            ));
        }
        let region = location_constraint(ctx.request.body())?
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());

        if let Some(existing) = self.buckets.get(name) {
            // Recreating in us-east-1 is a documented no-op success;
            // anywhere else it is a 409.
            if existing.region == DEFAULT_REGION && region == DEFAULT_REGION {
                return Ok(ActionOutput::empty()
                    .with_header("Location", format!("/{name}")));
            }
            return Err(ServiceError::already_exists(
                "BucketAlreadyOwnedByYou",
                "Your previous request to create the named bucket succeeded and you already own it.",
            ));
        }

        debug!(bucket = name, %region, "created bucket");
        self.buckets.insert(
            name.to_owned(),
            Bucket {
                region,
                creation_date: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        Ok(ActionOutput::empty().with_header("Location", format!("/{name}")))
    }

    fn delete_bucket(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let name = ctx.path_param("bucket")?;
        let bucket = self.bucket(name)?;
        if !bucket.objects.is_empty() {
            return Err(ServiceError::invalid_state(
                "BucketNotEmpty",
                "The bucket you tried to delete is not empty",
            )
            .with_status(StatusCode::CONFLICT));
        }
        self.buckets.remove(name);
        Ok(ActionOutput::empty().with_status(StatusCode::NO_CONTENT))
    }

    fn head_bucket(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let name = ctx.path_param("bucket")?;
        self.bucket(name)?;
        Ok(ActionOutput::empty())
    }

    fn list_objects(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let name = ctx.path_param("bucket")?;
        let prefix = ctx
            .request
            .query_param("prefix")
            .unwrap_or("")
            .to_owned();
        let max_keys = ctx
            .request
            .query_param("max-keys")
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    ServiceError::invalid_parameter(
                        "InvalidArgument",
                        "Argument max-keys must be an integer between 0 and 2147483647",
                    )
                })
            })
            .transpose()?;
        let continuation = ctx
            .request
            .query_param("continuation-token")
            .map(str::to_owned);

        let bucket = self.bucket(name)?;
        let keys: Vec<&String> = bucket
            .objects
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .collect();
        let scope = format!("s3/{name}/ListObjects");
        let page = token::paginate(
            &keys,
            max_keys,
            continuation.as_deref(),
            &scope,
            "InvalidArgument",
        )?;

        let contents: Vec<Value> = page
            .items
            .iter()
            .map(|key| {
                let blob = &bucket.objects[key.as_str()];
                json!({
                    "Key": key,
                    "LastModified": timestamp(blob.last_modified),
                    "ETag": format!("\"{}\"", blob.etag),
                    "Size": blob.body.len(),
                    "StorageClass": "STANDARD",
                })
            })
            .collect();

        Ok(ActionOutput::new(json!({
            "Name": name,
            "Prefix": prefix,
            "KeyCount": contents.len(),
            "IsTruncated": page.next_token.is_some(),
            "NextContinuationToken": page.next_token,
            "Contents": contents,
        }))
        .with_xml_root("ListBucketResult"))
    }

    fn put_object(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let name = ctx.path_param("bucket")?.to_owned();
        let key = ctx.path_param("key")?.to_owned();
        self.bucket(&name)?;

        let body = ctx.request.body().clone();
        let etag = crate::ids::content_etag(&body);
        let content_type = ctx
            .request
            .header("content-type")
            .unwrap_or("binary/octet-stream")
            .to_owned();
        let blob = ObjectBlob {
            body,
            etag: etag.clone(),
            content_type,
            last_modified: Utc::now(),
        };
        // Last write wins, including overwrites of an existing key.
        if let Some(bucket) = self.buckets.get_mut(&name) {
            bucket.objects.insert(key, blob);
        }
        Ok(ActionOutput::empty().with_header("ETag", format!("\"{etag}\"")))
    }

    fn get_object(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let (name, key) = (ctx.path_param("bucket")?, ctx.path_param("key")?);
        let blob = self.object(name, key)?;
        Ok(ActionOutput::raw(blob.body.clone(), blob.content_type.clone())
            .with_header("ETag", format!("\"{}\"", blob.etag))
            .with_header("Last-Modified", blob.last_modified.to_rfc2822()))
    }

    fn head_object(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let (name, key) = (ctx.path_param("bucket")?, ctx.path_param("key")?);
        let blob = self.object(name, key)?;
        Ok(ActionOutput::empty()
            .with_header("ETag", format!("\"{}\"", blob.etag))
            .with_header("Content-Type", blob.content_type.clone())
            .with_header("Content-Length", blob.body.len().to_string()))
    }

    fn delete_object(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let name = ctx.path_param("bucket")?.to_owned();
        let key = ctx.path_param("key")?;
        self.bucket(&name)?;
        // Deleting an absent key still succeeds; S3 deletes are
        // idempotent at the wire level.
        if let Some(bucket) = self.buckets.get_mut(&name) {
            bucket.objects.remove(key);
        }
        Ok(ActionOutput::empty().with_status(StatusCode::NO_CONTENT))
    }

    fn bucket(&self, name: &str) -> Result<&Bucket, ServiceError> {
        self.buckets.get(name).ok_or_else(|| {
            ServiceError::not_found("NoSuchBucket", "The specified bucket does not exist")
        })
    }

    fn object(&self, bucket: &str, key: &str) -> Result<&ObjectBlob, ServiceError> {
        self.bucket(bucket)?.objects.get(key).ok_or_else(|| {
            ServiceError::not_found("NoSuchKey", "The specified key does not exist.")
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Extract `<LocationConstraint>` from a CreateBucket body, if present.
fn location_constraint(body: &Bytes) -> Result<Option<String>, ServiceError> {
    if body.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(body).map_err(|_| {
        ServiceError::invalid_parameter("MalformedXML", "The XML you provided was not well-formed")
    })?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"LocationConstraint" => inside = true,
            Ok(Event::Text(t)) if inside => {
                let value = t.unescape().map_err(|_| {
                    ServiceError::invalid_parameter(
                        "MalformedXML",
                        "The XML you provided was not well-formed",
                    )
                })?;
                return Ok(Some(value.into_owned()));
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"LocationConstraint" => inside = false,
            Ok(Event::Eof) => return Ok(None),
            Err(_) => {
                return Err(ServiceError::invalid_parameter(
                    "MalformedXML",
                    "The XML you provided was not well-formed",
                ))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::HeaderMap;
    use std::collections::HashMap;

    fn invoke(
        backend: &mut S3Backend,
        operation: &'static str,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Bytes,
    ) -> Result<ActionOutput, ServiceError> {
        let req = mirage_core::RequestDescriptor::new(
            method,
            "s3.amazonaws.com",
            path,
            Vec::new(),
            HeaderMap::new(),
            body,
        );
        let mut path_params = HashMap::new();
        for (k, v) in params {
            path_params.insert((*k).to_owned(), (*v).to_owned());
        }
        let ctx = ActionContext {
            operation,
            request: &req,
            path_params: &path_params,
            region: "us-east-1",
            account: "123456789012",
        };
        backend.invoke(&ctx)
    }

    fn create_bucket(backend: &mut S3Backend, name: &str) {
        invoke(
            backend,
            "CreateBucket",
            Method::PUT,
            &format!("/{name}"),
            &[("bucket", name)],
            Bytes::new(),
        )
        .unwrap();
    }

    #[test]
    fn bucket_lifecycle() {
        let mut backend = S3Backend::new("123456789012");
        create_bucket(&mut backend, "test-bucket");

        let out = invoke(
            &mut backend,
            "ListBuckets",
            Method::GET,
            "/",
            &[],
            Bytes::new(),
        )
        .unwrap();
        let names = &out.structured().unwrap()["Buckets"]["Bucket"];
        assert_eq!(names.as_array().unwrap().len(), 1);
        assert_eq!(names[0]["Name"], "test-bucket");

        invoke(
            &mut backend,
            "DeleteBucket",
            Method::DELETE,
            "/test-bucket",
            &[("bucket", "test-bucket")],
            Bytes::new(),
        )
        .unwrap();

        let err = invoke(
            &mut backend,
            "HeadBucket",
            Method::HEAD,
            "/test-bucket",
            &[("bucket", "test-bucket")],
            Bytes::new(),
        )
        .unwrap_err();
        assert_eq!(err.code, "NoSuchBucket");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_bucket_name_rejected() {
        let mut backend = S3Backend::new("123456789012");
        let err = invoke(
            &mut backend,
            "CreateBucket",
            Method::PUT,
            "/UPPER",
            &[("bucket", "UPPER")],
            Bytes::new(),
        )
        .unwrap_err();
        assert_eq!(err.code, "InvalidBucketName");
    }

    #[test]
    fn recreate_in_default_region_is_idempotent() {
        let mut backend = S3Backend::new("123456789012");
        create_bucket(&mut backend, "twice");
        create_bucket(&mut backend, "twice");
    }

    #[test]
    fn location_constraint_parses_indented_bodies() {
        let body = Bytes::from_static(
            b"<CreateBucketConfiguration>\n  <LocationConstraint>\n    ap-southeast-2\n  </LocationConstraint>\n</CreateBucketConfiguration>",
        );
        let region = location_constraint(&body).unwrap();
        assert_eq!(region.as_deref(), Some("ap-southeast-2"));
    }

    #[test]
    fn malformed_create_bucket_body_rejected() {
        let body = Bytes::from_static(b"<CreateBucketConfiguration><Location");
        let err = location_constraint(&body).unwrap_err();
        assert_eq!(err.code, "MalformedXML");
    }

    #[test]
    fn recreate_elsewhere_conflicts() {
        let mut backend = S3Backend::new("123456789012");
        let body = Bytes::from_static(
            b"<CreateBucketConfiguration><LocationConstraint>eu-west-1</LocationConstraint></CreateBucketConfiguration>",
        );
        invoke(
            &mut backend,
            "CreateBucket",
            Method::PUT,
            "/eu-bucket",
            &[("bucket", "eu-bucket")],
            body.clone(),
        )
        .unwrap();
        let err = invoke(
            &mut backend,
            "CreateBucket",
            Method::PUT,
            "/eu-bucket",
            &[("bucket", "eu-bucket")],
            body,
        )
        .unwrap_err();
        assert_eq!(err.code, "BucketAlreadyOwnedByYou");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn object_round_trip_preserves_bytes_and_etag() {
        let mut backend = S3Backend::new("123456789012");
        create_bucket(&mut backend, "blobs");

        let put = invoke(
            &mut backend,
            "PutObject",
            Method::PUT,
            "/blobs/nested/key.bin",
            &[("bucket", "blobs"), ("key", "nested/key.bin")],
            Bytes::from_static(b"\x00\x01payload"),
        )
        .unwrap();
        let etag = put
            .headers()
            .iter()
            .find(|(k, _)| k == "ETag")
            .map(|(_, v)| v.clone())
            .unwrap();

        let got = invoke(
            &mut backend,
            "GetObject",
            Method::GET,
            "/blobs/nested/key.bin",
            &[("bucket", "blobs"), ("key", "nested/key.bin")],
            Bytes::new(),
        )
        .unwrap();
        assert_eq!(got.raw_bytes().unwrap(), &Bytes::from_static(b"\x00\x01payload"));
        assert!(got.headers().iter().any(|(k, v)| k == "ETag" && *v == etag));
    }

    #[test]
    fn delete_missing_object_succeeds() {
        let mut backend = S3Backend::new("123456789012");
        create_bucket(&mut backend, "blobs");
        let out = invoke(
            &mut backend,
            "DeleteObject",
            Method::DELETE,
            "/blobs/ghost",
            &[("bucket", "blobs"), ("key", "ghost")],
            Bytes::new(),
        )
        .unwrap();
        assert_eq!(out.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn nonempty_bucket_refuses_deletion() {
        let mut backend = S3Backend::new("123456789012");
        create_bucket(&mut backend, "full");
        invoke(
            &mut backend,
            "PutObject",
            Method::PUT,
            "/full/a",
            &[("bucket", "full"), ("key", "a")],
            Bytes::from_static(b"x"),
        )
        .unwrap();
        let err = invoke(
            &mut backend,
            "DeleteBucket",
            Method::DELETE,
            "/full",
            &[("bucket", "full")],
            Bytes::new(),
        )
        .unwrap_err();
        assert_eq!(err.code, "BucketNotEmpty");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn listing_pages_through_all_keys() {
        let mut backend = S3Backend::new("123456789012");
        create_bucket(&mut backend, "many");
        for i in 0..5 {
            let key = format!("k{i}");
            invoke(
                &mut backend,
                "PutObject",
                Method::PUT,
                &format!("/many/{key}"),
                &[("bucket", "many"), ("key", &key)],
                Bytes::from_static(b"x"),
            )
            .unwrap();
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("max-keys".to_owned(), "2".to_owned())];
            if let Some(t) = &token {
                query.push(("continuation-token".to_owned(), t.clone()));
            }
            let req = mirage_core::RequestDescriptor::new(
                Method::GET,
                "s3.amazonaws.com",
                "/many",
                query,
                HeaderMap::new(),
                Bytes::new(),
            );
            let mut path_params = HashMap::new();
            path_params.insert("bucket".to_owned(), "many".to_owned());
            let ctx = ActionContext {
                operation: "ListObjects",
                request: &req,
                path_params: &path_params,
                region: "us-east-1",
                account: "123456789012",
            };
            let out = backend.invoke(&ctx).unwrap();
            let body = out.structured().unwrap();
            for entry in body["Contents"].as_array().unwrap() {
                seen.push(entry["Key"].as_str().unwrap().to_owned());
            }
            match body["NextContinuationToken"].as_str() {
                Some(t) => token = Some(t.to_owned()),
                None => break,
            }
        }
        assert_eq!(seen, vec!["k0", "k1", "k2", "k3", "k4"]);
    }
}
