//! API Gateway emulation over the REST+JSON protocol family.

use chrono::Utc;
use hyper::{Method, StatusCode};
use std::collections::HashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use mirage_core::{
    token, ActionContext, ActionOutput, Backend, ProtocolFamily, RouteDef, ServiceCatalog,
    ServiceError, ServiceModel,
};

use crate::ids;

const API_KEY_SOURCES: [&str; 2] = ["AUTHORIZER", "HEADER"];
const ENDPOINT_TYPES: [&str; 3] = ["PRIVATE", "EDGE", "REGIONAL"];

/// Path parts allow word characters plus `._-`, or a `{name}` variable
/// with an optional trailing `+` greedy marker.
static PATH_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9._\-]+|\{[a-zA-Z0-9._\-]+\+?\})$").unwrap());

pub fn model() -> ServiceModel {
    ServiceModel {
        name: "apigateway",
        protocol: ProtocolFamily::RestJson,
        xml_namespace: None,
        target_prefix: None,
        routes: vec![
            RouteDef::new(Method::POST, "/restapis", "CreateRestApi"),
            RouteDef::new(Method::GET, "/restapis", "GetRestApis"),
            RouteDef::new(Method::GET, "/restapis/{api_id}", "GetRestApi"),
            RouteDef::new(Method::PATCH, "/restapis/{api_id}", "UpdateRestApi"),
            RouteDef::new(Method::DELETE, "/restapis/{api_id}", "DeleteRestApi"),
            RouteDef::new(Method::GET, "/restapis/{api_id}/resources", "GetResources"),
            RouteDef::new(
                Method::POST,
                "/restapis/{api_id}/resources/{parent_id}",
                "CreateResource",
            ),
            RouteDef::new(
                Method::GET,
                "/restapis/{api_id}/resources/{resource_id}",
                "GetResource",
            ),
            RouteDef::new(
                Method::DELETE,
                "/restapis/{api_id}/resources/{resource_id}",
                "DeleteResource",
            ),
            RouteDef::new(
                Method::PUT,
                "/restapis/{api_id}/resources/{resource_id}/methods/{http_method}",
                "PutMethod",
            ),
            RouteDef::new(
                Method::GET,
                "/restapis/{api_id}/resources/{resource_id}/methods/{http_method}",
                "GetMethod",
            ),
            RouteDef::new(
                Method::DELETE,
                "/restapis/{api_id}/resources/{resource_id}/methods/{http_method}",
                "DeleteMethod",
            ),
            RouteDef::new(
                Method::PUT,
                "/restapis/{api_id}/resources/{resource_id}/methods/{http_method}/responses/{status_code}",
                "PutMethodResponse",
            ),
            RouteDef::new(
                Method::GET,
                "/restapis/{api_id}/resources/{resource_id}/methods/{http_method}/responses/{status_code}",
                "GetMethodResponse",
            ),
            RouteDef::new(
                Method::DELETE,
                "/restapis/{api_id}/resources/{resource_id}/methods/{http_method}/responses/{status_code}",
                "DeleteMethodResponse",
            ),
        ],
        global: false,
    }
}

pub fn register(catalog: &mut ServiceCatalog) {
    catalog.register(model(), |account, region| {
        Box::new(ApiGatewayBackend::new(account, region))
    });
}

struct Resource {
    id: String,
    parent_id: Option<String>,
    path_part: String,
    methods: Vec<ApiMethod>,
}

impl Resource {
    fn as_value(&self, path: &str) -> Value {
        let mut out = Map::new();
        out.insert("id".to_owned(), json!(self.id));
        if let Some(parent) = &self.parent_id {
            out.insert("parentId".to_owned(), json!(parent));
            out.insert("pathPart".to_owned(), json!(self.path_part));
        }
        out.insert("path".to_owned(), json!(path));
        Value::Object(out)
    }

    fn method(&self, http_method: &str) -> Result<&ApiMethod, ServiceError> {
        self.methods
            .iter()
            .find(|m| m.http_method == http_method)
            .ok_or_else(method_not_found)
    }

    fn method_mut(&mut self, http_method: &str) -> Result<&mut ApiMethod, ServiceError> {
        self.methods
            .iter_mut()
            .find(|m| m.http_method == http_method)
            .ok_or_else(method_not_found)
    }
}

struct ApiMethod {
    http_method: String,
    authorization_type: String,
    api_key_required: bool,
    request_parameters: Option<Map<String, Value>>,
    /// Status codes with a declared response, in declaration order.
    response_codes: Vec<String>,
}

impl ApiMethod {
    fn as_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("httpMethod".to_owned(), json!(self.http_method));
        out.insert(
            "authorizationType".to_owned(),
            json!(self.authorization_type),
        );
        out.insert("apiKeyRequired".to_owned(), json!(self.api_key_required));
        let mut responses = Map::new();
        for code in &self.response_codes {
            responses.insert(code.clone(), json!({ "statusCode": code }));
        }
        out.insert("methodResponses".to_owned(), Value::Object(responses));
        if let Some(params) = &self.request_parameters {
            out.insert("requestParameters".to_owned(), Value::Object(params.clone()));
        }
        Value::Object(out)
    }
}

struct RestApi {
    id: String,
    name: String,
    description: String,
    created_date: i64,
    version: String,
    binary_media_types: Vec<String>,
    api_key_source: String,
    endpoint_types: Vec<String>,
    tags: Map<String, Value>,
    policy: Option<String>,
    disable_execute_api_endpoint: bool,
    /// Creation order; the root resource is always first.
    resources: Vec<Resource>,
}

impl RestApi {
    fn as_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".to_owned(), json!(self.id));
        out.insert("name".to_owned(), json!(self.name));
        out.insert("description".to_owned(), json!(self.description));
        out.insert("createdDate".to_owned(), json!(self.created_date));
        out.insert("version".to_owned(), json!(self.version));
        out.insert(
            "binaryMediaTypes".to_owned(),
            json!(self.binary_media_types),
        );
        out.insert("apiKeySource".to_owned(), json!(self.api_key_source));
        out.insert(
            "endpointConfiguration".to_owned(),
            json!({ "types": self.endpoint_types }),
        );
        out.insert("tags".to_owned(), Value::Object(self.tags.clone()));
        if let Some(policy) = &self.policy {
            out.insert("policy".to_owned(), json!(policy));
        }
        out.insert(
            "disableExecuteApiEndpoint".to_owned(),
            json!(self.disable_execute_api_endpoint),
        );
        Value::Object(out)
    }

    /// Full path of a resource, rebuilt by chasing parent links.
    fn resource_path(&self, resource: &Resource) -> String {
        let mut parts = Vec::new();
        let mut current = Some(resource);
        while let Some(r) = current {
            if !r.path_part.is_empty() {
                parts.push(r.path_part.as_str());
            }
            current = r
                .parent_id
                .as_ref()
                .and_then(|pid| self.resources.iter().find(|c| c.id == *pid));
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }
}

pub struct ApiGatewayBackend {
    region: String,
    apis: Vec<RestApi>,
}

impl Backend for ApiGatewayBackend {
    fn invoke(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        match ctx.operation {
            "CreateRestApi" => self.create_rest_api(ctx),
            "GetRestApis" => self.get_rest_apis(ctx),
            "GetRestApi" => self.get_rest_api(ctx),
            "UpdateRestApi" => self.update_rest_api(ctx),
            "DeleteRestApi" => self.delete_rest_api(ctx),
            "GetResources" => self.get_resources(ctx),
            "CreateResource" => self.create_resource(ctx),
            "GetResource" => self.get_resource(ctx),
            "DeleteResource" => self.delete_resource(ctx),
            "PutMethod" => self.put_method(ctx),
            "GetMethod" => self.get_method(ctx),
            "DeleteMethod" => self.delete_method(ctx),
            "PutMethodResponse" => self.put_method_response(ctx),
            "GetMethodResponse" => self.get_method_response(ctx),
            "DeleteMethodResponse" => self.delete_method_response(ctx),
            other => Err(ServiceError::unrecognized_operation(format!(
                "Unknown operation '{other}'"
            ))),
        }
    }
}

impl ApiGatewayBackend {
    pub fn new(_account: &str, region: &str) -> Self {
        Self {
            region: region.to_owned(),
            apis: Vec::new(),
        }
    }

    fn create_rest_api(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let body = ctx.request.json_body()?;
        let name = body["name"].as_str().unwrap_or("").to_owned();

        let api_key_source = match body["apiKeySource"].as_str() {
            Some(value) => validate_enum(value, "apiKeySource", &API_KEY_SOURCES)?.to_owned(),
            None => "HEADER".to_owned(),
        };
        let endpoint_types = match body["endpointConfiguration"]["types"].as_array() {
            Some(types) => {
                let mut out = Vec::with_capacity(types.len());
                for t in types {
                    let t = t.as_str().unwrap_or("");
                    out.push(
                        validate_enum(t, "endpointConfiguration.types", &ENDPOINT_TYPES)?
                            .to_owned(),
                    );
                }
                out
            }
            None => vec!["EDGE".to_owned()],
        };

        let mut api = RestApi {
            id: ids::apigateway_id(),
            name,
            description: body["description"].as_str().unwrap_or("").to_owned(),
            created_date: Utc::now().timestamp(),
            version: "V1".to_owned(),
            binary_media_types: Vec::new(),
            api_key_source,
            endpoint_types,
            tags: body["tags"].as_object().cloned().unwrap_or_default(),
            policy: body["policy"].as_str().map(str::to_owned),
            disable_execute_api_endpoint: false,
            resources: Vec::new(),
        };
        // Every API is born with its root resource.
        api.resources.push(Resource {
            id: ids::apigateway_id(),
            parent_id: None,
            path_part: String::new(),
            methods: Vec::new(),
        });
        debug!(api = %api.id, region = %self.region, "created rest api");

        let value = api.as_value();
        self.apis.push(api);
        Ok(ActionOutput::new(value).with_status(StatusCode::CREATED))
    }

    fn get_rest_apis(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let limit = ctx
            .request
            .query_param("limit")
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    ServiceError::invalid_parameter(
                        "BadRequestException",
                        format!("Invalid limit value '{v}'"),
                    )
                })
            })
            .transpose()?;
        let position = ctx.request.query_param("position");

        let scope = format!("apigateway/{}/GetRestApis", self.region);
        let values: Vec<Value> = self.apis.iter().map(|api| api.as_value()).collect();
        let page = token::paginate(&values, limit, position, &scope, "BadRequestException")?;

        let mut out = Map::new();
        out.insert("items".to_owned(), json!(page.items));
        if let Some(position) = page.next_token {
            out.insert("position".to_owned(), json!(position));
        }
        Ok(ActionOutput::new(Value::Object(out)))
    }

    fn get_rest_api(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let api = self.api(ctx.path_param("api_id")?)?;
        Ok(ActionOutput::new(api.as_value()))
    }

    fn update_rest_api(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let body = ctx.request.json_body()?;
        let api_id = ctx.path_param("api_id")?.to_owned();
        self.api(&api_id)?;
        let operations = body["patchOperations"].as_array().cloned().unwrap_or_default();

        // Validate every operation before applying any, so a bad patch
        // leaves the API untouched.
        for operation in &operations {
            if operation["path"] == "/apiKeySource" && operation["op"] == "replace" {
                validate_enum(
                    operation["value"].as_str().unwrap_or(""),
                    "apiKeySource",
                    &API_KEY_SOURCES,
                )?;
            }
        }

        let api = self.api_mut(&api_id)?;
        for operation in &operations {
            let path = operation["path"].as_str().unwrap_or("");
            let value = operation["value"].as_str().unwrap_or("");
            match (operation["op"].as_str().unwrap_or(""), path) {
                ("replace", "/name") => api.name = value.to_owned(),
                ("replace", "/description") => api.description = value.to_owned(),
                ("replace", "/apiKeySource") => api.api_key_source = value.to_owned(),
                ("replace", "/binaryMediaTypes") => {
                    api.binary_media_types = vec![value.to_owned()]
                }
                ("replace", "/disableExecuteApiEndpoint") => {
                    api.disable_execute_api_endpoint = value.eq_ignore_ascii_case("true")
                }
                ("add", "/binaryMediaTypes") => api.binary_media_types.push(value.to_owned()),
                ("remove", "/binaryMediaTypes") => {
                    api.binary_media_types.retain(|t| t != value)
                }
                ("remove", "/description") => api.description.clear(),
                (op, path) => {
                    return Err(ServiceError::invalid_parameter(
                        "BadRequestException",
                        format!("Unsupported patch operation '{op}' for path '{path}'"),
                    ))
                }
            }
        }
        Ok(ActionOutput::new(api.as_value()))
    }

    fn delete_rest_api(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let api_id = ctx.path_param("api_id")?;
        let pos = self
            .apis
            .iter()
            .position(|a| a.id == api_id)
            .ok_or_else(api_not_found)?;
        // Dropping the API drops its resources with it.
        self.apis.remove(pos);
        Ok(ActionOutput::empty().with_status(StatusCode::ACCEPTED))
    }

    fn get_resources(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let api = self.api(ctx.path_param("api_id")?)?;
        let items: Vec<Value> = api
            .resources
            .iter()
            .map(|r| r.as_value(&api.resource_path(r)))
            .collect();
        Ok(ActionOutput::new(json!({ "items": items })))
    }

    fn create_resource(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let body = ctx.request.json_body()?;
        let api_id = ctx.path_param("api_id")?.to_owned();
        let parent_id = ctx.path_param("parent_id")?.to_owned();
        let path_part = body["pathPart"].as_str().unwrap_or("").to_owned();
        if !PATH_PART.is_match(&path_part) {
            return Err(ServiceError::invalid_parameter(
                "BadRequestException",
                "Resource's path part only allow a-zA-Z0-9._- and curly braces at the \
                 beginning and the end and an optional plus sign before the closing brace.",
            ));
        }

        let api = self.api_mut(&api_id)?;
        if !api.resources.iter().any(|r| r.id == parent_id) {
            return Err(resource_not_found());
        }
        let resource = Resource {
            id: ids::apigateway_id(),
            parent_id: Some(parent_id),
            path_part,
            methods: Vec::new(),
        };
        let value = resource.as_value(&api.resource_path(&resource));
        api.resources.push(resource);
        Ok(ActionOutput::new(value).with_status(StatusCode::CREATED))
    }

    fn get_resource(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let api = self.api(ctx.path_param("api_id")?)?;
        let resource_id = ctx.path_param("resource_id")?;
        let resource = api
            .resources
            .iter()
            .find(|r| r.id == resource_id)
            .ok_or_else(resource_not_found)?;
        Ok(ActionOutput::new(resource.as_value(&api.resource_path(resource))))
    }

    fn delete_resource(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let api_id = ctx.path_param("api_id")?.to_owned();
        let resource_id = ctx.path_param("resource_id")?.to_owned();
        let api = self.api_mut(&api_id)?;
        if !api.resources.iter().any(|r| r.id == resource_id) {
            return Err(resource_not_found());
        }
        // The whole subtree goes: a child with a dangling parent link
        // would report a truncated path.
        let mut doomed = HashSet::from([resource_id]);
        loop {
            let before = doomed.len();
            for resource in &api.resources {
                if let Some(parent) = &resource.parent_id {
                    if doomed.contains(parent) {
                        doomed.insert(resource.id.clone());
                    }
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        api.resources.retain(|r| !doomed.contains(&r.id));
        Ok(ActionOutput::empty().with_status(StatusCode::ACCEPTED))
    }

    fn put_method(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let body = ctx.request.json_body()?;
        let http_method = ctx.path_param("http_method")?.to_owned();
        let resource = self.resource_mut(ctx)?;

        let method = ApiMethod {
            http_method: http_method.clone(),
            authorization_type: body["authorizationType"].as_str().unwrap_or("").to_owned(),
            api_key_required: body["apiKeyRequired"].as_bool().unwrap_or(false),
            request_parameters: body["requestParameters"].as_object().cloned(),
            response_codes: Vec::new(),
        };
        let value = method.as_value();
        resource.methods.retain(|m| m.http_method != http_method);
        resource.methods.push(method);
        Ok(ActionOutput::new(value).with_status(StatusCode::CREATED))
    }

    fn get_method(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let http_method = ctx.path_param("http_method")?;
        let api = self.api(ctx.path_param("api_id")?)?;
        let resource_id = ctx.path_param("resource_id")?;
        let resource = api
            .resources
            .iter()
            .find(|r| r.id == resource_id)
            .ok_or_else(resource_not_found)?;
        Ok(ActionOutput::new(resource.method(http_method)?.as_value()))
    }

    fn delete_method(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let http_method = ctx.path_param("http_method")?.to_owned();
        let resource = self.resource_mut(ctx)?;
        resource.method(&http_method)?;
        resource.methods.retain(|m| m.http_method != http_method);
        Ok(ActionOutput::empty().with_status(StatusCode::NO_CONTENT))
    }

    fn put_method_response(
        &mut self,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutput, ServiceError> {
        let http_method = ctx.path_param("http_method")?.to_owned();
        let status_code = ctx.path_param("status_code")?.to_owned();
        let resource = self.resource_mut(ctx)?;
        let method = resource.method_mut(&http_method)?;
        if !method.response_codes.contains(&status_code) {
            method.response_codes.push(status_code.clone());
        }
        Ok(ActionOutput::new(json!({ "statusCode": status_code }))
            .with_status(StatusCode::CREATED))
    }

    fn get_method_response(
        &mut self,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutput, ServiceError> {
        let http_method = ctx.path_param("http_method")?.to_owned();
        let status_code = ctx.path_param("status_code")?.to_owned();
        let resource = self.resource_mut(ctx)?;
        let method = resource.method(&http_method)?;
        if !method.response_codes.contains(&status_code) {
            return Err(method_response_not_found());
        }
        Ok(ActionOutput::new(json!({ "statusCode": status_code })))
    }

    fn delete_method_response(
        &mut self,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutput, ServiceError> {
        let http_method = ctx.path_param("http_method")?.to_owned();
        let status_code = ctx.path_param("status_code")?.to_owned();
        let resource = self.resource_mut(ctx)?;
        let method = resource.method_mut(&http_method)?;
        if !method.response_codes.contains(&status_code) {
            return Err(method_response_not_found());
        }
        method.response_codes.retain(|c| c != &status_code);
        Ok(ActionOutput::empty().with_status(StatusCode::NO_CONTENT))
    }

    fn resource_mut(&mut self, ctx: &ActionContext<'_>) -> Result<&mut Resource, ServiceError> {
        let api_id = ctx.path_param("api_id")?.to_owned();
        let resource_id = ctx.path_param("resource_id")?.to_owned();
        let api = self.api_mut(&api_id)?;
        api.resources
            .iter_mut()
            .find(|r| r.id == resource_id)
            .ok_or_else(resource_not_found)
    }

    fn api(&self, id: &str) -> Result<&RestApi, ServiceError> {
        self.apis.iter().find(|a| a.id == id).ok_or_else(api_not_found)
    }

    fn api_mut(&mut self, id: &str) -> Result<&mut RestApi, ServiceError> {
        self.apis
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(api_not_found)
    }
}

fn api_not_found() -> ServiceError {
    ServiceError::not_found("NotFoundException", "Invalid REST API identifier specified")
}

fn resource_not_found() -> ServiceError {
    ServiceError::not_found("NotFoundException", "Invalid resource identifier specified")
}

fn method_not_found() -> ServiceError {
    ServiceError::not_found("NotFoundException", "Invalid Method identifier specified")
}

fn method_response_not_found() -> ServiceError {
    ServiceError::not_found("NotFoundException", "Invalid Response status code specified")
}

fn validate_enum<'a>(
    value: &'a str,
    field: &str,
    allowed: &[&str],
) -> Result<&'a str, ServiceError> {
    if allowed.contains(&value) {
        return Ok(value);
    }
    Err(ServiceError::invalid_parameter(
        "ValidationException",
        format!(
            "1 validation error detected: Value '{value}' at 'createRestApiInput.{field}' \
             failed to satisfy constraint: Member must satisfy enum value set: [{}]",
            allowed.join(", ")
        ),
    ))
}
