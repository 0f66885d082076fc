//! API Gateway over REST+JSON, matched against the real service's wire.

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode};
use mirage_core::RequestDescriptor;
use mirage_services::dispatcher;
use serde_json::{json, Value};

const HOST: &str = "apigateway.us-west-2.amazonaws.com";

fn request(method: Method, path: &str, body: Value) -> RequestDescriptor {
    let bytes = if body.is_null() {
        Bytes::new()
    } else {
        Bytes::from(body.to_string())
    };
    RequestDescriptor::new(method, HOST, path, Vec::new(), HeaderMap::new(), bytes)
}

fn parse(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[test]
fn create_and_get_rest_api() {
    let d = dispatcher();
    let resp = d.dispatch(&request(
        Method::POST,
        "/restapis",
        json!({"name": "my_api", "description": "this is my api"}),
    ));
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    let api_id = parse(&resp.body)["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::GET,
        &format!("/restapis/{api_id}"),
        Value::Null,
    ));
    assert_eq!(resp.status, StatusCode::OK);
    let api = parse(&resp.body);
    assert_eq!(api["name"], "my_api");
    assert_eq!(api["description"], "this is my api");
    assert_eq!(api["version"], "V1");
    assert_eq!(api["apiKeySource"], "HEADER");
    assert_eq!(api["endpointConfiguration"], json!({"types": ["EDGE"]}));
    assert_eq!(api["tags"], json!({}));
}

#[test]
fn missing_api_gets_the_errortype_header() {
    let d = dispatcher();
    let resp = d.dispatch(&request(Method::GET, "/restapis/doesnotexist", Value::Null));
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.header("x-amzn-errortype"), Some("NotFoundException"));
    assert_eq!(
        parse(&resp.body)["message"],
        "Invalid REST API identifier specified"
    );
}

#[test]
fn delete_cascades_and_answers_202() {
    let d = dispatcher();
    let resp = d.dispatch(&request(
        Method::POST,
        "/restapis",
        json!({"name": "my_api"}),
    ));
    let api_id = parse(&resp.body)["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::GET,
        &format!("/restapis/{api_id}/resources"),
        Value::Null,
    ));
    let items = parse(&resp.body)["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["path"], "/");
    let root_id = items[0]["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::DELETE,
        &format!("/restapis/{api_id}"),
        Value::Null,
    ));
    assert_eq!(resp.status, StatusCode::ACCEPTED);

    let resp = d.dispatch(&request(
        Method::GET,
        &format!("/restapis/{api_id}/resources/{root_id}"),
        Value::Null,
    ));
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[test]
fn resource_tree_over_the_wire() {
    let d = dispatcher();
    let resp = d.dispatch(&request(
        Method::POST,
        "/restapis",
        json!({"name": "my_api"}),
    ));
    let api_id = parse(&resp.body)["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::GET,
        &format!("/restapis/{api_id}/resources"),
        Value::Null,
    ));
    let root_id = parse(&resp.body)["items"][0]["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::POST,
        &format!("/restapis/{api_id}/resources/{root_id}"),
        json!({"pathPart": "users"}),
    ));
    assert_eq!(resp.status, StatusCode::CREATED);
    let users = parse(&resp.body);
    assert_eq!(users["path"], "/users");
    assert_eq!(users["pathPart"], "users");
    assert_eq!(users["parentId"], root_id.as_str());

    let resp = d.dispatch(&request(
        Method::POST,
        &format!("/restapis/{api_id}/resources/{root_id}"),
        json!({"pathPart": "bad/part"}),
    ));
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.header("x-amzn-errortype"),
        Some("BadRequestException")
    );
}

#[test]
fn method_and_response_round_trip_over_the_wire() {
    let d = dispatcher();
    let resp = d.dispatch(&request(
        Method::POST,
        "/restapis",
        json!({"name": "my_api"}),
    ));
    let api_id = parse(&resp.body)["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::GET,
        &format!("/restapis/{api_id}/resources"),
        Value::Null,
    ));
    let root_id = parse(&resp.body)["items"][0]["id"].as_str().unwrap().to_owned();
    let method_path = format!("/restapis/{api_id}/resources/{root_id}/methods/GET");

    let resp = d.dispatch(&request(
        Method::PUT,
        &method_path,
        json!({"authorizationType": "none"}),
    ));
    assert_eq!(resp.status, StatusCode::CREATED);

    let resp = d.dispatch(&request(
        Method::PUT,
        &format!("{method_path}/responses/200"),
        Value::Null,
    ));
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(parse(&resp.body), json!({"statusCode": "200"}));

    let resp = d.dispatch(&request(Method::GET, &method_path, Value::Null));
    let method = parse(&resp.body);
    assert_eq!(method["httpMethod"], "GET");
    assert_eq!(method["authorizationType"], "none");
    assert_eq!(method["apiKeyRequired"], false);
    assert_eq!(method["methodResponses"], json!({"200": {"statusCode": "200"}}));

    let resp = d.dispatch(&request(Method::DELETE, &method_path, Value::Null));
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = d.dispatch(&request(Method::GET, &method_path, Value::Null));
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(
        parse(&resp.body)["message"],
        "Invalid Method identifier specified"
    );
}

#[test]
fn update_validation_renders_the_exact_message() {
    let d = dispatcher();
    let resp = d.dispatch(&request(
        Method::POST,
        "/restapis",
        json!({"name": "my_api"}),
    ));
    let api_id = parse(&resp.body)["id"].as_str().unwrap().to_owned();

    let resp = d.dispatch(&request(
        Method::PATCH,
        &format!("/restapis/{api_id}"),
        json!({"patchOperations": [
            {"op": "replace", "path": "/apiKeySource", "value": "Wrong-value-AUTHORIZER"},
        ]}),
    ));
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.header("x-amzn-errortype"),
        Some("ValidationException")
    );
    assert_eq!(
        parse(&resp.body)["message"],
        "1 validation error detected: Value 'Wrong-value-AUTHORIZER' at \
         'createRestApiInput.apiKeySource' failed to satisfy constraint: Member must \
         satisfy enum value set: [AUTHORIZER, HEADER]"
    );
}

#[test]
fn listing_pages_with_a_position_token() {
    let d = dispatcher();
    let mut created = Vec::new();
    for i in 0..4 {
        let resp = d.dispatch(&request(
            Method::POST,
            "/restapis",
            json!({"name": format!("api-{i}")}),
        ));
        created.push(parse(&resp.body)["id"].as_str().unwrap().to_owned());
    }

    let mut seen = Vec::new();
    let mut position: Option<String> = None;
    loop {
        let mut query = vec![("limit".to_owned(), "3".to_owned())];
        if let Some(p) = &position {
            query.push(("position".to_owned(), p.clone()));
        }
        let req = RequestDescriptor::new(
            Method::GET,
            HOST,
            "/restapis",
            query,
            HeaderMap::new(),
            Bytes::new(),
        );
        let resp = d.dispatch(&req);
        assert_eq!(resp.status, StatusCode::OK);
        let body = parse(&resp.body);
        for item in body["items"].as_array().unwrap() {
            seen.push(item["id"].as_str().unwrap().to_owned());
        }
        match body["position"].as_str() {
            Some(p) => position = Some(p.to_owned()),
            None => break,
        }
    }
    assert_eq!(seen, created);
}
