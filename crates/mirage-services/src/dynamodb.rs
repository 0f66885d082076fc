//! DynamoDB emulation over the JSON-RPC protocol family.

use chrono::Utc;
use hyper::StatusCode;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use mirage_core::{
    ActionContext, ActionOutput, Backend, ProtocolFamily, ServiceCatalog, ServiceError,
    ServiceModel,
};

pub fn model() -> ServiceModel {
    ServiceModel {
        name: "dynamodb",
        protocol: ProtocolFamily::JsonRpc,
        xml_namespace: None,
        target_prefix: Some("DynamoDB_20120810"),
        routes: Vec::new(),
        global: false,
    }
}

pub fn register(catalog: &mut ServiceCatalog) {
    catalog.register(model(), |account, region| {
        Box::new(DynamoBackend::new(account, region))
    });
}

struct Table {
    key_schema: Vec<Value>,
    attribute_definitions: Vec<Value>,
    created: f64,
    /// Items keyed by their serialized primary key.
    items: BTreeMap<String, Value>,
    tags: Vec<Value>,
}

impl Table {
    /// Attribute names of the primary key, hash key first.
    fn key_attributes(&self) -> Vec<&str> {
        self.key_schema
            .iter()
            .filter_map(|k| k["AttributeName"].as_str())
            .collect()
    }
}

pub struct DynamoBackend {
    account: String,
    region: String,
    tables: BTreeMap<String, Table>,
}

impl Backend for DynamoBackend {
    fn invoke(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        let body = ctx.request.json_body()?;
        match ctx.operation {
            "CreateTable" => self.create_table(&body),
            "DescribeTable" => self.describe_table(&body),
            "DeleteTable" => self.delete_table(&body),
            "ListTables" => self.list_tables(&body),
            "PutItem" => self.put_item(&body),
            "GetItem" => self.get_item(&body),
            "TagResource" => self.tag_resource(&body),
            "ListTagsOfResource" => self.list_tags_of_resource(&body),
            other => Err(ServiceError::unrecognized_operation(format!(
                "Unknown operation: {other}"
            ))),
        }
    }
}

impl DynamoBackend {
    pub fn new(account: &str, region: &str) -> Self {
        Self {
            account: account.to_owned(),
            region: region.to_owned(),
            tables: BTreeMap::new(),
        }
    }

    fn create_table(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let name = require_str(body, "TableName")?;
        if self.tables.contains_key(name) {
            return Err(in_use(format!("Table already exists: {name}")));
        }
        let key_schema = require_array(body, "KeySchema")?;
        let attribute_definitions = require_array(body, "AttributeDefinitions")?;
        let tags = body["Tags"].as_array().cloned().unwrap_or_default();

        let table = Table {
            key_schema,
            attribute_definitions,
            created: Utc::now().timestamp_millis() as f64 / 1000.0,
            items: BTreeMap::new(),
            tags,
        };
        let description = self.description(name, &table, "ACTIVE");
        debug!(table = name, "created table");
        self.tables.insert(name.to_owned(), table);
        Ok(ActionOutput::new(json!({ "TableDescription": description })))
    }

    fn describe_table(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let name = require_str(body, "TableName")?;
        let table = self.table(name)?;
        let description = self.description(name, table, "ACTIVE");
        Ok(ActionOutput::new(json!({ "Table": description })))
    }

    fn delete_table(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let name = require_str(body, "TableName")?;
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| not_found_table(name))?;
        // The description reports the in-flight status even though
        // removal here is immediate.
        let description = self.description(name, &table, "DELETING");
        Ok(ActionOutput::new(json!({ "TableDescription": description })))
    }

    fn list_tables(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let limit = body["Limit"].as_u64().map(|l| l as usize);
        let start = body["ExclusiveStartTableName"].as_str();

        // BTreeMap iteration is already sorted; continuation is by the
        // last returned name, the native scheme for this operation.
        let names: Vec<&String> = match start {
            Some(marker) => self
                .tables
                .keys()
                .filter(|n| n.as_str() > marker)
                .collect(),
            None => self.tables.keys().collect(),
        };
        let take = limit.unwrap_or(names.len()).min(names.len());
        let page = &names[..take];
        let last = if take < names.len() {
            page.last().map(|n| n.as_str())
        } else {
            None
        };

        let mut out = Map::new();
        out.insert("TableNames".to_owned(), json!(page));
        if let Some(last) = last {
            out.insert("LastEvaluatedTableName".to_owned(), json!(last));
        }
        Ok(ActionOutput::new(Value::Object(out)))
    }

    fn put_item(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let name = require_str(body, "TableName")?.to_owned();
        let item = body["Item"].as_object().cloned().ok_or_else(|| {
            validation("One or more parameter values were invalid: Missing Item")
        })?;
        let table = self.tables.get(&name).ok_or_else(|| not_found_table(&name))?;
        for attr in table.key_attributes() {
            if !item.contains_key(attr) {
                return Err(validation(format!(
                    "One or more parameter values were invalid: Missing the key {attr} in the item"
                )));
            }
        }
        let key = item_key(&table.key_attributes(), &Value::Object(item.clone()));
        if let Some(table) = self.tables.get_mut(&name) {
            table.items.insert(key, Value::Object(item));
        }
        Ok(ActionOutput::new(json!({})))
    }

    fn get_item(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let name = require_str(body, "TableName")?;
        let key_value = &body["Key"];
        if !key_value.is_object() {
            return Err(validation(
                "One or more parameter values were invalid: Missing Key",
            ));
        }
        let table = self.table(name)?;
        let key = item_key(&table.key_attributes(), key_value);
        match table.items.get(&key) {
            Some(item) => Ok(ActionOutput::new(json!({ "Item": item }))),
            // An absent item is a success with no Item member.
            None => Ok(ActionOutput::new(json!({}))),
        }
    }

    fn tag_resource(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let arn = require_str(body, "ResourceArn")?.to_owned();
        let tags = body["Tags"].as_array().cloned().unwrap_or_default();
        let name = self.table_name_from_arn(&arn)?;
        if let Some(table) = self.tables.get_mut(&name) {
            for tag in tags {
                let key = tag["Key"].as_str().map(str::to_owned);
                table.tags.retain(|t| t["Key"].as_str().map(str::to_owned) != key);
                table.tags.push(tag);
            }
        }
        Ok(ActionOutput::empty())
    }

    fn list_tags_of_resource(&mut self, body: &Value) -> Result<ActionOutput, ServiceError> {
        let arn = require_str(body, "ResourceArn")?.to_owned();
        let name = self.table_name_from_arn(&arn)?;
        let table = self.table(&name)?;
        Ok(ActionOutput::new(json!({ "Tags": table.tags })))
    }

    fn table(&self, name: &str) -> Result<&Table, ServiceError> {
        self.tables.get(name).ok_or_else(|| not_found_table(name))
    }

    fn table_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:dynamodb:{}:{}:table/{name}",
            self.region, self.account
        )
    }

    fn table_name_from_arn(&self, arn: &str) -> Result<String, ServiceError> {
        let name = arn.rsplit_once(":table/").map(|(_, n)| n.to_owned());
        match name {
            Some(name) if self.tables.contains_key(&name) => Ok(name),
            _ => Err(ServiceError::not_found(
                "ResourceNotFoundException",
                format!("Requested resource not found: {arn}"),
            )
            .with_status(StatusCode::BAD_REQUEST)),
        }
    }

    fn description(&self, name: &str, table: &Table, status: &str) -> Value {
        json!({
            "TableName": name,
            "TableStatus": status,
            "KeySchema": table.key_schema,
            "AttributeDefinitions": table.attribute_definitions,
            "CreationDateTime": table.created,
            "ItemCount": table.items.len(),
            "TableArn": self.table_arn(name),
            "ProvisionedThroughput": {
                "ReadCapacityUnits": 0,
                "WriteCapacityUnits": 0,
                "NumberOfDecreasesToday": 0,
            },
        })
    }
}

/// Canonical string form of one item's primary key.
fn item_key(key_attributes: &[&str], item: &Value) -> String {
    let mut parts = Vec::with_capacity(key_attributes.len());
    for attr in key_attributes {
        parts.push(item[*attr].to_string());
    }
    parts.join("\u{1f}")
}

fn require_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, ServiceError> {
    body[field]
        .as_str()
        .ok_or_else(|| validation(format!("Missing required parameter {field}")))
}

fn require_array(body: &Value, field: &str) -> Result<Vec<Value>, ServiceError> {
    body[field]
        .as_array()
        .cloned()
        .ok_or_else(|| validation(format!("Missing required parameter {field}")))
}

fn validation(message: impl Into<String>) -> ServiceError {
    ServiceError::invalid_parameter("ValidationException", message)
}

fn in_use(message: impl Into<String>) -> ServiceError {
    ServiceError::already_exists("ResourceInUseException", message)
        .with_status(StatusCode::BAD_REQUEST)
}

fn not_found_table(name: &str) -> ServiceError {
    ServiceError::not_found(
        "ResourceNotFoundException",
        format!("Requested resource not found: Table: {name} not found"),
    )
    .with_status(StatusCode::BAD_REQUEST)
}
