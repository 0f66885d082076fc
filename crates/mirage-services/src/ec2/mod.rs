//! EC2 emulation: instances and security groups over the Query protocol.

mod models;

pub use models::{Instance, InstanceState, SecurityGroup};

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use mirage_core::{
    token, ActionContext, ActionOutput, Applied, Backend, ProtocolFamily, RequestDescriptor,
    ServiceCatalog, ServiceError, ServiceModel,
};
use hyper::StatusCode;

use crate::ids;
use models::{reported_transition, INSTANCE_LIFECYCLE};

const XML_NAMESPACE: &str = "http://ec2.amazonaws.com/doc/2016-11-15/";

pub fn model() -> ServiceModel {
    ServiceModel {
        name: "ec2",
        protocol: ProtocolFamily::Query,
        xml_namespace: Some(XML_NAMESPACE),
        target_prefix: None,
        routes: Vec::new(),
        global: false,
    }
}

pub fn register(catalog: &mut ServiceCatalog) {
    catalog.register(model(), |account, region| {
        Box::new(Ec2Backend::new(account, region))
    });
}

/// EC2 state for one (account, region) scope.
pub struct Ec2Backend {
    account: String,
    region: String,
    /// Creation order; the stable ordering behind DescribeInstances.
    instances: Vec<Instance>,
    groups: Vec<SecurityGroup>,
}

impl Backend for Ec2Backend {
    fn invoke(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ServiceError> {
        match ctx.operation {
            "RunInstances" => self.run_instances(ctx.request),
            "DescribeInstances" => self.describe_instances(ctx.request),
            "StartInstances" | "StopInstances" | "TerminateInstances" => {
                self.change_instance_state(ctx.operation, ctx.request)
            }
            "RebootInstances" => self.reboot_instances(ctx.request),
            "CreateSecurityGroup" => self.create_security_group(ctx.request),
            "DeleteSecurityGroup" => self.delete_security_group(ctx.request),
            "DescribeSecurityGroups" => self.describe_security_groups(),
            "CreateTags" => self.create_tags(ctx.request),
            other => Err(ServiceError::unrecognized_operation(format!(
                "The action '{other}' is not valid for this web service"
            ))
            .with_status(StatusCode::BAD_REQUEST)),
        }
    }
}

impl Ec2Backend {
    pub fn new(account: &str, region: &str) -> Self {
        // Every scope starts with its default security group, the
        // implicit dependent resource instances fall back to.
        let default_group = SecurityGroup {
            id: ids::ec2_id("sg"),
            name: "default".to_owned(),
            description: "default group".to_owned(),
            is_default: true,
        };
        Self {
            account: account.to_owned(),
            region: region.to_owned(),
            instances: Vec::new(),
            groups: vec![default_group],
        }
    }

    // ---- instances ----------------------------------------------------

    fn run_instances(&mut self, req: &RequestDescriptor) -> Result<ActionOutput, ServiceError> {
        let image_id = req.param("ImageId").ok_or_else(missing("ImageId"))?;
        let instance_type = req
            .param("InstanceType")
            .unwrap_or_else(|| "m1.small".to_owned());
        let count: usize = req
            .param("MinCount")
            .as_deref()
            .unwrap_or("1")
            .parse()
            .map_err(|_| {
                ServiceError::invalid_parameter(
                    "InvalidParameterValue",
                    "Value for parameter minCount is invalid",
                )
            })?;
        if count == 0 {
            return Err(ServiceError::invalid_parameter(
                "InvalidParameterValue",
                "Value (0) for parameter minCount is invalid. Must be between 1 and 99999",
            ));
        }

        let mut group_ids = member_list(req, "SecurityGroupId");
        if group_ids.is_empty() {
            group_ids.push(self.default_group_id());
        }
        for id in &group_ids {
            self.find_group(id)?;
        }

        let reservation_id = ids::ec2_id("r");
        let launch_time = Utc::now();
        let mut items = Vec::new();
        for _ in 0..count {
            let instance = Instance {
                id: ids::ec2_id("i"),
                reservation_id: reservation_id.clone(),
                image_id: image_id.clone(),
                instance_type: instance_type.clone(),
                state: InstanceState::Pending,
                launch_time,
                security_group_ids: group_ids.clone(),
                tags: BTreeMap::new(),
            };
            items.push(self.instance_value(&instance));
            self.instances.push(instance);
        }
        debug!(reservation = %reservation_id, count, "launched instances");

        Ok(ActionOutput::new(json!({
            "reservationId": reservation_id,
            "ownerId": self.account,
            "instancesSet": { "item": items },
        })))
    }

    fn describe_instances(
        &mut self,
        req: &RequestDescriptor,
    ) -> Result<ActionOutput, ServiceError> {
        let requested = member_list(req, "InstanceId");
        for id in &requested {
            self.position_of(id)?;
        }
        self.settle_all();

        let filters = parse_filters(req);
        let selected: Vec<Instance> = self
            .instances
            .iter()
            .filter(|i| requested.is_empty() || requested.contains(&i.id))
            .filter(|i| matches_filters(i, &filters))
            .cloned()
            .collect();

        let max_results = req
            .param("MaxResults")
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    ServiceError::invalid_parameter(
                        "InvalidParameterValue",
                        format!("Value ({v}) for parameter maxResults is invalid"),
                    )
                })
            })
            .transpose()?;
        let next_token = req.param("NextToken");
        let scope = format!(
            "ec2/{}/{}/DescribeInstances",
            self.account, self.region
        );
        let page = token::paginate(
            &selected,
            max_results,
            next_token.as_deref(),
            &scope,
            "InvalidNextToken",
        )?;

        // Group the page back into reservations, preserving order.
        let mut reservations: Vec<(String, Vec<Value>)> = Vec::new();
        for instance in &page.items {
            let value = self.instance_value(instance);
            match reservations
                .iter_mut()
                .find(|(id, _)| *id == instance.reservation_id)
            {
                Some((_, items)) => items.push(value),
                None => reservations.push((instance.reservation_id.clone(), vec![value])),
            }
        }
        let reservation_items: Vec<Value> = reservations
            .into_iter()
            .map(|(id, items)| {
                json!({
                    "reservationId": id,
                    "ownerId": self.account,
                    "instancesSet": { "item": items },
                })
            })
            .collect();

        Ok(ActionOutput::new(json!({
            "reservationSet": { "item": reservation_items },
            "nextToken": page.next_token,
        })))
    }

    fn change_instance_state(
        &mut self,
        operation: &str,
        req: &RequestDescriptor,
    ) -> Result<ActionOutput, ServiceError> {
        let ids = member_list(req, "InstanceId");
        if ids.is_empty() {
            return Err(missing("InstanceId")());
        }
        // Validate every id and transition before mutating anything, so
        // a batch with one bad member fails without side effects.
        let mut positions = Vec::with_capacity(ids.len());
        for id in &ids {
            positions.push(self.position_of(id)?);
        }
        for &pos in &positions {
            let settled = self.settled_state(pos)?;
            INSTANCE_LIFECYCLE.apply(settled, operation)?;
        }

        let mut items = Vec::new();
        for &pos in &positions {
            let previous = self.settled_state(pos)?;
            let applied = INSTANCE_LIFECYCLE.apply(previous, operation)?;
            let instance = &mut self.instances[pos];
            let current = match applied {
                Applied::Changed(next) => {
                    instance.state = next;
                    reported_transition(operation, next)
                }
                Applied::Unchanged => instance.state,
            };
            items.push(json!({
                "instanceId": instance.id,
                "currentState": current.as_value(),
                "previousState": previous.as_value(),
            }));
        }

        Ok(ActionOutput::new(json!({
            "instancesSet": { "item": items },
        })))
    }

    fn reboot_instances(&mut self, req: &RequestDescriptor) -> Result<ActionOutput, ServiceError> {
        let ids = member_list(req, "InstanceId");
        if ids.is_empty() {
            return Err(missing("InstanceId")());
        }
        for id in &ids {
            let pos = self.position_of(id)?;
            let settled = self.settled_state(pos)?;
            INSTANCE_LIFECYCLE.apply(settled, "RebootInstances")?;
        }
        Ok(ActionOutput::new(json!({ "return": "true" })))
    }

    fn create_tags(&mut self, req: &RequestDescriptor) -> Result<ActionOutput, ServiceError> {
        let resource_ids = member_list(req, "ResourceId");
        if resource_ids.is_empty() {
            return Err(missing("ResourceId")());
        }
        let tags = parse_tags(req)?;
        let mut positions = Vec::new();
        for id in &resource_ids {
            positions.push(self.position_of(id)?);
        }
        for pos in positions {
            self.instances[pos].tags.extend(tags.clone());
        }
        Ok(ActionOutput::new(json!({ "return": "true" })))
    }

    // ---- security groups ----------------------------------------------

    fn create_security_group(
        &mut self,
        req: &RequestDescriptor,
    ) -> Result<ActionOutput, ServiceError> {
        let name = req.param("GroupName").ok_or_else(missing("GroupName"))?;
        let description = req
            .param("GroupDescription")
            .ok_or_else(missing("GroupDescription"))?;
        if self.groups.iter().any(|g| g.name == name) {
            return Err(ServiceError::already_exists(
                "InvalidGroup.Duplicate",
                format!("The security group '{name}' already exists"),
            )
            .with_status(StatusCode::BAD_REQUEST));
        }
        let group = SecurityGroup {
            id: ids::ec2_id("sg"),
            name,
            description,
            is_default: false,
        };
        let group_id = group.id.clone();
        self.groups.push(group);
        Ok(ActionOutput::new(json!({
            "return": "true",
            "groupId": group_id,
        })))
    }

    fn delete_security_group(
        &mut self,
        req: &RequestDescriptor,
    ) -> Result<ActionOutput, ServiceError> {
        let pos = if let Some(id) = req.param("GroupId") {
            self.groups.iter().position(|g| g.id == id).ok_or_else(|| {
                ServiceError::not_found(
                    "InvalidGroup.NotFound",
                    format!("The security group '{id}' does not exist"),
                )
                .with_status(StatusCode::BAD_REQUEST)
            })?
        } else {
            let name = req.param("GroupName").ok_or_else(missing("GroupId"))?;
            self.groups
                .iter()
                .position(|g| g.name == name)
                .ok_or_else(|| {
                    ServiceError::not_found(
                        "InvalidGroup.NotFound",
                        format!("The security group '{name}' does not exist"),
                    )
                    .with_status(StatusCode::BAD_REQUEST)
                })?
        };

        let group = &self.groups[pos];
        if group.is_default {
            return Err(ServiceError::invalid_parameter(
                "CannotDelete",
                "the specified group: \"default\" may not be deleted",
            ));
        }
        // Deletion is blocked while any live instance references the
        // group; EC2's documented dependency rule.
        let referenced = self.instances.iter().any(|i| {
            i.state != InstanceState::Terminated && i.security_group_ids.contains(&group.id)
        });
        if referenced {
            return Err(ServiceError::invalid_state(
                "DependencyViolation",
                format!("resource {} has a dependent object", group.id),
            ));
        }
        self.groups.remove(pos);
        Ok(ActionOutput::new(json!({ "return": "true" })))
    }

    fn describe_security_groups(&mut self) -> Result<ActionOutput, ServiceError> {
        let items: Vec<Value> = self
            .groups
            .iter()
            .map(|g| g.as_value(&self.account))
            .collect();
        Ok(ActionOutput::new(json!({
            "securityGroupInfo": { "item": items },
        })))
    }

    // ---- helpers ------------------------------------------------------

    fn default_group_id(&self) -> String {
        self.groups
            .iter()
            .find(|g| g.is_default)
            .map(|g| g.id.clone())
            .unwrap_or_default()
    }

    fn find_group(&self, id: &str) -> Result<&SecurityGroup, ServiceError> {
        self.groups.iter().find(|g| g.id == *id).ok_or_else(|| {
            ServiceError::not_found(
                "InvalidGroup.NotFound",
                format!("The security group '{id}' does not exist"),
            )
            .with_status(StatusCode::BAD_REQUEST)
        })
    }

    fn position_of(&self, instance_id: &str) -> Result<usize, ServiceError> {
        self.instances
            .iter()
            .position(|i| i.id == *instance_id)
            .ok_or_else(|| {
                ServiceError::not_found(
                    "InvalidInstanceID.NotFound",
                    format!("The instance ID '{instance_id}' does not exist"),
                )
                .with_status(StatusCode::BAD_REQUEST)
            })
    }

    /// Settle the deterministic pending->running progression for one
    /// instance and return the settled state.
    fn settled_state(&mut self, pos: usize) -> Result<InstanceState, ServiceError> {
        let state = self.instances[pos].state;
        if let Applied::Changed(next) = INSTANCE_LIFECYCLE.apply(state, "Settle")? {
            self.instances[pos].state = next;
            return Ok(next);
        }
        Ok(state)
    }

    fn settle_all(&mut self) {
        for pos in 0..self.instances.len() {
            let _ = self.settled_state(pos);
        }
    }

    fn instance_value(&self, instance: &Instance) -> Value {
        let groups: Vec<(String, String)> = instance
            .security_group_ids
            .iter()
            .map(|id| {
                let name = self
                    .groups
                    .iter()
                    .find(|g| g.id == *id)
                    .map(|g| g.name.clone())
                    .unwrap_or_default();
                (id.clone(), name)
            })
            .collect();
        instance.as_value(&groups)
    }
}

fn missing(parameter: &'static str) -> impl Fn() -> ServiceError {
    move || {
        ServiceError::invalid_parameter(
            "MissingParameter",
            format!("The request must contain the parameter {parameter}"),
        )
    }
}

/// Values of `{prefix}.1`, `{prefix}.2`, ... in member order.
fn member_list(req: &RequestDescriptor, prefix: &str) -> Vec<String> {
    let dotted = format!("{prefix}.");
    let mut members: Vec<(usize, String)> = req
        .params_with_prefix(&dotted)
        .into_iter()
        .filter_map(|(k, v)| k[dotted.len()..].parse::<usize>().ok().map(|n| (n, v)))
        .collect();
    members.sort_by_key(|(n, _)| *n);
    members.into_iter().map(|(_, v)| v).collect()
}

/// `Filter.N.Name` + `Filter.N.Value.M` pairs.
fn parse_filters(req: &RequestDescriptor) -> Vec<(String, Vec<String>)> {
    let mut filters = Vec::new();
    for n in 1.. {
        let Some(name) = req.param(&format!("Filter.{n}.Name")) else {
            break;
        };
        let mut values = Vec::new();
        for m in 1.. {
            match req.param(&format!("Filter.{n}.Value.{m}")) {
                Some(v) => values.push(v),
                None => break,
            }
        }
        filters.push((name, values));
    }
    filters
}

fn parse_tags(req: &RequestDescriptor) -> Result<BTreeMap<String, String>, ServiceError> {
    let mut tags = BTreeMap::new();
    for n in 1.. {
        let Some(key) = req.param(&format!("Tag.{n}.Key")) else {
            break;
        };
        let value = req.param(&format!("Tag.{n}.Value")).unwrap_or_default();
        tags.insert(key, value);
    }
    if tags.is_empty() {
        return Err(missing("Tag")());
    }
    Ok(tags)
}

fn matches_filters(instance: &Instance, filters: &[(String, Vec<String>)]) -> bool {
    filters.iter().all(|(name, values)| match name.as_str() {
        "instance-state-name" => values.iter().any(|v| v == instance.state.name()),
        "instance-id" => values.iter().any(|v| *v == instance.id),
        name => match name.strip_prefix("tag:") {
            Some(key) => instance
                .tags
                .get(key)
                .map(|tag| values.iter().any(|v| v == tag))
                .unwrap_or(false),
            // Unknown filter names match nothing, mirroring a strict
            // subset of EC2's filter vocabulary.
            None => false,
        },
    })
}
