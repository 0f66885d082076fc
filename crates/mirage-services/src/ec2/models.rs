//! EC2 resource model: instances, security groups, and the instance
//! lifecycle table.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use mirage_core::TransitionTable;

/// Instance lifecycle states with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn code(self) -> u16 {
        match self {
            InstanceState::Pending => 0,
            InstanceState::Running => 16,
            InstanceState::ShuttingDown => 32,
            InstanceState::Terminated => 48,
            InstanceState::Stopping => 64,
            InstanceState::Stopped => 80,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        }
    }

    pub fn as_value(self) -> Value {
        json!({ "code": self.code(), "name": self.name() })
    }
}

/// Lifecycle table for the instance kind.
///
/// The idempotency-vs-error policy is EC2's documented one: stopping a
/// stopped instance and terminating a terminated instance are no-ops;
/// starting a terminated instance and rebooting a non-running instance
/// are `IncorrectInstanceState`. `Settle` is the deterministic stand-in
/// for the asynchronous pending->running progression: it is applied on
/// the first lifecycle touch after launch.
pub static INSTANCE_LIFECYCLE: Lazy<TransitionTable<InstanceState>> = Lazy::new(|| {
    use InstanceState::*;
    TransitionTable::new("ec2-instance")
        .allow(Pending, "Settle", Running)
        .noop(Running, "Settle")
        .noop(Stopped, "Settle")
        .noop(Terminated, "Settle")
        // StartInstances
        .allow(Stopped, "StartInstances", Running)
        .noop(Running, "StartInstances")
        .reject(
            Terminated,
            "StartInstances",
            "IncorrectInstanceState",
            "The instance is not in a state from which it can be started",
        )
        // StopInstances
        .allow(Running, "StopInstances", Stopped)
        .noop(Stopped, "StopInstances")
        .reject(
            Terminated,
            "StopInstances",
            "IncorrectInstanceState",
            "The instance is not in a state from which it can be stopped",
        )
        // TerminateInstances
        .allow(Running, "TerminateInstances", Terminated)
        .allow(Stopped, "TerminateInstances", Terminated)
        .noop(Terminated, "TerminateInstances")
        // RebootInstances
        .noop(Running, "RebootInstances")
        .reject(
            Stopped,
            "RebootInstances",
            "IncorrectInstanceState",
            "The instance is not in a 'running' state",
        )
        .reject(
            Terminated,
            "RebootInstances",
            "IncorrectInstanceState",
            "The instance is not in a 'running' state",
        )
});

/// The transitional state name an operation reports while the stored
/// state has already settled (`StopInstances` answers `stopping` even
/// though the emulated instance is immediately `stopped`).
pub fn reported_transition(operation: &str, settled: InstanceState) -> InstanceState {
    match (operation, settled) {
        ("StopInstances", InstanceState::Stopped) => InstanceState::Stopping,
        ("TerminateInstances", InstanceState::Terminated) => InstanceState::ShuttingDown,
        (_, state) => state,
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub reservation_id: String,
    pub image_id: String,
    pub instance_type: String,
    pub state: InstanceState,
    pub launch_time: DateTime<Utc>,
    pub security_group_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    /// `instancesSet` item shape of the EC2 query wire format.
    pub fn as_value(&self, groups: &[(String, String)]) -> Value {
        json!({
            "instanceId": self.id,
            "imageId": self.image_id,
            "instanceState": self.state.as_value(),
            "instanceType": self.instance_type,
            "launchTime": self.launch_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            "groupSet": {
                "item": groups
                    .iter()
                    .map(|(id, name)| json!({ "groupId": id, "groupName": name }))
                    .collect::<Vec<_>>()
            },
            "tagSet": {
                "item": self
                    .tags
                    .iter()
                    .map(|(k, v)| json!({ "key": k, "value": v }))
                    .collect::<Vec<_>>()
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

impl SecurityGroup {
    pub fn as_value(&self, owner: &str) -> Value {
        json!({
            "ownerId": owner,
            "groupId": self.id,
            "groupName": self.name,
            "groupDescription": self.description,
        })
    }
}
