//! Value types exchanged with the control plane.

use std::fmt;
use std::ops::Deref;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the wrapped value.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }
    };
}

newtype!(
    /// Name of a cluster node (for example `pve`).
    Node
);
newtype!(
    /// Unique process identifier the hypervisor assigns to an asynchronous task.
    Upid
);

/// Handle to a remote asynchronous operation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskHandle {
    /// Node the task runs on; status queries must target this node.
    pub node: Node,
    /// Opaque task identifier.
    pub upid: Upid,
}

impl TaskHandle {
    /// Creates a handle for `upid` running on `node`.
    #[must_use]
    pub fn new(node: impl Into<Node>, upid: impl Into<Upid>) -> Self {
        Self {
            node: node.into(),
            upid: upid.into(),
        }
    }
}

/// Version information reported by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VersionInfo {
    /// Product version (for example `8.2.4`).
    #[serde(default)]
    pub version: String,
    /// Release series.
    #[serde(default)]
    pub release: String,
    /// Repository commit identifier.
    #[serde(default)]
    pub repoid: String,
}

/// Cluster node listing entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeSummary {
    /// Node name.
    pub node: Node,
    /// Reported node status (`online`, `offline`, ...).
    #[serde(default)]
    pub status: String,
}

/// Virtual machine listing entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VmSummary {
    /// VM identifier.
    pub vmid: u32,
    /// Human readable name, when set.
    pub name: Option<String>,
    /// Node hosting the VM.
    pub node: Node,
    /// Power state (`running`, `stopped`, ...).
    pub status: String,
    /// Whether the VM is flagged as a template.
    pub template: bool,
    /// Number of virtual CPUs.
    pub cpus: Option<u32>,
    /// Maximum memory in bytes.
    pub maxmem: Option<u64>,
    /// Maximum disk size in bytes.
    pub maxdisk: Option<u64>,
}

/// Runtime status of a single VM.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VmStatus {
    /// Power state (`running`, `stopped`, ...).
    pub status: String,
    /// Uptime in seconds.
    #[serde(default)]
    pub uptime: Option<u64>,
    /// Configured VM name.
    #[serde(default)]
    pub name: Option<String>,
    /// CPU load as reported (a fraction of the allotted cores).
    #[serde(default)]
    pub cpu: Option<Number>,
    /// Memory in use, in bytes.
    #[serde(default)]
    pub mem: Option<u64>,
    /// Memory ceiling, in bytes.
    #[serde(default)]
    pub maxmem: Option<u64>,
}

impl VmStatus {
    /// Returns `true` when the VM reports the `running` state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// VM configuration as returned by the control plane.
///
/// The configuration is an open-ended key/value document; the accessors cover
/// the keys the provisioning flow relies on.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VmConfig(Map<String, Value>);

impl VmConfig {
    /// Wraps a raw configuration document.
    #[must_use]
    pub const fn new(entries: Map<String, Value>) -> Self {
        Self(entries)
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Iterates over the configuration entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns the configured VM name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Returns `true` when the `template` flag is set.
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.0.get("template").is_some_and(flag_is_set)
    }
}

/// Interprets a loosely typed boolean flag (`1`, `true`, `"1"`).
pub(crate) fn flag_is_set(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_u64().is_some_and(|raw| raw != 0),
        Value::String(text) => matches!(text.trim(), "1" | "true" | "yes"),
        _ => false,
    }
}

/// Status document for a remote task.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TaskStatus {
    /// `running` while in progress, `stopped` once terminal.
    pub status: String,
    /// Exit status, present once the task stopped (`OK` on success).
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    /// Returns `true` once the task reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status == "stopped"
    }

    /// Returns `true` when the task stopped with the `OK` exit status.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_terminal() && self.exitstatus.as_deref() == Some("OK")
    }
}

/// Network interface reported by the guest agent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GuestInterface {
    /// Interface name inside the guest (for example `eth0`).
    #[serde(default)]
    pub name: String,
    /// MAC address.
    #[serde(default, rename = "hardware-address")]
    pub hardware_address: Option<String>,
    /// Addresses bound to the interface.
    #[serde(default, rename = "ip-addresses")]
    pub ip_addresses: Vec<GuestIpAddress>,
}

/// Single address bound to a guest interface.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GuestIpAddress {
    /// Textual address.
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    /// Address family (`ipv4` or `ipv6`).
    #[serde(default, rename = "ip-address-type")]
    pub ip_address_type: String,
    /// Prefix length.
    #[serde(default)]
    pub prefix: Option<u8>,
}

/// Ordered key/value parameters sent when creating or updating a VM.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigParams(IndexMap<String, String>);

impl ConfigParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Builder form of [`ConfigParams::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Copies every entry of `other` into `self`.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns `true` when no parameters are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Parameters for a clone submission.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CloneOptions {
    /// Name of the new VM.
    pub name: String,
    /// Full clone (`true`) or linked clone (`false`).
    pub full: bool,
    /// Target storage; only honoured for full clones.
    pub storage: Option<String>,
    /// Target node when it differs from the template's node.
    pub target: Option<Node>,
    /// Description applied to the new VM.
    pub description: Option<String>,
}

impl CloneOptions {
    /// Renders the options as control-plane parameters for `new_id`.
    #[must_use]
    pub fn to_params(&self, new_id: u32) -> ConfigParams {
        let mut params = ConfigParams::new()
            .with("newid", new_id)
            .with("full", u8::from(self.full))
            .with("name", &self.name);
        if self.full
            && let Some(storage) = &self.storage
        {
            params.set("storage", storage);
        }
        if let Some(target) = &self.target {
            params.set("target", target);
        }
        if let Some(description) = &self.description {
            params.set("description", description);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(1), true)]
    #[case(json!(0), false)]
    #[case(json!(true), true)]
    #[case(json!("1"), true)]
    #[case(json!("0"), false)]
    #[case(json!(null), false)]
    fn flag_is_set_accepts_loose_booleans(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(flag_is_set(&value), expected);
    }

    #[test]
    fn task_status_requires_ok_exit_for_success() {
        let stopped_ok = TaskStatus {
            status: String::from("stopped"),
            exitstatus: Some(String::from("OK")),
        };
        let stopped_err = TaskStatus {
            status: String::from("stopped"),
            exitstatus: Some(String::from("unable to create VM")),
        };
        let running = TaskStatus {
            status: String::from("running"),
            exitstatus: None,
        };

        assert!(stopped_ok.succeeded());
        assert!(stopped_err.is_terminal() && !stopped_err.succeeded());
        assert!(!running.is_terminal());
    }

    #[test]
    fn linked_clone_omits_storage() {
        let options = CloneOptions {
            name: String::from("srv-01"),
            full: false,
            storage: Some(String::from("local-lvm")),
            target: None,
            description: None,
        };
        let params = options.to_params(200);

        assert_eq!(params.get("full"), Some("0"));
        assert_eq!(params.get("newid"), Some("200"));
        assert_eq!(params.get("storage"), None);
    }

    #[test]
    fn full_clone_to_other_node_sets_target() {
        let options = CloneOptions {
            name: String::from("srv-01"),
            full: true,
            storage: Some(String::from("local-lvm")),
            target: Some(Node::from("pve2")),
            description: Some(String::from("web tier")),
        };
        let params = options.to_params(201);

        assert_eq!(params.get("storage"), Some("local-lvm"));
        assert_eq!(params.get("target"), Some("pve2"));
        assert_eq!(params.get("description"), Some("web tier"));
    }

    #[test]
    fn vm_config_reads_template_flag() {
        let config: VmConfig =
            serde_json::from_value(json!({"name": "ubuntu-tpl", "template": 1}))
                .unwrap_or_else(|err| panic!("config should decode: {err}"));
        assert!(config.is_template());
        assert_eq!(config.name(), Some("ubuntu-tpl"));
    }
}
