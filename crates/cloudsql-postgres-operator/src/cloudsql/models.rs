//! Subset of the Cloud SQL Admin API v1beta4 resources used by the operator.
//!
//! Fields the operator does not manage are kept in `extra` so that an observed
//! instance can be sent back unchanged apart from the settings being corrected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATE_RUNNABLE: &str = "RUNNABLE";
pub const ACTIVATION_POLICY_ALWAYS: &str = "ALWAYS";
pub const OPERATION_DONE: &str = "DONE";
pub const IP_TYPE_PRIVATE: &str = "PRIVATE";
pub const IP_TYPE_PRIMARY: &str = "PRIMARY";
pub const ACL_ENTRY_KIND: &str = "sql#aclEntry";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpMapping>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DatabaseInstance {
    /// Address of the given type ("PRIVATE" or "PRIMARY"), if assigned.
    pub fn ip_address(&self, type_: &str) -> Option<&str> {
        self.ip_addresses
            .iter()
            .find(|ip| ip.type_ == type_)
            .map(|ip| ip.ip_address.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(default)]
    pub ip_address: String,
    #[serde(default, rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activation_policy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_type: String,
    #[serde(default)]
    pub backup_configuration: BackupConfiguration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database_flags: Vec<DatabaseFlag>,
    #[serde(default, with = "int64")]
    pub data_disk_size_gb: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_disk_type: String,
    #[serde(default)]
    pub ip_configuration: IpConfiguration,
    #[serde(default)]
    pub location_preference: LocationPreference,
    #[serde(default)]
    pub maintenance_window: MaintenanceWindow,
    #[serde(default)]
    pub storage_auto_resize: bool,
    #[serde(default, with = "int64")]
    pub storage_auto_resize_limit: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start_time: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseFlag {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    #[serde(default)]
    pub ipv4_enabled: bool,
    // Always sent: an empty value is how private IP access is left unconfigured.
    #[serde(default)]
    pub private_network: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_networks: Vec<AclEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclEntry {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPreference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub day: i64,
    #[serde(default)]
    pub hour: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub operation_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrors>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }

    pub fn errors(&self) -> &[OperationError] {
        self.error
            .as_ref()
            .map(|e| e.errors.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationsList {
    #[serde(default)]
    pub items: Vec<Operation>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct User {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

/// The Admin API encodes int64 values as JSON strings.
mod int64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(i64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map_err(D::Error::custom),
            Repr::Num(n) => Ok(n),
        }
    }
}
