use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub const APPLICATION_NAME: &str = "cloudsql-postgres-operator";

pub const ALLOW_DELETION_ANNOTATION: &str = "cloudsql.travelaudience.com/allow-deletion";
pub const INSTANCE_NAME_ANNOTATION: &str = "cloudsql.travelaudience.com/postgresqlinstance-name";
pub const PROXY_INJECTED_ANNOTATION: &str = "cloudsql.travelaudience.com/proxy-injected";
pub const FINALIZER: &str = "cloudsql.travelaudience.com/cleanup";
pub const OWNER_LABEL: &str = "owner";

pub const AVAILABILITY_REGIONAL: &str = "Regional";
pub const AVAILABILITY_ZONAL: &str = "Zonal";
pub const DISK_TYPE_HDD: &str = "HDD";
pub const DISK_TYPE_SSD: &str = "SSD";
pub const VERSION_9_6: &str = "9.6";
/// Placeholder for zone, maintenance day and maintenance hour meaning "no preference".
pub const ANY: &str = "Any";

pub const DEFAULT_AVAILABILITY_TYPE: &str = AVAILABILITY_ZONAL;
pub const DEFAULT_BACKUPS_ENABLED: bool = true;
pub const DEFAULT_BACKUPS_START_TIME: &str = "00:00";
pub const DEFAULT_REGION: &str = "europe-west1";
pub const DEFAULT_ZONE: &str = ANY;
pub const DEFAULT_MAINTENANCE_DAY: &str = ANY;
pub const DEFAULT_MAINTENANCE_HOUR: &str = "04:00";
pub const DEFAULT_DISK_SIZE_MINIMUM_GB: i32 = 10;
pub const DEFAULT_DISK_SIZE_MAXIMUM_GB: i32 = 0;
pub const DEFAULT_DISK_TYPE: &str = DISK_TYPE_SSD;
pub const DEFAULT_INSTANCE_TYPE: &str = "db-custom-1-3840";
pub const DEFAULT_VERSION: &str = VERSION_9_6;

/// Desired state of a Cloud SQL for PostgreSQL instance.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cloudsql.travelaudience.com",
    version = "v1alpha1",
    kind = "PostgresqlInstance",
    plural = "postgresqlinstances",
    status = "PostgresqlInstanceStatus",
    shortname = "csqlp"
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlInstanceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<Availability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backups: Option<Backups>,
    /// Database flags, each in the "<name>=<value>" format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,
    /// User labels applied to the Cloud SQL instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<Maintenance>,
    /// Name of the Cloud SQL instance. Cannot be changed once set.
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networking: Option<Networking>,
    /// Skip reconciliation of this resource entirely.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// PostgreSQL version. Only "9.6" is supported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct Availability {
    /// Either "Regional" or "Zonal".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct Backups {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily: Option<DailyBackups>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DailyBackups {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Start of the daily backup window, in the "HH:00" format (UTC).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// A zone within the region, or "Any".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct Maintenance {
    /// "Any" or a day of the week ("Monday" to "Sunday").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    /// "Any" or an hour in the "HH:00" format (UTC).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<PrivateIp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<PublicIp>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct PrivateIp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Resource link of the VPC network the instance is peered with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicIp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_networks: Option<Vec<AuthorizedNetwork>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct AuthorizedNetwork {
    pub cidr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<Disk>,
    /// Cloud SQL machine type, e.g. "db-custom-1-3840".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Upper bound for automatic storage increases. 0 disables them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_maximum_gb: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_minimum_gb: Option<i32>,
    /// Either "HDD" or "SSD".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl PostgresqlInstanceSpec {
    pub fn availability_type(&self) -> &str {
        self.availability
            .as_ref()
            .and_then(|a| a.type_.as_deref())
            .unwrap_or(DEFAULT_AVAILABILITY_TYPE)
    }

    fn daily_backups(&self) -> Option<&DailyBackups> {
        self.backups.as_ref().and_then(|b| b.daily.as_ref())
    }

    pub fn backups_enabled(&self) -> bool {
        self.daily_backups()
            .and_then(|d| d.enabled)
            .unwrap_or(DEFAULT_BACKUPS_ENABLED)
    }

    pub fn backups_start_time(&self) -> &str {
        self.daily_backups()
            .and_then(|d| d.start_time.as_deref())
            .unwrap_or(DEFAULT_BACKUPS_START_TIME)
    }

    pub fn flags(&self) -> &[String] {
        self.flags.as_deref().unwrap_or_default()
    }

    pub fn region(&self) -> &str {
        self.location
            .as_ref()
            .and_then(|l| l.region.as_deref())
            .unwrap_or(DEFAULT_REGION)
    }

    pub fn zone(&self) -> &str {
        self.location
            .as_ref()
            .and_then(|l| l.zone.as_deref())
            .unwrap_or(DEFAULT_ZONE)
    }

    pub fn maintenance_day(&self) -> &str {
        self.maintenance
            .as_ref()
            .and_then(|m| m.day.as_deref())
            .unwrap_or(DEFAULT_MAINTENANCE_DAY)
    }

    pub fn maintenance_hour(&self) -> &str {
        self.maintenance
            .as_ref()
            .and_then(|m| m.hour.as_deref())
            .unwrap_or(DEFAULT_MAINTENANCE_HOUR)
    }

    fn private_ip(&self) -> Option<&PrivateIp> {
        self.networking.as_ref().and_then(|n| n.private_ip.as_ref())
    }

    fn public_ip(&self) -> Option<&PublicIp> {
        self.networking.as_ref().and_then(|n| n.public_ip.as_ref())
    }

    pub fn private_ip_enabled(&self) -> bool {
        self.private_ip().and_then(|p| p.enabled).unwrap_or(false)
    }

    pub fn private_network(&self) -> &str {
        self.private_ip()
            .and_then(|p| p.network.as_deref())
            .unwrap_or_default()
    }

    pub fn public_ip_enabled(&self) -> bool {
        self.public_ip().and_then(|p| p.enabled).unwrap_or(false)
    }

    pub fn authorized_networks(&self) -> &[AuthorizedNetwork] {
        self.public_ip()
            .and_then(|p| p.authorized_networks.as_deref())
            .unwrap_or_default()
    }

    fn disk(&self) -> Option<&Disk> {
        self.resources.as_ref().and_then(|r| r.disk.as_ref())
    }

    pub fn disk_size_minimum_gb(&self) -> i32 {
        self.disk()
            .and_then(|d| d.size_minimum_gb)
            .unwrap_or(DEFAULT_DISK_SIZE_MINIMUM_GB)
    }

    pub fn disk_size_maximum_gb(&self) -> i32 {
        self.disk()
            .and_then(|d| d.size_maximum_gb)
            .unwrap_or(DEFAULT_DISK_SIZE_MAXIMUM_GB)
    }

    pub fn disk_type(&self) -> &str {
        self.disk()
            .and_then(|d| d.type_.as_deref())
            .unwrap_or(DEFAULT_DISK_TYPE)
    }

    pub fn instance_type(&self) -> &str {
        self.resources
            .as_ref()
            .and_then(|r| r.instance_type.as_deref())
            .unwrap_or(DEFAULT_INSTANCE_TYPE)
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlInstanceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Connection name of the instance, used by the Cloud SQL proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ips: Option<Ips>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ips {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    Created,
    Ready,
    UpToDate,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reasons attached to conditions and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Conflict,
    InstanceCreated,
    InstanceNotReady,
    InstanceReady,
    InstanceUpdated,
    InstanceUpToDate,
    InvalidSpec,
    NameUnavailable,
    OperationInProgress,
    UnexpectedError,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Conflict => "Conflict",
            Reason::InstanceCreated => "InstanceCreated",
            Reason::InstanceNotReady => "InstanceNotReady",
            Reason::InstanceReady => "InstanceReady",
            Reason::InstanceUpdated => "InstanceUpdated",
            Reason::InstanceUpToDate => "InstanceUpToDate",
            Reason::InvalidSpec => "InvalidSpec",
            Reason::NameUnavailable => "NameUnavailable",
            Reason::OperationInProgress => "OperationInProgress",
            Reason::UnexpectedError => "UnexpectedError",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PostgresqlInstance {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == type_))
    }

    /// Records a condition, returning true when its status changed.
    ///
    /// `lastTransitionTime` only moves when the status does; reason and message
    /// are always overwritten.
    pub fn set_condition(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
    ) -> bool {
        let message = message.into();
        let conditions = &mut self.status.get_or_insert_with(Default::default).conditions;
        match conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                let transitioned = existing.status != status;
                if transitioned {
                    existing.status = status;
                    existing.last_transition_time = now_rfc3339();
                }
                existing.reason = reason.to_string();
                existing.message = message;
                transitioned
            }
            None => {
                conditions.push(Condition {
                    type_,
                    status,
                    reason: reason.to_string(),
                    message,
                    last_transition_time: now_rfc3339(),
                });
                true
            }
        }
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&Rfc3339).unwrap_or_default()
}
