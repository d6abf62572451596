//! Defaulting and validation of `PostgresqlInstance` resources.
//!
//! Each stage sees the candidate as left by the previous stages and, on updates,
//! the object currently stored. The first failing stage decides the response.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::cloudsql::CloudSqlApi;
use crate::crds::postgresql_instance::*;
use crate::error::ValidationError;

const NAME_PATTERN: &str = "^[a-z][a-z0-9-]+[a-z0-9]$";
/// Bound on the length of the instance name plus the project id.
const NAME_PROJECT_ID_MAX_LENGTH: usize = 97;
const DISK_SIZE_MINIMUM_GB_LOWER_BOUND: i32 = 10;
const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(NAME_PATTERN).unwrap_or_else(|e| panic!("invalid instance name pattern: {e}"))
});
static HOUR_OF_DAY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^([01][0-9]|2[0-3]):00$").unwrap_or_else(|e| panic!("invalid hour pattern: {e}"))
});

/// Values the pipeline needs beyond the objects themselves.
#[derive(Debug, Clone)]
pub struct AdmissionParams {
    pub project_id: String,
}

type Step = fn(
    &mut PostgresqlInstance,
    Option<&PostgresqlInstance>,
    &AdmissionParams,
) -> Result<(), ValidationError>;

enum Stage {
    Step(Step),
    /// Rejects names already taken by a Cloud SQL instance (creation only).
    NameAvailability,
}

const PIPELINE: &[Stage] = &[
    Stage::Step(default_annotations),
    Stage::Step(availability),
    Stage::Step(daily_backups),
    Stage::Step(flags),
    Stage::Step(labels),
    Stage::Step(location),
    Stage::Step(maintenance),
    Stage::Step(name),
    Stage::NameAvailability,
    Stage::Step(networking),
    Stage::Step(resources),
    Stage::Step(version),
];

/// Runs the pipeline over `current`, returning the defaulted object.
pub async fn validate_and_mutate(
    current: &PostgresqlInstance,
    previous: Option<&PostgresqlInstance>,
    params: &AdmissionParams,
    cloudsql: &dyn CloudSqlApi,
) -> Result<PostgresqlInstance, ValidationError> {
    let mut candidate = current.clone();
    for stage in PIPELINE {
        match stage {
            Stage::Step(step) => step(&mut candidate, previous, params)?,
            Stage::NameAvailability if previous.is_none() => {
                ensure_name_available(&candidate.spec.name, cloudsql).await?
            }
            Stage::NameAvailability => {}
        }
    }
    Ok(candidate)
}

/// Deletion is only admitted once the allow-deletion annotation is "true".
pub fn check_deletion(stored: &PostgresqlInstance) -> Result<(), ValidationError> {
    let allowed = stored
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ALLOW_DELETION_ANNOTATION))
        .is_some_and(|v| v == "true");
    if allowed {
        Ok(())
    } else {
        Err(ValidationError::new(format!(
            "the resource cannot be deleted unless the {ALLOW_DELETION_ANNOTATION:?} annotation is set to \"true\""
        )))
    }
}

async fn ensure_name_available(
    name: &str,
    cloudsql: &dyn CloudSqlApi,
) -> Result<(), ValidationError> {
    match cloudsql.get_instance(name).await {
        Ok(_) => Err(ValidationError::new(format!(
            "the name {name:?} is already in use by an instance"
        ))),
        Err(e) if e.is_not_found() => {
            debug!(name, "instance name is available");
            Ok(())
        }
        Err(e) => Err(ValidationError::new(format!(
            "failed to check whether {name:?} can be used as an instance name: {e}"
        ))),
    }
}

pub fn default_annotations(
    candidate: &mut PostgresqlInstance,
    _: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let annotations = candidate.metadata.annotations.get_or_insert_with(Default::default);
    let value = annotations
        .entry(ALLOW_DELETION_ANNOTATION.to_string())
        .or_default();
    if value.is_empty() {
        *value = "false".into();
    }
    Ok(())
}

pub fn availability(
    candidate: &mut PostgresqlInstance,
    _: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let type_ = candidate
        .spec
        .availability
        .get_or_insert_with(Default::default)
        .type_
        .get_or_insert_with(|| DEFAULT_AVAILABILITY_TYPE.into());
    match type_.as_str() {
        AVAILABILITY_REGIONAL | AVAILABILITY_ZONAL => Ok(()),
        other => Err(ValidationError::new(format!(
            "the availability type of the instance must be one of {AVAILABILITY_REGIONAL:?} or {AVAILABILITY_ZONAL:?} (got {other:?})"
        ))),
    }
}

pub fn daily_backups(
    candidate: &mut PostgresqlInstance,
    _: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let daily = candidate
        .spec
        .backups
        .get_or_insert_with(Default::default)
        .daily
        .get_or_insert_with(Default::default);
    daily.enabled.get_or_insert(DEFAULT_BACKUPS_ENABLED);
    let start_time = daily
        .start_time
        .get_or_insert_with(|| DEFAULT_BACKUPS_START_TIME.into());
    if !HOUR_OF_DAY_REGEX.is_match(start_time) {
        return Err(ValidationError::new(format!(
            "the start time for daily backups of the instance must be a valid hour of the day in 24-hour format (got {start_time:?})"
        )));
    }
    Ok(())
}

pub fn flags(
    candidate: &mut PostgresqlInstance,
    _: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let flags = candidate.spec.flags.get_or_insert_with(Vec::new);
    match flags.iter().find(|f| f.split('=').count() != 2) {
        Some(flag) => Err(ValidationError::new(format!(
            "flags must be specified in the \"<name>=<value>\" format (got {flag:?})"
        ))),
        None => Ok(()),
    }
}

pub fn labels(
    candidate: &mut PostgresqlInstance,
    _: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    candidate
        .spec
        .labels
        .get_or_insert_with(Default::default)
        .insert(OWNER_LABEL.into(), APPLICATION_NAME.into());
    Ok(())
}

pub fn location(
    candidate: &mut PostgresqlInstance,
    previous: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let location = candidate.spec.location.get_or_insert_with(Default::default);
    let region = location.region.get_or_insert_with(|| DEFAULT_REGION.into());
    location.zone.get_or_insert_with(|| DEFAULT_ZONE.into());
    // Only a region the stored object actually carries is pinned.
    if let Some(had) = previous
        .and_then(|p| p.spec.location.as_ref())
        .and_then(|l| l.region.as_deref())
        && had != region.as_str()
    {
        return Err(ValidationError::new(format!(
            "the region where the instance is located cannot be changed (had {had:?}, got {region:?})"
        )));
    }
    Ok(())
}

pub fn maintenance(
    candidate: &mut PostgresqlInstance,
    _: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let maintenance = candidate.spec.maintenance.get_or_insert_with(Default::default);
    let day = maintenance
        .day
        .get_or_insert_with(|| DEFAULT_MAINTENANCE_DAY.into());
    if day != ANY && !WEEKDAYS.contains(&day.as_str()) {
        return Err(ValidationError::new(format!(
            "the day of the week for periodic maintenance must be {ANY:?} or a valid weekday (got {day:?})"
        )));
    }
    let hour = maintenance
        .hour
        .get_or_insert_with(|| DEFAULT_MAINTENANCE_HOUR.into());
    if hour != ANY && !HOUR_OF_DAY_REGEX.is_match(hour) {
        return Err(ValidationError::new(format!(
            "the hour of the day for periodic maintenance must be {ANY:?} or a valid hour of the day in 24-hour format (got {hour:?})"
        )));
    }
    Ok(())
}

pub fn name(
    candidate: &mut PostgresqlInstance,
    previous: Option<&PostgresqlInstance>,
    params: &AdmissionParams,
) -> Result<(), ValidationError> {
    let name = &candidate.spec.name;
    if let Some(previous) = previous
        && previous.spec.name != *name
    {
        return Err(ValidationError::new(format!(
            "the name of the instance cannot be changed (had {:?}, got {:?})",
            previous.spec.name, name
        )));
    }
    if name.is_empty() {
        return Err(ValidationError::new("the name of the instance cannot be empty"));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(ValidationError::new(format!(
            "the name of the instance must match the {NAME_PATTERN:?} regular expression (got {name:?})"
        )));
    }
    if name.len() + params.project_id.len() > NAME_PROJECT_ID_MAX_LENGTH {
        return Err(ValidationError::new(format!(
            "the name of the instance must not exceed {} characters (got {name:?})",
            NAME_PROJECT_ID_MAX_LENGTH.saturating_sub(params.project_id.len())
        )));
    }
    Ok(())
}

pub fn networking(
    candidate: &mut PostgresqlInstance,
    previous: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let networking = candidate.spec.networking.get_or_insert_with(Default::default);
    let private_ip = networking.private_ip.get_or_insert_with(Default::default);
    let private_enabled = *private_ip.enabled.get_or_insert(false);
    let private_network = private_ip.network.get_or_insert_with(String::new).clone();
    let public_ip = networking.public_ip.get_or_insert_with(Default::default);
    let public_enabled = *public_ip.enabled.get_or_insert(false);
    public_ip.authorized_networks.get_or_insert_with(Vec::new);

    if let Some(previous) = previous {
        if previous.spec.private_ip_enabled() && !private_enabled {
            return Err(ValidationError::new(
                "private ip access to the instance cannot be disabled after having been enabled",
            ));
        }
        if !previous.spec.private_network().is_empty() && private_network.is_empty() {
            return Err(ValidationError::new(
                "the resource link of the vpc network for the instance cannot be removed",
            ));
        }
    }
    if !private_enabled && !public_enabled {
        return Err(ValidationError::new(
            "at least one of private or public ip access to the instance must be enabled",
        ));
    }
    if private_enabled && private_network.is_empty() {
        return Err(ValidationError::new(
            "the resource link of the vpc network for the instance cannot be empty",
        ));
    }
    Ok(())
}

pub fn resources(
    candidate: &mut PostgresqlInstance,
    previous: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    let resources = candidate.spec.resources.get_or_insert_with(Default::default);
    resources
        .instance_type
        .get_or_insert_with(|| DEFAULT_INSTANCE_TYPE.into());
    let disk = resources.disk.get_or_insert_with(Default::default);
    let maximum = *disk.size_maximum_gb.get_or_insert(DEFAULT_DISK_SIZE_MAXIMUM_GB);
    let minimum = *disk.size_minimum_gb.get_or_insert(DEFAULT_DISK_SIZE_MINIMUM_GB);
    let type_ = disk
        .type_
        .get_or_insert_with(|| DEFAULT_DISK_TYPE.into())
        .as_str();

    if let Some(previous) = previous {
        let had = previous.spec.disk_size_minimum_gb();
        if minimum < had {
            return Err(ValidationError::new(format!(
                "the minimum disk size for the instance cannot be decreased (had \"{had}\", got \"{minimum}\")"
            )));
        }
        if previous.spec.disk_type() != type_ {
            return Err(ValidationError::new(format!(
                "the disk type for the instance cannot be changed (had {:?}, got {:?})",
                previous.spec.disk_type(),
                type_
            )));
        }
    }
    if minimum < DISK_SIZE_MINIMUM_GB_LOWER_BOUND {
        return Err(ValidationError::new(format!(
            "the minimum disk size in gb for the instance is {DISK_SIZE_MINIMUM_GB_LOWER_BOUND} (got \"{minimum}\")"
        )));
    }
    if maximum != 0 && maximum < minimum {
        return Err(ValidationError::new(format!(
            "the maximum disk size in gb for the instance must be 0 or at least {minimum} (got \"{maximum}\")"
        )));
    }
    if type_ != DISK_TYPE_HDD && type_ != DISK_TYPE_SSD {
        return Err(ValidationError::new(format!(
            "the disk type for the instance must be one of {DISK_TYPE_HDD:?} or {DISK_TYPE_SSD:?} (got {type_:?})"
        )));
    }
    Ok(())
}

pub fn version(
    candidate: &mut PostgresqlInstance,
    previous: Option<&PostgresqlInstance>,
    _: &AdmissionParams,
) -> Result<(), ValidationError> {
    match previous {
        // An update may omit the version; it then keeps the stored one.
        Some(previous) => {
            let version = candidate
                .spec
                .version
                .get_or_insert_with(|| previous.spec.version().to_string());
            if version.as_str() != previous.spec.version() {
                return Err(ValidationError::new(
                    "the version of the instance cannot be changed",
                ));
            }
        }
        None => {
            candidate
                .spec
                .version
                .get_or_insert_with(|| DEFAULT_VERSION.into());
        }
    }
    let version = candidate.spec.version();
    if version != VERSION_9_6 {
        return Err(ValidationError::new(format!(
            "the version of the instance must be {VERSION_9_6:?} (got {version:?})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests_postgresql_instance_admission {
    use super::*;
    use crate::patch::create_patch;
    use crate::test_utils::{FakeCloudSql, test_instance};
    use crate::cloudsql::DatabaseInstance;

    fn params() -> AdmissionParams {
        AdmissionParams {
            project_id: "my-project".into(),
        }
    }

    async fn admit(
        current: &PostgresqlInstance,
        previous: Option<&PostgresqlInstance>,
    ) -> Result<PostgresqlInstance, ValidationError> {
        validate_and_mutate(current, previous, &params(), &FakeCloudSql::default()).await
    }

    async fn admitted(name: &str) -> PostgresqlInstance {
        admit(&test_instance(name), None).await.unwrap()
    }

    #[tokio::test]
    async fn minimal_spec_is_fully_defaulted() {
        let pi = admitted("db-1").await;
        assert_eq!(pi.spec.availability_type(), "Zonal");
        assert_eq!(
            pi.spec.resources.as_ref().unwrap().instance_type.as_deref(),
            Some("db-custom-1-3840")
        );
        assert_eq!(pi.spec.version.as_deref(), Some("9.6"));
        let public = pi.spec.networking.as_ref().unwrap().public_ip.as_ref().unwrap();
        assert_eq!(public.authorized_networks, Some(vec![]));
        assert_eq!(
            pi.spec.labels.as_ref().unwrap().get("owner").map(String::as_str),
            Some("cloudsql-postgres-operator")
        );
        assert_eq!(
            pi.metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ALLOW_DELETION_ANNOTATION)
                .map(String::as_str),
            Some("false")
        );
        assert_eq!(pi.spec.flags, Some(vec![]));
        assert_eq!(pi.spec.maintenance_day(), "Any");
        assert_eq!(pi.spec.maintenance_hour(), "04:00");
    }

    #[tokio::test]
    async fn defaulting_is_idempotent() {
        let once = admitted("db-1").await;
        let twice = admit(&once, None).await.unwrap();
        assert!(create_patch(&once, &twice).unwrap().0.is_empty());

        // Updates of an unchanged stored object produce no patch either.
        let again = admit(&once, Some(&once)).await.unwrap();
        assert!(create_patch(&once, &again).unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn owner_label_cannot_be_overridden() {
        let mut pi = test_instance("db-1");
        pi.spec.labels = Some([("owner".to_string(), "me".to_string())].into());
        let pi = admit(&pi, None).await.unwrap();
        assert_eq!(pi.spec.labels.unwrap()["owner"], "cloudsql-postgres-operator");
    }

    #[tokio::test]
    async fn immutable_fields_are_rejected_on_update() {
        let stored = admitted("db-1").await;

        let mut changed = stored.clone();
        changed.spec.name = "db-2".into();
        assert_eq!(
            admit(&changed, Some(&stored)).await.unwrap_err().to_string(),
            "the name of the instance cannot be changed (had \"db-1\", got \"db-2\")"
        );

        let mut changed = stored.clone();
        changed.spec.location.as_mut().unwrap().region = Some("us-east1".into());
        assert_eq!(
            admit(&changed, Some(&stored)).await.unwrap_err().to_string(),
            "the region where the instance is located cannot be changed (had \"europe-west1\", got \"us-east1\")"
        );

        let mut changed = stored.clone();
        changed.spec.version = Some("11".into());
        assert_eq!(
            admit(&changed, Some(&stored)).await.unwrap_err().to_string(),
            "the version of the instance cannot be changed"
        );

        let mut changed = stored.clone();
        changed
            .spec
            .resources
            .as_mut()
            .unwrap()
            .disk
            .as_mut()
            .unwrap()
            .type_ = Some("HDD".into());
        assert_eq!(
            admit(&changed, Some(&stored)).await.unwrap_err().to_string(),
            "the disk type for the instance cannot be changed (had \"SSD\", got \"HDD\")"
        );

        let mut grown = stored.clone();
        grown
            .spec
            .resources
            .as_mut()
            .unwrap()
            .disk
            .as_mut()
            .unwrap()
            .size_minimum_gb = Some(20);
        let grown = admit(&grown, Some(&stored)).await.unwrap();
        let mut shrunk = grown.clone();
        shrunk
            .spec
            .resources
            .as_mut()
            .unwrap()
            .disk
            .as_mut()
            .unwrap()
            .size_minimum_gb = Some(15);
        assert_eq!(
            admit(&shrunk, Some(&grown)).await.unwrap_err().to_string(),
            "the minimum disk size for the instance cannot be decreased (had \"20\", got \"15\")"
        );
    }

    #[tokio::test]
    async fn update_without_version_keeps_the_stored_one() {
        let stored = admitted("db-1").await;
        let mut candidate = stored.clone();
        candidate.spec.version = None;
        let admitted = admit(&candidate, Some(&stored)).await.unwrap();
        assert_eq!(admitted.spec.version.as_deref(), Some("9.6"));
    }

    #[tokio::test]
    async fn networking_rules() {
        let mut pi = test_instance("db-1");
        pi.spec.networking = None;
        assert_eq!(
            admit(&pi, None).await.unwrap_err().to_string(),
            "at least one of private or public ip access to the instance must be enabled"
        );

        let mut private = test_instance("db-1");
        let networking = private.spec.networking.as_mut().unwrap();
        networking.private_ip = Some(PrivateIp {
            enabled: Some(true),
            network: None,
        });
        assert_eq!(
            admit(&private, None).await.unwrap_err().to_string(),
            "the resource link of the vpc network for the instance cannot be empty"
        );

        private
            .spec
            .networking
            .as_mut()
            .unwrap()
            .private_ip
            .as_mut()
            .unwrap()
            .network = Some("projects/p/global/networks/default".into());
        let stored = admit(&private, None).await.unwrap();
        let mut disabled = stored.clone();
        disabled
            .spec
            .networking
            .as_mut()
            .unwrap()
            .private_ip
            .as_mut()
            .unwrap()
            .enabled = Some(false);
        assert_eq!(
            admit(&disabled, Some(&stored)).await.unwrap_err().to_string(),
            "private ip access to the instance cannot be disabled after having been enabled"
        );
    }

    #[tokio::test]
    async fn private_network_link_cannot_be_removed() {
        let mut private = test_instance("db-1");
        private.spec.networking.as_mut().unwrap().private_ip = Some(PrivateIp {
            enabled: Some(true),
            network: Some("projects/p/global/networks/default".into()),
        });
        let stored = admit(&private, None).await.unwrap();

        let mut unlinked = stored.clone();
        unlinked
            .spec
            .networking
            .as_mut()
            .unwrap()
            .private_ip
            .as_mut()
            .unwrap()
            .network = Some(String::new());
        assert_eq!(
            admit(&unlinked, Some(&stored)).await.unwrap_err().to_string(),
            "the resource link of the vpc network for the instance cannot be removed"
        );
    }

    #[tokio::test]
    async fn region_is_only_pinned_once_stored() {
        // Stored before defaulting ran: no location at all.
        let stored = test_instance("db-1");
        assert!(stored.spec.location.is_none());

        let mut moved = stored.clone();
        moved.spec.location = Some(Location {
            region: Some("us-east1".into()),
            zone: None,
        });
        let admitted = admit(&moved, Some(&stored)).await.unwrap();
        assert_eq!(admitted.spec.region(), "us-east1");

        let mut moved_again = admitted.clone();
        moved_again.spec.location.as_mut().unwrap().region = Some("asia-east1".into());
        assert_eq!(
            admit(&moved_again, Some(&admitted)).await.unwrap_err().to_string(),
            "the region where the instance is located cannot be changed (had \"us-east1\", got \"asia-east1\")"
        );
    }

    #[tokio::test]
    async fn malformed_values_are_rejected() {
        let mut pi = test_instance("db-1");
        pi.spec.flags = Some(vec!["max_connections".into()]);
        assert_eq!(
            admit(&pi, None).await.unwrap_err().to_string(),
            "flags must be specified in the \"<name>=<value>\" format (got \"max_connections\")"
        );

        let mut pi = test_instance("db-1");
        pi.spec.maintenance = Some(Maintenance {
            day: Some("Funday".into()),
            hour: None,
        });
        assert!(admit(&pi, None).await.unwrap_err().to_string().contains("Funday"));

        let mut pi = test_instance("db-1");
        pi.spec.maintenance = Some(Maintenance {
            day: Some("Sunday".into()),
            hour: Some("24:00".into()),
        });
        assert!(admit(&pi, None).await.is_err());
        pi.spec.maintenance.as_mut().unwrap().hour = Some("23:00".into());
        assert!(admit(&pi, None).await.is_ok());

        let mut pi = test_instance("db-1");
        pi.spec.availability = Some(Availability {
            type_: Some("Global".into()),
        });
        assert!(admit(&pi, None).await.is_err());

        let mut pi = test_instance("db-1");
        pi.spec.resources = Some(Resources {
            disk: Some(Disk {
                size_minimum_gb: Some(20),
                size_maximum_gb: Some(15),
                type_: None,
            }),
            instance_type: None,
        });
        assert_eq!(
            admit(&pi, None).await.unwrap_err().to_string(),
            "the maximum disk size in gb for the instance must be 0 or at least 20 (got \"15\")"
        );
    }

    #[tokio::test]
    async fn names_are_checked() {
        for bad in ["", "Db-1", "db-", "1db"] {
            let pi = PostgresqlInstance::new("x", PostgresqlInstanceSpec {
                name: bad.into(),
                ..test_instance("x").spec
            });
            assert!(admit(&pi, None).await.is_err(), "{bad:?} should be rejected");
        }

        let long = format!("a{}", "b".repeat(90));
        let err = admit(&test_instance(&long), None).await.unwrap_err();
        assert!(err.to_string().contains("must not exceed 87 characters"));
    }

    #[tokio::test]
    async fn names_taken_remotely_are_rejected_on_create_only() {
        let cloudsql = FakeCloudSql::with_instance(DatabaseInstance {
            name: "db-1".into(),
            ..Default::default()
        });
        let pi = test_instance("db-1");
        let err = validate_and_mutate(&pi, None, &params(), &cloudsql)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "the name \"db-1\" is already in use by an instance");

        let stored = admitted("db-1").await;
        assert!(
            validate_and_mutate(&stored, Some(&stored), &params(), &cloudsql)
                .await
                .is_ok()
        );
    }

    #[test]
    fn deletion_requires_the_annotation() {
        let mut pi = test_instance("db-1");
        assert_eq!(
            check_deletion(&pi).unwrap_err().to_string(),
            "the resource cannot be deleted unless the \"cloudsql.travelaudience.com/allow-deletion\" annotation is set to \"true\""
        );
        pi.metadata.annotations = Some(
            [(ALLOW_DELETION_ANNOTATION.to_string(), "true".to_string())].into(),
        );
        assert!(check_deletion(&pi).is_ok());
    }
}
