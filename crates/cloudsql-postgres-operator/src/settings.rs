use crate::cloudsql::models::{
    ACL_ENTRY_KIND, ACTIVATION_POLICY_ALWAYS, AclEntry, BackupConfiguration, DatabaseFlag,
    DatabaseInstance, IpConfiguration, LocationPreference, MaintenanceWindow, Settings,
};
use crate::crds::postgresql_instance::{
    ANY, AVAILABILITY_REGIONAL, AuthorizedNetwork, DISK_TYPE_HDD, PostgresqlInstanceSpec,
};

pub fn availability_type_api_value(value: &str) -> &'static str {
    if value == AVAILABILITY_REGIONAL {
        "REGIONAL"
    } else {
        "ZONAL"
    }
}

pub fn disk_type_api_value(value: &str) -> &'static str {
    if value == DISK_TYPE_HDD { "PD_HDD" } else { "PD_SSD" }
}

pub fn version_api_value(_value: &str) -> &'static str {
    "POSTGRES_9_6"
}

pub fn zone_api_value(value: &str) -> &str {
    if value == ANY { "" } else { value }
}

pub fn maintenance_day_api_value(value: &str) -> i64 {
    match value {
        "Monday" => 1,
        "Tuesday" => 2,
        "Wednesday" => 3,
        "Thursday" => 4,
        "Friday" => 5,
        "Saturday" => 6,
        _ => 7,
    }
}

/// "HH:00" becomes HH; "Any" and anything unparseable become 0.
pub fn maintenance_hour_api_value(value: &str) -> i64 {
    value
        .split_once(':')
        .and_then(|(hour, _)| hour.parse().ok())
        .unwrap_or(0)
}

/// Entries not in the "<name>=<value>" format are skipped.
pub fn flags_api_value(flags: &[String]) -> Vec<DatabaseFlag> {
    flags
        .iter()
        .filter_map(|flag| {
            let (name, value) = flag.split_once('=')?;
            if value.contains('=') {
                return None;
            }
            Some(DatabaseFlag {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

pub fn authorized_networks_api_value(networks: &[AuthorizedNetwork]) -> Vec<AclEntry> {
    networks
        .iter()
        .map(|n| AclEntry {
            kind: ACL_ENTRY_KIND.to_string(),
            value: n.cidr.clone(),
            name: n.name.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn build_database_instance(spec: &PostgresqlInstanceSpec) -> DatabaseInstance {
    DatabaseInstance {
        name: spec.name.clone(),
        region: spec.region().to_string(),
        database_version: version_api_value(spec.version()).to_string(),
        settings: build_settings(spec),
        ..Default::default()
    }
}

pub fn build_settings(spec: &PostgresqlInstanceSpec) -> Settings {
    let maintenance_window = if spec.maintenance_day() == ANY {
        MaintenanceWindow::default()
    } else {
        MaintenanceWindow {
            day: maintenance_day_api_value(spec.maintenance_day()),
            hour: maintenance_hour_api_value(spec.maintenance_hour()),
            ..Default::default()
        }
    };
    let private_network = if spec.private_ip_enabled() {
        spec.private_network().to_string()
    } else {
        String::new()
    };
    let (storage_auto_resize, storage_auto_resize_limit) =
        if spec.disk_size_maximum_gb() == spec.disk_size_minimum_gb() {
            (false, 0)
        } else {
            (true, i64::from(spec.disk_size_maximum_gb()))
        };

    Settings {
        tier: spec.instance_type().to_string(),
        activation_policy: ACTIVATION_POLICY_ALWAYS.to_string(),
        availability_type: availability_type_api_value(spec.availability_type()).to_string(),
        backup_configuration: BackupConfiguration {
            enabled: spec.backups_enabled(),
            start_time: spec.backups_start_time().to_string(),
            ..Default::default()
        },
        database_flags: flags_api_value(spec.flags()),
        data_disk_size_gb: i64::from(spec.disk_size_minimum_gb()),
        data_disk_type: disk_type_api_value(spec.disk_type()).to_string(),
        ip_configuration: IpConfiguration {
            ipv4_enabled: spec.public_ip_enabled(),
            private_network,
            authorized_networks: authorized_networks_api_value(spec.authorized_networks()),
            ..Default::default()
        },
        location_preference: LocationPreference {
            zone: zone_api_value(spec.zone()).to_string(),
            ..Default::default()
        },
        maintenance_window,
        storage_auto_resize,
        storage_auto_resize_limit,
        user_labels: spec.labels.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// Brings the managed fields of `observed` in line with `spec`.
///
/// Only fields that differ are overwritten; everything else in `observed` is left
/// untouched. Returns the names of the fields that changed.
pub fn correct_drift(spec: &PostgresqlInstanceSpec, observed: &mut Settings) -> Vec<&'static str> {
    let desired = build_settings(spec);
    let mut changed = Vec::new();

    macro_rules! sync {
        ($name:literal, $($field:ident).+) => {
            if observed.$($field).+ != desired.$($field).+ {
                observed.$($field).+ = desired.$($field).+.clone();
                changed.push($name);
            }
        };
    }

    sync!("availabilityType", availability_type);
    sync!("backupConfiguration.enabled", backup_configuration.enabled);
    sync!("backupConfiguration.startTime", backup_configuration.start_time);
    sync!("databaseFlags", database_flags);
    sync!("dataDiskSizeGb", data_disk_size_gb);
    sync!("dataDiskType", data_disk_type);
    sync!("ipConfiguration.authorizedNetworks", ip_configuration.authorized_networks);
    sync!("ipConfiguration.ipv4Enabled", ip_configuration.ipv4_enabled);
    sync!("ipConfiguration.privateNetwork", ip_configuration.private_network);
    if spec.zone() != ANY {
        sync!("locationPreference.zone", location_preference.zone);
    }
    sync!("maintenanceWindow.day", maintenance_window.day);
    sync!("maintenanceWindow.hour", maintenance_window.hour);
    sync!("storageAutoResize", storage_auto_resize);
    sync!("storageAutoResizeLimit", storage_auto_resize_limit);
    sync!("tier", tier);
    sync!("userLabels", user_labels);

    changed
}
