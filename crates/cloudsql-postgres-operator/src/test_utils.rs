//! In-memory stand-ins for the Kubernetes API and the Cloud SQL Admin API.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::events::EventType;

use crate::cloudsql::models::{IP_TYPE_PRIMARY, IP_TYPE_PRIVATE, IpMapping, OPERATION_DONE};
use crate::cloudsql::{CloudSqlApi, CloudSqlError, DatabaseInstance, Operation};
use crate::crds::postgresql_instance::{
    Networking, PostgresqlInstance, PostgresqlInstanceSpec, PublicIp, Reason,
};
use crate::store::ResourceStore;

pub fn minimal_spec(name: &str) -> PostgresqlInstanceSpec {
    PostgresqlInstanceSpec {
        name: name.to_string(),
        networking: Some(Networking {
            private_ip: None,
            public_ip: Some(PublicIp {
                enabled: Some(true),
                authorized_networks: None,
            }),
        }),
        ..Default::default()
    }
}

pub fn test_instance(name: &str) -> PostgresqlInstance {
    let mut instance = PostgresqlInstance::new(name, minimal_spec(name));
    instance.metadata.uid = Some(format!("{name}-uid"));
    instance.metadata.resource_version = Some("1".into());
    instance
}

fn serde_error() -> kube::Error {
    kube::Error::SerdeError(serde_json::from_str::<()>("not json").unwrap_err())
}

#[derive(Default)]
pub struct FakeCloudSqlState {
    pub instances: BTreeMap<String, DatabaseInstance>,
    /// Most recent first, per instance.
    pub operations: BTreeMap<String, Vec<Operation>>,
    pub inserts: Vec<DatabaseInstance>,
    pub updates: Vec<DatabaseInstance>,
    pub deletes: Vec<String>,
    pub passwords: Vec<(String, String, String)>,
    pub get_error: Option<u16>,
    pub insert_error: Option<u16>,
    pub update_error: Option<u16>,
}

#[derive(Default)]
pub struct FakeCloudSql {
    pub state: Mutex<FakeCloudSqlState>,
}

impl FakeCloudSql {
    pub fn with_instance(instance: DatabaseInstance) -> Self {
        let fake = Self::default();
        fake.state
            .lock()
            .unwrap()
            .instances
            .insert(instance.name.clone(), instance);
        fake
    }

    fn record_operation(state: &mut FakeCloudSqlState, instance: &str, type_: &str) -> Operation {
        let ops = state.operations.entry(instance.to_string()).or_default();
        let op = Operation {
            name: format!("op-{}", ops.len() + 1),
            operation_type: type_.to_string(),
            status: OPERATION_DONE.to_string(),
            error: None,
        };
        ops.insert(0, op.clone());
        op
    }
}

/// A remote instance as Cloud SQL reports it once it is up.
pub fn running_instance(requested: &DatabaseInstance) -> DatabaseInstance {
    let mut ip_addresses = Vec::new();
    if !requested.settings.ip_configuration.private_network.is_empty() {
        ip_addresses.push(IpMapping {
            ip_address: "10.0.0.3".into(),
            type_: IP_TYPE_PRIVATE.into(),
        });
    }
    if requested.settings.ip_configuration.ipv4_enabled {
        ip_addresses.push(IpMapping {
            ip_address: "35.0.0.3".into(),
            type_: IP_TYPE_PRIMARY.into(),
        });
    }
    let mut settings = requested.settings.clone();
    settings
        .extra
        .insert("settingsVersion".into(), serde_json::json!("1"));
    DatabaseInstance {
        state: "RUNNABLE".into(),
        connection_name: format!("project:{}:{}", requested.region, requested.name),
        ip_addresses,
        settings,
        ..requested.clone()
    }
}

#[async_trait]
impl CloudSqlApi for FakeCloudSql {
    async fn get_instance(&self, name: &str) -> Result<DatabaseInstance, CloudSqlError> {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.get_error {
            return Err(CloudSqlError::from_status(status, "injected".into()));
        }
        state
            .instances
            .get(name)
            .cloned()
            .ok_or_else(|| CloudSqlError::NotFound(name.to_string()))
    }

    async fn insert_instance(
        &self,
        instance: &DatabaseInstance,
    ) -> Result<Operation, CloudSqlError> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.insert_error {
            return Err(CloudSqlError::from_status(status, "injected".into()));
        }
        state.inserts.push(instance.clone());
        state
            .instances
            .insert(instance.name.clone(), running_instance(instance));
        Ok(Self::record_operation(&mut state, &instance.name, "CREATE"))
    }

    async fn update_instance(
        &self,
        name: &str,
        instance: &DatabaseInstance,
    ) -> Result<Operation, CloudSqlError> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.update_error {
            return Err(CloudSqlError::from_status(status, "injected".into()));
        }
        state.updates.push(instance.clone());
        state.instances.insert(name.to_string(), instance.clone());
        Ok(Self::record_operation(&mut state, name, "UPDATE"))
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation, CloudSqlError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(name.to_string());
        if state.instances.remove(name).is_none() {
            return Err(CloudSqlError::NotFound(name.to_string()));
        }
        Ok(Self::record_operation(&mut state, name, "DELETE"))
    }

    async fn list_operations(&self, name: &str) -> Result<Vec<Operation>, CloudSqlError> {
        let state = self.state.lock().unwrap();
        Ok(state.operations.get(name).cloned().unwrap_or_default())
    }

    async fn set_user_password(
        &self,
        instance: &str,
        user: &str,
        password: &str,
    ) -> Result<Operation, CloudSqlError> {
        let mut state = self.state.lock().unwrap();
        state
            .passwords
            .push((instance.to_string(), user.to_string(), password.to_string()));
        Ok(Self::record_operation(&mut state, instance, "UPDATE_USER"))
    }
}

#[derive(Default)]
pub struct FakeStoreState {
    pub instances: BTreeMap<String, PostgresqlInstance>,
    pub secrets: BTreeMap<(String, String), Secret>,
    pub status_patches: usize,
    pub events: Vec<(Reason, String)>,
    pub fail_status_patch: bool,
}

#[derive(Default)]
pub struct FakeStore {
    pub state: Mutex<FakeStoreState>,
}

impl FakeStore {
    pub fn with_instance(instance: PostgresqlInstance) -> Self {
        let store = Self::default();
        store
            .state
            .lock()
            .unwrap()
            .instances
            .insert(instance.name_any(), instance);
        store
    }

    pub fn instance(&self, name: &str) -> Option<PostgresqlInstance> {
        self.state.lock().unwrap().instances.get(name).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn insert_secret(&self, secret: Secret) {
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.state.lock().unwrap().secrets.insert(key, secret);
    }
}

fn bump_resource_version(instance: &mut PostgresqlInstance) {
    let next = instance
        .metadata
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    instance.metadata.resource_version = Some(next.to_string());
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get_instance(&self, name: &str) -> Result<Option<PostgresqlInstance>, kube::Error> {
        Ok(self.instance(name))
    }

    async fn add_finalizer(
        &self,
        instance: &PostgresqlInstance,
    ) -> Result<PostgresqlInstance, kube::Error> {
        let mut updated = instance.clone();
        updated
            .finalizers_mut()
            .push(crate::crds::postgresql_instance::FINALIZER.to_string());
        bump_resource_version(&mut updated);
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(updated.name_any(), updated.clone());
        Ok(updated)
    }

    async fn remove_finalizer(&self, instance: &PostgresqlInstance) -> Result<(), kube::Error> {
        let mut updated = instance.clone();
        updated
            .finalizers_mut()
            .retain(|f| f != crate::crds::postgresql_instance::FINALIZER);
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(updated.name_any(), updated);
        Ok(())
    }

    async fn patch_status(
        &self,
        _original: &PostgresqlInstance,
        modified: &PostgresqlInstance,
    ) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status_patch {
            return Err(serde_error());
        }
        state.status_patches += 1;
        let stored = state
            .instances
            .entry(modified.name_any())
            .or_insert_with(|| modified.clone());
        stored.status = modified.status.clone();
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        self.insert_secret(secret.clone());
        Ok(secret.clone())
    }

    async fn patch_secret(&self, _original: &Secret, modified: &Secret) -> Result<(), kube::Error> {
        self.insert_secret(modified.clone());
        Ok(())
    }

    async fn publish_event(
        &self,
        _instance: &PostgresqlInstance,
        _type_: EventType,
        reason: Reason,
        note: String,
    ) {
        self.state.lock().unwrap().events.push((reason, note));
    }
}
