//! Cloud SQL proxy sidecar injection for pods requesting database access.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use kube::{Resource, ResourceExt, core::ObjectMeta};
use rand::Rng;
use tracing::{debug, error};

use crate::credentials::{PASSWORD_KEY, USERNAME_KEY, secret_value};
use crate::crds::postgresql_instance::{
    APPLICATION_NAME, INSTANCE_NAME_ANNOTATION, PROXY_INJECTED_ANNOTATION, PostgresqlInstance,
};
use crate::error::{ValidationError, WebhookError};
use crate::store::ResourceStore;

pub const PROXY_CONTAINER_NAME: &str = "cloud-sql-proxy";
pub const PORT_RANGE: std::ops::Range<i32> = 49152..65535;
const VOLUME_NAME: &str = "credentials";
const MOUNT_PATH: &str = "/secret";
/// 0400
const VOLUME_DEFAULT_MODE: i32 = 256;
const PGPASS_KEY: &str = "pgpass.conf";
const CLIENT_CREDENTIALS_KEY: &str = "credentials.json";
const APP_LABEL: &str = "app";
const MAX_PORT_DRAWS: usize = 64;

/// How the injected sidecar runs.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub image: String,
    /// Service account key the proxy authenticates with.
    pub client_credentials: String,
}

/// Everything the injection reads and writes besides the pod itself.
pub struct Injection<'a> {
    pub store: &'a dyn ResourceStore,
    pub proxy: &'a ProxySettings,
    /// Namespace holding the per-instance credentials secrets.
    pub operator_namespace: &'a str,
    pub dry_run: bool,
}

impl Injection<'_> {
    /// Returns the pod with the proxy injected, or unchanged when it does not ask for one.
    pub async fn mutate(&self, namespace: &str, pod: &Pod) -> Result<Pod, ValidationError> {
        let result = self.inject(namespace, pod).await;
        if let Err(e) = &result {
            error!(namespace, pod = %pod.name_any(), error = %e, "failed to inject the cloud sql proxy");
        }
        result
    }

    async fn inject(&self, namespace: &str, pod: &Pod) -> Result<Pod, ValidationError> {
        let annotations = pod.annotations();
        let Some(instance_name) = annotations
            .get(INSTANCE_NAME_ANNOTATION)
            .filter(|v| !v.is_empty())
        else {
            return Ok(pod.clone());
        };
        if annotations
            .get(PROXY_INJECTED_ANNOTATION)
            .is_some_and(|v| v == "true")
        {
            return Ok(pod.clone());
        }

        let instance = match self.store.get_instance(instance_name).await {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                return Err(ValidationError::new(format!(
                    "postgresqlinstance {instance_name:?} does not exist"
                )));
            }
            Err(e) => {
                return Err(ValidationError::new(format!(
                    "failed to get postgresql instance {instance_name:?}: {e}"
                )));
            }
        };
        let secret = match self.store.get_secret(self.operator_namespace, instance_name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                return Err(ValidationError::new(format!(
                    "the secret associated with postgresqlinstance {instance_name:?} does not exist"
                )));
            }
            Err(e) => {
                return Err(ValidationError::new(format!(
                    "failed to get the secret associated with postgresqlinstance {instance_name:?}: {e}"
                )));
            }
        };
        let connection_name = instance
            .status
            .as_ref()
            .and_then(|s| s.connection_name.as_deref())
            .unwrap_or_default();
        if connection_name.is_empty() {
            return Err(ValidationError::new(format!(
                "failed to get the connection name associated with postgresqlinstance {instance_name:?}"
            )));
        }

        let read = |key: &str| {
            secret_value(&secret, key)
                .map(Option::unwrap_or_default)
                .map_err(|e| {
                    ValidationError::new(format!(
                        "the secret associated with postgresqlinstance {instance_name:?} is invalid: {e}"
                    ))
                })
        };
        let username = read(USERNAME_KEY)?;
        let password = read(PASSWORD_KEY)?;

        let local = self.local_secret(namespace, &instance, &username, &password);
        if !self.dry_run {
            self.ensure_local_secret(&local, instance_name).await?;
        }

        let mut mutated = pod.clone();
        let spec = mutated.spec.get_or_insert_with(Default::default);
        spec.volumes.get_or_insert_with(Vec::new).push(Volume {
            name: VOLUME_NAME.into(),
            secret: Some(SecretVolumeSource {
                default_mode: Some(VOLUME_DEFAULT_MODE),
                optional: Some(false),
                secret_name: local.metadata.name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });

        let port = free_random_port(&spec.containers)
            .map_err(|e| ValidationError::new(e.to_string()))?;
        for container in &mut spec.containers {
            container.volume_mounts.get_or_insert_with(Vec::new).push(credentials_mount());
            container.env.get_or_insert_with(Vec::new).extend([
                env("PGHOST", "localhost"),
                env("PGPORT", &port.to_string()),
                env("PGUSER", &username),
                env("PGPASSFILE", &format!("{MOUNT_PATH}/{PGPASS_KEY}")),
            ]);
        }
        spec.containers
            .push(proxy_container(&self.proxy.image, &instance, connection_name, port));

        mutated
            .annotations_mut()
            .insert(PROXY_INJECTED_ANNOTATION.into(), "true".into());
        debug!(namespace, pod = %pod.name_any(), instance = %instance_name, port, "cloud sql proxy injected");
        Ok(mutated)
    }

    fn local_secret(
        &self,
        namespace: &str,
        instance: &PostgresqlInstance,
        username: &str,
        password: &str,
    ) -> Secret {
        let data = BTreeMap::from([
            (
                CLIENT_CREDENTIALS_KEY.to_string(),
                ByteString(self.proxy.client_credentials.clone().into_bytes()),
            ),
            (
                PGPASS_KEY.to_string(),
                ByteString(pgpass_entry(username, password).into_bytes()),
            ),
        ]);
        Secret {
            metadata: ObjectMeta {
                name: Some(local_secret_name(&instance.name_any())),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    APP_LABEL.to_string(),
                    APPLICATION_NAME.to_string(),
                )])),
                owner_references: instance.controller_owner_ref(&()).map(|o| vec![o]),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    async fn ensure_local_secret(
        &self,
        desired: &Secret,
        instance_name: &str,
    ) -> Result<(), ValidationError> {
        match self.store.create_secret(desired).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => {
                return Err(ValidationError::new(format!(
                    "failed to create the local secret associated with postgresqlinstance {instance_name:?}: {e}"
                )));
            }
        }
        // A pod for this instance was admitted before; refresh the contents.
        let namespace = desired.namespace().unwrap_or_default();
        let current = match self.store.get_secret(&namespace, &desired.name_any()).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                return Err(ValidationError::new(format!(
                    "failed to get the local secret associated with postgresqlinstance {instance_name:?}: not found"
                )));
            }
            Err(e) => {
                return Err(ValidationError::new(format!(
                    "failed to get the local secret associated with postgresqlinstance {instance_name:?}: {e}"
                )));
            }
        };
        let mut updated = current.clone();
        updated
            .data
            .get_or_insert_with(BTreeMap::new)
            .extend(desired.data.clone().unwrap_or_default());
        self.store
            .patch_secret(&current, &updated)
            .await
            .map_err(|e| {
                ValidationError::new(format!(
                    "failed to patch the local secret associated with postgresqlinstance {instance_name:?}: {e}"
                ))
            })
    }
}

pub fn local_secret_name(instance_name: &str) -> String {
    format!("{instance_name}-cloud-sql-proxy")
}

/// A `.pgpass` line matching any host, port and database.
pub fn pgpass_entry(username: &str, password: &str) -> String {
    format!(
        "*:*:*:{}:{}",
        escape_pgpass_field(username),
        escape_pgpass_field(password)
    )
}

fn escape_pgpass_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace(':', "\\:")
}

/// Draws a port in `PORT_RANGE` not used by any container, falling back to a scan.
fn free_random_port(containers: &[Container]) -> Result<i32, WebhookError> {
    let used: HashSet<i32> = containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .map(|p| p.container_port)
        .collect();
    let mut rng = rand::rng();
    (0..MAX_PORT_DRAWS)
        .map(|_| rng.random_range(PORT_RANGE))
        .find(|port| !used.contains(port))
        .or_else(|| PORT_RANGE.into_iter().find(|port| !used.contains(port)))
        .ok_or(WebhookError::NoFreePort(PORT_RANGE.start, PORT_RANGE.end))
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn credentials_mount() -> VolumeMount {
    VolumeMount {
        name: VOLUME_NAME.into(),
        mount_path: MOUNT_PATH.into(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn proxy_container(
    image: &str,
    instance: &PostgresqlInstance,
    connection_name: &str,
    port: i32,
) -> Container {
    let mut ip_address_types = Vec::new();
    if instance.spec.public_ip_enabled() {
        ip_address_types.push("PUBLIC");
    }
    if instance.spec.private_ip_enabled() {
        ip_address_types.push("PRIVATE");
    }
    Container {
        name: PROXY_CONTAINER_NAME.into(),
        image: Some(image.into()),
        command: Some(vec![
            "/cloud_sql_proxy".into(),
            format!("-credential_file={MOUNT_PATH}/{CLIENT_CREDENTIALS_KEY}"),
            format!("-instances={connection_name}=tcp:{port}"),
            format!("-ip_address_types={}", ip_address_types.join(",")),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: port,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![credentials_mount()]),
        ..Default::default()
    }
}
