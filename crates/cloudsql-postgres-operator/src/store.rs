use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams, PostParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::crds::postgresql_instance::{
    APPLICATION_NAME, FINALIZER, PostgresqlInstance, Reason,
};
use crate::patch::guarded_patch;

/// Kubernetes resources read and written by the reconciler and the webhook.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_instance(&self, name: &str) -> Result<Option<PostgresqlInstance>, kube::Error>;

    /// Adds the cleanup finalizer and returns the persisted object.
    async fn add_finalizer(
        &self,
        instance: &PostgresqlInstance,
    ) -> Result<PostgresqlInstance, kube::Error>;

    async fn remove_finalizer(&self, instance: &PostgresqlInstance) -> Result<(), kube::Error>;

    /// Persists the status of `modified`, provided `original` is still current.
    async fn patch_status(
        &self,
        original: &PostgresqlInstance,
        modified: &PostgresqlInstance,
    ) -> Result<(), kube::Error>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error>;

    async fn patch_secret(&self, original: &Secret, modified: &Secret) -> Result<(), kube::Error>;

    /// Fire and forget: failures are logged, never returned.
    async fn publish_event(
        &self,
        instance: &PostgresqlInstance,
        type_: EventType,
        reason: Reason,
        note: String,
    );
}

pub struct KubeStore {
    client: Client,
    recorder: Recorder,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: APPLICATION_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }

    fn instances(&self) -> Api<PostgresqlInstance> {
        Api::all(self.client.clone())
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn apply_guarded<K>(
    api: &Api<K>,
    original: &K,
    modified: &K,
    status: bool,
) -> Result<Option<K>, kube::Error>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let Some(patch) = guarded_patch(original, modified).map_err(kube::Error::SerdeError)? else {
        return Ok(None);
    };
    let name = original.name_any();
    let pp = PatchParams::default();
    let patch = Patch::Json::<()>(patch);
    let updated = if status {
        api.patch_status(&name, &pp, &patch).await?
    } else {
        api.patch(&name, &pp, &patch).await?
    };
    Ok(Some(updated))
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_instance(&self, name: &str) -> Result<Option<PostgresqlInstance>, kube::Error> {
        self.instances().get_opt(name).await
    }

    async fn add_finalizer(
        &self,
        instance: &PostgresqlInstance,
    ) -> Result<PostgresqlInstance, kube::Error> {
        let mut modified = instance.clone();
        modified.finalizers_mut().push(FINALIZER.to_string());
        let updated = apply_guarded(&self.instances(), instance, &modified, false).await?;
        debug!(instance = %instance.name_any(), "finalizer added");
        Ok(updated.unwrap_or(modified))
    }

    async fn remove_finalizer(&self, instance: &PostgresqlInstance) -> Result<(), kube::Error> {
        let mut modified = instance.clone();
        modified.finalizers_mut().retain(|f| f != FINALIZER);
        match apply_guarded(&self.instances(), instance, &modified, false).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn patch_status(
        &self,
        original: &PostgresqlInstance,
        modified: &PostgresqlInstance,
    ) -> Result<(), kube::Error> {
        apply_guarded(&self.instances(), original, modified, true).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        self.secrets(namespace).get_opt(name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        let namespace = secret.namespace().unwrap_or_default();
        self.secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await
    }

    async fn patch_secret(&self, original: &Secret, modified: &Secret) -> Result<(), kube::Error> {
        let namespace = original.namespace().unwrap_or_default();
        apply_guarded(&self.secrets(&namespace), original, modified, false).await?;
        Ok(())
    }

    async fn publish_event(
        &self,
        instance: &PostgresqlInstance,
        type_: EventType,
        reason: Reason,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".into(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &instance.object_ref(&())).await {
            warn!(instance = %instance.name_any(), error = %e, "failed to publish event");
        }
    }
}
