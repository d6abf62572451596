use std::sync::Arc;

use kube::{
    Api, Client, ResourceExt,
    runtime::{
        controller::{self, Action, Controller},
        events::EventType,
        watcher,
    },
};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cloudsql::models::{
    ACTIVATION_POLICY_ALWAYS, IP_TYPE_PRIMARY, IP_TYPE_PRIVATE, STATE_RUNNABLE,
};
use crate::cloudsql::{CloudSqlApi, CloudSqlError, DatabaseInstance};
use crate::credentials::{
    POSTGRES_USER, PASSWORD_KEY, credentials_secret, generate_password, secret_value,
    with_credentials,
};
use crate::crds::postgresql_instance::{
    ConditionStatus, ConditionType, FINALIZER, Ips, PostgresqlInstance, Reason,
};
use crate::error::ReconcileError;
use crate::settings::{build_database_instance, correct_drift};
use crate::store::ResourceStore;

const ERROR_REQUEUE: Duration = Duration::from_secs(30);

pub struct Ctx {
    pub store: Arc<dyn ResourceStore>,
    pub cloudsql: Arc<dyn CloudSqlApi>,
    /// Namespace holding the credentials secrets.
    pub namespace: String,
    pub resync_period: Duration,
}

pub fn controller(client: Client, workers: u16) -> Controller<PostgresqlInstance> {
    let api: Api<PostgresqlInstance> = Api::all(client);
    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
}

pub async fn reconcile(
    instance: Arc<PostgresqlInstance>,
    ctx: Arc<Ctx>,
) -> Result<Action, ReconcileError> {
    // The cached object is shared with the reflector; work on our own copy.
    reconcile_instance(PostgresqlInstance::clone(&instance), &ctx).await
}

pub fn error_policy(
    instance: Arc<PostgresqlInstance>,
    err: &ReconcileError,
    _ctx: Arc<Ctx>,
) -> Action {
    error!(instance = %instance.name_any(), error = ?err, "reconcile failed");
    Action::requeue(ERROR_REQUEUE)
}

fn has_finalizer(instance: &PostgresqlInstance) -> bool {
    instance.finalizers().iter().any(|f| f == FINALIZER)
}

pub async fn reconcile_instance(
    instance: PostgresqlInstance,
    ctx: &Ctx,
) -> Result<Action, ReconcileError> {
    let name = instance.name_any();

    if instance.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&instance) {
            finalize(&instance, ctx).await?;
        }
        return Ok(Action::await_change());
    }

    // Must be persisted before anything is created remotely.
    let instance = if has_finalizer(&instance) {
        instance
    } else {
        ctx.store.add_finalizer(&instance).await?
    };

    if instance.spec.paused {
        info!(instance = %name, "reconciliation is paused");
        return Ok(Action::await_change());
    }

    let mut modified = instance.clone();
    let synced = sync(&mut modified, ctx).await;
    let persisted = ctx
        .store
        .patch_status(&instance, &modified)
        .await
        .map_err(ReconcileError::from);

    match (synced, persisted) {
        (Ok(()), Ok(())) => Ok(Action::requeue(ctx.resync_period)),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(body), Err(patch)) => Err(ReconcileError::Aggregate(vec![body, patch])),
    }
}

async fn finalize(instance: &PostgresqlInstance, ctx: &Ctx) -> Result<(), ReconcileError> {
    let name = instance.name_any();
    let remote = &instance.spec.name;
    if !remote.is_empty() {
        match ctx.cloudsql.delete_instance(remote).await {
            Ok(op) => info!(instance = %name, operation = %op.name, "cloud sql instance deletion requested"),
            Err(e) if e.is_not_found() => debug!(instance = %name, "cloud sql instance already gone"),
            Err(e) => return Err(e.into()),
        }
    }
    ctx.store.remove_finalizer(instance).await?;
    info!(instance = %name, "finalizer removed");
    Ok(())
}

/// Sets a condition and publishes an event when its status or reason changed.
async fn transition(
    instance: &mut PostgresqlInstance,
    ctx: &Ctx,
    type_: ConditionType,
    status: ConditionStatus,
    reason: Reason,
    message: String,
) {
    let unchanged = instance
        .condition(type_)
        .is_some_and(|c| c.status == status && c.reason == reason.as_str());
    instance.set_condition(type_, status, reason, message.clone());
    if unchanged {
        return;
    }
    let event_type = match reason {
        Reason::InstanceCreated
        | Reason::InstanceReady
        | Reason::InstanceUpdated
        | Reason::InstanceUpToDate
        | Reason::OperationInProgress
        | Reason::InstanceNotReady => EventType::Normal,
        _ => EventType::Warning,
    };
    ctx.store
        .publish_event(instance, event_type, reason, message)
        .await;
}

async fn sync(instance: &mut PostgresqlInstance, ctx: &Ctx) -> Result<(), ReconcileError> {
    let remote = instance.spec.name.clone();

    let observed = match ctx.cloudsql.get_instance(&remote).await {
        Ok(observed) => observed,
        Err(e) if e.is_not_found() => match create(instance, ctx).await? {
            Some(observed) => observed,
            None => return Ok(()),
        },
        Err(e) => return Err(e.into()),
    };
    instance.set_condition(
        ConditionType::Created,
        ConditionStatus::True,
        Reason::InstanceCreated,
        "the cloud sql instance has been created",
    );
    record_observed(instance, &observed);

    if !check_operations(instance, ctx).await? {
        return Ok(());
    }

    if observed.state != STATE_RUNNABLE
        || observed.settings.activation_policy != ACTIVATION_POLICY_ALWAYS
    {
        let message = format!(
            "the cloud sql instance is in state {:?} with activation policy {:?}",
            observed.state, observed.settings.activation_policy
        );
        transition(
            instance,
            ctx,
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::InstanceNotReady,
            message,
        )
        .await;
        return Ok(());
    }
    transition(
        instance,
        ctx,
        ConditionType::Ready,
        ConditionStatus::True,
        Reason::InstanceReady,
        "the cloud sql instance is ready".into(),
    )
    .await;

    ensure_credentials(instance, ctx).await?;
    correct_settings(instance, ctx, observed).await
}

/// Requests the creation of the remote instance. `None` stops the current pass.
async fn create(
    instance: &mut PostgresqlInstance,
    ctx: &Ctx,
) -> Result<Option<DatabaseInstance>, ReconcileError> {
    let name = instance.name_any();
    let request = build_database_instance(&instance.spec);
    let failure = match ctx.cloudsql.insert_instance(&request).await {
        Ok(op) => {
            info!(instance = %name, operation = %op.name, "cloud sql instance creation requested");
            transition(
                instance,
                ctx,
                ConditionType::Created,
                ConditionStatus::True,
                Reason::InstanceCreated,
                "the cloud sql instance has been created".into(),
            )
            .await;
            return Ok(Some(ctx.cloudsql.get_instance(&request.name).await?));
        }
        Err(e) => e,
    };

    let (reason, message) = classify(&failure, "create");
    transition(
        instance,
        ctx,
        ConditionType::Created,
        ConditionStatus::False,
        reason,
        message,
    )
    .await;
    if reason == Reason::UnexpectedError {
        return Err(failure.into());
    }
    warn!(instance = %name, error = %failure, "cloud sql instance not created");
    Ok(None)
}

fn classify(err: &CloudSqlError, action: &str) -> (Reason, String) {
    if err.is_conflict() {
        (
            Reason::NameUnavailable,
            format!("failed to {action} the cloud sql instance: {err}"),
        )
    } else if err.is_bad_request() {
        (
            Reason::InvalidSpec,
            format!("failed to {action} the cloud sql instance: {err}"),
        )
    } else {
        (
            Reason::UnexpectedError,
            format!("failed to {action} the cloud sql instance: {err}"),
        )
    }
}

fn record_observed(instance: &mut PostgresqlInstance, observed: &DatabaseInstance) {
    let status = instance.status.get_or_insert_with(Default::default);
    if !observed.connection_name.is_empty() {
        status.connection_name = Some(observed.connection_name.clone());
    }
    let ips = Ips {
        private_ip: observed.ip_address(IP_TYPE_PRIVATE).map(str::to_string),
        public_ip: observed.ip_address(IP_TYPE_PRIMARY).map(str::to_string),
    };
    status.ips = (ips != Ips::default()).then_some(ips);
}

/// Returns false when the latest remote operation is still running or has failed.
async fn check_operations(
    instance: &mut PostgresqlInstance,
    ctx: &Ctx,
) -> Result<bool, ReconcileError> {
    let operations = ctx.cloudsql.list_operations(&instance.spec.name).await?;
    let Some(latest) = operations.first() else {
        return Ok(true);
    };
    if !latest.is_done() {
        let message = format!(
            "operation {} ({}) is {}",
            latest.name, latest.operation_type, latest.status
        );
        transition(
            instance,
            ctx,
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::OperationInProgress,
            message,
        )
        .await;
        return Ok(false);
    }
    let errors = latest.errors();
    if errors.is_empty() {
        return Ok(true);
    }
    let details: String = errors
        .iter()
        .map(|e| format!("{}; {:?}", e.code, e.message))
        .collect();
    let message = format!(
        "operation {} ({}) failed: {}",
        latest.name, latest.operation_type, details
    );
    transition(
        instance,
        ctx,
        ConditionType::Ready,
        ConditionStatus::False,
        Reason::UnexpectedError,
        message,
    )
    .await;
    Ok(false)
}

async fn ensure_credentials(
    instance: &PostgresqlInstance,
    ctx: &Ctx,
) -> Result<(), ReconcileError> {
    let name = instance.name_any();
    let secret = match ctx.store.get_secret(&ctx.namespace, &name).await? {
        Some(secret) => secret,
        None => match ctx
            .store
            .create_secret(&credentials_secret(instance, &ctx.namespace))
            .await
        {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 409 => ctx
                .store
                .get_secret(&ctx.namespace, &name)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("secret {}/{} vanished after create conflict", ctx.namespace, name)
                })?,
            Err(e) => return Err(e.into()),
        },
    };
    if secret_value(&secret, PASSWORD_KEY)?.is_some() {
        return Ok(());
    }

    let password = generate_password();
    ctx.cloudsql
        .set_user_password(&instance.spec.name, POSTGRES_USER, &password)
        .await?;
    ctx.store
        .patch_secret(&secret, &with_credentials(&secret, POSTGRES_USER, &password))
        .await?;
    info!(instance = %name, "credentials provisioned");
    Ok(())
}

async fn correct_settings(
    instance: &mut PostgresqlInstance,
    ctx: &Ctx,
    observed: DatabaseInstance,
) -> Result<(), ReconcileError> {
    let name = instance.name_any();
    let mut updated = observed;
    let changed = correct_drift(&instance.spec, &mut updated.settings);
    if changed.is_empty() {
        transition(
            instance,
            ctx,
            ConditionType::UpToDate,
            ConditionStatus::True,
            Reason::InstanceUpToDate,
            "the cloud sql instance is up to date".into(),
        )
        .await;
        return Ok(());
    }

    info!(instance = %name, fields = ?changed, "cloud sql instance settings drifted");
    let failure = match ctx
        .cloudsql
        .update_instance(&instance.spec.name, &updated)
        .await
    {
        Ok(op) => {
            let message = format!(
                "update of {} requested (operation {})",
                changed.join(", "),
                op.name
            );
            transition(
                instance,
                ctx,
                ConditionType::UpToDate,
                ConditionStatus::False,
                Reason::InstanceUpdated,
                message,
            )
            .await;
            return Ok(());
        }
        Err(e) => e,
    };

    let (reason, message) = match classify(&failure, "update") {
        (Reason::NameUnavailable, message) => (Reason::Conflict, message),
        other => other,
    };
    transition(
        instance,
        ctx,
        ConditionType::UpToDate,
        ConditionStatus::False,
        reason,
        message,
    )
    .await;
    if reason == Reason::UnexpectedError {
        return Err(failure.into());
    }
    warn!(instance = %name, error = %failure, "cloud sql instance not updated");
    Ok(())
}
