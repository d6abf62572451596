//! Admission webhook: defaulting and validation of `PostgresqlInstance` resources and
//! Cloud SQL proxy injection into pods.

pub mod pod;
pub mod postgresql_instance;
pub mod register;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::{
        GroupVersionKind,
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    },
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::signal::unix::SignalKind;
use tracing::{debug, error, info};

use crate::cloudsql::CloudSqlApi;
use crate::crds::postgresql_instance::PostgresqlInstance;
use crate::error::{ValidationError, WebhookError};
use crate::patch::create_patch;
use crate::store::ResourceStore;

use pod::{Injection, ProxySettings};
use postgresql_instance::{AdmissionParams, check_deletion, validate_and_mutate};
use register::ADMISSION_PATH;
use tls::TlsMaterial;

pub const HEALTHZ_PATH: &str = "/healthz";
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Shared state for the admission handlers.
pub struct WebhookState {
    pub store: Arc<dyn ResourceStore>,
    pub cloudsql: Arc<dyn CloudSqlApi>,
    pub params: AdmissionParams,
    /// Namespace the operator runs in.
    pub namespace: String,
    pub proxy: ProxySettings,
}

/// The kinds of objects this webhook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    PostgresqlInstance,
    Pod,
}

impl AdmissionKind {
    pub fn from_gvk(gvk: &GroupVersionKind) -> Option<Self> {
        match (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()) {
            ("cloudsql.travelaudience.com", "v1alpha1", "PostgresqlInstance") => {
                Some(AdmissionKind::PostgresqlInstance)
            }
            ("", "v1", "Pod") => Some(AdmissionKind::Pod),
            _ => None,
        }
    }
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(ADMISSION_PATH, post(admission_handler))
        .route(HEALTHZ_PATH, get(|| async { "ok" }))
        .with_state(state)
}

/// Serves the webhook over TLS until SIGINT or SIGTERM, then drains in-flight requests.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    material: &TlsMaterial,
    addr: SocketAddr,
) -> Result<(), WebhookError> {
    let config = RustlsConfig::from_pem(
        material.cert_pem.clone().into_bytes(),
        material.key_pem.clone().into_bytes(),
    )
    .await?;
    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown_signal().await;
            info!("shutting down the admission webhook");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
        }
    });
    info!(%addr, "admission webhook listening");
    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(router(state).into_make_service())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate => {},
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

async fn admission_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "failed to decode admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review()).into_response();
        }
    };
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "admission review carries no request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review()).into_response();
        }
    };
    Json(admit(&state, &request).await.into_review()).into_response()
}

async fn admit(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    debug!(
        uid = %request.uid,
        kind = %request.kind.kind,
        operation = ?request.operation,
        name = %request.name,
        "processing admission request"
    );
    let outcome = match AdmissionKind::from_gvk(&request.kind) {
        Some(AdmissionKind::PostgresqlInstance) => admit_instance(state, request).await,
        Some(AdmissionKind::Pod) => admit_pod(state, request).await,
        None => Err(ValidationError::new(format!(
            "unsupported kind \"{}/{}/{}\"",
            request.kind.group, request.kind.version, request.kind.kind
        ))),
    };
    let response = AdmissionResponse::from(request);
    match outcome {
        Ok(None) => response,
        Ok(Some(patch)) => match response.with_patch(patch) {
            Ok(response) => response,
            Err(e) => AdmissionResponse::from(request).deny(format!("failed to create patch: {e}")),
        },
        Err(e) => {
            info!(uid = %request.uid, name = %request.name, reason = %e, "admission denied");
            response.deny(e.to_string())
        }
    }
}

fn decode<K: DeserializeOwned>(object: &DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(object)?)
}

fn patch_between<K: Serialize>(
    original: &K,
    mutated: &K,
) -> Result<Option<json_patch::Patch>, ValidationError> {
    create_patch(original, mutated)
        .map(Some)
        .map_err(|e| ValidationError::new(format!("failed to create patch: {e}")))
}

async fn admit_instance(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Option<json_patch::Patch>, ValidationError> {
    let current = || -> Result<PostgresqlInstance, ValidationError> {
        let object = request.object.as_ref().ok_or_else(|| {
            ValidationError::new("failed to deserialize the current object: missing object")
        })?;
        decode(object).map_err(|e| {
            ValidationError::new(format!("failed to deserialize the current object: {e}"))
        })
    };
    match request.operation {
        Operation::Create => {
            let current = current()?;
            let mutated =
                validate_and_mutate(&current, None, &state.params, state.cloudsql.as_ref()).await?;
            patch_between(&current, &mutated)
        }
        Operation::Update => {
            let current = current()?;
            let previous: PostgresqlInstance = request
                .old_object
                .as_ref()
                .ok_or_else(|| {
                    ValidationError::new("failed to deserialize the previous object: missing object")
                })
                .and_then(|o| {
                    decode(o).map_err(|e| {
                        ValidationError::new(format!(
                            "failed to deserialize the previous object: {e}"
                        ))
                    })
                })?;
            let mutated = validate_and_mutate(
                &current,
                Some(&previous),
                &state.params,
                state.cloudsql.as_ref(),
            )
            .await?;
            patch_between(&current, &mutated)
        }
        Operation::Delete => {
            let stored = match request.old_object.as_ref().map(decode::<PostgresqlInstance>) {
                Some(Ok(stored)) => stored,
                Some(Err(e)) => {
                    return Err(ValidationError::new(format!(
                        "failed to read deleted object: {e}"
                    )));
                }
                None => match state.store.get_instance(&request.name).await {
                    Ok(Some(stored)) => stored,
                    Ok(None) => {
                        return Err(ValidationError::new(format!(
                            "failed to read deleted object: postgresqlinstance {:?} not found",
                            request.name
                        )));
                    }
                    Err(e) => {
                        return Err(ValidationError::new(format!(
                            "failed to read deleted object: {e}"
                        )));
                    }
                },
            };
            check_deletion(&stored)?;
            Ok(None)
        }
        ref other => Err(ValidationError::new(format!(
            "unsupported operation {:?}",
            format!("{other:?}").to_uppercase()
        ))),
    }
}

async fn admit_pod(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Option<json_patch::Patch>, ValidationError> {
    if !matches!(request.operation, Operation::Create) {
        return Ok(None);
    }
    let Some(object) = request.object.as_ref() else {
        return Ok(None);
    };
    let pod: Pod = decode(object).map_err(|e| {
        ValidationError::new(format!("failed to deserialize the current object: {e}"))
    })?;
    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .unwrap_or_default();
    let injection = Injection {
        store: state.store.as_ref(),
        proxy: &state.proxy,
        operator_namespace: &state.namespace,
        dry_run: request.dry_run,
    };
    let mutated = injection.mutate(&namespace, &pod).await?;
    patch_between(&pod, &mutated)
}
