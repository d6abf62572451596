use std::sync::Arc;

use anyhow::Context;
use cloudsql_postgres_operator::{
    cloudsql::{CloudSqlClient, client::TokenSource},
    config::Config,
    instance_controller as instances,
    store::KubeStore,
    webhook::{
        self, WebhookState,
        pod::ProxySettings,
        postgresql_instance::AdmissionParams,
        register::{desired_webhook_configuration, reconcile_webhook_configuration},
        tls::ensure_tls_secret,
    },
};
use futures::StreamExt;
use kube::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = Config::from_env()?;
    info!(namespace = %config.namespace, project = %config.project_id, "cloudsql-postgres-operator starting up");

    let client = Client::try_default().await?;
    let tokens = match &config.cloudsql_access_token {
        Some(token) => TokenSource::Static(token.clone()),
        None => TokenSource::metadata(),
    };
    let cloudsql = Arc::new(CloudSqlClient::new(
        config.cloudsql_endpoint.clone(),
        config.project_id.clone(),
        tokens,
    )?);
    let store = Arc::new(KubeStore::new(client.clone()));

    // Admission webhook
    let tls = ensure_tls_secret(store.as_ref(), &config.namespace).await?;
    reconcile_webhook_configuration(
        client.clone(),
        &desired_webhook_configuration(&config.namespace, &tls.cert_pem),
    )
    .await?;
    let client_credentials = tokio::fs::read_to_string(&config.proxy_credentials_path)
        .await
        .with_context(|| {
            format!(
                "failed to read the proxy credentials at {}",
                config.proxy_credentials_path
            )
        })?;
    let webhook_state = Arc::new(WebhookState {
        store: store.clone(),
        cloudsql: cloudsql.clone(),
        params: AdmissionParams {
            project_id: config.project_id.clone(),
        },
        namespace: config.namespace.clone(),
        proxy: ProxySettings {
            image: config.proxy_image.clone(),
            client_credentials,
        },
    });
    let webhook_server =
        webhook::run_webhook_server(webhook_state, &tls, config.webhook_bind_address);

    // Instance controller
    let ctx = Arc::new(instances::Ctx {
        store,
        cloudsql,
        namespace: config.namespace.clone(),
        resync_period: config.resync_period,
    });
    let instance_controller = instances::controller(client.clone(), config.controller_workers)
        .run(instances::reconcile, instances::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "instance reconcile error");
            }
        });

    // Both stop on SIGINT/SIGTERM; the webhook gets to drain after the controller stops.
    tokio::pin!(webhook_server);
    tokio::select! {
        res = &mut webhook_server => res?,
        _ = instance_controller => {
            info!("shutdown signal received");
            webhook_server.await?;
        }
    }
    Ok(())
}
