use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{Api, Client, api::PostParams, core::ObjectMeta};
use tracing::info;

use crate::crds::postgresql_instance::APPLICATION_NAME;

pub const WEBHOOK_CONFIGURATION_NAME: &str = APPLICATION_NAME;
pub const INSTANCES_WEBHOOK_NAME: &str = "postgresqlinstances.cloudsql.travelaudience.com";
pub const PODS_WEBHOOK_NAME: &str = "pods.cloudsql.travelaudience.com";
pub const ADMISSION_PATH: &str = "/admissionrequests";

/// The configuration routing instance and pod admission to this operator.
///
/// Fields the API server would default are set explicitly so that a stored
/// configuration compares equal to a freshly built one.
pub fn desired_webhook_configuration(namespace: &str, ca_pem: &str) -> MutatingWebhookConfiguration {
    let client_config = WebhookClientConfig {
        ca_bundle: Some(ByteString(ca_pem.as_bytes().to_vec())),
        service: Some(ServiceReference {
            name: APPLICATION_NAME.into(),
            namespace: namespace.into(),
            path: Some(ADMISSION_PATH.into()),
            port: Some(443),
        }),
        url: None,
    };
    let webhook = |name: &str, rule: RuleWithOperations, failure_policy: &str| MutatingWebhook {
        name: name.into(),
        admission_review_versions: vec!["v1".into()],
        client_config: client_config.clone(),
        failure_policy: Some(failure_policy.into()),
        match_policy: Some("Equivalent".into()),
        namespace_selector: Some(LabelSelector::default()),
        object_selector: Some(LabelSelector::default()),
        reinvocation_policy: Some("Never".into()),
        rules: Some(vec![rule]),
        side_effects: "NoneOnDryRun".into(),
        timeout_seconds: Some(10),
        ..Default::default()
    };

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_CONFIGURATION_NAME.into()),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                APPLICATION_NAME.to_string(),
            )])),
            ..Default::default()
        },
        webhooks: Some(vec![
            webhook(
                INSTANCES_WEBHOOK_NAME,
                RuleWithOperations {
                    api_groups: Some(vec!["cloudsql.travelaudience.com".into()]),
                    api_versions: Some(vec!["v1alpha1".into()]),
                    operations: Some(vec!["CREATE".into(), "UPDATE".into(), "DELETE".into()]),
                    resources: Some(vec!["postgresqlinstances".into()]),
                    scope: Some("*".into()),
                },
                "Fail",
            ),
            webhook(
                PODS_WEBHOOK_NAME,
                RuleWithOperations {
                    api_groups: Some(vec!["".into()]),
                    api_versions: Some(vec!["v1".into()]),
                    operations: Some(vec!["CREATE".into()]),
                    resources: Some(vec!["pods".into()]),
                    scope: Some("*".into()),
                },
                "Ignore",
            ),
        ]),
    }
}

/// Creates the configuration, or replaces its webhooks when they differ from `desired`.
pub async fn reconcile_webhook_configuration(
    client: Client,
    desired: &MutatingWebhookConfiguration,
) -> Result<(), kube::Error> {
    let api: Api<MutatingWebhookConfiguration> = Api::all(client);
    match api.create(&PostParams::default(), desired).await {
        Ok(_) => {
            info!(name = WEBHOOK_CONFIGURATION_NAME, "registered admission webhooks");
            return Ok(());
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(e),
    }

    let mut current = api.get(WEBHOOK_CONFIGURATION_NAME).await?;
    if current.webhooks == desired.webhooks {
        return Ok(());
    }
    current.webhooks = desired.webhooks.clone();
    api.replace(WEBHOOK_CONFIGURATION_NAME, &PostParams::default(), &current)
        .await?;
    info!(name = WEBHOOK_CONFIGURATION_NAME, "updated admission webhooks");
    Ok(())
}
