//! Self-signed serving certificate for the admission webhook, persisted in a secret
//! so every replica and every restart serves the same one.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::core::ObjectMeta;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use tracing::info;

use crate::crds::postgresql_instance::APPLICATION_NAME;
use crate::error::WebhookError;
use crate::store::ResourceStore;

pub const TLS_SECRET_NAME: &str = "cloudsql-postgres-operator-tls";
const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
const TLS_CERT_KEY: &str = "tls.crt";
const TLS_KEY_KEY: &str = "tls.key";
const VALIDITY_YEARS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

/// DNS name of the webhook service inside the cluster.
pub fn service_dns_name(namespace: &str) -> String {
    format!("{APPLICATION_NAME}.{namespace}.svc")
}

pub fn generate_self_signed(dns_name: &str) -> Result<TlsMaterial, WebhookError> {
    let mut params = CertificateParams::new(vec![dns_name.to_string()])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, dns_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + ::time::Duration::days(VALIDITY_YEARS * 365);

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok(TlsMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

pub fn tls_secret(namespace: &str, material: &TlsMaterial) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(TLS_SECRET_NAME.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        type_: Some(TLS_SECRET_TYPE.into()),
        data: Some(BTreeMap::from([
            (
                TLS_CERT_KEY.to_string(),
                ByteString(material.cert_pem.clone().into_bytes()),
            ),
            (
                TLS_KEY_KEY.to_string(),
                ByteString(material.key_pem.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    }
}

pub fn material_from_secret(secret: &Secret) -> Result<TlsMaterial, WebhookError> {
    let field = |key: &'static str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(|v| String::from_utf8(v.0.clone()).ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| WebhookError::TlsSecret(TLS_SECRET_NAME.into(), key))
    };
    Ok(TlsMaterial {
        cert_pem: field(TLS_CERT_KEY)?,
        key_pem: field(TLS_KEY_KEY)?,
    })
}

/// Loads the certificate secret, creating it when absent. A key pair is only
/// generated on the create path; losing a create race to another replica
/// discards it in favour of the stored one.
pub async fn ensure_tls_secret(
    store: &dyn ResourceStore,
    namespace: &str,
) -> Result<TlsMaterial, WebhookError> {
    if let Some(existing) = store.get_secret(namespace, TLS_SECRET_NAME).await? {
        info!(secret = TLS_SECRET_NAME, "reusing webhook certificate");
        return material_from_secret(&existing);
    }
    let material = generate_self_signed(&service_dns_name(namespace))?;
    match store.create_secret(&tls_secret(namespace, &material)).await {
        Ok(_) => {
            info!(secret = TLS_SECRET_NAME, "created webhook certificate");
            Ok(material)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let existing = store
                .get_secret(namespace, TLS_SECRET_NAME)
                .await?
                .ok_or_else(|| WebhookError::TlsSecret(TLS_SECRET_NAME.into(), "secret"))?;
            info!(secret = TLS_SECRET_NAME, "reusing webhook certificate");
            material_from_secret(&existing)
        }
        Err(e) => Err(e.into()),
    }
}
