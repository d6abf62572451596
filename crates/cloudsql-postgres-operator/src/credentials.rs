use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt, core::ObjectMeta};
use rand::Rng;

use crate::crds::postgresql_instance::PostgresqlInstance;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
/// Superuser role of Cloud SQL for PostgreSQL.
pub const POSTGRES_USER: &str = "postgres";

pub const PASSWORD_LENGTH: usize = 32;
pub const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,-./;<=>?@[]^_{|}~";

/// Random password drawn from the thread-local CSPRNG.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LENGTH)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

/// The (still empty) credentials secret of an instance, owned by it.
pub fn credentials_secret(instance: &PostgresqlInstance, namespace: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(instance.name_any()),
            namespace: Some(namespace.to_string()),
            owner_references: instance.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn with_credentials(secret: &Secret, username: &str, password: &str) -> Secret {
    let mut updated = secret.clone();
    let data = updated.data.get_or_insert_with(BTreeMap::new);
    data.insert(USERNAME_KEY.into(), ByteString(username.as_bytes().to_vec()));
    data.insert(PASSWORD_KEY.into(), ByteString(password.as_bytes().to_vec()));
    updated
}

/// Value of `key`, treating an empty value as absent.
pub fn secret_value(secret: &Secret, key: &str) -> Result<Option<String>, std::string::FromUtf8Error> {
    let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) else {
        return Ok(None);
    };
    if bytes.0.is_empty() {
        return Ok(None);
    }
    String::from_utf8(bytes.0.clone()).map(Some)
}
