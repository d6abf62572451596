use thiserror::Error;

use crate::cloudsql::CloudSqlError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    CloudSql(#[from] CloudSqlError),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ReconcileError>),
}

fn join_errors(errors: &[ReconcileError]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("[{}]", messages.join(", "))
}

/// A denied admission request. The message is shown to the user as is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError(message.into())
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("failed to generate the webhook certificate: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("no free port left in [{0}, {1})")]
    NoFreePort(i32, i32),
    #[error("invalid tls secret {0}: missing {1}")]
    TlsSecret(String, &'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
