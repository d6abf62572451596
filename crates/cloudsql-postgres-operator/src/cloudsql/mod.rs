pub mod client;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use client::CloudSqlClient;
pub use models::{DatabaseInstance, Operation, Settings};

/// Errors returned by the Cloud SQL Admin API, classified by HTTP status.
#[derive(Debug, Error)]
pub enum CloudSqlError {
    #[error("invalid request: {0}")]
    InvalidSpec(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unexpected response (status {status}): {message}")]
    Unexpected { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to obtain an access token: {0}")]
    Auth(String),
}

impl CloudSqlError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => CloudSqlError::InvalidSpec(message),
            404 => CloudSqlError::NotFound(message),
            409 => CloudSqlError::Conflict(message),
            _ => CloudSqlError::Unexpected { status, message },
        }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, CloudSqlError::InvalidSpec(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudSqlError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudSqlError::Conflict(_))
    }
}

/// The slice of the Cloud SQL Admin API the operator drives. Every call is scoped
/// to the project the implementation was configured with.
#[async_trait]
pub trait CloudSqlApi: Send + Sync {
    async fn get_instance(&self, name: &str) -> Result<DatabaseInstance, CloudSqlError>;

    async fn insert_instance(&self, instance: &DatabaseInstance)
    -> Result<Operation, CloudSqlError>;

    async fn update_instance(
        &self,
        name: &str,
        instance: &DatabaseInstance,
    ) -> Result<Operation, CloudSqlError>;

    async fn delete_instance(&self, name: &str) -> Result<Operation, CloudSqlError>;

    /// Operations on the instance, most recent first.
    async fn list_operations(&self, name: &str) -> Result<Vec<Operation>, CloudSqlError>;

    async fn set_user_password(
        &self,
        instance: &str,
        user: &str,
        password: &str,
    ) -> Result<Operation, CloudSqlError>;
}

#[cfg(test)]
mod tests_cloudsql_error {
    use super::*;

    #[test]
    fn statuses_map_to_error_classes() {
        assert!(CloudSqlError::from_status(400, String::new()).is_bad_request());
        assert!(CloudSqlError::from_status(404, String::new()).is_not_found());
        assert!(CloudSqlError::from_status(409, String::new()).is_conflict());
        let other = CloudSqlError::from_status(503, "backend error".into());
        assert!(!other.is_bad_request() && !other.is_not_found() && !other.is_conflict());
        assert!(other.to_string().contains("503"));
    }
}
