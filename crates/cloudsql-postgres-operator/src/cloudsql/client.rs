use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::{
    CloudSqlApi, CloudSqlError,
    models::{DatabaseInstance, ErrorEnvelope, Operation, OperationsList, User},
};

pub const DEFAULT_ENDPOINT: &str = "https://sqladmin.googleapis.com";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where bearer tokens for the Admin API come from.
pub enum TokenSource {
    Static(String),
    /// The GCE metadata server of the node (or workload identity).
    Metadata {
        url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl TokenSource {
    pub fn metadata() -> Self {
        Self::metadata_at(METADATA_TOKEN_URL)
    }

    pub fn metadata_at(url: impl Into<String>) -> Self {
        TokenSource::Metadata {
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn token(&self, http: &reqwest::Client) -> Result<String, CloudSqlError> {
        let (url, cached) = match self {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { url, cached } => (url, cached),
        };
        let mut cached = cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }
        let res = http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(CloudSqlError::Auth(format!(
                "metadata server returned {}",
                res.status()
            )));
        }
        let body: TokenResponse = res.json().await?;
        let ttl = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = body.expires_in, "refreshed cloud sql access token");
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(body.access_token)
    }
}

/// Cloud SQL Admin API v1beta4 client bound to a single project.
pub struct CloudSqlClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    tokens: TokenSource,
}

impl CloudSqlClient {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        tokens: TokenSource,
    ) -> Result<Self, CloudSqlError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/sql/v1beta4/projects/{}/{}",
            self.endpoint, self.project_id, path
        )
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, CloudSqlError> {
        let token = self.tokens.token(&self.http).await?;
        let res = req.bearer_auth(token).send().await?;
        let status = res.status();
        let body = res.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(CloudSqlError::from_status(status.as_u16(), message));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl CloudSqlApi for CloudSqlClient {
    async fn get_instance(&self, name: &str) -> Result<DatabaseInstance, CloudSqlError> {
        let url = self.url(&format!("instances/{name}"));
        self.send(self.http.get(url)).await
    }

    async fn insert_instance(
        &self,
        instance: &DatabaseInstance,
    ) -> Result<Operation, CloudSqlError> {
        let url = self.url("instances");
        self.send(self.http.post(url).json(instance)).await
    }

    async fn update_instance(
        &self,
        name: &str,
        instance: &DatabaseInstance,
    ) -> Result<Operation, CloudSqlError> {
        let url = self.url(&format!("instances/{name}"));
        self.send(self.http.put(url).json(instance)).await
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation, CloudSqlError> {
        let url = self.url(&format!("instances/{name}"));
        self.send(self.http.delete(url)).await
    }

    async fn list_operations(&self, name: &str) -> Result<Vec<Operation>, CloudSqlError> {
        let url = self.url("operations");
        let list: OperationsList = self
            .send(self.http.get(url).query(&[("instance", name)]))
            .await?;
        Ok(list.items)
    }

    async fn set_user_password(
        &self,
        instance: &str,
        user: &str,
        password: &str,
    ) -> Result<Operation, CloudSqlError> {
        let url = self.url(&format!("instances/{instance}/users"));
        let body = User {
            name: user.to_string(),
            password: password.to_string(),
        };
        self.send(self.http.put(url).query(&[("name", user)]).json(&body))
            .await
    }
}
