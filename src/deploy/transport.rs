use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::error::Error;
use crate::types::Result;

/// Material pushed to an install target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPayload {
    /// Certificate id
    pub certificate_id: String,
    /// Absolute path on the agent's host
    pub path: String,
    /// Leaf certificate followed by its chain
    pub certificate_pem: String,
    /// Private key PEM
    pub private_key_pem: String,
}

/// Reload request sent after material is written
#[derive(Debug, Serialize)]
struct ReloadRequest<'a> {
    command: &'a str,
}

/// Reply body returned by agents on failure
#[derive(Debug, Deserialize)]
struct AgentReply {
    #[serde(default)]
    error: Option<String>,
}

/// Channel to agents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Write certificate material to a path on the agent
    async fn push_material(&self, agent: &Agent, payload: &InstallPayload) -> Result<()>;

    /// Run a post-install reload command on the agent
    async fn run_reload(&self, agent: &Agent, command: &str) -> Result<()>;
}

/// HTTP agent transport
pub struct HttpAgentTransport {
    /// HTTP client
    client: Client,
    /// URL scheme used to reach agents
    scheme: String,
    /// Bearer token presented to agents
    token: Option<String>,
}

impl HttpAgentTransport {
    /// Create a new HTTP transport.
    ///
    /// The client sets no deadline of its own; callers bound each call.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            token: config.api_token.clone(),
        })
    }

    /// Create authorization headers
    fn create_auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| Error::Config(format!("Invalid agent token: {}", e)))?,
            );
        }

        Ok(headers)
    }

    fn url(&self, agent: &Agent, endpoint: &str) -> String {
        format!("{}://{}/{}", self.scheme, agent.address, endpoint)
    }

    async fn post<T: Serialize + ?Sized + Sync>(&self, agent: &Agent, endpoint: &str, body: &T) -> Result<()> {
        let url = self.url(agent, endpoint);
        debug!("POST {} for agent {}", url, agent.id);

        let response = self
            .client
            .post(&url)
            .headers(self.create_auth_headers()?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response
            .json::<AgentReply>()
            .await
            .ok()
            .and_then(|reply| reply.error)
            .unwrap_or_else(|| status.to_string());
        Err(Error::Transport(format!("Agent {} rejected {}: {}", agent.id, endpoint, detail)))
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn push_material(&self, agent: &Agent, payload: &InstallPayload) -> Result<()> {
        self.post(agent, "install", payload).await
    }

    async fn run_reload(&self, agent: &Agent, command: &str) -> Result<()> {
        self.post(agent, "reload", &ReloadRequest { command }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_agent_urls() {
        let transport = HttpAgentTransport::new(&AgentConfig {
            scheme: "https".to_string(),
            api_token: Some("secret".to_string()),
        })
        .unwrap();

        let agent = Agent {
            id: "web-1".to_string(),
            hostname: "web-1".to_string(),
            address: "10.0.0.5:7443".to_string(),
            version: "1.0.0".to_string(),
            last_checkin: Utc::now(),
            managed_count: 0,
            metrics: Default::default(),
            registered_at: Utc::now(),
        };

        assert_eq!(transport.url(&agent, "install"), "https://10.0.0.5:7443/install");
        let headers = transport.create_auth_headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret");
    }

    #[tokio::test]
    async fn test_client_timeout_maps_to_agent_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(100))
            .build()
            .unwrap();
        let err = client
            .post(format!("http://{}/install", address))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(Error::from(err), Error::AgentTimeout(_)));

        silent.abort();
    }
}
