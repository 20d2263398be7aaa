//! Local tunnel agent discovery
//!
//! Queries a locally running tunnel agent (ngrok v2 agent API) for the
//! public URL currently assigned to the tunnel, so it can be advertised as
//! the subscription callback endpoint.

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel agent unreachable at {endpoint}: {source}")]
    AgentUnreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("tunnel agent returned a malformed status document: {0}")]
    MalformedStatus(#[source] reqwest::Error),
}

/// Status document returned by the agent's command-line tunnel endpoint.
#[derive(Debug, Deserialize)]
struct TunnelStatus {
    public_url: String,
}

/// Client for the tunnel agent's local control API.
pub struct TunnelAgent {
    base: String,
    http: reqwest::Client,
}

impl TunnelAgent {
    /// Create a client for the agent control API at `base`
    /// (e.g. `http://host.docker.internal:4040`).
    pub fn new(base: impl Into<String>, http: reqwest::Client) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Base URL of the agent control API.
    pub fn endpoint(&self) -> &str {
        &self.base
    }

    /// Query the agent for the currently assigned public URL.
    ///
    /// A failure here is fatal to startup: without a reachable public
    /// endpoint the subscription callback would be wrong.
    pub async fn public_url(&self) -> Result<String, TunnelError> {
        let url = format!("{}/api/tunnels/command_line", self.base);
        debug!("Querying tunnel agent at {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| TunnelError::AgentUnreachable {
                endpoint: self.base.clone(),
                source,
            })?;

        let status: TunnelStatus = response
            .json()
            .await
            .map_err(TunnelError::MalformedStatus)?;

        Ok(status.public_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_public_url_resolved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels/command_line"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "command_line",
                "public_url": "https://d0c0ffee.ngrok.io",
                "proto": "https",
            })))
            .mount(&server)
            .await;

        let agent = TunnelAgent::new(server.uri(), reqwest::Client::new());
        let url = agent.public_url().await.unwrap();
        assert_eq!(url, "https://d0c0ffee.ngrok.io");
    }

    #[tokio::test]
    async fn test_trailing_slash_stripped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels/command_line"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_url": "https://d0c0ffee.ngrok.io",
            })))
            .mount(&server)
            .await;

        let agent = TunnelAgent::new(format!("{}/", server.uri()), reqwest::Client::new());
        assert!(agent.public_url().await.is_ok());
    }

    #[tokio::test]
    async fn test_agent_unreachable() {
        // Nothing is listening on this port.
        let agent = TunnelAgent::new("http://127.0.0.1:1", reqwest::Client::new());
        let err = agent.public_url().await.unwrap_err();
        assert!(matches!(err, TunnelError::AgentUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_malformed_status_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels/command_line"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let agent = TunnelAgent::new(server.uri(), reqwest::Client::new());
        let err = agent.public_url().await.unwrap_err();
        assert!(matches!(err, TunnelError::MalformedStatus(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels/command_line"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let agent = TunnelAgent::new(server.uri(), reqwest::Client::new());
        let err = agent.public_url().await.unwrap_err();
        assert!(matches!(err, TunnelError::AgentUnreachable { .. }));
    }
}
