//! Query-API client for Subscribe/Unsubscribe.

use crate::{element_text, sigv4, SnsError, TopicArn};
use tracing::debug;
use url::Url;

/// Query-API version every request is pinned to.
pub const QUERY_API_VERSION: &str = "2010-03-31";

pub struct SnsClient {
    endpoint: Url,
    host: String,
    region: String,
    credentials: Option<sigv4::Credentials>,
    http: reqwest::Client,
}

impl SnsClient {
    /// Client for the region's public endpoint, or an explicit override
    /// such as a localstack URL.
    pub fn new(
        region: impl Into<String>,
        endpoint_override: Option<String>,
        credentials: Option<sigv4::Credentials>,
        http: reqwest::Client,
    ) -> Result<Self, SnsError> {
        let region = region.into();
        let raw = endpoint_override.unwrap_or_else(|| format!("https://sns.{region}.amazonaws.com/"));
        let endpoint = Url::parse(&raw).map_err(|_| SnsError::InvalidEndpoint(raw.clone()))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(SnsError::InvalidEndpoint(raw)),
        };
        Ok(Self {
            endpoint,
            host,
            region,
            credentials,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Subscribe `endpoint` to `topic`, asking the service to return the
    /// subscription ARN in the response rather than `pending confirmation`.
    pub async fn subscribe(
        &self,
        topic: &TopicArn,
        protocol: &str,
        endpoint: &str,
    ) -> Result<String, SnsError> {
        debug!("Subscribe {} -> {}", topic, endpoint);
        let document = self
            .call(&[
                ("Action", "Subscribe"),
                ("Version", QUERY_API_VERSION),
                ("TopicArn", topic.as_str()),
                ("Protocol", protocol),
                ("Endpoint", endpoint),
                ("ReturnSubscriptionArn", "true"),
            ])
            .await?;
        element_text(&document, "SubscriptionArn").ok_or(SnsError::MalformedResponse {
            missing: "SubscriptionArn",
        })
    }

    pub async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), SnsError> {
        debug!("Unsubscribe {}", subscription_arn);
        self.call(&[
            ("Action", "Unsubscribe"),
            ("Version", QUERY_API_VERSION),
            ("SubscriptionArn", subscription_arn),
        ])
        .await
        .map(|_| ())
    }

    async fn call(&self, params: &[(&str, &str)]) -> Result<String, SnsError> {
        let body = serde_urlencoded::to_string(params)?;

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, sigv4::FORM_CONTENT_TYPE);

        if let Some(credentials) = &self.credentials {
            let signed = sigv4::sign(
                credentials,
                &self.region,
                "sns",
                &self.host,
                self.endpoint.path(),
                body.as_bytes(),
                chrono::Utc::now(),
            );
            request = request
                .header("x-amz-date", &signed.amz_date)
                .header(reqwest::header::AUTHORIZATION, &signed.authorization);
            if let Some(token) = &signed.security_token {
                request = request.header("x-amz-security-token", token);
            }
        }

        let response = request.body(body).send().await.map_err(SnsError::Transport)?;
        let status = response.status();
        let text = response.text().await.map_err(SnsError::Transport)?;
        if !status.is_success() {
            return Err(error_from_document(status.as_u16(), &text));
        }
        Ok(text)
    }
}

/// Map a non-2xx Query-API response to a service error, tolerating bodies
/// that are not the standard `<ErrorResponse>` document.
fn error_from_document(status: u16, document: &str) -> SnsError {
    let code = element_text(document, "Code").unwrap_or_else(|| "Unknown".to_string());
    let message = element_text(document, "Message").unwrap_or_default();
    SnsError::Service {
        status,
        code,
        message,
    }
}
