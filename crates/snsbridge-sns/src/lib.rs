//! SNS wire client
//!
//! A minimal client for the parts of the SNS Query API this bridge needs:
//! `Subscribe`, `Unsubscribe`, and extraction of the deregistration token
//! from the provider's confirmation document. Requests are signed with
//! Signature V4 when AWS credentials are present in the environment and
//! sent unsigned otherwise, which keeps localstack-style dev endpoints
//! working without a credential setup.

mod arn;
mod client;
pub mod confirmation;
pub mod sigv4;

pub use arn::TopicArn;
pub use client::{SnsClient, QUERY_API_VERSION};
pub use sigv4::Credentials;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnsError {
    #[error("invalid topic ARN {0:?}: expected arn:<partition>:sns:<region>:<account>:<topic>")]
    InvalidTopicArn(String),

    #[error("invalid SNS endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("SNS request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("SNS returned {code} ({status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("SNS response is missing the {missing} element")]
    MalformedResponse { missing: &'static str },

    #[error("confirmation document is not valid XML: {0}")]
    MalformedDocument(#[source] roxmltree::Error),

    #[error("no unsubscribe token for {topic} in the confirmation document")]
    TokenNotFound { topic: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

/// Text content of the first element named `tag`, namespace-agnostic.
pub(crate) fn element_text(document: &str, tag: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(document).ok()?;
    doc.descendants()
        .find(|n| n.tag_name().name() == tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
