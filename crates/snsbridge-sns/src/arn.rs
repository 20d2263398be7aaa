//! Topic ARN parsing.

use crate::SnsError;
use std::fmt;

/// A validated SNS topic ARN, `arn:<partition>:sns:<region>:<account>:<name>`.
///
/// Parsing up front is what turns a malformed topic identifier into a
/// configuration error instead of an opaque service rejection at subscribe
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicArn {
    raw: String,
    region: String,
}

impl TopicArn {
    pub fn parse(s: &str) -> Result<Self, SnsError> {
        let parts: Vec<&str> = s.split(':').collect();
        let well_formed = parts.len() == 6
            && parts[0] == "arn"
            && !parts[1].is_empty()
            && parts[2] == "sns"
            && !parts[3].is_empty()
            && !parts[5].is_empty();
        if !well_formed {
            return Err(SnsError::InvalidTopicArn(s.to_string()));
        }
        Ok(Self {
            raw: s.to_string(),
            region: parts[3].to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Region component, used to derive the service endpoint.
    pub fn region(&self) -> &str {
        &self.region
    }
}

impl fmt::Display for TopicArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
