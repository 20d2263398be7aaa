//! Deregistration token extraction from confirmation documents.
//!
//! Following the provider's `SubscribeURL` yields a
//! `ConfirmSubscriptionResponse` XML document whose `SubscriptionArn`
//! element carries the credential needed to unsubscribe later.

use crate::{SnsError, TopicArn};

/// Extract the unsubscribe token from a confirmation document.
///
/// The schema-defined `SubscriptionArn` element is preferred. When absent,
/// falls back to the first text node containing the topic ARN as a
/// substring; this heuristic can pick the wrong node if the topic ARN also
/// appears elsewhere in the document (e.g. inside a message body), and is
/// kept only for providers that do not emit the standard schema.
pub fn extract_subscription_arn(document: &str, topic: &TopicArn) -> Result<String, SnsError> {
    let doc = roxmltree::Document::parse(document).map_err(SnsError::MalformedDocument)?;

    if let Some(text) = doc
        .descendants()
        .find(|n| n.tag_name().name() == "SubscriptionArn")
        .and_then(|n| n.text())
    {
        let text = text.trim();
        if !text.is_empty() {
            return Ok(text.to_string());
        }
    }

    doc.descendants()
        .filter_map(|n| n.text())
        .map(str::trim)
        .find(|t| t.contains(topic.as_str()))
        .map(|t| t.to_string())
        .ok_or_else(|| SnsError::TokenNotFound {
            topic: topic.as_str().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicArn {
        TopicArn::parse("arn:aws:sns:us-east-1:123456789012:topic-1").unwrap()
    }

    #[test]
    fn test_schema_element_preferred() {
        let document = r#"<ConfirmSubscriptionResponse xmlns="http://sns.amazonaws.com/doc/2010-03-31/">
  <ConfirmSubscriptionResult>
    <SubscriptionArn>arn:aws:sns:us-east-1:123456789012:topic-1:7713ab49</SubscriptionArn>
  </ConfirmSubscriptionResult>
  <ResponseMetadata><RequestId>075ecce8</RequestId></ResponseMetadata>
</ConfirmSubscriptionResponse>"#;

        let arn = extract_subscription_arn(document, &topic()).unwrap();
        assert_eq!(arn, "arn:aws:sns:us-east-1:123456789012:topic-1:7713ab49");
    }

    #[test]
    fn test_fallback_scans_text_nodes() {
        let document = r#"<Response>
  <Meta>unrelated</Meta>
  <Token>unsub-token-arn:aws:sns:us-east-1:123456789012:topic-1</Token>
</Response>"#;

        let arn = extract_subscription_arn(document, &topic()).unwrap();
        assert_eq!(arn, "unsub-token-arn:aws:sns:us-east-1:123456789012:topic-1");
    }

    #[test]
    fn test_fallback_takes_first_match() {
        let document = r#"<Response>
  <A>first-arn:aws:sns:us-east-1:123456789012:topic-1</A>
  <B>second-arn:aws:sns:us-east-1:123456789012:topic-1</B>
</Response>"#;

        let arn = extract_subscription_arn(document, &topic()).unwrap();
        assert!(arn.starts_with("first-"));
    }

    #[test]
    fn test_token_not_found() {
        let document = "<Response><Meta>nothing relevant</Meta></Response>";
        let err = extract_subscription_arn(document, &topic()).unwrap_err();
        assert!(matches!(err, SnsError::TokenNotFound { .. }));
    }

    #[test]
    fn test_invalid_xml() {
        let err = extract_subscription_arn("this is not xml <", &topic()).unwrap_err();
        assert!(matches!(err, SnsError::MalformedDocument(_)));
    }

    #[test]
    fn test_empty_schema_element_falls_back() {
        let document = r#"<Response>
  <SubscriptionArn></SubscriptionArn>
  <Other>arn:aws:sns:us-east-1:123456789012:topic-1:suffix</Other>
</Response>"#;

        let arn = extract_subscription_arn(document, &topic()).unwrap();
        assert_eq!(arn, "arn:aws:sns:us-east-1:123456789012:topic-1:suffix");
    }
}
