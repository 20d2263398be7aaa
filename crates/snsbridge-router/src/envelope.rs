//! Lambda-style invocation envelope.

use serde::Serialize;
use serde_json::Value;

/// `EventSource` stamped on every synthesized record.
pub const EVENT_SOURCE: &str = "aws:sns";
/// `EventVersion` stamped on every synthesized record.
pub const EVENT_VERSION: &str = "1.0";

/// The event structure a real SNS trigger would hand to a Lambda function.
///
/// Always carries exactly one record wrapping the raw notification payload
/// unchanged.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationEnvelope {
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsRecord {
    pub event_source: String,
    pub event_version: String,
    /// Empty: the locally emulated trigger has no subscription mapping.
    pub event_subscription_arn: String,
    pub sns: Value,
}

impl InvocationEnvelope {
    pub fn for_notification(payload: Value) -> Self {
        Self {
            records: vec![SnsRecord {
                event_source: EVENT_SOURCE.to_string(),
                event_version: EVENT_VERSION.to_string(),
                event_subscription_arn: String::new(),
                sns: payload,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let payload = json!({"Type": "Notification", "message": "hello"});
        let envelope = InvocationEnvelope::for_notification(payload.clone());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            value,
            json!({
                "Records": [{
                    "EventSource": "aws:sns",
                    "EventVersion": "1.0",
                    "EventSubscriptionArn": "",
                    "Sns": payload,
                }]
            })
        );
    }

    #[test]
    fn test_exactly_one_record() {
        let envelope = InvocationEnvelope::for_notification(json!({}));
        assert_eq!(envelope.records.len(), 1);
    }
}
