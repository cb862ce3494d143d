//! Mutation event records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Name of the channel every [`crate::TransactionContext`] dispatches
/// mutation events on.
pub const MUTATION_CHANNEL: &str = "mutation";

/// The closed set of tracked state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    /// Bulk create/merge/replace of the request.
    UpdateRequest,
    /// Bulk create/merge/replace of the response.
    UpdateResponse,
    /// Scratch-store write.
    SetData,
    /// Header upsert on a request or response.
    SetHeader,
    /// Header removal on a request or response.
    RemoveHeader,
    /// Response status change.
    SetStatusCode,
    /// Body replaced with serialized JSON.
    SetJsonContent,
    /// Body replaced with raw bytes.
    SetContent,
}

impl MutationOperation {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::UpdateRequest => "update_request",
            MutationOperation::UpdateResponse => "update_response",
            MutationOperation::SetData => "set_data",
            MutationOperation::SetHeader => "set_header",
            MutationOperation::RemoveHeader => "remove_header",
            MutationOperation::SetStatusCode => "set_status_code",
            MutationOperation::SetJsonContent => "set_json_content",
            MutationOperation::SetContent => "set_content",
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state change of a transaction.
///
/// `policy_name` is the attribution current when the event was emitted, not
/// when the mutated object was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Owning transaction
    pub transaction_id: Uuid,
    /// Policy that caused the change
    pub policy_name: String,
    /// What kind of change
    pub operation: MutationOperation,
    /// Operation-specific payload (keys, old/new values)
    pub details: Map<String, Value>,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl MutationEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(
        transaction_id: Uuid,
        policy_name: impl Into<String>,
        operation: MutationOperation,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            transaction_id,
            policy_name: policy_name.into(),
            operation,
            details,
            timestamp: Utc::now(),
        }
    }

    /// Look up one detail entry.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(MutationOperation::SetStatusCode).unwrap(),
            json!("set_status_code")
        );
        assert_eq!(MutationOperation::UpdateRequest.to_string(), "update_request");
    }

    #[test]
    fn test_event_serialization_shape() {
        let mut details = Map::new();
        details.insert("key".into(), json!("A"));
        details.insert("old_value".into(), Value::Null);

        let event = MutationEvent::new(Uuid::nil(), "auth", MutationOperation::SetHeader, details);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["policy_name"], "auth");
        assert_eq!(value["operation"], "set_header");
        assert_eq!(value["details"]["old_value"], Value::Null);
        assert_eq!(event.detail("key"), Some(&json!("A")));
    }
}
