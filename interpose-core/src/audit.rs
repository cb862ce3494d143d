//! Stock mutation listeners.
//!
//! - [`TracingAuditListener`] writes one structured `INFO` line per mutation
//!   with credential-bearing header values redacted.
//! - [`MutationRecorder`] keeps every event in memory for later inspection.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::info;

use crate::events::{Listener, ListenerError, MutationEvent, MutationOperation};

/// Headers whose values never reach the audit log.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "proxy-authorization",
    "set-cookie",
];

const REDACTED: &str = "[REDACTED]";

/// Case-insensitive check against [`SENSITIVE_HEADERS`].
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Copy of the event's details with sensitive header values replaced by
/// `"[REDACTED]"`.
///
/// Covers `set_header`/`remove_header` payloads keyed by a sensitive header
/// and the before/after header maps of `update_request`/`update_response`.
/// Absent (null) values stay null.
pub fn redact_details(event: &MutationEvent) -> Map<String, Value> {
    let mut details = event.details.clone();

    match event.operation {
        MutationOperation::SetHeader | MutationOperation::RemoveHeader => {
            let sensitive = details
                .get("key")
                .and_then(Value::as_str)
                .is_some_and(is_sensitive_header);
            if sensitive {
                for field in ["old_value", "new_value"] {
                    if let Some(value) = details.get_mut(field).filter(|v| !v.is_null()) {
                        *value = Value::String(REDACTED.into());
                    }
                }
            }
        }
        MutationOperation::UpdateRequest | MutationOperation::UpdateResponse => {
            if let Some(Value::Object(change)) = details.get_mut("headers") {
                for side in change.values_mut() {
                    if let Value::Object(headers) = side {
                        redact_header_map(headers);
                    }
                }
            }
        }
        _ => {}
    }

    details
}

fn redact_header_map(headers: &mut Map<String, Value>) {
    for (name, value) in headers.iter_mut() {
        if is_sensitive_header(name) {
            *value = Value::String(REDACTED.into());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing audit log
// ─────────────────────────────────────────────────────────────────────────────

/// Logs every mutation under the `interpose::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditListener;

impl TracingAuditListener {
    pub fn new() -> Self {
        Self
    }
}

impl Listener<MutationEvent> for TracingAuditListener {
    fn on_event(&self, event_name: &str, event: &MutationEvent) -> Result<(), ListenerError> {
        let details = Value::Object(redact_details(event));
        info!(
            target: "interpose::audit",
            channel = event_name,
            transaction_id = %event.transaction_id,
            policy = %event.policy_name,
            operation = %event.operation,
            timestamp = %event.timestamp.to_rfc3339(),
            details = %details,
            "Mutation applied"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory recorder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects events in dispatch order.
///
/// Clones share one buffer, so a clone can be registered on a channel while
/// the original is kept for reading.
#[derive(Debug, Clone, Default)]
pub struct MutationRecorder {
    events: Arc<Mutex<Vec<MutationEvent>>>,
}

impl MutationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<MutationEvent> {
        self.events.lock().clone()
    }

    pub fn operations(&self) -> Vec<MutationOperation> {
        self.events.lock().iter().map(|e| e.operation).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drain and return the recorded events.
    pub fn take(&self) -> Vec<MutationEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Listener<MutationEvent> for MutationRecorder {
    fn on_event(&self, _event_name: &str, event: &MutationEvent) -> Result<(), ListenerError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::context::{RequestUpdate, TransactionContext};

    fn event(operation: MutationOperation, details: Value) -> MutationEvent {
        let Value::Object(details) = details else {
            panic!("details must be an object");
        };
        MutationEvent::new(Uuid::new_v4(), "p", operation, details)
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sensitive_match_ignores_case() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("X-API-KEY"));
        assert!(!is_sensitive_header("content-type"));
    }

    #[test]
    fn test_set_header_values_redacted() {
        let e = event(
            MutationOperation::SetHeader,
            json!({"key": "Authorization", "old_value": null, "new_value": "Bearer sk-live"}),
        );

        let details = redact_details(&e);

        assert_eq!(details["old_value"], Value::Null);
        assert_eq!(details["new_value"], REDACTED);
        assert_eq!(e.details["new_value"], "Bearer sk-live");
    }

    #[test]
    fn test_non_sensitive_header_untouched() {
        let e = event(
            MutationOperation::RemoveHeader,
            json!({"key": "x-trace", "old_value": "abc"}),
        );

        assert_eq!(redact_details(&e)["old_value"], "abc");
    }

    #[test]
    fn test_update_header_maps_redacted() {
        let e = event(
            MutationOperation::UpdateRequest,
            json!({
                "changed_fields": ["headers"],
                "headers": {
                    "old_value": {"host": "h", "cookie": "session=1"},
                    "new_value": {"host": "h", "cookie": "session=2", "x-api-key": "k"}
                }
            }),
        );

        let details = redact_details(&e);

        assert_eq!(details["headers"]["old_value"]["cookie"], REDACTED);
        assert_eq!(details["headers"]["new_value"]["x-api-key"], REDACTED);
        assert_eq!(details["headers"]["new_value"]["host"], "h");
    }

    #[test]
    fn test_audit_listener_logs_redacted_line() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let ctx = TransactionContext::new();
            ctx.mutation_events().register("audit", TracingAuditListener::new());
            ctx.set_current_policy("auth_injector");
            let handle = ctx
                .update_request(RequestUpdate::new().url("https://api.example.com/v1"))
                .unwrap();
            handle.set_header("authorization", "Bearer sk-secret").unwrap();
        });

        let output = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert!(output.contains("Mutation applied"));
        assert!(output.contains("auth_injector"));
        assert!(output.contains("set_header"));
        assert!(!output.contains("sk-secret"));
    }

    #[test]
    fn test_recorder_shares_buffer_across_clones() {
        let recorder = MutationRecorder::new();
        let ctx = TransactionContext::new();
        ctx.mutation_events().register("recorder", recorder.clone());

        ctx.update_request(RequestUpdate::new().url("https://h/")).unwrap();
        ctx.set_data("k", 1);

        assert_eq!(
            recorder.operations(),
            vec![MutationOperation::UpdateRequest, MutationOperation::SetData]
        );
        assert_eq!(recorder.take().len(), 2);
        assert!(recorder.is_empty());
    }
}
