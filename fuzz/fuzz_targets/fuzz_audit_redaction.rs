#![no_main]

//! Fuzz target for audit-log redaction
//!
//! - Tests: audit::redact_details
//! - Attack surface: mixed-case sensitive names, non-string values

use arbitrary::Arbitrary;
use interpose_core::audit::{is_sensitive_header, redact_details};
use interpose_core::events::{MutationEvent, MutationOperation};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    set: bool,
    key: String,
    old_value: Option<String>,
    new_value: String,
}

fuzz_target!(|input: FuzzInput| {
    let operation = if input.set {
        MutationOperation::SetHeader
    } else {
        MutationOperation::RemoveHeader
    };
    let mut details = Map::new();
    details.insert("key".into(), Value::String(input.key.clone()));
    details.insert("old_value".into(), json!(input.old_value));
    details.insert("new_value".into(), Value::String(input.new_value.clone()));
    let event = MutationEvent::new(uuid::Uuid::new_v4(), "fuzz", operation, details);

    let redacted = redact_details(&event);

    if is_sensitive_header(&input.key) {
        assert_eq!(redacted["new_value"], "[REDACTED]");
        if input.old_value.is_some() {
            assert_eq!(redacted["old_value"], "[REDACTED]");
        }
    } else {
        assert_eq!(redacted, event.details);
    }
});
