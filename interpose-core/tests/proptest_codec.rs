//! Property-based tests for body decoding and path resolution.
//!
//! Uses `proptest` to check that every supported encoding decodes what it
//! encodes, that header tokens are matched case-insensitively, and that a
//! nested JSON body field resolves to the value stored under it.

use interpose_core::codec::{ContentCodec, ContentEncoding};
use interpose_core::context::{RequestUpdate, TransactionContext};
use interpose_core::{TxValue, get_tx_value};
use proptest::prelude::*;
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────────────────────────────────────

fn arb_encoding() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("gzip"), Just("deflate"), Just("br"), Just("identity")]
}

/// Randomly upper-case some characters of a token.
fn arb_casing(token: &'static str) -> impl Strategy<Value = String> {
    proptest::collection::vec(any::<bool>(), token.len()).prop_map(move |flags| {
        token
            .chars()
            .zip(flags)
            .map(|(c, upper)| if upper { c.to_ascii_uppercase() } else { c })
            .collect()
    })
}

/// Object keys that are valid path segments (no dots).
fn arb_key() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,12}"
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn encoded_body_decodes_unchanged(
        body in proptest::collection::vec(any::<u8>(), 0..4096),
        encoding in arb_encoding(),
    ) {
        let codec = ContentCodec::default();
        let encoded = codec.encode(&body, Some(encoding)).unwrap();
        let decoded = codec.decode(encoded, Some(encoding));
        prop_assert!(decoded.is_ok(), "{} failed: {:?}", encoding, decoded.err());
        let decoded = decoded.unwrap();
        prop_assert_eq!(decoded.as_ref(), body.as_slice());
    }

    #[test]
    fn token_case_is_ignored(
        token in arb_encoding().prop_flat_map(arb_casing),
    ) {
        let parsed = ContentEncoding::from_token(Some(&token));
        prop_assert!(parsed.is_ok(), "'{}' rejected", token);
        prop_assert_eq!(parsed.unwrap().as_str(), token.to_ascii_lowercase());
    }

    #[test]
    fn nested_content_field_resolves(
        keys in proptest::collection::vec(arb_key(), 1..5),
        leaf in arb_leaf(),
    ) {
        let mut body = leaf.clone();
        for key in keys.iter().rev() {
            let mut object = Map::new();
            object.insert(key.clone(), body);
            body = Value::Object(object);
        }

        let ctx = TransactionContext::new();
        ctx.update_request(
            RequestUpdate::new()
                .url("https://api.example.com/v1/messages")
                .content(serde_json::to_vec(&body).unwrap()),
        )
        .unwrap();

        let path = format!("request.content.{}", keys.join("."));
        match get_tx_value(&ctx, &path) {
            Ok(TxValue::Json(found)) => prop_assert_eq!(found, leaf),
            other => prop_assert!(false, "{} resolved to {:?}", path, other),
        }
    }
}
