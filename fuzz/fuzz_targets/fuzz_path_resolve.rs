#![no_main]

//! Fuzz target for dotted-path resolution
//!
//! - Tests: resolver::get_tx_value
//! - Attack surface: malformed paths, non-JSON bodies, deep nesting

use arbitrary::Arbitrary;
use interpose_core::context::{RequestUpdate, ResponseUpdate, TransactionContext};
use interpose_core::get_tx_value;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    path: String,
    request_body: Vec<u8>,
    response_body: Option<Vec<u8>>,
    data_key: String,
    data_json: String,
}

fuzz_target!(|input: FuzzInput| {
    let ctx = TransactionContext::new();
    ctx.update_request(
        RequestUpdate::from_scratch("POST", "https://api.example.com/v1/messages")
            .headers([("host", "api.example.com")])
            .content(input.request_body),
    )
    .expect("seed request");

    if let Some(body) = input.response_body {
        ctx.update_response(ResponseUpdate::from_scratch(200).content(body))
            .expect("seed response");
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&input.data_json) {
        ctx.set_data(input.data_key, value);
    }

    // Any path must resolve or fail cleanly; errors must classify
    if let Err(e) = get_tx_value(&ctx, &input.path) {
        let _ = e.kind();
        let _ = e.to_string();
    }
});
