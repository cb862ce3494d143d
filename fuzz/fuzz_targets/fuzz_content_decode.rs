#![no_main]

//! Fuzz target for content decoding
//!
//! - Tests: codec::ContentCodec::decode
//! - Attack surface: truncated/corrupt streams, decompression bombs, odd tokens

use arbitrary::Arbitrary;
use interpose_core::codec::ContentCodec;
use interpose_core::config::CoreConfig;
use libfuzzer_sys::fuzz_target;

const DECODED_LIMIT: usize = 64 * 1024;

#[derive(Arbitrary, Debug)]
enum Token {
    Missing,
    Gzip,
    Deflate,
    Brotli,
    Identity,
    Raw(String),
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    token: Token,
    data: Vec<u8>,
    round_trip: bool,
}

fuzz_target!(|input: FuzzInput| {
    let codec = ContentCodec::new(CoreConfig {
        decoded_body_max: DECODED_LIMIT,
        ..CoreConfig::default()
    });

    let token = match &input.token {
        Token::Missing => None,
        Token::Gzip => Some("gzip"),
        Token::Deflate => Some("deflate"),
        Token::Brotli => Some("br"),
        Token::Identity => Some("identity"),
        Token::Raw(s) => Some(s.as_str()),
    };

    // Arbitrary bytes: must never panic and never exceed the limit
    if let Ok(decoded) = codec.decode(input.data.clone(), token) {
        assert!(decoded.len() <= DECODED_LIMIT.max(input.data.len()));
    }

    // Encoded bytes must come back unchanged
    if input.round_trip && input.data.len() <= DECODED_LIMIT {
        if let Ok(encoded) = codec.encode(&input.data, token) {
            let decoded = codec
                .decode(encoded, token)
                .expect("encoded body must decode");
            assert_eq!(decoded.as_ref(), input.data.as_slice());
        }
    }
});
