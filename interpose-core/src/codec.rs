//! Content decoding for inspectable bodies.
//!
//! Upstream LLM APIs commonly answer with compressed bodies. Policies that
//! inspect or rewrite content need the decoded bytes, so the executor reads
//! each body through [`ContentCodec`] before seeding the transaction context.
//!
//! # Supported Encodings
//!
//! | Token      | Format                                               |
//! |------------|------------------------------------------------------|
//! | `identity` | unchanged (also for a missing or empty header)       |
//! | `gzip`     | one or more gzip members, concatenated               |
//! | `deflate`  | raw deflate, falling back to zlib-wrapped deflate    |
//! | `br`       | Brotli                                               |
//!
//! Any other token is rejected as unsupported. Bodies are fully buffered
//! before decoding; there is no streaming decode.
//!
//! # Memory Safety
//!
//! Both the encoded read and the decoded output are bounded by
//! [`CoreConfig`] limits so a small compressed body cannot expand without
//! bound.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderMap};
use http::{Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::CoreConfig;
use crate::error::ErrorKind;
use crate::telemetry::get_core_metrics;

/// Boxed error produced by body transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Buffer size handed to the Brotli reader and writer.
const BROTLI_BUFFER: usize = 4096;
/// Brotli quality used when encoding (0-11).
const BROTLI_QUALITY: u32 = 5;
/// Brotli window size (log2) used when encoding.
const BROTLI_LGWIN: u32 = 22;

/// Errors raised while reading, decoding or encoding a body.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The content-encoding token is not one we handle.
    #[error("unsupported content-encoding '{0}'")]
    Unsupported(String),

    /// The `content-encoding` header is not visible ASCII.
    #[error("content-encoding header is not valid text")]
    InvalidEncodingHeader,

    /// The body is not a valid stream of its declared encoding.
    #[error("malformed {encoding} body: {source}")]
    Decode {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The decoded body exceeds the configured limit.
    #[error("decoded {encoding} body exceeds {limit} bytes")]
    DecodedTooLarge { encoding: &'static str, limit: usize },

    /// Compressing a body failed.
    #[error("failed to encode {encoding} body: {source}")]
    Encode {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The encoded body read from the transport exceeds the configured limit.
    #[error("body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The transport failed while the body was being read.
    #[error("failed to read body: {0}")]
    Body(#[source] BoxError),
}

impl CodecError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Unsupported(_) | CodecError::InvalidEncodingHeader => {
                ErrorKind::Unsupported
            }
            CodecError::Decode { .. }
            | CodecError::DecodedTooLarge { .. }
            | CodecError::Body(_) => ErrorKind::DecodeError,
            CodecError::Encode { .. } | CodecError::BodyTooLarge { .. } => {
                ErrorKind::InvalidArgument
            }
        }
    }
}

/// A recognised content-encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// Parse a header token. Case-insensitive; surrounding whitespace ignored.
    /// A missing or empty token means identity.
    ///
    /// # Errors
    ///
    /// [`CodecError::Unsupported`] naming the token for anything else.
    pub fn from_token(token: Option<&str>) -> Result<Self, CodecError> {
        let normalized = token.map(|t| t.trim().to_ascii_lowercase()).unwrap_or_default();
        match normalized.as_str() {
            "" | "identity" => Ok(ContentEncoding::Identity),
            "gzip" => Ok(ContentEncoding::Gzip),
            "deflate" => Ok(ContentEncoding::Deflate),
            "br" => Ok(ContentEncoding::Brotli),
            _ => Err(CodecError::Unsupported(normalized)),
        }
    }

    /// Canonical header token.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
        }
    }
}

/// Decodes and encodes bodies within configured size limits.
#[derive(Debug, Clone)]
pub struct ContentCodec {
    config: CoreConfig,
}

impl Default for ContentCodec {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl ContentCodec {
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Decode `content` according to an optional content-encoding token.
    ///
    /// Identity returns `content` unchanged without copying.
    ///
    /// # Errors
    ///
    /// - [`CodecError::Unsupported`] for an unknown token.
    /// - [`CodecError::Decode`] for a malformed stream. For `deflate` the
    ///   reported error is the one from the raw-deflate attempt.
    /// - [`CodecError::DecodedTooLarge`] when the output exceeds the limit.
    pub fn decode(
        &self,
        content: impl Into<Bytes>,
        encoding: Option<&str>,
    ) -> Result<Bytes, CodecError> {
        let content = content.into();
        let encoding = match ContentEncoding::from_token(encoding) {
            Ok(encoding) => encoding,
            Err(e) => {
                record_decode("unsupported", &Err(&e));
                return Err(e);
            }
        };

        let limit = self.config.decoded_body_max;
        let result = match encoding {
            ContentEncoding::Identity => Ok(content),
            ContentEncoding::Gzip => {
                // Concatenated members form one body
                read_limited(MultiGzDecoder::new(&content[..]), encoding, limit)
            }
            ContentEncoding::Deflate => {
                match read_limited(DeflateDecoder::new(&content[..]), encoding, limit) {
                    Ok(decoded) => Ok(decoded),
                    Err(raw_error) => {
                        debug!(error = %raw_error, "Raw deflate failed, retrying as zlib");
                        read_limited(ZlibDecoder::new(&content[..]), encoding, limit)
                            .map_err(|_| raw_error)
                    }
                }
            }
            ContentEncoding::Brotli => read_limited(
                brotli::Decompressor::new(&content[..], BROTLI_BUFFER),
                encoding,
                limit,
            ),
        };

        record_decode(encoding.as_str(), &result.as_ref().map(|_| ()));
        result
    }

    /// Compress `content` with the given encoding.
    ///
    /// `deflate` produces a zlib-wrapped stream, the form HTTP specifies.
    ///
    /// # Errors
    ///
    /// [`CodecError::Unsupported`] for an unknown token,
    /// [`CodecError::Encode`] if the compressor fails.
    pub fn encode(&self, content: &[u8], encoding: Option<&str>) -> Result<Bytes, CodecError> {
        let encoding = ContentEncoding::from_token(encoding)?;
        let to_error = |source| CodecError::Encode {
            encoding: encoding.as_str(),
            source,
        };

        let encoded = match encoding {
            ContentEncoding::Identity => return Ok(Bytes::copy_from_slice(content)),
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(content).map_err(to_error)?;
                encoder.finish().map_err(to_error)?
            }
            ContentEncoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(content).map_err(to_error)?;
                encoder.finish().map_err(to_error)?
            }
            ContentEncoding::Brotli => {
                let mut encoder = brotli::CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_LGWIN,
                );
                encoder.write_all(content).map_err(to_error)?;
                encoder.flush().map_err(to_error)?;
                encoder.into_inner()
            }
        };

        Ok(Bytes::from(encoded))
    }

    /// Read a request body to completion and decode it.
    ///
    /// The body is consumed exactly once. When the body was encoded, the
    /// returned request no longer carries `content-encoding` and its
    /// `content-length` matches the decoded body.
    ///
    /// # Errors
    ///
    /// - [`CodecError::BodyTooLarge`] if the body exceeds `req_body_max`.
    /// - [`CodecError::Body`] if the transport fails mid-read.
    /// - Any error from [`decode`](Self::decode).
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn read_and_decode_request<B>(
        &self,
        req: Request<B>,
    ) -> Result<Request<Bytes>, CodecError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();
        let raw = collect_limited(body, self.config.req_body_max).await?;
        let decoded = self.decode_message(&mut parts.headers, raw)?;
        Ok(Request::from_parts(parts, decoded))
    }

    /// Read a response body to completion and decode it.
    ///
    /// Same contract as [`read_and_decode_request`](Self::read_and_decode_request),
    /// bounded by `resp_body_max`.
    #[instrument(skip(self, res), fields(status = %res.status()))]
    pub async fn read_and_decode_response<B>(
        &self,
        res: Response<B>,
    ) -> Result<Response<Bytes>, CodecError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = res.into_parts();
        let raw = collect_limited(body, self.config.resp_body_max).await?;
        let decoded = self.decode_message(&mut parts.headers, raw)?;
        Ok(Response::from_parts(parts, decoded))
    }

    fn decode_message(&self, headers: &mut HeaderMap, raw: Bytes) -> Result<Bytes, CodecError> {
        let token = headers
            .get(CONTENT_ENCODING)
            .map(|v| v.to_str().map_err(|_| CodecError::InvalidEncodingHeader))
            .transpose()?;
        let encoding = ContentEncoding::from_token(token)?;
        let decoded = self.decode(raw, Some(encoding.as_str()))?;

        if encoding != ContentEncoding::Identity {
            // Downstream sees the decoded body
            headers.remove(CONTENT_ENCODING);
            headers.insert(CONTENT_LENGTH, decoded.len().into());
        }
        Ok(decoded)
    }
}

/// Decode with default limits. See [`ContentCodec::decode`].
pub fn decode(content: impl Into<Bytes>, encoding: Option<&str>) -> Result<Bytes, CodecError> {
    ContentCodec::default().decode(content, encoding)
}

/// Encode with default settings. See [`ContentCodec::encode`].
pub fn encode(content: &[u8], encoding: Option<&str>) -> Result<Bytes, CodecError> {
    ContentCodec::default().encode(content, encoding)
}

fn read_limited<R: Read>(
    reader: R,
    encoding: ContentEncoding,
    limit: usize,
) -> Result<Bytes, CodecError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|source| CodecError::Decode {
            encoding: encoding.as_str(),
            source,
        })?;
    if out.len() > limit {
        warn!(encoding = encoding.as_str(), limit, "Decoded body exceeds limit");
        return Err(CodecError::DecodedTooLarge {
            encoding: encoding.as_str(),
            limit,
        });
    }
    Ok(Bytes::from(out))
}

async fn collect_limited<B>(body: B, limit: usize) -> Result<Bytes, CodecError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit, "Body exceeds read limit");
            Err(CodecError::BodyTooLarge { limit })
        }
        Err(e) => Err(CodecError::Body(e)),
    }
}

fn record_decode(encoding: &str, result: &Result<(), &CodecError>) {
    if let Some(m) = get_core_metrics() {
        let outcome = match result {
            Ok(()) => "success",
            Err(e) => e.kind().as_str(),
        };
        m.record_decode(encoding, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use futures_util::stream;
    use http_body::Frame;
    use http_body_util::{Full, StreamBody};

    const PAYLOAD: &[u8] = br#"{"id":"msg_1","content":[{"type":"text","text":"hello"}]}"#;

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_identity_variants_pass_through() {
        for token in [None, Some(""), Some("identity"), Some("IDENTITY")] {
            let decoded = decode(Bytes::from_static(PAYLOAD), token).unwrap();
            assert_eq!(decoded.as_ref(), PAYLOAD, "{token:?}");
        }
    }

    #[test]
    fn test_tokens_are_case_insensitive() {
        let gz = encode(PAYLOAD, Some("gzip")).unwrap();
        assert_eq!(decode(gz, Some(" GZip ")).unwrap().as_ref(), PAYLOAD);
    }

    #[test]
    fn test_each_encoding_round_trips() {
        for token in ["gzip", "deflate", "br"] {
            let encoded = encode(PAYLOAD, Some(token)).unwrap();
            assert_ne!(encoded.as_ref(), PAYLOAD);
            assert_eq!(decode(encoded, Some(token)).unwrap().as_ref(), PAYLOAD, "{token}");
        }
    }

    #[test]
    fn test_gzip_decodes_every_member() {
        let mut body = encode(b"hello ", Some("gzip")).unwrap().to_vec();
        body.extend_from_slice(&encode(b"world", Some("gzip")).unwrap());

        let decoded = decode(body, Some("gzip")).unwrap();

        assert_eq!(decoded.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_multi_member_request_length_matches_full_body() {
        let mut body = encode(b"{\"a\":", Some("gzip")).unwrap().to_vec();
        body.extend_from_slice(&encode(b"1}", Some("gzip")).unwrap());
        let req = Request::builder()
            .uri("https://h/")
            .header("content-encoding", "gzip")
            .body(Full::new(Bytes::from(body)))
            .unwrap();

        let decoded = ContentCodec::default()
            .read_and_decode_request(req)
            .await
            .unwrap();

        assert_eq!(decoded.body().as_ref(), b"{\"a\":1}");
        assert_eq!(decoded.headers()[CONTENT_LENGTH], "7");
    }

    #[test]
    fn test_deflate_accepts_raw_and_zlib() {
        let raw = raw_deflate(PAYLOAD);
        let zlib = encode(PAYLOAD, Some("deflate")).unwrap();

        assert_eq!(decode(raw, Some("deflate")).unwrap().as_ref(), PAYLOAD);
        assert_eq!(decode(zlib, Some("deflate")).unwrap().as_ref(), PAYLOAD);
    }

    #[test]
    fn test_unsupported_token_is_named() {
        let err = decode(Bytes::from_static(b"x"), Some("zstd")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(err.to_string().contains("zstd"));
    }

    #[test]
    fn test_malformed_streams_are_decode_errors() {
        for token in ["gzip", "deflate", "br"] {
            let err = decode(Bytes::from_static(b"definitely not compressed"), Some(token))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DecodeError, "{token}");
        }
    }

    #[test]
    fn test_decoded_size_limit() {
        let codec = ContentCodec::new(CoreConfig {
            decoded_body_max: 1024,
            ..CoreConfig::default()
        });
        let bomb = encode(&vec![b'a'; 64 * 1024], Some("gzip")).unwrap();

        let err = codec.decode(bomb, Some("gzip")).unwrap_err();

        assert!(matches!(err, CodecError::DecodedTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn test_read_and_decode_request_strips_encoding() {
        let body = encode(PAYLOAD, Some("gzip")).unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("https://api.example.com/v1/messages")
            .header("Content-Encoding", "gzip")
            .header("content-length", body.len())
            .body(Full::new(body))
            .unwrap();

        let decoded = ContentCodec::default()
            .read_and_decode_request(req)
            .await
            .unwrap();

        assert_eq!(decoded.body().as_ref(), PAYLOAD);
        assert!(decoded.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(decoded.headers()[CONTENT_LENGTH], PAYLOAD.len().to_string());
    }

    #[tokio::test]
    async fn test_read_and_decode_response_from_chunked_stream() {
        let encoded = encode(PAYLOAD, Some("br")).unwrap();
        let (first, second) = encoded.split_at(encoded.len() / 2);
        let frames = vec![
            Ok::<_, std::convert::Infallible>(Frame::data(Bytes::copy_from_slice(first))),
            Ok(Frame::data(Bytes::copy_from_slice(second))),
        ];
        let res = Response::builder()
            .status(200)
            .header("content-encoding", "br")
            .body(StreamBody::new(stream::iter(frames)))
            .unwrap();

        let decoded = ContentCodec::default()
            .read_and_decode_response(res)
            .await
            .unwrap();

        assert_eq!(decoded.status(), 200);
        assert_eq!(decoded.body().as_ref(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_identity_body_keeps_headers() {
        let res = Response::builder()
            .status(200)
            .header("content-length", PAYLOAD.len())
            .body(Full::new(Bytes::from_static(PAYLOAD)))
            .unwrap();

        let decoded = ContentCodec::default()
            .read_and_decode_response(res)
            .await
            .unwrap();

        assert_eq!(decoded.body().as_ref(), PAYLOAD);
        assert_eq!(decoded.headers()[CONTENT_LENGTH], PAYLOAD.len().to_string());
    }

    #[tokio::test]
    async fn test_body_read_limit() {
        let codec = ContentCodec::new(CoreConfig {
            req_body_max: 8,
            ..CoreConfig::default()
        });
        let req = Request::builder()
            .uri("https://h/")
            .body(Full::new(Bytes::from_static(PAYLOAD)))
            .unwrap();

        let err = codec.read_and_decode_request(req).await.unwrap_err();

        assert!(matches!(err, CodecError::BodyTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn test_unsupported_header_encoding() {
        let req = Request::builder()
            .uri("https://h/")
            .header("content-encoding", "compress")
            .body(Full::new(Bytes::from_static(b"x")))
            .unwrap();

        let err = ContentCodec::default()
            .read_and_decode_request(req)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
