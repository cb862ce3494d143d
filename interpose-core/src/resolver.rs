//! Dotted-path lookups into a transaction context.
//!
//! Policies with data-driven rules (e.g. "reject when
//! `request.content.model` is X") use [`get_tx_value`] to read arbitrary
//! nested fields without knowing the shape of the context in advance.
//!
//! # Path Grammar
//!
//! `root.segment[.segment...]` where root is one of:
//!
//! - `request`: the current request (`method`, `url`, `headers`, `content`)
//! - `response`: the current response (`status_code`, `headers`, `content`)
//! - `data`: the scratch store
//!
//! `content` yields the raw body. When segments remain after a body, the
//! body is parsed as JSON and traversal continues inside it. JSON objects are
//! indexed by key, JSON arrays by decimal index.

use bytes::Bytes;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::context::{TrackedRequest, TrackedResponse, TransactionContext};
use crate::error::ErrorKind;

/// Errors raised while resolving a path.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The path has fewer than two segments.
    #[error("invalid path '{path}': expected '<root>.<field>[...]'")]
    InvalidPath { path: String },

    /// The first segment is not a known root.
    #[error("invalid root '{root}' in path '{path}': expected request, response or data")]
    InvalidRoot { path: String, root: String },

    /// The path starts at `request` but no request is set.
    #[error("cannot resolve '{path}': transaction has no request")]
    RequestAbsent { path: String },

    /// The path starts at `response` but no response is set.
    #[error("cannot resolve '{path}': transaction has no response")]
    ResponseAbsent { path: String },

    /// A mapping has no entry for the segment.
    #[error("key '{segment}' not found while resolving '{path}'")]
    KeyNotFound { path: String, segment: String },

    /// The current value has no attribute or element named by the segment.
    #[error("no attribute '{segment}' on {found} while resolving '{path}'")]
    NoSuchAttribute {
        path: String,
        segment: String,
        found: &'static str,
    },

    /// A body had to be parsed as JSON to continue, and was not JSON.
    #[error("content is not valid JSON at segment '{segment}' while resolving '{path}': {source}")]
    Decode {
        path: String,
        segment: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ResolveError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidPath { .. } | ResolveError::InvalidRoot { .. } => {
                ErrorKind::InvalidArgument
            }
            ResolveError::RequestAbsent { .. }
            | ResolveError::ResponseAbsent { .. }
            | ResolveError::KeyNotFound { .. }
            | ResolveError::NoSuchAttribute { .. } => ErrorKind::NotFound,
            ResolveError::Decode { .. } => ErrorKind::DecodeError,
        }
    }
}

/// A resolved value: raw body bytes or a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum TxValue {
    Bytes(Bytes),
    Json(Value),
}

impl TxValue {
    /// The JSON value, if this is one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            TxValue::Json(value) => Some(value),
            TxValue::Bytes(_) => None,
        }
    }

    /// The JSON value, or the body as a (lossy) JSON string.
    pub fn into_json(self) -> Value {
        match self {
            TxValue::Json(value) => value,
            TxValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

/// Intermediate traversal state.
enum Node {
    Request(TrackedRequest),
    Response(TrackedResponse),
    Bytes(Bytes),
    Json(Value),
}

impl Node {
    fn describe(&self) -> &'static str {
        match self {
            Node::Request(_) => "request",
            Node::Response(_) => "response",
            Node::Bytes(_) => "content bytes",
            Node::Json(Value::Object(_)) => "JSON object",
            Node::Json(Value::Array(_)) => "JSON array",
            Node::Json(_) => "JSON scalar",
        }
    }
}

/// Resolve a dotted path against the context's current state.
///
/// # Errors
///
/// - [`ResolveError::InvalidPath`] / [`ResolveError::InvalidRoot`] for a
///   malformed path (kind `InvalidArgument`).
/// - [`ResolveError::RequestAbsent`], [`ResolveError::ResponseAbsent`],
///   [`ResolveError::KeyNotFound`], [`ResolveError::NoSuchAttribute`]
///   (kind `NotFound`).
/// - [`ResolveError::Decode`] when a body must be read as JSON and is not
///   (kind `DecodeError`).
pub fn get_tx_value(ctx: &TransactionContext, path: &str) -> Result<TxValue, ResolveError> {
    let segments: Vec<&str> = path.split('.').collect();
    let [root, rest @ ..] = segments.as_slice() else {
        return Err(ResolveError::InvalidPath { path: path.into() });
    };
    if rest.is_empty() {
        return Err(ResolveError::InvalidPath { path: path.into() });
    }

    let node = match *root {
        "request" => Node::Request(
            ctx.current_request()
                .ok_or_else(|| ResolveError::RequestAbsent { path: path.into() })?,
        ),
        "response" => Node::Response(
            ctx.current_response()
                .ok_or_else(|| ResolveError::ResponseAbsent { path: path.into() })?,
        ),
        "data" => Node::Json(Value::Object(ctx.get_all_data().into_iter().collect())),
        other => {
            return Err(ResolveError::InvalidRoot {
                path: path.into(),
                root: other.into(),
            });
        }
    };

    resolve(node, rest, path)
}

fn resolve(node: Node, segments: &[&str], path: &str) -> Result<TxValue, ResolveError> {
    let Some((&segment, rest)) = segments.split_first() else {
        return Ok(finish(node));
    };

    let next = match node {
        Node::Request(request) => request_attribute(request, segment, path)?,
        Node::Response(response) => response_attribute(response, segment, path)?,
        Node::Bytes(bytes) => {
            let parsed: Value =
                serde_json::from_slice(&bytes).map_err(|source| ResolveError::Decode {
                    path: path.into(),
                    segment: segment.into(),
                    source,
                })?;
            json_child(parsed, segment, path)?
        }
        Node::Json(value) => json_child(value, segment, path)?,
    };

    resolve(next, rest, path)
}

fn request_attribute(
    request: TrackedRequest,
    segment: &str,
    path: &str,
) -> Result<Node, ResolveError> {
    Ok(match segment {
        "content" => Node::Bytes(request.content),
        "method" => Node::Json(Value::String(request.method)),
        "url" => Node::Json(Value::String(request.url)),
        "headers" => Node::Json(headers_json(request.headers)),
        _ => return Err(no_attribute(path, segment, "request")),
    })
}

fn response_attribute(
    response: TrackedResponse,
    segment: &str,
    path: &str,
) -> Result<Node, ResolveError> {
    Ok(match segment {
        "content" => Node::Bytes(response.content),
        "status_code" => Node::Json(json!(response.status_code)),
        "headers" => Node::Json(headers_json(response.headers)),
        _ => return Err(no_attribute(path, segment, "response")),
    })
}

fn json_child(value: Value, segment: &str, path: &str) -> Result<Node, ResolveError> {
    match value {
        Value::Object(mut map) => map
            .remove(segment)
            .map(Node::Json)
            .ok_or_else(|| ResolveError::KeyNotFound {
                path: path.into(),
                segment: segment.into(),
            }),
        Value::Array(mut items) => match segment.parse::<usize>() {
            Ok(index) if index < items.len() => Ok(Node::Json(items.swap_remove(index))),
            _ => Err(no_attribute(path, segment, "JSON array")),
        },
        other => Err(no_attribute(path, segment, Node::Json(other).describe())),
    }
}

fn headers_json(headers: crate::context::Headers) -> Value {
    Value::Object(
        headers
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>(),
    )
}

fn no_attribute(path: &str, segment: &str, found: &'static str) -> ResolveError {
    ResolveError::NoSuchAttribute {
        path: path.into(),
        segment: segment.into(),
        found,
    }
}

fn finish(node: Node) -> TxValue {
    match node {
        Node::Bytes(bytes) => TxValue::Bytes(bytes),
        Node::Json(value) => TxValue::Json(value),
        // Roots are always followed by at least one segment.
        Node::Request(request) => TxValue::Json(json!(request)),
        Node::Response(response) => TxValue::Json(json!(response)),
    }
}
