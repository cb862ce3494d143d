//! Value holders for the two sides of an HTTP exchange.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::HeaderMap;
use http::{Request, Response, StatusCode, Uri};
use serde::{Deserialize, Serialize};

/// Header mapping. Keys are compared by exact byte value; no case folding.
pub type Headers = BTreeMap<String, String>;

/// Default method used when a request is first created without one.
pub const DEFAULT_METHOD: &str = "GET";

/// The request side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRequest {
    /// HTTP method token
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Raw body (already decoded if it arrived compressed)
    #[serde(with = "content_text")]
    pub content: Bytes,
}

/// The response side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Response headers
    pub headers: Headers,
    /// Raw body
    #[serde(with = "content_text")]
    pub content: Bytes,
}

impl TrackedRequest {
    /// Build a request from already decoded `http` parts.
    ///
    /// The URI is taken verbatim; forward-proxy requests carry absolute URIs.
    pub fn from_parts(parts: &http::request::Parts, content: Bytes) -> Self {
        Self {
            method: parts.method.as_str().to_string(),
            url: parts.uri.to_string(),
            headers: headers_from_map(&parts.headers),
            content,
        }
    }

    /// Convert into an `http::Request` for forwarding.
    ///
    /// # Errors
    ///
    /// Returns `http::Error` if the method, URL, or a header is not valid HTTP.
    pub fn to_http(&self) -> Result<Request<Bytes>, http::Error> {
        let mut builder = Request::builder()
            .method(self.method.as_str())
            .uri(self.url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(self.content.clone())
    }
}

impl TrackedResponse {
    /// Build a response from already decoded `http` parts.
    pub fn from_parts(parts: &http::response::Parts, content: Bytes) -> Self {
        Self {
            status_code: parts.status.as_u16(),
            headers: headers_from_map(&parts.headers),
            content,
        }
    }

    /// Convert into an `http::Response` for delivery to the client.
    ///
    /// # Errors
    ///
    /// Returns `http::Error` if the status code or a header is not valid HTTP.
    pub fn to_http(&self) -> Result<Response<Bytes>, http::Error> {
        let status = StatusCode::from_u16(self.status_code)?;
        let mut builder = Response::builder().status(status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(self.content.clone())
    }
}

/// Network-location component of an absolute URL (`user@host:port`).
pub fn host_from_url(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    uri.authority().map(|a| a.as_str().to_string())
}

/// Flatten an `http::HeaderMap`. Repeated headers are joined with `", "`;
/// non-UTF-8 values are converted lossily.
pub fn headers_from_map(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for name in map.keys() {
        let joined = map
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        headers.insert(name.as_str().to_string(), joined);
    }
    headers
}

/// Bodies serialize as (lossy) UTF-8 text so audit records stay readable.
mod content_text {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(content))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Bytes::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_from_url() {
        assert_eq!(host_from_url("https://api.example.com/v1/chat"), Some("api.example.com".into()));
        assert_eq!(host_from_url("http://localhost:8080/x"), Some("localhost:8080".into()));
        assert_eq!(host_from_url("/relative/path"), None);
        assert_eq!(host_from_url("not a url"), None);
    }

    #[test]
    fn test_request_http_round_trip() {
        let req = Request::builder()
            .method("POST")
            .uri("https://api.example.com/v1/messages")
            .header("content-type", "application/json")
            .header("accept", "text/plain")
            .header("accept", "application/json")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();

        let tracked = TrackedRequest::from_parts(&parts, Bytes::from_static(b"{}"));

        assert_eq!(tracked.method, "POST");
        assert_eq!(tracked.url, "https://api.example.com/v1/messages");
        assert_eq!(tracked.headers["accept"], "text/plain, application/json");

        let rebuilt = tracked.to_http().unwrap();
        assert_eq!(rebuilt.method(), http::Method::POST);
        assert_eq!(rebuilt.headers()["content-type"], "application/json");
        assert_eq!(rebuilt.body().as_ref(), b"{}");
    }

    #[test]
    fn test_response_to_http_rejects_invalid_status() {
        let tracked = TrackedResponse {
            status_code: 1000,
            headers: Headers::new(),
            content: Bytes::new(),
        };
        assert!(tracked.to_http().is_err());
    }

    #[test]
    fn test_content_serializes_as_text() {
        let tracked = TrackedResponse {
            status_code: 200,
            headers: Headers::new(),
            content: Bytes::from_static(b"hello"),
        };
        let value = serde_json::to_value(&tracked).unwrap();
        assert_eq!(value["content"], "hello");

        let back: TrackedResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back, tracked);
    }
}
