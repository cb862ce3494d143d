//! Bulk update descriptions for [`super::TransactionContext::update_request`]
//! and [`super::TransactionContext::update_response`].

use bytes::Bytes;

use super::tracked::{Headers, TrackedRequest, TrackedResponse};

/// Fields to set on the transaction's request.
///
/// Omitted fields keep their current value. See
/// [`TransactionContext::update_request`](super::TransactionContext::update_request)
/// for creation and merge rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUpdate {
    /// New method
    pub method: Option<String>,
    /// New absolute URL
    pub url: Option<String>,
    /// Headers to merge in (or to replace with, see `preserve_existing_headers`)
    pub headers: Option<Headers>,
    /// New body
    pub content: Option<Bytes>,
    /// Discard the current request and build a new one
    pub from_scratch: bool,
    /// Merge `headers` into the existing ones instead of replacing them
    pub preserve_existing_headers: bool,
}

impl Default for RequestUpdate {
    fn default() -> Self {
        Self {
            method: None,
            url: None,
            headers: None,
            content: None,
            from_scratch: false,
            preserve_existing_headers: true,
        }
    }
}

impl RequestUpdate {
    /// An empty partial update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A from-scratch update with its two required fields.
    #[must_use]
    pub fn from_scratch(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            url: Some(url.into()),
            from_scratch: true,
            ..Self::default()
        }
    }

    /// A from-scratch update carrying every field of `request`.
    #[must_use]
    pub fn replace_with(request: TrackedRequest) -> Self {
        Self {
            method: Some(request.method),
            url: Some(request.url),
            headers: Some(request.headers),
            content: Some(request.content),
            from_scratch: true,
            preserve_existing_headers: true,
        }
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the headers to apply. Merged by default; see [`Self::replace_headers`].
    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = Some(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Replace existing headers wholesale instead of merging.
    #[must_use]
    pub fn replace_headers(mut self) -> Self {
        self.preserve_existing_headers = false;
        self
    }
}

/// Fields to set on the transaction's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseUpdate {
    /// New status code
    pub status_code: Option<u16>,
    /// Headers to merge in (or to replace with)
    pub headers: Option<Headers>,
    /// New body
    pub content: Option<Bytes>,
    /// Discard the current response and build a new one
    pub from_scratch: bool,
    /// Merge `headers` into the existing ones instead of replacing them
    pub preserve_existing_headers: bool,
}

impl Default for ResponseUpdate {
    fn default() -> Self {
        Self {
            status_code: None,
            headers: None,
            content: None,
            from_scratch: false,
            preserve_existing_headers: true,
        }
    }
}

impl ResponseUpdate {
    /// An empty partial update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A from-scratch update with its required status code.
    #[must_use]
    pub fn from_scratch(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            from_scratch: true,
            ..Self::default()
        }
    }

    /// A from-scratch update carrying every field of `response`.
    #[must_use]
    pub fn replace_with(response: TrackedResponse) -> Self {
        Self {
            status_code: Some(response.status_code),
            headers: Some(response.headers),
            content: Some(response.content),
            from_scratch: true,
            preserve_existing_headers: true,
        }
    }

    #[must_use]
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = Some(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Replace existing headers wholesale instead of merging.
    #[must_use]
    pub fn replace_headers(mut self) -> Self {
        self.preserve_existing_headers = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_update_defaults() {
        let update = RequestUpdate::new();
        assert!(!update.from_scratch);
        assert!(update.preserve_existing_headers);
        assert!(update.method.is_none() && update.url.is_none());
    }

    #[test]
    fn test_request_update_builder() {
        let update = RequestUpdate::from_scratch("POST", "https://h/x")
            .headers([("a", "1")])
            .content("body")
            .replace_headers();

        assert!(update.from_scratch);
        assert!(!update.preserve_existing_headers);
        assert_eq!(update.headers.unwrap()["a"], "1");
        assert_eq!(update.content.unwrap().as_ref(), b"body");
    }

    #[test]
    fn test_response_replace_with_copies_all_fields() {
        let response = TrackedResponse {
            status_code: 418,
            headers: Headers::from([("x".to_string(), "y".to_string())]),
            content: Bytes::from_static(b"teapot"),
        };

        let update = ResponseUpdate::replace_with(response);

        assert!(update.from_scratch);
        assert_eq!(update.status_code, Some(418));
        assert_eq!(update.headers.unwrap()["x"], "y");
    }
}
