//! Field-level mutation handles for the current request and response.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::state::TrackedMessage;
use super::tracked::{Headers, TrackedRequest, TrackedResponse};
use super::{ContextError, ContextInner};
use crate::events::MutationOperation;

/// Handle to the transaction's current request.
pub type RequestHandle = Handle<TrackedRequest>;

/// Handle to the transaction's current response.
pub type ResponseHandle = Handle<TrackedResponse>;

/// A non-owning reference to the request or response held by a
/// [`TransactionContext`](super::TransactionContext).
///
/// Every mutator applies its change and then dispatches one mutation event
/// through the owning context, attributed to the policy current at that
/// moment. A handle outlives neither its context (operations fail with
/// [`ContextError::ContextDropped`]) nor its holder: after a from-scratch
/// update replaces the holder, operations fail with
/// [`ContextError::StaleHandle`].
pub struct Handle<M> {
    ctx: Weak<ContextInner>,
    generation: u64,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            generation: self.generation,
            _marker: PhantomData,
        }
    }
}

impl<M: TrackedMessage> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("target", &M::TARGET)
            .field("generation", &self.generation)
            .field("attached", &(self.ctx.strong_count() > 0))
            .finish()
    }
}

impl<M: TrackedMessage> Handle<M> {
    pub(crate) fn new(ctx: Weak<ContextInner>, generation: u64) -> Self {
        Self {
            ctx,
            generation,
            _marker: PhantomData,
        }
    }

    fn context(&self) -> Result<Arc<ContextInner>, ContextError> {
        self.ctx.upgrade().ok_or(ContextError::ContextDropped)
    }

    fn read<R>(&self, f: impl FnOnce(&M) -> R) -> Result<R, ContextError> {
        self.context()?.read(self.generation, f)
    }

    fn mutate(
        &self,
        operation: MutationOperation,
        f: impl FnOnce(&mut M) -> Option<Map<String, Value>>,
    ) -> Result<bool, ContextError> {
        self.context()?.mutate(self.generation, operation, f)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy of the referenced holder.
    pub fn snapshot(&self) -> Result<M, ContextError> {
        self.read(M::clone)
    }

    pub fn headers(&self) -> Result<Headers, ContextError> {
        self.read(|m| m.headers().clone())
    }

    /// Header value by exact key.
    pub fn header(&self, key: &str) -> Result<Option<String>, ContextError> {
        self.read(|m| m.headers().get(key).cloned())
    }

    pub fn content(&self) -> Result<Bytes, ContextError> {
        self.read(|m| m.content().clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or overwrite a header. Emits `set_header`.
    pub fn set_header(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContextError> {
        let key = key.into();
        let value = value.into();
        self.mutate(MutationOperation::SetHeader, |m| {
            let old = m.headers_mut().insert(key.clone(), value.clone());
            let mut details = Map::new();
            details.insert("key".into(), Value::String(key));
            details.insert("old_value".into(), json!(old));
            details.insert("new_value".into(), Value::String(value));
            Some(details)
        })?;
        Ok(())
    }

    /// Remove a header by exact key.
    ///
    /// Returns whether the header existed. Removing an absent header changes
    /// nothing and emits no event.
    pub fn remove_header(&self, key: &str) -> Result<bool, ContextError> {
        self.mutate(MutationOperation::RemoveHeader, |m| {
            let old = m.headers_mut().remove(key)?;
            let mut details = Map::new();
            details.insert("key".into(), Value::String(key.to_string()));
            details.insert("old_value".into(), Value::String(old));
            Some(details)
        })
    }

    /// Replace the body with raw bytes. Emits `set_content`.
    pub fn set_content(&self, content: impl Into<Bytes>) -> Result<(), ContextError> {
        let content = content.into();
        self.mutate(MutationOperation::SetContent, |m| {
            Some(replace_content(m, content))
        })?;
        Ok(())
    }

    /// Replace the body with `value` serialized as JSON. Emits `set_json_content`.
    ///
    /// A `content-length` header, if present, is rewritten to the new length.
    ///
    /// # Errors
    ///
    /// [`ContextError::Serialize`] if `value` cannot be serialized; nothing
    /// changes in that case.
    pub fn set_json_content<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ContextError> {
        let content = Bytes::from(serde_json::to_vec(value)?);
        self.mutate(MutationOperation::SetJsonContent, |m| {
            Some(replace_content(m, content))
        })?;
        Ok(())
    }
}

fn replace_content<M: TrackedMessage>(message: &mut M, content: Bytes) -> Map<String, Value> {
    let new_length = content.len();
    let old = std::mem::replace(message.content_mut(), content);
    if let Some(length) = message.headers_mut().get_mut("content-length") {
        *length = new_length.to_string();
    }

    let mut details = Map::new();
    details.insert("old_length".into(), json!(old.len()));
    details.insert("new_length".into(), json!(new_length));
    details
}

impl Handle<TrackedRequest> {
    pub fn method(&self) -> Result<String, ContextError> {
        self.read(|r| r.method.clone())
    }

    pub fn url(&self) -> Result<String, ContextError> {
        self.read(|r| r.url.clone())
    }
}

impl Handle<TrackedResponse> {
    pub fn status_code(&self) -> Result<u16, ContextError> {
        self.read(|r| r.status_code)
    }

    /// Change the status code. Emits `set_status_code`.
    pub fn set_status_code(&self, status_code: u16) -> Result<(), ContextError> {
        self.mutate(MutationOperation::SetStatusCode, |r| {
            let old = std::mem::replace(&mut r.status_code, status_code);
            let mut details = Map::new();
            details.insert("old_value".into(), json!(old));
            details.insert("new_value".into(), json!(status_code));
            Some(details)
        })?;
        Ok(())
    }
}
