//! Per-transaction state container.
//!
//! A [`TransactionContext`] is created by the pipeline executor for one inbound
//! transaction and dropped once the response has been delivered. It owns the
//! current request and response, a scratch store policies use to pass data
//! forward, the name of the policy currently running, and the mutation
//! [`EventChannel`].
//!
//! # Mutation Contract
//!
//! Every successful mutating call dispatches exactly one [`MutationEvent`]
//! before it returns. State is updated first and the internal lock is released
//! before dispatch, so listeners observe the applied change and may read the
//! context. A call that fails its preconditions changes nothing and emits
//! nothing.
//!
//! # Attribution
//!
//! Events carry the policy name current at the moment of emission. Handles
//! obtained by one policy and used later are attributed to whichever policy is
//! current when they mutate.

mod handle;
mod state;
pub mod tracked;
pub mod update;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::events::mutation::MUTATION_CHANNEL;
use crate::events::{EventChannel, MutationEvent, MutationOperation};
use crate::telemetry::get_core_metrics;

pub use handle::{Handle, RequestHandle, ResponseHandle};
use state::{ContextState, Slot, TrackedMessage};
pub use tracked::{DEFAULT_METHOD, Headers, TrackedRequest, TrackedResponse, host_from_url};
pub use update::{RequestUpdate, ResponseUpdate};

/// Attribution reported when no policy has been set as current.
pub const UNATTRIBUTED_POLICY: &str = "unknown";

/// Errors raised by context and handle operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The call's arguments cannot produce a valid state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The owning context has been dropped.
    #[error("transaction context no longer exists")]
    ContextDropped,

    /// The handle refers to a request/response that has since been replaced.
    #[error("{target} handle is stale: it was replaced by a from-scratch update")]
    StaleHandle {
        /// "request" or "response"
        target: &'static str,
    },

    /// A value could not be serialized to JSON.
    #[error("JSON serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ContextError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContextError::InvalidArgument(_) | ContextError::Serialize(_) => {
                ErrorKind::InvalidArgument
            }
            ContextError::ContextDropped | ContextError::StaleHandle { .. } => ErrorKind::NotFound,
        }
    }
}

/// Serializable point-in-time copy of a context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub transaction_id: Uuid,
    pub current_policy: String,
    pub request: Option<TrackedRequest>,
    pub response: Option<TrackedResponse>,
    pub data: HashMap<String, Value>,
}

/// Shared interior. Handles hold a `Weak` to this; only the context owns it.
pub(crate) struct ContextInner {
    transaction_id: Uuid,
    unattributed_policy: String,
    state: Mutex<ContextState>,
    mutations: EventChannel<MutationEvent>,
}

impl ContextInner {
    fn attribution(&self, state: &ContextState) -> String {
        state
            .current_policy
            .clone()
            .unwrap_or_else(|| self.unattributed_policy.clone())
    }

    fn event(
        &self,
        state: &ContextState,
        operation: MutationOperation,
        details: Map<String, Value>,
    ) -> MutationEvent {
        MutationEvent::new(
            self.transaction_id,
            self.attribution(state),
            operation,
            details,
        )
    }

    /// Dispatch an event. Must be called with the state lock released.
    fn emit(&self, event: MutationEvent) {
        debug!(
            transaction_id = %event.transaction_id,
            policy = %event.policy_name,
            operation = %event.operation,
            "Dispatching mutation event"
        );
        if let Some(m) = get_core_metrics() {
            m.record_mutation(event.operation.as_str());
        }
        self.mutations.dispatch(&event);
    }

    /// Read the holder a handle of `generation` refers to.
    pub(crate) fn read<M, R>(
        &self,
        generation: u64,
        f: impl FnOnce(&M) -> R,
    ) -> Result<R, ContextError>
    where
        M: TrackedMessage,
    {
        let state = self.state.lock();
        match M::slot(&state) {
            Some(slot) if slot.generation == generation => Ok(f(&slot.value)),
            _ => Err(ContextError::StaleHandle { target: M::TARGET }),
        }
    }

    /// Apply `f` to the holder a handle of `generation` refers to.
    ///
    /// `f` returns the event details, or `None` when it made no change, in
    /// which case no event is dispatched. Returns whether an event fired.
    pub(crate) fn mutate<M>(
        &self,
        generation: u64,
        operation: MutationOperation,
        f: impl FnOnce(&mut M) -> Option<Map<String, Value>>,
    ) -> Result<bool, ContextError>
    where
        M: TrackedMessage,
    {
        let event = {
            let mut state = self.state.lock();
            let slot = match M::slot_mut(&mut state) {
                Some(slot) if slot.generation == generation => slot,
                _ => return Err(ContextError::StaleHandle { target: M::TARGET }),
            };
            let Some(mut details) = f(&mut slot.value) else {
                return Ok(false);
            };
            details.insert("target".into(), json!(M::TARGET));
            self.event(&state, operation, details)
        };
        self.emit(event);
        Ok(true)
    }
}

/// Builder for a [`TransactionContext`] with non-default settings.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    transaction_id: Option<Uuid>,
    unattributed_policy: String,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            transaction_id: None,
            unattributed_policy: UNATTRIBUTED_POLICY.to_string(),
        }
    }
}

impl ContextBuilder {
    /// Use an existing transaction id instead of generating one.
    #[must_use]
    pub fn transaction_id(mut self, id: Uuid) -> Self {
        self.transaction_id = Some(id);
        self
    }

    /// Attribution reported while no policy is current.
    #[must_use]
    pub fn unattributed_policy(mut self, name: impl Into<String>) -> Self {
        self.unattributed_policy = name.into();
        self
    }

    #[must_use]
    pub fn build(self) -> TransactionContext {
        TransactionContext {
            inner: Arc::new(ContextInner {
                transaction_id: self.transaction_id.unwrap_or_else(Uuid::new_v4),
                unattributed_policy: self.unattributed_policy,
                state: Mutex::new(ContextState::default()),
                mutations: EventChannel::new(MUTATION_CHANNEL),
            }),
        }
    }
}

/// Per-transaction aggregate of request, response, scratch data and
/// mutation events.
///
/// Not `Clone`: exactly one owner exists per transaction. Handles returned
/// by the update methods do not keep the context alive.
pub struct TransactionContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransactionContext")
            .field("transaction_id", &self.inner.transaction_id)
            .field("current_policy", &state.current_policy)
            .field("has_request", &state.request.is_some())
            .field("has_response", &state.response.is_some())
            .field("data_keys", &state.scratch.len())
            .field("mutation_listeners", &self.inner.mutations.listener_count())
            .finish()
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    /// Create a context with a fresh v4 transaction id.
    #[must_use]
    pub fn new() -> Self {
        ContextBuilder::default().build()
    }

    /// Create a context for a known transaction id.
    #[must_use]
    pub fn with_transaction_id(id: Uuid) -> Self {
        ContextBuilder::default().transaction_id(id).build()
    }

    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn transaction_id(&self) -> Uuid {
        self.inner.transaction_id
    }

    /// The channel every mutation event is dispatched on.
    pub fn mutation_events(&self) -> &EventChannel<MutationEvent> {
        &self.inner.mutations
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attribution
    // ─────────────────────────────────────────────────────────────────────────

    /// Set the policy that subsequent mutations are attributed to. Emits nothing.
    pub fn set_current_policy(&self, name: impl Into<String>) {
        self.inner.state.lock().current_policy = Some(name.into());
    }

    /// Reset attribution to the unattributed sentinel. Emits nothing.
    pub fn clear_current_policy(&self) {
        self.inner.state.lock().current_policy = None;
    }

    /// Current attribution, or the unattributed sentinel.
    pub fn current_policy(&self) -> String {
        let state = self.inner.state.lock();
        self.inner.attribution(&state)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request / Response access
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy of the current request, if one has been set.
    pub fn current_request(&self) -> Option<TrackedRequest> {
        self.inner
            .state
            .lock()
            .request
            .as_ref()
            .map(|slot| slot.value.clone())
    }

    /// Copy of the current response, if one has been set.
    pub fn current_response(&self) -> Option<TrackedResponse> {
        self.inner
            .state
            .lock()
            .response
            .as_ref()
            .map(|slot| slot.value.clone())
    }

    /// Mutable handle to the current request.
    pub fn request(&self) -> Option<RequestHandle> {
        let generation = self.inner.state.lock().request.as_ref()?.generation;
        Some(Handle::new(Arc::downgrade(&self.inner), generation))
    }

    /// Mutable handle to the current response.
    pub fn response(&self) -> Option<ResponseHandle> {
        let generation = self.inner.state.lock().response.as_ref()?.generation;
        Some(Handle::new(Arc::downgrade(&self.inner), generation))
    }

    /// Create, merge into, or replace the current request.
    ///
    /// - `from_scratch`: `method` and `url` are required. `content` defaults to
    ///   empty; `headers` default to a single `host` header taken from the
    ///   URL's network location.
    /// - No current request: as from-scratch, but `method` defaults to
    ///   [`DEFAULT_METHOD`]. `url` is still required.
    /// - Otherwise only supplied fields change. Headers are upserted when
    ///   `preserve_existing_headers` is set, replaced wholesale when not.
    ///
    /// # Errors
    ///
    /// [`ContextError::InvalidArgument`] when required fields are missing, the
    /// method is empty, or a host header cannot be derived from the URL. The
    /// context is unchanged and no event is emitted.
    pub fn update_request(&self, update: RequestUpdate) -> Result<RequestHandle, ContextError> {
        let from_scratch = update.from_scratch;
        if update.method.as_deref() == Some("") {
            return Err(ContextError::InvalidArgument("method must not be empty".into()));
        }

        let (generation, event) = {
            let mut state = self.inner.state.lock();
            let previous = state.request.as_ref().map(|slot| slot.value.clone());

            let generation = if from_scratch || previous.is_none() {
                let new = build_request(update)?;
                let generation = state.next_generation();
                state.request = Some(Slot {
                    generation,
                    value: new,
                });
                generation
            } else {
                let slot = state
                    .request
                    .as_mut()
                    .ok_or(ContextError::StaleHandle { target: "request" })?;
                apply_request(&mut slot.value, update);
                slot.generation
            };

            let current = state
                .request
                .as_ref()
                .map(|slot| slot.value.clone())
                .ok_or(ContextError::StaleHandle { target: "request" })?;
            let mut details = diff_request(previous.as_ref(), &current);
            details.insert("from_scratch".into(), json!(from_scratch));
            details.insert("created".into(), json!(previous.is_none() || from_scratch));
            let event = self
                .inner
                .event(&state, MutationOperation::UpdateRequest, details);
            (generation, event)
        };

        self.inner.emit(event);
        Ok(Handle::new(Arc::downgrade(&self.inner), generation))
    }

    /// Create, merge into, or replace the current response.
    ///
    /// Mirrors [`update_request`](Self::update_request): creation (from scratch,
    /// or when no response exists) requires `status_code` and defaults headers
    /// and content to empty. Partial updates upsert headers unless
    /// `preserve_existing_headers` is cleared.
    ///
    /// # Errors
    ///
    /// [`ContextError::InvalidArgument`] when `status_code` is required but
    /// missing.
    pub fn update_response(
        &self,
        update: ResponseUpdate,
    ) -> Result<ResponseHandle, ContextError> {
        let from_scratch = update.from_scratch;

        let (generation, event) = {
            let mut state = self.inner.state.lock();
            let previous = state.response.as_ref().map(|slot| slot.value.clone());

            let generation = if from_scratch || previous.is_none() {
                let new = build_response(update)?;
                let generation = state.next_generation();
                state.response = Some(Slot {
                    generation,
                    value: new,
                });
                generation
            } else {
                let slot = state
                    .response
                    .as_mut()
                    .ok_or(ContextError::StaleHandle { target: "response" })?;
                apply_response(&mut slot.value, update);
                slot.generation
            };

            let current = state
                .response
                .as_ref()
                .map(|slot| slot.value.clone())
                .ok_or(ContextError::StaleHandle { target: "response" })?;
            let mut details = diff_response(previous.as_ref(), &current);
            details.insert("from_scratch".into(), json!(from_scratch));
            details.insert("created".into(), json!(previous.is_none() || from_scratch));
            let event = self
                .inner
                .event(&state, MutationOperation::UpdateResponse, details);
            (generation, event)
        };

        self.inner.emit(event);
        Ok(Handle::new(Arc::downgrade(&self.inner), generation))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scratch store
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a value for later policies. Emits `set_data`.
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let event = {
            let mut state = self.inner.state.lock();
            let old = state.scratch.insert(key.clone(), value.clone());
            let mut details = Map::new();
            details.insert("key".into(), Value::String(key));
            details.insert("old_value".into(), old.unwrap_or(Value::Null));
            details.insert("new_value".into(), value);
            self.inner.event(&state, MutationOperation::SetData, details)
        };
        self.inner.emit(event);
    }

    /// Value stored under `key`, or `default`.
    pub fn get_data(&self, key: &str, default: Value) -> Value {
        self.data(key).unwrap_or(default)
    }

    /// Value stored under `key`, if any.
    pub fn data(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().scratch.get(key).cloned()
    }

    /// Owned copy of the whole scratch store.
    pub fn get_all_data(&self) -> HashMap<String, Value> {
        self.inner.state.lock().scratch.clone()
    }

    /// Serializable copy of the whole context.
    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.inner.state.lock();
        ContextSnapshot {
            transaction_id: self.inner.transaction_id,
            current_policy: self.inner.attribution(&state),
            request: state.request.as_ref().map(|slot| slot.value.clone()),
            response: state.response.as_ref().map(|slot| slot.value.clone()),
            data: state.scratch.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Update helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_request(update: RequestUpdate) -> Result<TrackedRequest, ContextError> {
    let method = match (update.method, update.from_scratch) {
        (Some(method), _) => method,
        (None, false) => DEFAULT_METHOD.to_string(),
        (None, true) => {
            return Err(ContextError::InvalidArgument(
                "from-scratch request update requires method".into(),
            ));
        }
    };
    let url = update.url.ok_or_else(|| {
        ContextError::InvalidArgument("creating a request requires url".into())
    })?;
    let headers = match update.headers {
        Some(headers) => headers,
        None => {
            let host = host_from_url(&url).ok_or_else(|| {
                ContextError::InvalidArgument(format!(
                    "cannot derive host header from url '{url}'"
                ))
            })?;
            Headers::from([("host".to_string(), host)])
        }
    };

    Ok(TrackedRequest {
        method,
        url,
        headers,
        content: update.content.unwrap_or_default(),
    })
}

fn apply_request(request: &mut TrackedRequest, update: RequestUpdate) {
    if let Some(method) = update.method {
        request.method = method;
    }
    if let Some(url) = update.url {
        request.url = url;
    }
    if let Some(headers) = update.headers {
        merge_headers(&mut request.headers, headers, update.preserve_existing_headers);
    }
    if let Some(content) = update.content {
        request.content = content;
    }
}

fn build_response(update: ResponseUpdate) -> Result<TrackedResponse, ContextError> {
    let status_code = update.status_code.ok_or_else(|| {
        ContextError::InvalidArgument("creating a response requires status_code".into())
    })?;

    Ok(TrackedResponse {
        status_code,
        headers: update.headers.unwrap_or_default(),
        content: update.content.unwrap_or_default(),
    })
}

fn apply_response(response: &mut TrackedResponse, update: ResponseUpdate) {
    if let Some(status_code) = update.status_code {
        response.status_code = status_code;
    }
    if let Some(headers) = update.headers {
        merge_headers(&mut response.headers, headers, update.preserve_existing_headers);
    }
    if let Some(content) = update.content {
        response.content = content;
    }
}

fn merge_headers(existing: &mut Headers, incoming: Headers, preserve: bool) {
    if preserve {
        existing.extend(incoming);
    } else {
        *existing = incoming;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event details
// ─────────────────────────────────────────────────────────────────────────────

fn change(old: Value, new: Value) -> Value {
    json!({ "old_value": old, "new_value": new })
}

fn content_change(old: Option<&Bytes>, new: &Bytes) -> Value {
    json!({ "old_length": old.map(Bytes::len), "new_length": new.len() })
}

fn diff_request(old: Option<&TrackedRequest>, new: &TrackedRequest) -> Map<String, Value> {
    let mut changed = Vec::new();
    let mut details = Map::new();

    if old.map(|o| &o.method) != Some(&new.method) {
        changed.push("method");
        details.insert(
            "method".into(),
            change(json!(old.map(|o| &o.method)), json!(new.method)),
        );
    }
    if old.map(|o| &o.url) != Some(&new.url) {
        changed.push("url");
        details.insert(
            "url".into(),
            change(json!(old.map(|o| &o.url)), json!(new.url)),
        );
    }
    if old.map(|o| &o.headers) != Some(&new.headers) {
        changed.push("headers");
        details.insert(
            "headers".into(),
            change(json!(old.map(|o| &o.headers)), json!(new.headers)),
        );
    }
    if old.map(|o| &o.content) != Some(&new.content) {
        changed.push("content");
        details.insert(
            "content".into(),
            content_change(old.map(|o| &o.content), &new.content),
        );
    }

    details.insert("changed_fields".into(), json!(changed));
    details
}

fn diff_response(old: Option<&TrackedResponse>, new: &TrackedResponse) -> Map<String, Value> {
    let mut changed = Vec::new();
    let mut details = Map::new();

    if old.map(|o| o.status_code) != Some(new.status_code) {
        changed.push("status_code");
        details.insert(
            "status_code".into(),
            change(json!(old.map(|o| o.status_code)), json!(new.status_code)),
        );
    }
    if old.map(|o| &o.headers) != Some(&new.headers) {
        changed.push("headers");
        details.insert(
            "headers".into(),
            change(json!(old.map(|o| &o.headers)), json!(new.headers)),
        );
    }
    if old.map(|o| &o.content) != Some(&new.content) {
        changed.push("content");
        details.insert(
            "content".into(),
            content_change(old.map(|o| &o.content), &new.content),
        );
    }

    details.insert("changed_fields".into(), json!(changed));
    details
}
