//! Lock-protected interior of a transaction context.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;

use super::tracked::{Headers, TrackedRequest, TrackedResponse};

/// A held request or response, tagged with the generation it was created in.
#[derive(Debug, Clone)]
pub struct Slot<M> {
    pub generation: u64,
    pub value: M,
}

#[derive(Debug, Default)]
pub struct ContextState {
    pub request: Option<Slot<TrackedRequest>>,
    pub response: Option<Slot<TrackedResponse>>,
    pub scratch: HashMap<String, Value>,
    pub current_policy: Option<String>,
    generations: u64,
}

impl ContextState {
    /// Allocate a generation for a newly created holder.
    pub fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }
}

/// Access shared by both sides of the exchange.
///
/// Sealed: only [`TrackedRequest`] and [`TrackedResponse`] implement it.
pub trait TrackedMessage: Clone + Send + Sync + 'static {
    /// "request" or "response", used in event details and errors.
    const TARGET: &'static str;

    fn slot(state: &ContextState) -> Option<&Slot<Self>>;
    fn slot_mut(state: &mut ContextState) -> Option<&mut Slot<Self>>;
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn content(&self) -> &Bytes;
    fn content_mut(&mut self) -> &mut Bytes;
}

impl TrackedMessage for TrackedRequest {
    const TARGET: &'static str = "request";

    fn slot(state: &ContextState) -> Option<&Slot<Self>> {
        state.request.as_ref()
    }

    fn slot_mut(state: &mut ContextState) -> Option<&mut Slot<Self>> {
        state.request.as_mut()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn content(&self) -> &Bytes {
        &self.content
    }

    fn content_mut(&mut self) -> &mut Bytes {
        &mut self.content
    }
}

impl TrackedMessage for TrackedResponse {
    const TARGET: &'static str = "response";

    fn slot(state: &ContextState) -> Option<&Slot<Self>> {
        state.response.as_ref()
    }

    fn slot_mut(state: &mut ContextState) -> Option<&mut Slot<Self>> {
        state.response.as_mut()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn content(&self) -> &Bytes {
        &self.content
    }

    fn content_mut(&mut self) -> &mut Bytes {
        &mut self.content
    }
}
