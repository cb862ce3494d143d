//! Interpose Core: per-transaction state for an LLM API proxy.
//!
//! A pipeline executor decodes the inbound request with [`ContentCodec`],
//! seeds a [`TransactionContext`], and runs a sequence of policies against it.
//! Policies read and rewrite the request and response through field-level
//! handles, pass data forward in the context's scratch store, and resolve
//! dotted paths such as `request.content.model` with [`get_tx_value`]. Every
//! change is announced on the context's mutation [`EventChannel`] and
//! attributed to the policy that made it.
//!
//! Modules:
//! - [`context`]: transaction context, tracked messages, update descriptors
//! - [`events`]: named-listener channel and the mutation event record
//! - [`resolver`]: dotted-path lookup over context state
//! - [`codec`]: content-encoding decode/encode with size limits
//! - [`audit`]: stock listeners (tracing audit log, in-memory recorder)
//! - [`config`]: environment-driven limits
//! - [`telemetry`]: Prometheus counters

pub mod audit;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod resolver;
pub mod telemetry;

pub use codec::{CodecError, ContentCodec, ContentEncoding};
pub use config::CoreConfig;
pub use context::{
    ContextError, RequestHandle, RequestUpdate, ResponseHandle, ResponseUpdate, TrackedRequest,
    TrackedResponse, TransactionContext,
};
pub use error::ErrorKind;
pub use events::{EventChannel, Listener, MutationEvent, MutationOperation};
pub use resolver::{ResolveError, TxValue, get_tx_value};
