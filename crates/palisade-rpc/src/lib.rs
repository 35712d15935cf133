//! RPC frontend for the palisade replicated KV service.
//!
//! Sits between the transport and the transactional store: for every
//! inbound request it authenticates the caller, dispatches to a
//! registered endpoint, decides whether to execute locally or hand the
//! request to the primary, runs the endpoint inside a KV transaction
//! with bounded conflict-retry, and produces an HTTP response (or
//! defers it to consensus/forwarding).

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod context;
pub mod endpoints;
pub mod error;
pub mod forwarding;
pub mod frontend;
pub mod jwt;

pub use context::{ForwardedCaller, RpcContext, SessionContext};
pub use endpoints::{
    EndpointContext, EndpointDefinition, EndpointMetrics, EndpointProperties, EndpointRegistry,
    ExecutionOutcome, ForwardingRequired,
};
pub use error::FrontendError;
pub use forwarding::Forwarder;
pub use frontend::{ProcessBftResult, RpcFrontend};
pub use jwt::Jwt;
