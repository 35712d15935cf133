//! Contract between the frontend and the endpoint registry.
//!
//! The registry owns the dispatch table and the per-endpoint handlers;
//! the frontend drives it through the trait below and only ever sees
//! endpoint metadata, metrics handles, and execution outcomes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use palisade_core::consensus::{Consensus, ConsensusStatistics};
use palisade_core::history::TxHistory;
use palisade_core::identity::CallerId;
use palisade_core::kv::{KvStore, KvTransaction};

use crate::context::RpcContext;
use crate::jwt::Jwt;

/// When a backup must hand a request to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingRequired {
    Never,
    /// Forward once the session has started forwarding (CFT), or when
    /// the endpoint does not execute locally (BFT).
    Sometimes,
    Always,
}

/// Authentication and dispatch metadata attached to an endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointProperties {
    pub require_client_identity: bool,
    pub require_client_signature: bool,
    pub require_jwt_authentication: bool,
    /// BFT: the endpoint runs on the receiving node instead of being
    /// distributed through the history.
    pub execute_locally: bool,
    pub forwarding_required: ForwardingRequired,
}

impl Default for EndpointProperties {
    fn default() -> Self {
        Self {
            require_client_identity: true,
            require_client_signature: false,
            require_jwt_authentication: false,
            execute_locally: false,
            forwarding_required: ForwardingRequired::Always,
        }
    }
}

/// A registered handler, keyed by path and verb.
#[derive(Debug, Clone)]
pub struct EndpointDefinition {
    pub method: String,
    pub verb: String,
    pub properties: EndpointProperties,
}

/// Per-endpoint counters, owned by the registry and shared by handle.
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub calls: AtomicU64,
    pub errors: AtomicU64,
    pub failures: AtomicU64,
}

impl EndpointMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.calls.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

/// Everything a handler gets to see while executing.
pub struct EndpointContext<'a> {
    pub ctx: &'a mut RpcContext,
    pub tx: &'a mut dyn KvTransaction,
    pub caller_id: CallerId,
    /// Bound by the auth pipeline when the endpoint requires JWT
    /// authentication.
    pub jwt: Option<Jwt>,
}

/// Result of executing an endpoint handler.
///
/// Replaces exception control flow with an explicit discriminant: the
/// executor dispatches on the variant, and `SerialiseFailure` is the
/// only one that escalates to process termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Handler ran; response state is whatever the handler set.
    Ok,
    /// Handler rejected the request with an explicit status.
    HttpError { status: StatusCode, msg: String },
    /// The request body failed JSON validation.
    JsonError { pointer: String, msg: String },
    /// Execution raced a KV compaction; retriable.
    CompactionRace,
    /// The write set cannot be serialised for the replicated log.
    SerialiseFailure,
    /// Anything else the handler failed with.
    Other { msg: String },
}

pub trait EndpointRegistry: Send + Sync {
    /// Endpoint matching the context's path and verb, if any.
    fn find_endpoint(
        &self,
        tx: &mut dyn KvTransaction,
        ctx: &RpcContext,
    ) -> Option<Arc<EndpointDefinition>>;

    /// Verbs registered for the context's path, for `Allow` reporting.
    fn allowed_verbs(&self, ctx: &RpcContext) -> Vec<String>;

    fn metrics(&self, endpoint: &EndpointDefinition) -> Arc<EndpointMetrics>;

    /// Caller id for a session certificate; `CallerId::INVALID` when
    /// the cert is not registered.
    fn caller_id(&self, tx: &mut dyn KvTransaction, cert: &[u8]) -> CallerId;

    /// Caller id for a signed-request key id (cert digest).
    fn caller_id_by_digest(&self, tx: &mut dyn KvTransaction, key_id: &str) -> CallerId;

    /// Whether this registry tracks caller certificates at all.
    fn has_certs(&self) -> bool;

    fn execute_endpoint(
        &self,
        endpoint: &EndpointDefinition,
        args: &mut EndpointContext<'_>,
    ) -> ExecutionOutcome;

    fn set_consensus(&self, consensus: Option<Arc<dyn Consensus>>);

    fn set_history(&self, history: Option<Arc<dyn TxHistory>>);

    /// One-time handler initialisation, run when the frontend opens.
    fn init_handlers(&self, store: &Arc<dyn KvStore>);

    fn tick(&self, elapsed: Duration, stats: ConsensusStatistics);

    /// Body of the 403 returned when the caller identity is missing or
    /// unknown.
    fn invalid_caller_error_message(&self) -> String {
        "Could not find matching caller certificate".to_string()
    }

    /// Check that a forwarded request's original caller is known here.
    /// Default registries have no certs, so nothing can be missing.
    fn lookup_forwarded_caller_cert(
        &self,
        _ctx: &mut RpcContext,
        _tx: &mut dyn KvTransaction,
    ) -> bool {
        true
    }

    /// Certificate for a caller id, used when a signed-request override
    /// replaces the session identity.
    fn resolve_caller_cert(
        &self,
        _caller: CallerId,
        _tx: &mut dyn KvTransaction,
    ) -> Option<Vec<u8>> {
        None
    }
}
