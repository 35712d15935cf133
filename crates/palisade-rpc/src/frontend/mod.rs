// Copyright [2026] [The Palisade Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 The Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! The frontend facade and the per-request auth pipeline.
//!
//! Entry points: [`RpcFrontend::process`] for transport requests,
//! [`RpcFrontend::process_forwarded`] for requests relayed by a peer
//! node, [`RpcFrontend::process_bft`] for ordered execution, and
//! [`RpcFrontend::tick`] for periodic upkeep.

mod dispatch;
mod executor;
mod lifecycle;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::header::{ALLOW, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::StatusCode;
use parking_lot::Mutex;

use palisade_core::consensus::{Consensus, ConsensusKind};
use palisade_core::history::TxHistory;
use palisade_core::identity::CallerId;
use palisade_core::kv::{KvStore, KvTransaction};
use palisade_core::records::{
    read_jwt_key_issuer, AftRequestRecord, JwtSigningKeyRecord, SignedRequest,
};

use crate::auth::{signature_auth_challenge, VerifierCache, BEARER_AUTH_CHALLENGE};
use crate::context::RpcContext;
use crate::endpoints::{EndpointMetrics, EndpointRegistry, ForwardingRequired};
use crate::error::FrontendError;
use crate::forwarding::Forwarder;
use crate::jwt::{self, Jwt};

use executor::CommandExecution;
use lifecycle::OpenState;

/// Hook run inside the retry loop before the endpoint executes; BFT
/// uses it to record the request for replay by every replica.
pub(crate) type PreExec<'a> = &'a dyn Fn(&mut dyn KvTransaction, &mut RpcContext);

/// Response bytes plus the version of the executing transaction,
/// returned to the ordered-execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBftResult {
    pub result: Vec<u8>,
    pub version: palisade_core::kv::Version,
}

#[derive(Debug, Clone, Copy)]
struct SignatureSchedule {
    tx_interval: u64,
    ms_interval: Duration,
    ms_to_sig: Duration,
    txs_since_hint: u64,
}

impl Default for SignatureSchedule {
    fn default() -> Self {
        Self {
            tx_interval: 5000,
            ms_interval: Duration::from_millis(1000),
            ms_to_sig: Duration::from_millis(1000),
            txs_since_hint: 0,
        }
    }
}

/// The request-processing pipeline between the transport and the store.
pub struct RpcFrontend {
    store: Arc<dyn KvStore>,
    registry: Arc<dyn EndpointRegistry>,
    client_signatures_table: Option<String>,
    verifiers: VerifierCache,
    open_state: Mutex<OpenState>,
    consensus: Mutex<Option<Arc<dyn Consensus>>>,
    history: Mutex<Option<Arc<dyn TxHistory>>>,
    forwarder: Mutex<Option<Arc<dyn Forwarder>>>,
    sig: Mutex<SignatureSchedule>,
    tx_count: AtomicU64,
    request_storing_disabled: AtomicBool,
}

impl RpcFrontend {
    /// `client_signatures_table` names the table signed requests are
    /// recorded to; without it the frontend has no signature support.
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<dyn EndpointRegistry>,
        client_signatures_table: Option<String>,
    ) -> Self {
        Self {
            store,
            registry,
            client_signatures_table,
            verifiers: VerifierCache::new(),
            open_state: Mutex::new(OpenState::default()),
            consensus: Mutex::new(None),
            history: Mutex::new(None),
            forwarder: Mutex::new(None),
            sig: Mutex::new(SignatureSchedule::default()),
            tx_count: AtomicU64::new(0),
            request_storing_disabled: AtomicBool::new(false),
        }
    }

    pub fn set_sig_intervals(&self, sig_tx_interval: u64, sig_ms_interval: u64) {
        let mut sig = self.sig.lock();
        sig.tx_interval = sig_tx_interval;
        sig.ms_interval = Duration::from_millis(sig_ms_interval);
        sig.ms_to_sig = sig.ms_interval;
        sig.txs_since_hint = 0;
    }

    pub fn set_cmd_forwarder(&self, forwarder: Arc<dyn Forwarder>) {
        *self.forwarder.lock() = Some(forwarder);
    }

    /// Persist only signature bytes when recording signed requests,
    /// eliding the request body.
    pub fn disable_request_storing(&self) {
        self.request_storing_disabled.store(true, Ordering::Relaxed);
    }

    /// Process a request from the transport.
    ///
    /// Returns `None` when the result is pending: forwarded to the
    /// primary, or registered with the history for ordered execution.
    /// The BFT distribution decision reads KV state (caller id,
    /// endpoint locality) that may have changed by the time consensus
    /// executes the request.
    pub fn process(&self, ctx: &mut RpcContext) -> Option<Vec<u8>> {
        self.update_consensus();

        let mut tx = self.store.create_tx();
        if !self.is_open(tx.as_mut()) {
            ctx.set_response_status(StatusCode::NOT_FOUND);
            ctx.set_response_body("Frontend is not open.");
            return Some(ctx.serialise_response());
        }

        let caller_id = self.registry.caller_id(tx.as_mut(), &ctx.session.caller_cert);
        let endpoint = self.registry.find_endpoint(tx.as_mut(), ctx);

        let consensus = self.consensus();
        let is_bft = consensus
            .as_ref()
            .is_some_and(|c| c.kind() == ConsensusKind::Bft);
        let is_local = endpoint
            .as_ref()
            .is_some_and(|e| e.properties.execute_locally);
        let should_bft_distribute = is_bft
            && !is_local
            && (ctx.execute_on_node || consensus.as_ref().is_some_and(|c| c.is_primary()));

        if should_bft_distribute {
            return self.bft_distribute(ctx, tx.as_mut(), caller_id);
        }

        self.process_command(ctx, tx.as_mut(), caller_id, None)
    }

    /// Process a request relayed by a peer node on behalf of its
    /// original caller.
    pub fn process_forwarded(&self, ctx: &mut RpcContext) -> Result<Vec<u8>, FrontendError> {
        let Some(original) = ctx.session.original_caller else {
            return Err(FrontendError::MissingForwardedContext);
        };

        self.update_consensus();

        let kind = self.consensus().map(|c| c.kind());
        if kind == Some(ConsensusKind::Bft) {
            return self.process_bft(ctx).map(|resp| resp.result);
        }

        let mut tx = self.store.create_tx();
        match self.process_command(ctx, tx.as_mut(), original.caller_id, None) {
            Some(response) => Ok(response),
            // A forwarded request is never forwarded again.
            None => Err(FrontendError::UnexpectedDeferral),
        }
    }

    /// Execute a request that consensus has ordered.
    pub fn process_bft(&self, ctx: &mut RpcContext) -> Result<ProcessBftResult, FrontendError> {
        let mut tx = self.store.create_tx();
        if !self.is_open(tx.as_mut()) {
            return Err(FrontendError::NotOpen);
        }

        self.update_consensus();

        let Some(original) = ctx.session.original_caller else {
            return Err(FrontendError::MissingForwardedContext);
        };

        let pre_exec = |tx: &mut dyn KvTransaction, ctx: &mut RpcContext| {
            AftRequestRecord {
                caller_id: ctx
                    .session
                    .original_caller
                    .map(|c| c.caller_id)
                    .unwrap_or(CallerId::INVALID),
                request_id: tx.req_id(),
                caller_cert: ctx.session.caller_cert.clone(),
                request: ctx.serialised_request().to_vec(),
            }
            .write(tx);
        };

        let response = self.process_command(ctx, tx.as_mut(), original.caller_id, Some(&pre_exec));
        let version = tx.version();
        match response {
            Some(result) => Ok(ProcessBftResult { result, version }),
            None => Err(FrontendError::UnexpectedDeferral),
        }
    }

    /// Periodic upkeep: surface statistics to the registry and advance
    /// the signature scheduling hint.
    pub fn tick(&self, elapsed: Duration) {
        self.update_consensus();

        let consensus = self.consensus();
        let mut stats = consensus
            .as_ref()
            .map(|c| c.statistics())
            .unwrap_or_default();

        // Stats for interval k carry exactly the commits attempted
        // during interval k.
        let tx_count = self.tx_count.swap(0, Ordering::Relaxed);
        stats.tx_count = tx_count;
        self.registry.tick(elapsed, stats);

        let emit = {
            let mut sig = self.sig.lock();
            sig.ms_to_sig = sig.ms_to_sig.saturating_sub(elapsed);
            sig.txs_since_hint = sig.txs_since_hint.saturating_add(tx_count);
            let due = sig.ms_to_sig.is_zero() || sig.txs_since_hint >= sig.tx_interval;
            if due {
                sig.ms_to_sig = sig.ms_interval;
                let had_commits = sig.txs_since_hint > 0;
                sig.txs_since_hint = 0;
                had_commits && consensus.as_ref().is_some_and(|c| c.is_primary())
            } else {
                false
            }
        };
        if emit {
            if let Some(history) = self.history() {
                history.try_emit_signature();
            }
        }
    }

    /// Flush history entries buffered since the last signature.
    pub fn update_merkle_tree(&self) {
        if let Some(history) = self.history() {
            history.flush_pending();
        }
    }

    fn bft_distribute(
        &self,
        ctx: &mut RpcContext,
        tx: &mut dyn KvTransaction,
        caller_id: CallerId,
    ) -> Option<Vec<u8>> {
        self.update_history();

        let req_id = (
            caller_id,
            ctx.session.client_session_id,
            ctx.request_index(),
        );
        let Some(history) = self.history() else {
            ctx.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
            ctx.set_response_body("Consensus is not yet ready.");
            return Some(ctx.serialise_response());
        };

        let cert = self.cert_to_forward(ctx, None);
        if !history.add_request(
            req_id,
            caller_id,
            &cert,
            ctx.serialised_request(),
            ctx.frame_format(),
        ) {
            tracing::error!(
                caller = %req_id.0,
                session = req_id.1,
                index = req_id.2,
                "history refused request"
            );
            ctx.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
            ctx.set_response_body("Could not process request.");
            return Some(ctx.serialise_response());
        }

        tx.set_req_id(req_id);
        None
    }

    /// The auth pipeline plus dispatch: every request accepted past the
    /// lifecycle gate comes through here.
    fn process_command(
        &self,
        ctx: &mut RpcContext,
        tx: &mut dyn KvTransaction,
        mut caller_id: CallerId,
        pre_exec: Option<PreExec<'_>>,
    ) -> Option<Vec<u8>> {
        let Some(endpoint) = self.registry.find_endpoint(tx, ctx) else {
            let allowed_verbs = self.registry.allowed_verbs(ctx);
            if allowed_verbs.is_empty() {
                ctx.set_response_status(StatusCode::NOT_FOUND);
                ctx.set_response_header(CONTENT_TYPE, "text/plain");
                ctx.set_response_body(format!("Unknown path: {}", ctx.method()));
            } else {
                // Allowed verbs land in two places: the Allow header
                // for machine parsing, the body for humans.
                let allow = allowed_verbs.join(", ");
                ctx.set_response_status(StatusCode::METHOD_NOT_ALLOWED);
                ctx.set_response_header(ALLOW, allow.clone());
                ctx.set_response_body(format!(
                    "Allowed methods for '{}' are: {}",
                    ctx.method(),
                    allow
                ));
            }
            return Some(ctx.serialise_response());
        };

        // Requests that could not be dispatched are not counted against
        // any endpoint.
        let metrics = self.registry.metrics(&endpoint);
        metrics.calls.fetch_add(1, Ordering::Relaxed);

        let signed_request = ctx.signed_request().cloned();

        // On signed requests the effective caller is the signer, not
        // the TLS session subject. The id is tentative here: the
        // signature itself is only verified further down.
        if let Some(signed) = &signed_request {
            let signer = self.registry.caller_id_by_digest(tx, &signed.key_id);
            if signer.is_valid() {
                tracing::trace!(
                    session_caller = %caller_id,
                    signer = %signer,
                    "session caller replaced by signed-request signer"
                );
                caller_id = signer;
                if let Some(cert) = self.registry.resolve_caller_cert(signer, tx) {
                    ctx.session.caller_cert = cert;
                }
            }
        }

        if endpoint.properties.require_client_identity && self.registry.has_certs() {
            // Forwarded requests must name a caller known here; local
            // ones only need a valid id.
            let forwarded_caller_unknown = ctx.session.original_caller.is_some()
                && !self.registry.lookup_forwarded_caller_cert(ctx, tx);
            if forwarded_caller_unknown || !caller_id.is_valid() {
                ctx.set_response_status(StatusCode::FORBIDDEN);
                ctx.set_response_body(self.registry.invalid_caller_error_message());
                update_metrics(ctx, &metrics);
                return Some(ctx.serialise_response());
            }
        }

        let consensus = self.consensus();
        let is_primary = consensus.as_ref().map_or(true, |c| c.is_primary()) || ctx.is_create_request;

        if endpoint.properties.require_client_signature && signed_request.is_none() {
            set_response_unauthorized(ctx, format!("'{}' RPC must be signed", ctx.method()));
            update_metrics(ctx, &metrics);
            return Some(ctx.serialise_response());
        }

        let mut should_record_signature = false;
        if let Some(signed) = &signed_request {
            // CFT-forwarded requests were already verified by the
            // forwarding node; create requests predate the registry.
            let cft_forwarded = consensus
                .as_ref()
                .is_some_and(|c| c.kind() == ConsensusKind::Cft)
                && ctx.session.original_caller.is_some();
            if !ctx.is_create_request
                && !cft_forwarded
                && !self.verify_client_signature(&ctx.session.caller_cert, caller_id, signed)
            {
                set_response_unauthorized(ctx, "Failed to verify client signature".to_string());
                update_metrics(ctx, &metrics);
                return Some(ctx.serialise_response());
            }

            // Signed requests are recorded even on endpoints that do
            // not require signatures, but only where the record can
            // replicate.
            if is_primary {
                should_record_signature = true;
            }
        }

        let mut jwt = None;
        if endpoint.properties.require_jwt_authentication {
            match self.verify_jwt(ctx, tx) {
                Ok(token) => jwt = Some(token),
                Err(reason) => {
                    let msg = format!("'{}' {}", ctx.method(), reason);
                    ctx.set_response_status(StatusCode::UNAUTHORIZED);
                    ctx.set_response_header(WWW_AUTHENTICATE, BEARER_AUTH_CHALLENGE);
                    ctx.set_response_body(msg);
                    update_metrics(ctx, &metrics);
                    return Some(ctx.serialise_response());
                }
            }
        }

        self.update_history();

        if let Some(consensus) = consensus.as_ref() {
            let backup_path = !is_primary
                && (consensus.kind() == ConsensusKind::Cft || !ctx.execute_on_node);
            if backup_path {
                match endpoint.properties.forwarding_required {
                    ForwardingRequired::Never => {}
                    ForwardingRequired::Sometimes => {
                        let forward = match consensus.kind() {
                            ConsensusKind::Cft => ctx.session.is_forwarding,
                            ConsensusKind::Bft => !endpoint.properties.execute_locally,
                        };
                        if forward {
                            ctx.session.is_forwarding = true;
                            return self.forward_or_redirect(ctx, &endpoint, caller_id, &metrics);
                        }
                    }
                    ForwardingRequired::Always => {
                        ctx.session.is_forwarding = true;
                        return self.forward_or_redirect(ctx, &endpoint, caller_id, &metrics);
                    }
                }
            }
        }

        Some(self.execute_with_retry(
            ctx,
            tx,
            CommandExecution {
                endpoint: endpoint.as_ref(),
                metrics: metrics.as_ref(),
                caller_id,
                signed_request: signed_request.as_ref(),
                should_record_signature,
                jwt,
                pre_exec,
            },
        ))
    }

    fn verify_client_signature(
        &self,
        cert: &[u8],
        caller: CallerId,
        signed: &SignedRequest,
    ) -> bool {
        if self.client_signatures_table.is_none() {
            return false;
        }
        self.verifiers.verify(cert, caller, signed)
    }

    fn record_client_signature(
        &self,
        tx: &mut dyn KvTransaction,
        caller: CallerId,
        signed: &SignedRequest,
    ) {
        let Some(table) = self.client_signatures_table.as_deref() else {
            return;
        };
        if self.request_storing_disabled.load(Ordering::Relaxed) {
            signed.signature_only().write(tx, table, caller);
        } else {
            signed.write(tx, table, caller);
        }
    }

    fn verify_jwt(&self, ctx: &RpcContext, tx: &mut dyn KvTransaction) -> Result<Jwt, String> {
        let token = jwt::extract_token(ctx)?;
        let Ok(Some(key)) = JwtSigningKeyRecord::read(tx, &token.kid) else {
            return Err("JWT signing key not found".to_string());
        };
        if !jwt::validate_token_signature(&token, &key.secret) {
            return Err("JWT signature is invalid".to_string());
        }
        let Ok(Some(key_issuer)) = read_jwt_key_issuer(tx, &token.kid) else {
            return Err("JWT key issuer not found".to_string());
        };
        Ok(Jwt {
            key_issuer,
            header: token.header,
            payload: token.payload,
        })
    }

    fn consensus(&self) -> Option<Arc<dyn Consensus>> {
        self.consensus.lock().clone()
    }

    fn history(&self) -> Option<Arc<dyn TxHistory>> {
        self.history.lock().clone()
    }

    /// Rebind the consensus handle from the store and propagate it to
    /// the registry when it changed.
    fn update_consensus(&self) {
        let current = self.store.consensus();
        let mut guard = self.consensus.lock();
        let changed = match (guard.as_ref(), current.as_ref()) {
            (Some(held), Some(new)) => !Arc::ptr_eq(held, new),
            (None, None) => false,
            _ => true,
        };
        if changed {
            *guard = current.clone();
            self.registry.set_consensus(current);
        }
    }

    fn update_history(&self) {
        let current = self.store.history();
        *self.history.lock() = current.clone();
        self.registry.set_history(current);
    }
}

fn set_response_unauthorized(ctx: &mut RpcContext, msg: String) {
    ctx.set_response_status(StatusCode::UNAUTHORIZED);
    ctx.set_response_header(WWW_AUTHENTICATE, signature_auth_challenge());
    ctx.set_response_body(msg);
}

/// 4xx responses count as endpoint errors, 5xx as failures; success
/// and redirects leave the counters alone.
pub(crate) fn update_metrics(ctx: &RpcContext, metrics: &EndpointMetrics) {
    match ctx.response_status().as_u16() / 100 {
        4 => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
        5 => {
            metrics.failures.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}
