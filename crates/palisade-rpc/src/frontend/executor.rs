// Copyright (c) 2026 The Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transactional executor: run the endpoint inside the KV transaction
//! with bounded retry on conflict.

use std::sync::atomic::Ordering;

use http::StatusCode;

use palisade_core::error::KvError;
use palisade_core::identity::CallerId;
use palisade_core::kv::{CommitOutcome, KvTransaction, NO_VERSION};
use palisade_core::records::SignedRequest;

use crate::context::RpcContext;
use crate::endpoints::{EndpointContext, EndpointDefinition, EndpointMetrics, ExecutionOutcome};
use crate::jwt::Jwt;

use super::{update_metrics, PreExec, RpcFrontend};

/// A request commits or gives up within this many attempts.
const MAX_COMMIT_ATTEMPTS: usize = 30;

pub(super) struct CommandExecution<'a> {
    pub endpoint: &'a EndpointDefinition,
    pub metrics: &'a EndpointMetrics,
    pub caller_id: CallerId,
    pub signed_request: Option<&'a SignedRequest>,
    pub should_record_signature: bool,
    pub jwt: Option<Jwt>,
    pub pre_exec: Option<PreExec<'a>>,
}

impl RpcFrontend {
    pub(super) fn execute_with_retry(
        &self,
        ctx: &mut RpcContext,
        tx: &mut dyn KvTransaction,
        exec: CommandExecution<'_>,
    ) -> Vec<u8> {
        self.tx_count.fetch_add(1, Ordering::Relaxed);

        let mut attempts = 0;
        while attempts < MAX_COMMIT_ATTEMPTS {
            attempts += 1;

            if let Some(pre_exec) = exec.pre_exec {
                pre_exec(&mut *tx, &mut *ctx);
            }

            if exec.should_record_signature {
                if let Some(signed) = exec.signed_request {
                    self.record_client_signature(&mut *tx, exec.caller_id, signed);
                }
            }

            let outcome = {
                let mut args = EndpointContext {
                    ctx: &mut *ctx,
                    tx: &mut *tx,
                    caller_id: exec.caller_id,
                    jwt: exec.jwt.clone(),
                };
                self.registry.execute_endpoint(exec.endpoint, &mut args)
            };

            match outcome {
                ExecutionOutcome::Ok => {}
                ExecutionOutcome::HttpError { status, msg } => {
                    ctx.set_response_status(status);
                    ctx.set_response_body(msg);
                    update_metrics(ctx, exec.metrics);
                    return ctx.serialise_response();
                }
                ExecutionOutcome::JsonError { pointer, msg } => {
                    ctx.set_response_status(StatusCode::BAD_REQUEST);
                    ctx.set_response_body(format!("At {pointer}: {msg}"));
                    update_metrics(ctx, exec.metrics);
                    return ctx.serialise_response();
                }
                ExecutionOutcome::CompactionRace => {
                    tracing::debug!(attempt = attempts, "execution conflicted with compaction");
                    tx.reset();
                    continue;
                }
                ExecutionOutcome::SerialiseFailure => abort_on_serialise_failure("execution"),
                ExecutionOutcome::Other { msg } => {
                    ctx.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
                    ctx.set_response_body(msg);
                    update_metrics(ctx, exec.metrics);
                    return ctx.serialise_response();
                }
            }

            if !ctx.should_apply_writes() {
                update_metrics(ctx, exec.metrics);
                return ctx.serialise_response();
            }

            match tx.commit() {
                Ok(CommitOutcome::Committed) => {
                    let mut commit_version = tx.commit_version();
                    if commit_version == NO_VERSION {
                        commit_version = tx.read_version();
                    }
                    if let Some(consensus) = self.consensus() {
                        if commit_version != NO_VERSION {
                            ctx.set_seqno(commit_version);
                            ctx.set_view(tx.commit_term());
                        }
                        // Deprecated; kept until clients stop polling it.
                        ctx.set_global_commit(consensus.committed_seqno());

                        if consensus.is_primary() {
                            if let Some(history) = self.history() {
                                history.try_emit_signature();
                            }
                        }
                    }
                    update_metrics(ctx, exec.metrics);
                    return ctx.serialise_response();
                }
                Ok(CommitOutcome::Conflict) => {
                    tx.reset();
                }
                Ok(CommitOutcome::NoReplicate) => {
                    ctx.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
                    ctx.set_response_body("Transaction failed to replicate.");
                    update_metrics(ctx, exec.metrics);
                    return ctx.serialise_response();
                }
                Err(KvError::Compacted { version }) => {
                    tracing::debug!(version, attempt = attempts, "commit raced compaction");
                    tx.reset();
                }
                Err(KvError::Serialise { reason }) => {
                    tracing::error!(%reason, "failed to serialise transaction");
                    abort_on_serialise_failure("commit")
                }
                Err(err) => {
                    ctx.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
                    ctx.set_response_body(err.to_string());
                    update_metrics(ctx, exec.metrics);
                    return ctx.serialise_response();
                }
            }
        }

        ctx.set_response_status(StatusCode::CONFLICT);
        ctx.set_response_body(format!(
            "Transaction continued to conflict after {MAX_COMMIT_ATTEMPTS} attempts."
        ));
        update_metrics(ctx, exec.metrics);
        ctx.serialise_response()
    }
}

/// A partially-serialised entry in the replicated log cannot be
/// recovered from; the process must not keep committing.
fn abort_on_serialise_failure(stage: &str) -> ! {
    tracing::error!(stage, "aborting: transaction serialisation failed");
    std::process::abort();
}
