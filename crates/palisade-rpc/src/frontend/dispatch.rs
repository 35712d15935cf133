//! Forward-or-redirect handling for requests a backup cannot execute.

use http::header::LOCATION;
use http::StatusCode;

use palisade_core::identity::CallerId;
use palisade_core::records::NodeRecord;

use crate::context::RpcContext;
use crate::endpoints::{EndpointDefinition, EndpointMetrics};

use super::{update_metrics, RpcFrontend};

impl RpcFrontend {
    /// Certificate to ship with a forwarded or distributed request.
    /// Sent only when the receiver cannot resolve the caller from its
    /// own state, or when the endpoint does not require a known client
    /// identity; empty otherwise.
    pub(super) fn cert_to_forward(
        &self,
        ctx: &RpcContext,
        endpoint: Option<&EndpointDefinition>,
    ) -> Vec<u8> {
        if !self.registry.has_certs()
            || endpoint.is_some_and(|e| !e.properties.require_client_identity)
        {
            return ctx.session.caller_cert.clone();
        }
        Vec::new()
    }

    /// Forward to the primary when possible, else redirect the client
    /// there. Returns `None` when the request was handed to the
    /// forwarder and the response is pending.
    pub(super) fn forward_or_redirect(
        &self,
        ctx: &mut RpcContext,
        endpoint: &EndpointDefinition,
        caller_id: CallerId,
        metrics: &EndpointMetrics,
    ) -> Option<Vec<u8>> {
        let forwarder = self.forwarder.lock().clone();
        let may_forward = ctx.session.original_caller.is_none();

        if let (Some(forwarder), true) = (forwarder, may_forward) {
            if let Some(consensus) = self.consensus() {
                if let Some(primary) = consensus.primary() {
                    let cert = self.cert_to_forward(ctx, Some(endpoint));
                    if forwarder.forward(
                        ctx,
                        primary,
                        &consensus.active_nodes(),
                        caller_id,
                        &cert,
                    ) {
                        tracing::trace!(primary = %primary, "request forwarded to primary");
                        return None;
                    }
                }
            }
            ctx.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
            ctx.set_response_body("RPC could not be forwarded to unknown primary.");
            update_metrics(ctx, metrics);
            return Some(ctx.serialise_response());
        }

        // Either this frontend may not forward, or the request already
        // arrived forwarded: point the client at the primary instead.
        ctx.set_response_status(StatusCode::TEMPORARY_REDIRECT);
        if let Some(consensus) = self.consensus() {
            if let Some(primary) = consensus.primary() {
                let tx = self.store.create_tx();
                if let Ok(Some(node)) = NodeRecord::read(tx.as_ref(), primary) {
                    ctx.set_response_header(
                        LOCATION,
                        format!("{}:{}", node.pubhost, node.rpcport),
                    );
                }
            }
        }
        update_metrics(ctx, metrics);
        Some(ctx.serialise_response())
    }
}
