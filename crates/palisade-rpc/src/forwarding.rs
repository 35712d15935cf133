//! Contract for the node-to-node request forwarder.

use palisade_core::identity::{CallerId, NodeId};

use crate::context::RpcContext;

pub trait Forwarder: Send + Sync {
    /// Ship the request to the primary on behalf of `caller_id`.
    ///
    /// `caller_cert` is empty unless the receiving frontend cannot
    /// resolve the caller from its own state. Returns false if the
    /// request could not be sent; the frontend then falls back to an
    /// error response.
    fn forward(
        &self,
        ctx: &RpcContext,
        primary: NodeId,
        active_nodes: &[NodeId],
        caller_id: CallerId,
        caller_cert: &[u8],
    ) -> bool;
}
