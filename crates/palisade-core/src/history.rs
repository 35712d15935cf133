//! Contract for the tamper-evident transaction history.

use crate::identity::CallerId;
use crate::kv::FrameFormat;

/// Identifies a request registered with the history for ordered (BFT)
/// execution: `(caller id, client session id, request index)`.
pub type RequestId = (CallerId, u64, u64);

pub trait TxHistory: Send + Sync {
    /// Hint that now is a good point to emit a signature over the tree.
    fn try_emit_signature(&self);

    /// Flush entries buffered since the last signature.
    fn flush_pending(&self);

    /// Register a request for later execution by consensus. Returns
    /// false if the request could not be accepted.
    fn add_request(
        &self,
        id: RequestId,
        caller_id: CallerId,
        caller_cert: &[u8],
        request: &[u8],
        frame: FrameFormat,
    ) -> bool;
}
