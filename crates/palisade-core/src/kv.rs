//! Contracts for the transactional key-value store.
//!
//! The engine itself lives outside this workspace; the frontend only
//! depends on the surface below. Values are opaque bytes; the typed
//! records in [`crate::records`] encode through `serde_json`.

use std::sync::Arc;

use crate::consensus::Consensus;
use crate::error::KvResult;
use crate::history::{RequestId, TxHistory};

/// Monotone version assigned to committed transactions.
pub type Version = u64;

/// Consensus term a version was committed in.
pub type Term = u64;

/// Sentinel for "no version": a commit that wrote nothing.
pub const NO_VERSION: Version = 0;

/// Outcome of [`KvTransaction::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write set was applied and handed to replication.
    Committed,
    /// Another transaction committed a conflicting write set first.
    /// The caller may reset and retry.
    Conflict,
    /// Consensus refused to replicate the write set.
    NoReplicate,
}

/// Framing of the serialised request handed to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Http,
    WebSocket,
}

/// A single optimistic transaction over the store.
///
/// Created at request entry and either committed or discarded before the
/// request returns. On conflict the same transaction object is reset and
/// re-used for the next attempt.
pub trait KvTransaction {
    fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>>;

    /// Read restricted to state visible in the committed global view.
    fn get_globally_committed(&self, table: &str, key: &[u8]) -> Option<Vec<u8>>;

    fn put(&mut self, table: &str, key: &[u8], value: Vec<u8>);

    fn remove(&mut self, table: &str, key: &[u8]);

    fn commit(&mut self) -> KvResult<CommitOutcome>;

    /// Version assigned by the last successful commit; [`NO_VERSION`]
    /// when the commit produced no writes.
    fn commit_version(&self) -> Version;

    /// Term the last successful commit landed in.
    fn commit_term(&self) -> Term;

    /// Version this transaction read its snapshot at.
    fn read_version(&self) -> Version;

    /// Version of the transaction, committed or not.
    fn version(&self) -> Version;

    /// Discard the read and write sets, keeping the request id.
    fn reset(&mut self);

    fn set_req_id(&mut self, req_id: RequestId);

    fn req_id(&self) -> Option<RequestId>;
}

/// Handle to the store, shared by the frontend and the registry.
///
/// Consensus and history are reachable from the store; both rebind over
/// the lifetime of a node (e.g. after recovery), so the frontend
/// re-reads them at well-defined sync points.
pub trait KvStore: Send + Sync {
    fn create_tx(&self) -> Box<dyn KvTransaction>;

    fn consensus(&self) -> Option<Arc<dyn Consensus>>;

    fn history(&self) -> Option<Arc<dyn TxHistory>>;
}

/// Little-endian key encoding for u64-keyed tables.
pub fn u64_key(key: u64) -> [u8; 8] {
    key.to_le_bytes()
}
