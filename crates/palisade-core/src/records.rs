//! Typed records persisted in KV tables.
//!
//! Records encode through `serde_json`; the helpers below pair each
//! record with its table and key encoding so callers never touch raw
//! bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};
use crate::history::RequestId;
use crate::identity::{CallerId, NodeId};
use crate::kv::{u64_key, KvTransaction};
use crate::tables;

/// Key of the singleton service record.
pub const SERVICE_RECORD_KEY: u64 = 0;

/// Slot the pending ordered request is written to during BFT execution.
pub const AFT_REQUEST_KEY: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Opening,
    Open,
    Closed,
}

/// Globally-committed service state, consulted by the lifecycle gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub status: ServiceStatus,
    pub cert: Vec<u8>,
}

impl ServiceRecord {
    pub fn read_globally_committed(tx: &dyn KvTransaction) -> KvResult<Option<Self>> {
        decode(
            tables::SERVICE,
            tx.get_globally_committed(tables::SERVICE, &u64_key(SERVICE_RECORD_KEY)),
        )
    }

    pub fn write(&self, tx: &mut dyn KvTransaction) {
        tx.put(
            tables::SERVICE,
            &u64_key(SERVICE_RECORD_KEY),
            encode(self),
        );
    }
}

/// Address of a replica, consulted for redirects to the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub pubhost: String,
    pub rpcport: u16,
}

impl NodeRecord {
    pub fn read(tx: &dyn KvTransaction, node: NodeId) -> KvResult<Option<Self>> {
        decode(tables::NODES, tx.get(tables::NODES, &u64_key(node.0)))
    }

    pub fn write(&self, tx: &mut dyn KvTransaction, node: NodeId) {
        tx.put(tables::NODES, &u64_key(node.0), encode(self));
    }
}

/// Message digest algorithm named by a signed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlg {
    Sha256,
}

/// A request carrying a detached signature and the key id of its signer.
///
/// Also the record persisted in the client-signatures table; when
/// request storing is disabled the request bytes are elided before the
/// record is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub request: Vec<u8>,
    pub signature: Vec<u8>,
    pub digest: DigestAlg,
    pub key_id: String,
}

impl SignedRequest {
    /// Copy carrying only the signature, for elided recording.
    pub fn signature_only(&self) -> Self {
        Self {
            request: Vec::new(),
            signature: self.signature.clone(),
            digest: self.digest,
            key_id: self.key_id.clone(),
        }
    }

    pub fn read(
        tx: &dyn KvTransaction,
        table: &'static str,
        caller: CallerId,
    ) -> KvResult<Option<Self>> {
        decode(table, tx.get(table, &u64_key(caller.0)))
    }

    pub fn write(&self, tx: &mut dyn KvTransaction, table: &str, caller: CallerId) {
        tx.put(table, &u64_key(caller.0), encode(self));
    }
}

/// JWT signing key material, keyed by `kid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtSigningKeyRecord {
    pub secret: Vec<u8>,
}

impl JwtSigningKeyRecord {
    pub fn read(tx: &dyn KvTransaction, kid: &str) -> KvResult<Option<Self>> {
        decode(
            tables::JWT_PUBLIC_SIGNING_KEYS,
            tx.get(tables::JWT_PUBLIC_SIGNING_KEYS, kid.as_bytes()),
        )
    }

    pub fn write(&self, tx: &mut dyn KvTransaction, kid: &str) {
        tx.put(tables::JWT_PUBLIC_SIGNING_KEYS, kid.as_bytes(), encode(self));
    }
}

/// Issuer bound to a JWT signing key.
pub fn read_jwt_key_issuer(tx: &dyn KvTransaction, kid: &str) -> KvResult<Option<String>> {
    decode(
        tables::JWT_PUBLIC_SIGNING_KEY_ISSUER,
        tx.get(tables::JWT_PUBLIC_SIGNING_KEY_ISSUER, kid.as_bytes()),
    )
}

pub fn write_jwt_key_issuer(tx: &mut dyn KvTransaction, kid: &str, issuer: &str) {
    tx.put(
        tables::JWT_PUBLIC_SIGNING_KEY_ISSUER,
        kid.as_bytes(),
        encode(&issuer),
    );
}

/// A request registered for ordered execution, written by the BFT
/// pre-execution hook so every replica replays the same input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AftRequestRecord {
    pub caller_id: CallerId,
    pub request_id: Option<RequestId>,
    pub caller_cert: Vec<u8>,
    pub request: Vec<u8>,
}

impl AftRequestRecord {
    pub fn read(tx: &dyn KvTransaction) -> KvResult<Option<Self>> {
        decode(
            tables::AFT_REQUESTS,
            tx.get(tables::AFT_REQUESTS, &u64_key(AFT_REQUEST_KEY)),
        )
    }

    pub fn write(&self, tx: &mut dyn KvTransaction) {
        tx.put(tables::AFT_REQUESTS, &u64_key(AFT_REQUEST_KEY), encode(self));
    }
}

fn encode<T: Serialize>(record: &T) -> Vec<u8> {
    // Records are plain data; serialisation cannot fail for them.
    serde_json::to_vec(record).unwrap_or_default()
}

fn decode<T: DeserializeOwned>(table: &'static str, raw: Option<Vec<u8>>) -> KvResult<Option<T>> {
    match raw {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| KvError::CorruptRecord { table, source }),
        None => Ok(None),
    }
}
