//! Caller and node identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Service-internal identifier for an authenticated principal.
///
/// Assigned by the endpoint registry when a caller certificate is first
/// registered. `CallerId::INVALID` denotes "not known".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(pub u64);

impl CallerId {
    pub const INVALID: CallerId = CallerId(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Identifier of a replica in the node directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key id identifying a signer: lowercase hex SHA-256 of the caller cert.
pub fn cert_key_id(cert: &[u8]) -> String {
    hex::encode(Sha256::digest(cert))
}
