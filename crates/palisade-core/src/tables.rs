//! Well-known table names.

/// Service record, keyed by [`crate::records::SERVICE_RECORD_KEY`].
pub const SERVICE: &str = "palisade.service";

/// Node directory: node id -> [`crate::records::NodeRecord`].
pub const NODES: &str = "palisade.nodes";

/// JWT signing keys: kid -> [`crate::records::JwtSigningKeyRecord`].
pub const JWT_PUBLIC_SIGNING_KEYS: &str = "palisade.jwt.public_signing_keys";

/// JWT key issuers: kid -> issuer string.
pub const JWT_PUBLIC_SIGNING_KEY_ISSUER: &str = "palisade.jwt.public_signing_key_issuer";

/// Requests pending ordered execution: slot -> [`crate::records::AftRequestRecord`].
pub const AFT_REQUESTS: &str = "palisade.aft.requests";
