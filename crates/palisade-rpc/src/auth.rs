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

//! Client signature verification and the memoised verifier cache.

use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use palisade_core::identity::CallerId;
use palisade_core::records::{DigestAlg, SignedRequest};

/// Headers a signed request must cover, advertised in the 401
/// challenge.
pub const REQUIRED_SIGNATURE_HEADERS: &[&str] = &["(request-target)", "digest"];

/// `WWW-Authenticate` value for missing or invalid request signatures.
pub fn signature_auth_challenge() -> String {
    format!(
        "Signature realm=\"Signed request access\", headers=\"{}\"",
        REQUIRED_SIGNATURE_HEADERS.join(" ")
    )
}

/// `WWW-Authenticate` value for missing or invalid bearer tokens.
pub const BEARER_AUTH_CHALLENGE: &str =
    "Bearer realm=\"JWT bearer token access\", error=\"invalid_token\"";

/// Verifier for one caller's request signatures.
///
/// Caller certs are raw ed25519 public keys; signatures cover the
/// digest of the request bytes named by the signed request.
pub struct RequestVerifier {
    key: VerifyingKey,
}

impl RequestVerifier {
    pub fn from_cert(cert: &[u8]) -> Option<Self> {
        let raw: [u8; 32] = cert.try_into().ok()?;
        let key = VerifyingKey::from_bytes(&raw).ok()?;
        Some(Self { key })
    }

    pub fn verify(&self, signed: &SignedRequest) -> bool {
        let Ok(signature) = Signature::from_slice(&signed.signature) else {
            return false;
        };
        let message = match signed.digest {
            DigestAlg::Sha256 => Sha256::digest(&signed.request),
        };
        self.key.verify(message.as_slice(), &signature).is_ok()
    }
}

/// Per-caller verifiers, built once and memoised for the life of the
/// process. Entries are never evicted; the set of signing callers is
/// bounded by the registry's membership.
#[derive(Default)]
pub struct VerifierCache {
    verifiers: Mutex<HashMap<CallerId, Arc<RequestVerifier>>>,
}

impl VerifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify `signed` against the verifier cached for `caller`,
    /// constructing it from `cert` on first use. Verification itself
    /// runs outside the critical section.
    pub fn verify(&self, cert: &[u8], caller: CallerId, signed: &SignedRequest) -> bool {
        let verifier = {
            let mut guard = self.verifiers.lock();
            match guard.get(&caller) {
                Some(verifier) => Arc::clone(verifier),
                None => {
                    let Some(verifier) = RequestVerifier::from_cert(cert) else {
                        tracing::debug!(caller = %caller, "caller cert is not a usable key");
                        return false;
                    };
                    let verifier = Arc::new(verifier);
                    guard.insert(caller, Arc::clone(&verifier));
                    verifier
                }
            }
        };
        verifier.verify(signed)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.verifiers.lock().len()
    }
}
