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

use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

/// Failures raised by the store while a transaction executes or commits.
#[derive(Debug, Error)]
pub enum KvError {
    /// The transaction read state that has since been compacted away.
    /// Always retriable: reset the transaction and re-execute.
    #[error("transaction conflicted with compaction at version {version}")]
    Compacted { version: crate::kv::Version },

    /// The committed write set could not be serialised for replication.
    /// Not recoverable: the replicated log must never carry a partial
    /// serialisation, so callers are expected to abort the process.
    #[error("failed to serialise transaction: {reason}")]
    Serialise { reason: String },

    /// A persisted record could not be decoded.
    #[error("corrupt record in table {table}: {source}")]
    CorruptRecord {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
