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

/// Caller-contract violations surfaced by the facade entry points.
///
/// These are logic errors on the transport's side, not request
/// failures: no response is produced for them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrontendError {
    /// `process_forwarded` was invoked without a forwarded session
    /// context.
    #[error("processing forwarded command with uninitialised forwarded context")]
    MissingForwardedContext,

    /// A forwarded request tried to forward again.
    #[error("forwarded RPC cannot be forwarded")]
    UnexpectedDeferral,

    /// BFT execution was requested while the frontend is not open.
    /// Only a faulty primary orders user transactions before the
    /// service opens; a backup may view-change on this.
    #[error("frontend is not open for ordered execution")]
    NotOpen,
}
