// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory planning.

/// Errors that can occur while simulating arena placement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryPlanError {
    /// `alloc`/`free` was called after the arena buffer was materialized.
    ///
    /// Placement is simulated entirely up front; once the real buffer
    /// exists its size is fixed and the plan cannot change.
    #[error("arena already materialized: all alloc/free calls must precede materialization")]
    AlreadyMaterialized,
}
