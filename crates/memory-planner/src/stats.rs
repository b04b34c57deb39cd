// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arena accounting for profiling and diagnostics.

/// Snapshot of the arena allocator's bookkeeping.
///
/// `used_bytes` is the sum of currently-live (allocated, not freed)
/// requests after alignment; `peak_bytes` is the high-water mark, i.e. the
/// size the materialized buffer will have.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArenaStats {
    /// Bytes currently allocated (aligned).
    pub used_bytes: usize,
    /// Highest offset ever claimed — the required arena size.
    pub peak_bytes: usize,
    /// Number of free blocks available for reuse.
    pub free_blocks: usize,
    /// Whether the real buffer has been materialized.
    pub materialized: bool,
}

impl ArenaStats {
    /// Fraction of the arena currently in use, in `[0.0, 1.0]`.
    ///
    /// Returns `0.0` for an empty arena.
    pub fn utilisation(&self) -> f64 {
        if self.peak_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.peak_bytes as f64
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "used {} B, peak {} B ({:.0}% utilised), {} free blocks{}",
            self.used_bytes,
            self.peak_bytes,
            self.utilisation() * 100.0,
            self.free_blocks,
            if self.materialized { ", materialized" } else { "" },
        )
    }
}
