// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor nodes: the value-carrying vertices of the DAG.

use crate::OpId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tensor_meta::{DType, Shape};

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identifier of a tensor, unique for the process lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize,
)]
pub struct TensorId(u64);

impl TensorId {
    /// Draws a fresh id from the process-global counter.
    pub(crate) fn fresh() -> Self {
        Self(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A tensor in the graph: shape and dtype metadata plus adjacency links.
///
/// A tensor is produced by at most one operator (`source`; absent for graph
/// inputs) and consumed by zero or more (`targets`). Once memory planning
/// has run, `offset` holds the tensor's byte position in the arena.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TensorNode {
    id: TensorId,
    shape: Shape,
    dtype: DType,
    source: Option<OpId>,
    targets: Vec<OpId>,
    offset: Option<usize>,
}

impl TensorNode {
    /// Creates a detached tensor with a fresh id.
    pub fn new(shape: Shape, dtype: DType) -> Self {
        Self {
            id: TensorId::fresh(),
            shape,
            dtype,
            source: None,
            targets: Vec::new(),
            offset: None,
        }
    }

    /// Returns this tensor's id.
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Returns the current shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the element data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the byte footprint: `element_count × dtype width`.
    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// Returns the producing operator, if any.
    ///
    /// `None` marks a graph input.
    pub fn source(&self) -> Option<OpId> {
        self.source
    }

    /// Returns the consuming operators.
    pub fn targets(&self) -> &[OpId] {
        &self.targets
    }

    /// Returns the arena offset assigned by memory planning, if any.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// `true` if no links are attached (fresh or evicted node).
    pub fn is_detached(&self) -> bool {
        self.source.is_none() && self.targets.is_empty()
    }

    // ── Primitive edits (crate-internal) ───────────────────────
    //
    // Higher-level graph edits are sequences of these; each enclosing edit
    // must leave the graph invariants intact by the time it completes.

    pub(crate) fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub(crate) fn set_source(&mut self, op: OpId) {
        self.source = Some(op);
    }

    pub(crate) fn clear_source(&mut self) {
        self.source = None;
    }

    pub(crate) fn add_target(&mut self, op: OpId) {
        if !self.targets.contains(&op) {
            self.targets.push(op);
        }
    }

    pub(crate) fn remove_target(&mut self, op: OpId) {
        self.targets.retain(|&t| t != op);
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }
}

impl fmt::Display for TensorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.id, self.dtype, self.shape)?;
        match self.source {
            Some(src) => write!(f, " source={src}")?,
            None => write!(f, " source=-")?,
        }
        write!(f, " targets=[")?;
        for (i, t) in self.targets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, "]")
    }
}
