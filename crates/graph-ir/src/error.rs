// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph construction and the structural passes.

use crate::TensorId;

/// Errors that can occur while building, sorting, or planning a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The graph contains a cycle; no topological order exists.
    #[error("graph contains a cycle: topological sort cannot place all operators")]
    Cyclic,

    /// An operator referenced a tensor the graph does not own.
    #[error("unknown tensor {0}")]
    UnknownTensor(TensorId),

    /// An output tensor already has a producing operator.
    #[error("tensor {0} already has a producing operator")]
    AlreadyProduced(TensorId),

    /// A tensor with this id is already owned by the graph.
    #[error("tensor {0} is already owned by this graph")]
    DuplicateTensor(TensorId),

    /// An adopted tensor still carries adjacency links.
    #[error("tensor {0} still carries adjacency links and cannot be adopted")]
    TensorNotDetached(TensorId),

    /// Wrong number of inputs for the operator kind.
    #[error("operator '{kind}' expects {expected} input(s), got {actual}")]
    InputArity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Wrong number of outputs for the operator kind.
    #[error("operator '{kind}' expects {expected} output(s), got {actual}")]
    OutputArity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Operand data types disagree.
    #[error("operands of '{kind}' mix data types")]
    DTypeMismatch { kind: &'static str },

    /// Shape propagation was invoked on an unsorted graph.
    #[error("shape inference requires a topologically sorted graph")]
    NotSorted,

    /// A shape-inference rule rejected the input shapes.
    #[error(transparent)]
    Shape(#[from] tensor_meta::ShapeError),

    /// The embedded arena rejected a planning call.
    #[error(transparent)]
    Memory(#[from] memory_planner::MemoryPlanError),

    /// A structural invariant does not hold; the graph is corrupt.
    #[error("graph invariant violated: {0}")]
    Corrupt(String),
}
