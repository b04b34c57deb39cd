// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator nodes: the computation-carrying vertices of the DAG.
//!
//! Operator kinds form a closed sum type, each variant carrying its own
//! attribute payload; shape inference and the optimizer dispatch with
//! exhaustive matches instead of runtime type inspection.

use crate::TensorId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tensor_meta::{infer, Shape, ShapeError};

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identifier of an operator, unique for the process lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize,
)]
pub struct OpId(u64);

impl OpId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// The kind of computation an operator performs, with its attributes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum OpKind {
    /// Batched matrix multiply; the flags transpose the last two axes of
    /// the corresponding operand before contraction.
    MatMul { trans_a: bool, trans_b: bool },
    /// Concatenation along `axis` (negative axes count from the end).
    Concat { axis: isize },
    /// Axis permutation: output axis `i` reads input axis `perm[i]`.
    Transpose { perm: Vec<usize> },
    /// Elementwise addition with broadcasting.
    Add,
    /// Elementwise multiplication with broadcasting.
    Mul,
    /// Rectified linear unit (shape-preserving).
    Relu,
}

impl OpKind {
    /// Returns a human-readable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::MatMul { .. } => "matmul",
            OpKind::Concat { .. } => "concat",
            OpKind::Transpose { .. } => "transpose",
            OpKind::Add => "add",
            OpKind::Mul => "mul",
            OpKind::Relu => "relu",
        }
    }

    /// The exact number of inputs this kind takes, or `None` when variadic.
    pub fn expected_inputs(&self) -> Option<usize> {
        match self {
            OpKind::MatMul { .. } | OpKind::Add | OpKind::Mul => Some(2),
            OpKind::Transpose { .. } | OpKind::Relu => Some(1),
            OpKind::Concat { .. } => None, // one or more
        }
    }

    /// The number of outputs this kind produces.
    pub fn expected_outputs(&self) -> usize {
        1
    }

    /// Runs this kind's shape-inference rule on the given input shapes.
    ///
    /// Input count must already match [`expected_inputs`](Self::expected_inputs);
    /// the graph validates arity before calling.
    pub fn infer(&self, inputs: &[&Shape]) -> Result<Vec<Shape>, ShapeError> {
        let out = match self {
            OpKind::MatMul { trans_a, trans_b } => {
                infer::matmul(inputs[0], inputs[1], *trans_a, *trans_b)?
            }
            OpKind::Concat { axis } => infer::concat(inputs, *axis)?,
            OpKind::Transpose { perm } => infer::transpose(inputs[0], perm)?,
            OpKind::Add | OpKind::Mul => infer::broadcast(inputs[0], inputs[1])?,
            OpKind::Relu => inputs[0].clone(),
        };
        Ok(vec![out])
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::MatMul { trans_a, trans_b } => write!(
                f,
                "MatMul({}, {})",
                if *trans_a { "A^T" } else { "A" },
                if *trans_b { "B^T" } else { "B" },
            ),
            OpKind::Concat { axis } => write!(f, "Concat(axis={axis})"),
            OpKind::Transpose { perm } => write!(f, "Transpose(perm={perm:?})"),
            OpKind::Add => write!(f, "Add"),
            OpKind::Mul => write!(f, "Mul"),
            OpKind::Relu => write!(f, "Relu"),
        }
    }
}

/// An operator in the graph: a kind plus ordered input and output tensors.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperatorNode {
    id: OpId,
    kind: OpKind,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl OperatorNode {
    /// Creates a node with a fresh id. Wiring happens when the node is
    /// attached through [`crate::Graph::add_operator`].
    pub(crate) fn new(kind: OpKind, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            id: OpId::fresh(),
            kind,
            inputs,
            outputs,
        }
    }

    /// Returns this operator's id.
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Returns the kind and its attributes.
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut OpKind {
        &mut self.kind
    }

    /// Returns the ordered input tensor ids.
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    /// Returns the ordered output tensor ids.
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// Rewires the **first** input slot holding `old` to `new`.
    ///
    /// Returns `false` (and changes nothing) when `old` is not an input.
    /// Callers must fix up the target lists of both tensors; this is the
    /// building block the optimizer's fusion rules are made of.
    pub(crate) fn replace_input(&mut self, old: TensorId, new: TensorId) -> bool {
        match self.inputs.iter().position(|&t| t == old) {
            Some(slot) => {
                self.inputs[slot] = new;
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} inputs=[", self.id, self.kind)?;
        for (i, t) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, "] outputs=[")?;
        for (i, t) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, "]")
    }
}
