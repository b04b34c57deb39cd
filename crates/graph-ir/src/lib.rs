// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-ir
//!
//! The tensor/operator DAG at the heart of the planning layer.
//!
//! A [`Graph`] owns every [`TensorNode`] and [`OperatorNode`] by id; all
//! adjacency ("which operator produces this tensor", "who consumes it") is
//! stored as ids and resolved through the owning graph, so there are no
//! reference cycles and no shared ownership. The operator-level
//! predecessor/successor view is **derived** from the tensor links into a
//! cache that is invalidated on every structural edit — there is exactly one
//! authoritative adjacency.
//!
//! # Pipeline
//!
//! ```text
//! Graph::add_tensor / add_operator     — construct and wire the DAG
//!       │
//!       ▼
//! Graph::optimize()                    — rewrite rules (transpose pair
//!       │                                elimination, matmul fusion)
//!       ▼
//! Graph::topo_sort()                   — execution order, cycle detection
//!       │
//!       ▼
//! Graph::shape_infer()                 — propagate shapes in order
//!       │
//!       ▼
//! Graph::data_malloc()                 — arena offsets + one real buffer
//! ```
//!
//! # Example
//! ```
//! use graph_ir::{Graph, OpKind};
//! use tensor_meta::{DType, Shape};
//!
//! let mut g = Graph::default();
//! let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
//! let b = g.add_tensor(Shape::matrix(3, 4), DType::F32);
//! let c = g.add_tensor(Shape::matrix(2, 4), DType::F32);
//! g.add_operator(
//!     OpKind::MatMul { trans_a: false, trans_b: false },
//!     vec![a, b],
//!     vec![c],
//! )
//! .unwrap();
//!
//! g.data_malloc().unwrap();
//! assert!(g.tensor(c).unwrap().offset().is_some());
//! ```

mod error;
mod graph;
mod operator;
mod optimize;
mod tensor;

pub use error::GraphError;
pub use graph::{Adjacency, Graph};
pub use operator::{OpId, OpKind, OperatorNode};
pub use tensor::{TensorId, TensorNode};
