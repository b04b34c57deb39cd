// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-meta
//!
//! Tensor metadata types and shape-inference rules for the graph planner.
//!
//! This crate deliberately holds **no tensor data** — numeric kernels live
//! behind the runtime boundary. What the planning layer needs is:
//!
//! - [`Shape`] — ordered dimension descriptors.
//! - [`DType`] — fixed-width element type tags (1/2/4/8-byte variants).
//! - [`infer`] — pure functions computing operator output shapes from input
//!   shapes and attributes (matrix multiply, concatenation, broadcasting,
//!   axis permutation).
//!
//! # Design Goals
//! - Inference rules are pure `fn(shapes, attrs) -> Result<Shape, ShapeError>`:
//!   no graph knowledge, trivially unit-testable.
//! - Shape mismatches are recoverable [`ShapeError`]s, never panics — the
//!   graph layer decides whether to abort propagation.

mod dtype;
mod error;
pub mod infer;
mod shape;

pub use dtype::DType;
pub use error::ShapeError;
pub use shape::Shape;
