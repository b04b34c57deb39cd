// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pure shape-inference rules, one function per operator family.
//!
//! Each rule computes the output shape from input shapes and operator
//! attributes alone — no graph access, no side effects. Incompatible inputs
//! surface as a [`ShapeError`] rather than a panic, so the graph layer can
//! choose its own abort policy.

use crate::{Shape, ShapeError};

/// Broadcasts two shapes against each other (ONNX/NumPy multidirectional
/// broadcasting).
///
/// The shapes are right-aligned; the shorter one is padded on the left with
/// size-1 axes. For each aligned axis the result size is the shared value
/// when both sides agree, the non-1 value when exactly one side is 1, and
/// an error otherwise.
///
/// # Examples
/// ```
/// use tensor_meta::{infer, Shape};
/// let out = infer::broadcast(&Shape::new(vec![5, 1, 4]), &Shape::new(vec![1, 3, 4])).unwrap();
/// assert_eq!(out, Shape::new(vec![5, 3, 4]));
/// ```
pub fn broadcast(lhs: &Shape, rhs: &Shape) -> Result<Shape, ShapeError> {
    let rank = lhs.rank().max(rhs.rank());
    let mut dims = vec![0usize; rank];

    for i in 0..rank {
        // Index from the right; missing leading axes count as size 1.
        let a = if i < lhs.rank() { lhs.dims()[lhs.rank() - 1 - i] } else { 1 };
        let b = if i < rhs.rank() { rhs.dims()[rhs.rank() - 1 - i] } else { 1 };
        dims[rank - 1 - i] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(ShapeError::BroadcastIncompatible {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                })
            }
        };
    }

    Ok(Shape::new(dims))
}

/// Infers the output shape of a (possibly batched) matrix multiply.
///
/// The last two axes of each operand form the matrix, transposed first when
/// the corresponding flag is set. All leading axes are batch dimensions and
/// are reconciled with [`broadcast`]. The contraction dimension (columns of
/// the effective left operand vs rows of the effective right operand) must
/// match.
///
/// # Errors
/// - [`ShapeError::RankTooSmall`] if either operand has rank < 2.
/// - [`ShapeError::ContractionMismatch`] if the contracted axes differ.
/// - [`ShapeError::BroadcastIncompatible`] if the batch axes cannot be
///   reconciled.
pub fn matmul(
    lhs: &Shape,
    rhs: &Shape,
    trans_a: bool,
    trans_b: bool,
) -> Result<Shape, ShapeError> {
    for s in [lhs, rhs] {
        if s.rank() < 2 {
            return Err(ShapeError::RankTooSmall {
                shape: s.clone(),
                rank: s.rank(),
            });
        }
    }

    let a = lhs.dims();
    let b = rhs.dims();
    let (mut m, mut ka) = (a[a.len() - 2], a[a.len() - 1]);
    let (mut kb, mut n) = (b[b.len() - 2], b[b.len() - 1]);
    if trans_a {
        std::mem::swap(&mut m, &mut ka);
    }
    if trans_b {
        std::mem::swap(&mut kb, &mut n);
    }

    if ka != kb {
        return Err(ShapeError::ContractionMismatch { lhs_k: ka, rhs_k: kb });
    }

    let batch = broadcast(
        &Shape::new(a[..a.len() - 2].to_vec()),
        &Shape::new(b[..b.len() - 2].to_vec()),
    )?;

    let mut dims = batch.dims().to_vec();
    dims.push(m);
    dims.push(n);
    Ok(Shape::new(dims))
}

/// Infers the output shape of a concatenation along `axis`.
///
/// All inputs must share the same rank and agree on every axis except the
/// concat axis, whose output size is the sum across inputs. Negative axes
/// count from the end, as in ONNX.
pub fn concat(shapes: &[&Shape], axis: isize) -> Result<Shape, ShapeError> {
    let first = shapes.first().ok_or(ShapeError::EmptyConcat)?;
    let rank = first.rank();
    let axis = normalize_axis(axis, rank)?;

    let mut dims = first.dims().to_vec();
    for (index, s) in shapes.iter().enumerate().skip(1) {
        if s.rank() != rank {
            return Err(ShapeError::ConcatRankMismatch {
                expected: rank,
                index,
                actual: s.rank(),
            });
        }
        for (ax, (&have, &expect)) in s.dims().iter().zip(first.dims()).enumerate() {
            if ax == axis {
                dims[axis] += have;
            } else if have != expect {
                return Err(ShapeError::ConcatSizeMismatch {
                    axis: ax,
                    expected: expect,
                    index,
                    actual: have,
                });
            }
        }
    }

    Ok(Shape::new(dims))
}

/// Infers the output shape of an axis permutation.
///
/// `perm` must contain each index in `0..rank` exactly once; output axis `i`
/// takes its size from input axis `perm[i]`.
pub fn transpose(shape: &Shape, perm: &[usize]) -> Result<Shape, ShapeError> {
    let rank = shape.rank();
    if !is_permutation(perm, rank) {
        return Err(ShapeError::InvalidPermutation {
            perm: perm.to_vec(),
            rank,
        });
    }
    let dims = perm.iter().map(|&p| shape.dims()[p]).collect();
    Ok(Shape::new(dims))
}

/// Resolves a possibly negative axis against a rank.
///
/// Accepts `-rank ..= rank-1`; negative values count from the end.
pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize, ShapeError> {
    let r = rank as isize;
    if axis < -r || axis >= r {
        return Err(ShapeError::AxisOutOfRange { axis, rank });
    }
    Ok(if axis < 0 { (axis + r) as usize } else { axis as usize })
}

fn is_permutation(perm: &[usize], rank: usize) -> bool {
    if perm.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}
