// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pattern-based graph rewriting.
//!
//! Two rules run to a fixed point, scanning the operator list in order
//! until a full pass changes nothing:
//!
//! 1. **Inverse-transpose elimination** — a Transpose whose direct
//!    predecessor is a Transpose, where the composed permutation is the
//!    identity, is deleted together with its predecessor and both
//!    intermediate tensors; consumers are rewired to the original input.
//! 2. **Transpose-into-MatMul fusion** — a MatMul operand produced by a
//!    Transpose that swaps exactly the last two axes absorbs the
//!    transpose by flipping `trans_a`/`trans_b`.
//!
//! Every rewrite evicts removed entities from the graph's sets and repairs
//! all dangling references in the same step, so [`Graph::check_valid`]
//! holds after each applied rule. The rules assume a valid graph; corrupt
//! input is a precondition violation, not a recoverable error.

use crate::{Graph, OpId, OpKind};
use memory_planner::DeviceRuntime;

impl<R: DeviceRuntime> Graph<R> {
    /// Runs the rewrite rules to a fixed point.
    ///
    /// Deterministic: rules are attempted operator-by-operator in the
    /// current order, and the scan restarts until a pass applies nothing.
    /// Running `optimize` on an already-optimized graph changes nothing.
    pub fn optimize(&mut self) {
        let mut applied = 0usize;
        loop {
            let mut changed = false;
            for id in self.order.clone() {
                // Earlier rewrites in this pass may have removed the operator.
                if !self.ops.contains_key(&id) {
                    continue;
                }
                if self.eliminate_inverse_transposes(id) || self.fuse_transpose_into_matmul(id) {
                    changed = true;
                    applied += 1;
                }
            }
            if !changed {
                break;
            }
        }
        if applied > 0 {
            tracing::info!(rewrites = applied, "graph optimization complete");
        }
    }

    /// Rule 1: delete a Transpose pair whose composition is the identity.
    ///
    /// Pattern: `orig ─ pred:Transpose ─ mid ─ op:Transpose ─ out ─ consumers`
    /// where `mid` feeds only `op` and `perm(pred) ∘ perm(op)` is the
    /// identity. Both operators and both intermediate tensors are removed;
    /// every consumer of `out` is rewired to read `orig` directly.
    fn eliminate_inverse_transposes(&mut self, id: OpId) -> bool {
        // Match phase: collect everything, mutate nothing.
        let Some(op) = self.ops.get(&id) else { return false };
        let OpKind::Transpose { perm: second } = op.kind() else {
            return false;
        };
        let second = second.clone();
        let mid = op.inputs()[0];
        let out = op.outputs()[0];
        let Some(pred_id) = self.tensor_ref(mid).source() else {
            return false;
        };
        if pred_id == id {
            return false;
        }
        let pred = self.op_ref(pred_id);
        let OpKind::Transpose { perm: first } = pred.kind() else {
            return false;
        };
        if !composes_to_identity(first, &second) {
            return false;
        }
        let orig = pred.inputs()[0];
        if orig == mid || orig == out || mid == out {
            return false;
        }
        // The intermediate tensor must feed only the second transpose.
        let mid_targets = self.tensor_ref(mid).targets();
        if mid_targets.len() != 1 || mid_targets[0] != id {
            return false;
        }
        let out_targets = self.tensor_ref(out).targets().to_vec();
        // Deleting the pair must not leave `orig` isolated.
        let orig_tensor = self.tensor_ref(orig);
        if out_targets.is_empty()
            && orig_tensor.source().is_none()
            && orig_tensor.targets().len() == 1
        {
            return false;
        }

        // Rewrite phase.
        self.tensor_node_mut(orig).remove_target(pred_id);
        self.ops.remove(&pred_id);
        self.ops.remove(&id);
        self.order.retain(|&o| o != pred_id && o != id);
        self.tensors.remove(&mid);
        self.tensors.remove(&out);
        for succ in out_targets {
            // A consumer may read `out` in several slots; rewire them all.
            while self.op_node_mut(succ).replace_input(out, orig) {}
            self.tensor_node_mut(orig).add_target(succ);
        }
        self.invalidate_adjacency();
        tracing::debug!(first = %pred_id, second = %id, "eliminated inverse transpose pair");
        true
    }

    /// Rule 2: absorb a last-two-axes Transpose into a MatMul operand.
    ///
    /// Only the supported pattern — a permutation that swaps exactly the
    /// last two axes and whose output feeds only this MatMul — is fused;
    /// anything else is left in place. One operand is fused per
    /// application; the fixed-point driver picks up the other side.
    fn fuse_transpose_into_matmul(&mut self, id: OpId) -> bool {
        let Some(op) = self.ops.get(&id) else { return false };
        let OpKind::MatMul { .. } = op.kind() else {
            return false;
        };
        let operands = [op.inputs()[0], op.inputs()[1]];
        if operands[0] == operands[1] {
            // Rewiring one slot would dangle the other.
            return false;
        }
        for (slot, &operand) in operands.iter().enumerate() {
            let Some(src_id) = self.tensor_ref(operand).source() else {
                continue;
            };
            let src = self.op_ref(src_id);
            let OpKind::Transpose { perm } = src.kind() else {
                continue;
            };
            if !swaps_last_two(perm) {
                continue;
            }
            let orig = src.inputs()[0];
            if orig == operand {
                continue;
            }
            let operand_targets = self.tensor_ref(operand).targets();
            if operand_targets.len() != 1 || operand_targets[0] != id {
                continue;
            }

            // Rewrite phase.
            self.tensor_node_mut(orig).remove_target(src_id);
            self.tensor_node_mut(orig).add_target(id);
            self.op_node_mut(id).replace_input(operand, orig);
            if let OpKind::MatMul { trans_a, trans_b } = self.op_node_mut(id).kind_mut() {
                if slot == 0 {
                    *trans_a = !*trans_a;
                } else {
                    *trans_b = !*trans_b;
                }
            }
            self.ops.remove(&src_id);
            self.order.retain(|&o| o != src_id);
            self.tensors.remove(&operand);
            self.invalidate_adjacency();
            tracing::debug!(
                matmul = %id,
                transpose = %src_id,
                operand = if slot == 0 { "A" } else { "B" },
                "fused transpose into matmul"
            );
            return true;
        }
        false
    }
}

/// `true` if applying `first` then `second` permutes nothing.
///
/// With `output[i] = input[perm[i]]` semantics, the composition maps axis
/// `i` to `first[second[i]]`.
fn composes_to_identity(first: &[usize], second: &[usize]) -> bool {
    first.len() == second.len()
        && second
            .iter()
            .enumerate()
            .all(|(i, &s)| first.get(s).copied() == Some(i))
}

/// `true` if `perm` is the identity except for the last two axes, swapped.
fn swaps_last_two(perm: &[usize]) -> bool {
    let n = perm.len();
    if n < 2 {
        return false;
    }
    perm[..n - 2].iter().enumerate().all(|(i, &p)| p == i)
        && perm[n - 2] == n - 1
        && perm[n - 1] == n - 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Graph, TensorId};
    use tensor_meta::{DType, Shape};

    fn transpose(perm: &[usize]) -> OpKind {
        OpKind::Transpose {
            perm: perm.to_vec(),
        }
    }

    fn matmul() -> OpKind {
        OpKind::MatMul {
            trans_a: false,
            trans_b: false,
        }
    }

    /// `a -> Transpose -> Transpose -> (… @ b) -> out`, the pair being a
    /// logical identity on `a`.
    fn double_transpose_matmul() -> (Graph, TensorId, TensorId, TensorId) {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(1, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 1), DType::F32);
        let mid = g.add_tensor(Shape::scalar(), DType::F32);
        let back = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(transpose(&[1, 0]), vec![a], vec![mid]).unwrap();
        g.add_operator(transpose(&[1, 0]), vec![mid], vec![back]).unwrap();
        g.add_operator(matmul(), vec![back, b], vec![out]).unwrap();
        (g, a, b, out)
    }

    #[test]
    fn test_helper_composes_to_identity() {
        assert!(composes_to_identity(&[1, 0], &[1, 0]));
        assert!(composes_to_identity(&[2, 0, 1], &[1, 2, 0]));
        assert!(!composes_to_identity(&[1, 2, 0], &[1, 2, 0]));
        assert!(!composes_to_identity(&[1, 0], &[1, 2, 0]));
    }

    #[test]
    fn test_helper_swaps_last_two() {
        assert!(swaps_last_two(&[1, 0]));
        assert!(swaps_last_two(&[0, 2, 1]));
        assert!(swaps_last_two(&[0, 1, 3, 2]));
        assert!(!swaps_last_two(&[1, 0, 2]));
        assert!(!swaps_last_two(&[2, 1, 0]));
        assert!(!swaps_last_two(&[0]));
    }

    #[test]
    fn test_eliminates_inverse_transpose_pair() {
        let (mut g, a, b, out) = double_transpose_matmul();
        g.check_valid().unwrap();
        assert_eq!(g.num_operators(), 3);

        g.optimize();

        // Only the MatMul survives, reading A directly.
        assert_eq!(g.num_operators(), 1);
        assert_eq!(g.num_tensors(), 3);
        let mm = g.operators().next().unwrap();
        assert_eq!(mm.inputs(), &[a, b]);
        assert_eq!(mm.outputs(), &[out]);
        assert_eq!(g.tensor(a).unwrap().targets(), &[mm.id()]);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_elimination_skips_non_identity_composition() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::new(vec![2, 2, 2]), DType::F32);
        let mid = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        // Two identical 3-cycles: shapes agree (cubic), composition does not.
        g.add_operator(transpose(&[1, 2, 0]), vec![a], vec![mid]).unwrap();
        g.add_operator(transpose(&[1, 2, 0]), vec![mid], vec![out]).unwrap();

        g.optimize();
        assert_eq!(g.num_operators(), 2);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_elimination_skips_shared_intermediate() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let mid = g.add_tensor(Shape::scalar(), DType::F32);
        let back = g.add_tensor(Shape::scalar(), DType::F32);
        let side = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(transpose(&[1, 0]), vec![a], vec![mid]).unwrap();
        g.add_operator(transpose(&[1, 0]), vec![mid], vec![back]).unwrap();
        // `mid` has a second consumer: the pair must stay.
        g.add_operator(OpKind::Relu, vec![mid], vec![side]).unwrap();

        g.optimize();
        assert_eq!(g.num_operators(), 3);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_fuses_transpose_into_matmul_left() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(3, 2), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 4), DType::F32);
        let at = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(transpose(&[1, 0]), vec![a], vec![at]).unwrap();
        let mm = g.add_operator(matmul(), vec![at, b], vec![out]).unwrap();

        g.optimize();

        assert_eq!(g.num_operators(), 1);
        let op = g.operator(mm).unwrap();
        assert_eq!(op.inputs(), &[a, b]);
        assert!(matches!(
            op.kind(),
            OpKind::MatMul { trans_a: true, trans_b: false }
        ));
        g.check_valid().unwrap();

        // The fused graph still shape-infers to the same result.
        g.topo_sort().unwrap();
        g.shape_infer().unwrap();
        assert_eq!(g.tensor(out).unwrap().shape(), &Shape::matrix(2, 4));
    }

    #[test]
    fn test_fuses_transpose_into_matmul_right() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(4, 3), DType::F32);
        let bt = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(transpose(&[1, 0]), vec![b], vec![bt]).unwrap();
        let mm = g.add_operator(matmul(), vec![a, bt], vec![out]).unwrap();

        g.optimize();

        let op = g.operator(mm).unwrap();
        assert_eq!(op.inputs(), &[a, b]);
        assert!(matches!(
            op.kind(),
            OpKind::MatMul { trans_a: false, trans_b: true }
        ));
        g.check_valid().unwrap();
    }

    #[test]
    fn test_fuses_both_operands() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::new(vec![2, 4, 3]), DType::F32);
        let b = g.add_tensor(Shape::new(vec![2, 5, 4]), DType::F32);
        let at = g.add_tensor(Shape::scalar(), DType::F32);
        let bt = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(transpose(&[0, 2, 1]), vec![a], vec![at]).unwrap();
        g.add_operator(transpose(&[0, 2, 1]), vec![b], vec![bt]).unwrap();
        let mm = g.add_operator(matmul(), vec![at, bt], vec![out]).unwrap();

        g.optimize();

        assert_eq!(g.num_operators(), 1);
        let op = g.operator(mm).unwrap();
        assert_eq!(op.inputs(), &[a, b]);
        assert!(matches!(
            op.kind(),
            OpKind::MatMul { trans_a: true, trans_b: true }
        ));
        g.check_valid().unwrap();
    }

    #[test]
    fn test_fusion_skips_general_permutation() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::new(vec![4, 3, 2]), DType::F32);
        let b = g.add_tensor(Shape::new(vec![2, 3, 5]), DType::F32);
        let at = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        // Full reversal is not a last-two swap: must stay unfused.
        g.add_operator(transpose(&[2, 1, 0]), vec![a], vec![at]).unwrap();
        g.add_operator(matmul(), vec![at, b], vec![out]).unwrap();

        g.optimize();
        assert_eq!(g.num_operators(), 2);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_fusion_skips_shared_transpose_output() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(3, 2), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 4), DType::F32);
        let at = g.add_tensor(Shape::scalar(), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        let side = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(transpose(&[1, 0]), vec![a], vec![at]).unwrap();
        g.add_operator(matmul(), vec![at, b], vec![out]).unwrap();
        // Second consumer of the transposed tensor.
        g.add_operator(OpKind::Relu, vec![at], vec![side]).unwrap();

        g.optimize();
        assert_eq!(g.num_operators(), 3);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let (mut g, ..) = double_transpose_matmul();
        g.optimize();
        let first = format!("{g}");
        g.optimize();
        let second = format!("{g}");
        assert_eq!(first, second);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_optimize_leaves_plain_graph_untouched() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 4), DType::F32);
        let out = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(matmul(), vec![a, b], vec![out]).unwrap();

        let before = format!("{g}");
        g.optimize();
        assert_eq!(before, format!("{g}"));
    }
}
