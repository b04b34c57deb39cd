// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The owning graph container.
//!
//! [`Graph`] owns every tensor and operator by id in id-ordered maps, keeps
//! the execution-order list and a cached "is sorted" flag, derives the
//! operator-level adjacency view on demand, and drives shape propagation
//! and memory planning. All structural mutation goes through the graph so
//! each public edit leaves the invariants intact:
//!
//! - no isolated tensors (every tensor has a source or a target),
//! - every cross-reference (source/target/input/output) resolves to an
//!   entity owned by this graph,
//! - the execution-order list holds exactly the operator set.

use crate::{GraphError, OpId, OpKind, OperatorNode, TensorId, TensorNode};
use memory_planner::{ArenaAllocator, DeviceRuntime, HostRuntime};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tensor_meta::{DType, Shape};

/// The operator-level predecessor/successor view.
///
/// Derived entirely from tensor source/target links; rebuilt lazily after
/// structural edits. Because it is computed, it can never disagree with
/// the tensor-level adjacency.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    predecessors: HashMap<OpId, Vec<OpId>>,
    successors: HashMap<OpId, Vec<OpId>>,
}

impl Adjacency {
    /// Operators producing any input of `op`.
    pub fn predecessors(&self, op: OpId) -> &[OpId] {
        self.predecessors.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Operators consuming any output of `op`.
    pub fn successors(&self, op: OpId) -> &[OpId] {
        self.successors.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    fn build<R: DeviceRuntime>(graph: &Graph<R>) -> Self {
        let mut adj = Adjacency::default();
        for op in graph.ops.values() {
            let preds = adj.predecessors.entry(op.id()).or_default();
            for &input in op.inputs() {
                if let Some(src) = graph.tensor_ref(input).source() {
                    if !preds.contains(&src) {
                        preds.push(src);
                    }
                }
            }
            let succs = adj.successors.entry(op.id()).or_default();
            for &output in op.outputs() {
                for &target in graph.tensor_ref(output).targets() {
                    if !succs.contains(&target) {
                        succs.push(target);
                    }
                }
            }
        }
        adj
    }
}

/// The tensor/operator DAG with embedded memory planning.
///
/// Generic over the [`DeviceRuntime`] that backs the arena; defaults to
/// [`HostRuntime`]. See the crate docs for the pipeline.
pub struct Graph<R: DeviceRuntime = HostRuntime> {
    pub(crate) tensors: BTreeMap<TensorId, TensorNode>,
    pub(crate) ops: BTreeMap<OpId, OperatorNode>,
    /// Execution order; replaced by a valid order on `topo_sort`.
    pub(crate) order: Vec<OpId>,
    /// Cached "order is topologically valid" flag.
    pub(crate) sorted: bool,
    /// Lazily derived operator adjacency, cleared on structural edits.
    pub(crate) adjacency: OnceCell<Adjacency>,
    arena: ArenaAllocator<R>,
}

impl Default for Graph<HostRuntime> {
    fn default() -> Self {
        Self::new(HostRuntime)
    }
}

impl<R: DeviceRuntime> Graph<R> {
    /// Creates an empty graph whose arena is backed by `runtime`.
    pub fn new(runtime: R) -> Self {
        Self {
            tensors: BTreeMap::new(),
            ops: BTreeMap::new(),
            order: Vec::new(),
            sorted: true,
            adjacency: OnceCell::new(),
            arena: ArenaAllocator::new(runtime),
        }
    }

    // ── Construction ───────────────────────────────────────────

    /// Creates a bare tensor owned by this graph and returns its id.
    pub fn add_tensor(&mut self, shape: Shape, dtype: DType) -> TensorId {
        let node = TensorNode::new(shape, dtype);
        let id = node.id();
        self.tensors.insert(id, node);
        id
    }

    /// Adopts an existing detached tensor node.
    ///
    /// # Errors
    /// - [`GraphError::DuplicateTensor`] if a tensor with the same id is
    ///   already owned.
    /// - [`GraphError::TensorNotDetached`] if the node still carries
    ///   adjacency links from a previous graph.
    pub fn add_tensor_node(&mut self, node: TensorNode) -> Result<TensorId, GraphError> {
        let id = node.id();
        if self.tensors.contains_key(&id) {
            return Err(GraphError::DuplicateTensor(id));
        }
        if !node.is_detached() {
            return Err(GraphError::TensorNotDetached(id));
        }
        self.tensors.insert(id, node);
        Ok(id)
    }

    /// Creates an operator over existing tensors, validates it, and wires
    /// it into the DAG.
    ///
    /// Validation covers: referenced tensors exist, input/output arity
    /// matches the kind, all operands share one dtype, no output already
    /// has a producer, and the kind's shape rule accepts the current input
    /// shapes. On success the inferred shape is written to the output
    /// tensor, the operator becomes a target of each input and the source
    /// of each output, and the cached sorted flag is invalidated.
    pub fn add_operator(
        &mut self,
        kind: OpKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Result<OpId, GraphError> {
        // Validate before any mutation so failures leave the graph intact.
        for &id in inputs.iter().chain(&outputs) {
            if !self.tensors.contains_key(&id) {
                return Err(GraphError::UnknownTensor(id));
            }
        }
        match kind.expected_inputs() {
            Some(expected) if inputs.len() != expected => {
                return Err(GraphError::InputArity {
                    kind: kind.as_str(),
                    expected,
                    actual: inputs.len(),
                });
            }
            None if inputs.is_empty() => {
                return Err(GraphError::InputArity {
                    kind: kind.as_str(),
                    expected: 1,
                    actual: 0,
                });
            }
            _ => {}
        }
        if outputs.len() != kind.expected_outputs() {
            return Err(GraphError::OutputArity {
                kind: kind.as_str(),
                expected: kind.expected_outputs(),
                actual: outputs.len(),
            });
        }
        let dtype = self.tensor_ref(inputs[0]).dtype();
        for &id in inputs.iter().chain(&outputs) {
            if self.tensor_ref(id).dtype() != dtype {
                return Err(GraphError::DTypeMismatch { kind: kind.as_str() });
            }
        }
        for &id in &outputs {
            if self.tensor_ref(id).source().is_some() {
                return Err(GraphError::AlreadyProduced(id));
            }
        }
        let input_shapes: Vec<&Shape> =
            inputs.iter().map(|&id| self.tensor_ref(id).shape()).collect();
        let inferred = kind.infer(&input_shapes)?;

        // Wire.
        let node = OperatorNode::new(kind, inputs, outputs);
        let id = node.id();
        for (&out, shape) in node.outputs().iter().zip(inferred) {
            let tensor = self.tensor_node_mut(out);
            tensor.set_shape(shape);
            tensor.set_source(id);
        }
        for &input in node.inputs() {
            self.tensor_node_mut(input).add_target(id);
        }
        self.ops.insert(id, node);
        self.order.push(id);
        self.sorted = false;
        self.invalidate_adjacency();
        Ok(id)
    }

    // ── Lookup & iteration ─────────────────────────────────────

    /// Identity lookup of a tensor by id.
    pub fn tensor(&self, id: TensorId) -> Option<&TensorNode> {
        self.tensors.get(&id)
    }

    /// Identity lookup of an operator by id.
    pub fn operator(&self, id: OpId) -> Option<&OperatorNode> {
        self.ops.get(&id)
    }

    /// Iterates tensors in id order.
    pub fn tensors(&self) -> impl Iterator<Item = &TensorNode> {
        self.tensors.values()
    }

    /// Iterates operators in execution order.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorNode> {
        self.order.iter().map(|id| self.op_ref(*id))
    }

    /// Number of tensors owned by the graph.
    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Number of operators owned by the graph.
    pub fn num_operators(&self) -> usize {
        self.ops.len()
    }

    /// Whether the stored operator order is known to be topologically valid.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Returns the derived operator adjacency, rebuilding it if stale.
    pub fn adjacency(&self) -> &Adjacency {
        self.adjacency.get_or_init(|| Adjacency::build(self))
    }

    // ── Structural passes ──────────────────────────────────────

    /// Orders the operators topologically.
    ///
    /// Fixed-point repeated-scan variant of Kahn's algorithm: each pass
    /// places every operator whose inputs are graph inputs or outputs of
    /// already-placed operators; a pass that places nothing means a cycle.
    /// On failure the stored order is left untouched. Multiple valid
    /// orders exist; only validity is guaranteed, not a permutation.
    ///
    /// # Errors
    /// [`GraphError::Cyclic`] if not every operator can be placed.
    pub fn topo_sort(&mut self) -> Result<(), GraphError> {
        if self.sorted {
            return Ok(());
        }
        let mut placed: Vec<OpId> = Vec::with_capacity(self.order.len());
        let mut placed_set: HashSet<OpId> = HashSet::with_capacity(self.order.len());
        while placed.len() < self.order.len() {
            let mut modified = false;
            for &id in &self.order {
                if placed_set.contains(&id) {
                    continue;
                }
                let ready = self.op_ref(id).inputs().iter().all(|&input| {
                    match self.tensor_ref(input).source() {
                        None => true,
                        Some(src) => placed_set.contains(&src),
                    }
                });
                if ready {
                    placed.push(id);
                    placed_set.insert(id);
                    modified = true;
                }
            }
            if !modified {
                return Err(GraphError::Cyclic);
            }
        }
        self.order = placed;
        self.sorted = true;
        Ok(())
    }

    /// Recomputes every tensor's shape from its producing operator, in
    /// execution order.
    ///
    /// Requires a sorted graph. Each operator's rule runs on the current
    /// input shapes; when the result differs from an output tensor's
    /// stored shape, the tensor (found by identity lookup) is overwritten
    /// in place.
    ///
    /// # Errors
    /// - [`GraphError::NotSorted`] when called before a successful sort.
    /// - [`GraphError::Shape`] when a rule rejects the input shapes.
    /// - [`GraphError::OutputArity`] when a rule's output count disagrees
    ///   with the operator's declared outputs.
    pub fn shape_infer(&mut self) -> Result<(), GraphError> {
        if !self.sorted {
            return Err(GraphError::NotSorted);
        }
        for id in self.order.clone() {
            let (inferred, outputs) = {
                let op = self.op_ref(id);
                let shapes: Vec<&Shape> = op
                    .inputs()
                    .iter()
                    .map(|&t| self.tensor_ref(t).shape())
                    .collect();
                (op.kind().infer(&shapes)?, op.outputs().to_vec())
            };
            if inferred.len() != outputs.len() {
                return Err(GraphError::OutputArity {
                    kind: self.op_ref(id).kind().as_str(),
                    expected: outputs.len(),
                    actual: inferred.len(),
                });
            }
            for (out, shape) in outputs.into_iter().zip(inferred) {
                let tensor = self.tensor_node_mut(out);
                if tensor.shape() != &shape {
                    tensor.set_shape(shape);
                }
            }
        }
        Ok(())
    }

    /// Checks every structural invariant of the graph.
    ///
    /// - No isolated tensors: each has a source or at least one target.
    /// - Every source/target operator id is owned by this graph, and the
    ///   link agrees with the operator's input/output lists.
    /// - Every operator input/output tensor id is owned, and the reverse
    ///   links exist.
    /// - The execution-order list holds exactly the operator set.
    ///
    /// A violation means the graph is corrupt; structural passes must not
    /// be run on it.
    pub fn check_valid(&self) -> Result<(), GraphError> {
        for tensor in self.tensors.values() {
            let id = tensor.id();
            if tensor.source().is_none() && tensor.targets().is_empty() {
                return Err(GraphError::Corrupt(format!("tensor {id} is isolated")));
            }
            if let Some(src) = tensor.source() {
                let op = self
                    .ops
                    .get(&src)
                    .ok_or_else(|| GraphError::Corrupt(format!("tensor {id} source {src} not owned")))?;
                if !op.outputs().contains(&id) {
                    return Err(GraphError::Corrupt(format!(
                        "tensor {id} claims source {src}, which does not output it"
                    )));
                }
            }
            for &target in tensor.targets() {
                let op = self.ops.get(&target).ok_or_else(|| {
                    GraphError::Corrupt(format!("tensor {id} target {target} not owned"))
                })?;
                if !op.inputs().contains(&id) {
                    return Err(GraphError::Corrupt(format!(
                        "tensor {id} claims target {target}, which does not consume it"
                    )));
                }
            }
        }
        for op in self.ops.values() {
            let id = op.id();
            for &input in op.inputs() {
                let tensor = self.tensors.get(&input).ok_or_else(|| {
                    GraphError::Corrupt(format!("operator {id} input {input} not owned"))
                })?;
                if !tensor.targets().contains(&id) {
                    return Err(GraphError::Corrupt(format!(
                        "operator {id} consumes {input}, which does not list it as target"
                    )));
                }
            }
            for &output in op.outputs() {
                let tensor = self.tensors.get(&output).ok_or_else(|| {
                    GraphError::Corrupt(format!("operator {id} output {output} not owned"))
                })?;
                if tensor.source() != Some(id) {
                    return Err(GraphError::Corrupt(format!(
                        "operator {id} outputs {output}, whose source disagrees"
                    )));
                }
            }
        }
        if self.order.len() != self.ops.len() {
            return Err(GraphError::Corrupt(format!(
                "order lists {} operators, graph owns {}",
                self.order.len(),
                self.ops.len(),
            )));
        }
        let ordered: HashSet<OpId> = self.order.iter().copied().collect();
        if ordered.len() != self.order.len() || !self.ops.keys().all(|id| ordered.contains(id)) {
            return Err(GraphError::Corrupt(
                "order list disagrees with the operator set".into(),
            ));
        }
        Ok(())
    }

    // ── Memory planning ────────────────────────────────────────

    /// Plans and binds arena storage for every tensor.
    ///
    /// Sorts first (propagating [`GraphError::Cyclic`]), then allocates
    /// each tensor's byte size through the embedded arena in tensor-id
    /// order, records the offsets, and materializes the buffer once.
    pub fn data_malloc(&mut self) -> Result<(), GraphError> {
        self.topo_sort()?;
        let ids: Vec<TensorId> = self.tensors.keys().copied().collect();
        for id in ids {
            let bytes = self.tensor_ref(id).size_bytes();
            let offset = self.arena.alloc(bytes)?;
            self.tensor_node_mut(id).set_offset(offset);
        }
        self.arena.materialize();
        tracing::info!(
            tensors = self.tensors.len(),
            summary = %self.arena.stats().summary(),
            "memory plan complete"
        );
        Ok(())
    }

    /// Returns the bytes bound to a tensor: its arena offset combined with
    /// the materialized buffer. `None` before planning or for unknown ids.
    pub fn tensor_bytes(&self, id: TensorId) -> Option<&[u8]> {
        let tensor = self.tensor(id)?;
        let offset = tensor.offset()?;
        let buffer = self.arena.buffer()?;
        buffer.get(offset..offset + tensor.size_bytes())
    }

    /// Read access to the embedded arena (stats, peak, buffer).
    pub fn arena(&self) -> &ArenaAllocator<R> {
        &self.arena
    }

    // ── Internal helpers ───────────────────────────────────────
    //
    // Lookups of ids the graph itself recorded. A miss here is a broken
    // invariant, not a recoverable error.

    pub(crate) fn tensor_ref(&self, id: TensorId) -> &TensorNode {
        match self.tensors.get(&id) {
            Some(tensor) => tensor,
            None => panic!("corrupt graph: tensor {id} not owned"),
        }
    }

    pub(crate) fn tensor_node_mut(&mut self, id: TensorId) -> &mut TensorNode {
        match self.tensors.get_mut(&id) {
            Some(tensor) => tensor,
            None => panic!("corrupt graph: tensor {id} not owned"),
        }
    }

    pub(crate) fn op_ref(&self, id: OpId) -> &OperatorNode {
        match self.ops.get(&id) {
            Some(op) => op,
            None => panic!("corrupt graph: operator {id} not owned"),
        }
    }

    pub(crate) fn op_node_mut(&mut self, id: OpId) -> &mut OperatorNode {
        match self.ops.get_mut(&id) {
            Some(op) => op,
            None => panic!("corrupt graph: operator {id} not owned"),
        }
    }

    pub(crate) fn invalidate_adjacency(&mut self) {
        self.adjacency.take();
    }
}

impl<R: DeviceRuntime> fmt::Display for Graph<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph tensors:")?;
        for tensor in self.tensors.values() {
            writeln!(f, "  {tensor}")?;
        }
        writeln!(f, "Graph operators:")?;
        let adjacency = self.adjacency();
        for &id in &self.order {
            let op = self.op_ref(id);
            write!(f, "  {op} pred=[")?;
            for (i, p) in adjacency.predecessors(id).iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{p}")?;
            }
            write!(f, "] succ=[")?;
            for (i, s) in adjacency.successors(id).iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{s}")?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}

impl<R: DeviceRuntime> fmt::Debug for Graph<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("tensors", &self.tensors.len())
            .field("operators", &self.ops.len())
            .field("sorted", &self.sorted)
            .field("arena", &self.arena)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpKind;

    fn matmul(trans_a: bool, trans_b: bool) -> OpKind {
        OpKind::MatMul { trans_a, trans_b }
    }

    /// a[2,3] @ b[3,4] -> c[2,4]
    fn small_matmul_graph() -> (Graph, TensorId, TensorId, TensorId, OpId) {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 4), DType::F32);
        let c = g.add_tensor(Shape::matrix(2, 4), DType::F32);
        let op = g.add_operator(matmul(false, false), vec![a, b], vec![c]).unwrap();
        (g, a, b, c, op)
    }

    #[test]
    fn test_wiring() {
        let (g, a, b, c, op) = small_matmul_graph();
        assert_eq!(g.tensor(a).unwrap().targets(), &[op]);
        assert_eq!(g.tensor(b).unwrap().targets(), &[op]);
        assert_eq!(g.tensor(c).unwrap().source(), Some(op));
        assert!(g.tensor(a).unwrap().source().is_none());
        g.check_valid().unwrap();
    }

    #[test]
    fn test_add_operator_infers_output_shape() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 4), DType::F32);
        // Deliberately wrong declared shape; construction corrects it.
        let c = g.add_tensor(Shape::matrix(9, 9), DType::F32);
        g.add_operator(matmul(false, false), vec![a, b], vec![c]).unwrap();
        assert_eq!(g.tensor(c).unwrap().shape(), &Shape::matrix(2, 4));
    }

    #[test]
    fn test_add_operator_rejects_unknown_tensor() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let foreign = TensorNode::new(Shape::matrix(3, 4), DType::F32).id();
        let err = g.add_operator(matmul(false, false), vec![a, foreign], vec![a]);
        assert!(matches!(err, Err(GraphError::UnknownTensor(id)) if id == foreign));
    }

    #[test]
    fn test_add_operator_rejects_bad_arity() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let c = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let err = g.add_operator(matmul(false, false), vec![a], vec![c]);
        assert!(matches!(err, Err(GraphError::InputArity { expected: 2, actual: 1, .. })));
    }

    #[test]
    fn test_add_operator_rejects_dtype_mix() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 4), DType::F16);
        let c = g.add_tensor(Shape::matrix(2, 4), DType::F32);
        let err = g.add_operator(matmul(false, false), vec![a, b], vec![c]);
        assert!(matches!(err, Err(GraphError::DTypeMismatch { .. })));
    }

    #[test]
    fn test_add_operator_rejects_second_producer() {
        let (mut g, a, b, c, _) = small_matmul_graph();
        let err = g.add_operator(matmul(false, false), vec![a, b], vec![c]);
        assert!(matches!(err, Err(GraphError::AlreadyProduced(id)) if id == c));
    }

    #[test]
    fn test_add_operator_rejects_shape_mismatch() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(5, 4), DType::F32);
        let c = g.add_tensor(Shape::matrix(2, 4), DType::F32);
        let err = g.add_operator(matmul(false, false), vec![a, b], vec![c]);
        assert!(matches!(err, Err(GraphError::Shape(_))));
        // Failed construction leaves no traces.
        assert_eq!(g.num_operators(), 0);
        assert!(g.tensor(a).unwrap().targets().is_empty());
    }

    #[test]
    fn test_add_tensor_node_roundtrip() {
        let mut g = Graph::default();
        let node = TensorNode::new(Shape::vector(8), DType::I8);
        let id = node.id();
        assert_eq!(g.add_tensor_node(node.clone()).unwrap(), id);
        assert!(matches!(
            g.add_tensor_node(node),
            Err(GraphError::DuplicateTensor(d)) if d == id
        ));
    }

    #[test]
    fn test_topo_sort_orders_producers_first() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 3), DType::F32);
        let mid = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let out = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        // Insert the consumer first: declared order is not topological.
        let consume = g
            .add_operator(matmul(false, false), vec![mid, b], vec![out])
            .unwrap();
        let produce = g
            .add_operator(OpKind::Relu, vec![a], vec![mid])
            .unwrap();

        g.topo_sort().unwrap();
        assert!(g.is_sorted());
        let order: Vec<OpId> = g.operators().map(OperatorNode::id).collect();
        let pos = |id| order.iter().position(|&o| o == id).unwrap();
        assert!(pos(produce) < pos(consume));
        g.check_valid().unwrap();
    }

    #[test]
    fn test_topo_sort_rejects_cycle_and_keeps_order() {
        let mut g = Graph::default();
        let t1 = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        let t2 = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        let op1 = g.add_operator(OpKind::Relu, vec![t1], vec![t2]).unwrap();
        // t1 had no producer yet, so this closes a cycle: op1 -> op2 -> op1.
        let op2 = g.add_operator(OpKind::Relu, vec![t2], vec![t1]).unwrap();

        let before: Vec<OpId> = g.operators().map(OperatorNode::id).collect();
        assert!(matches!(g.topo_sort(), Err(GraphError::Cyclic)));
        assert!(!g.is_sorted());
        let after: Vec<OpId> = g.operators().map(OperatorNode::id).collect();
        assert_eq!(before, after);
        assert_eq!(after, vec![op1, op2]);
    }

    #[test]
    fn test_shape_infer_requires_sort() {
        let (mut g, ..) = small_matmul_graph();
        assert!(matches!(g.shape_infer(), Err(GraphError::NotSorted)));
        g.topo_sort().unwrap();
        g.shape_infer().unwrap();
    }

    #[test]
    fn test_shape_infer_propagates_through_chain() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
        let b = g.add_tensor(Shape::matrix(3, 5), DType::F32);
        let c = g.add_tensor(Shape::scalar(), DType::F32);
        let d = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(matmul(false, false), vec![a, b], vec![c]).unwrap();
        g.add_operator(OpKind::Relu, vec![c], vec![d]).unwrap();

        // Grow an input; propagation must rewrite both downstream shapes.
        g.tensor_node_mut(a).set_shape(Shape::matrix(7, 3));
        g.topo_sort().unwrap();
        g.shape_infer().unwrap();
        assert_eq!(g.tensor(c).unwrap().shape(), &Shape::matrix(7, 5));
        assert_eq!(g.tensor(d).unwrap().shape(), &Shape::matrix(7, 5));
    }

    #[test]
    fn test_shape_infer_surfaces_rule_failure() {
        let (mut g, a, ..) = small_matmul_graph();
        // Make the contraction impossible after construction.
        g.tensor_node_mut(a).set_shape(Shape::matrix(2, 9));
        g.topo_sort().unwrap();
        assert!(matches!(g.shape_infer(), Err(GraphError::Shape(_))));
    }

    #[test]
    fn test_check_valid_detects_isolated_tensor() {
        let mut g = Graph::default();
        g.add_tensor(Shape::vector(4), DType::F32);
        assert!(matches!(g.check_valid(), Err(GraphError::Corrupt(_))));
    }

    #[test]
    fn test_data_malloc_assigns_aligned_disjoint_offsets() {
        let (mut g, a, b, c, _) = small_matmul_graph();
        g.data_malloc().unwrap();

        let mut ranges = Vec::new();
        for id in [a, b, c] {
            let t = g.tensor(id).unwrap();
            let offset = t.offset().unwrap();
            assert_eq!(offset % memory_planner::ALIGNMENT, 0);
            ranges.push((offset, offset + t.size_bytes()));
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "tensor ranges overlap");
        }
        assert!(g.arena().is_materialized());
        assert!(g.tensor_bytes(a).unwrap().iter().all(|&x| x == 0));
        assert_eq!(g.tensor_bytes(c).unwrap().len(), 2 * 4 * 4);
    }

    #[test]
    fn test_data_malloc_rejects_cycle() {
        let mut g = Graph::default();
        let t1 = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        let t2 = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        g.add_operator(OpKind::Relu, vec![t1], vec![t2]).unwrap();
        g.add_operator(OpKind::Relu, vec![t2], vec![t1]).unwrap();
        assert!(matches!(g.data_malloc(), Err(GraphError::Cyclic)));
    }

    #[test]
    fn test_adjacency_derived_views() {
        let mut g = Graph::default();
        let a = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        let b = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        let c = g.add_tensor(Shape::matrix(2, 2), DType::F32);
        let first = g.add_operator(OpKind::Relu, vec![a], vec![b]).unwrap();
        let second = g.add_operator(OpKind::Relu, vec![b], vec![c]).unwrap();

        let adj = g.adjacency();
        assert_eq!(adj.predecessors(first), &[] as &[OpId]);
        assert_eq!(adj.successors(first), &[second]);
        assert_eq!(adj.predecessors(second), &[first]);
        assert_eq!(adj.successors(second), &[] as &[OpId]);
    }

    #[test]
    fn test_display_dump() {
        let (g, a, _, c, op) = small_matmul_graph();
        let dump = format!("{g}");
        assert!(dump.contains("Graph tensors:"));
        assert!(dump.contains("Graph operators:"));
        assert!(dump.contains(&format!("{a}")));
        assert!(dump.contains(&format!("{c}")));
        assert!(dump.contains(&format!("{op}: MatMul(A, B)")));
    }
}
