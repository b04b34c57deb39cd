// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `graph-plan demo` command: walk the pipeline on a built-in graph.
//!
//! The example is the classic fusion showcase: a double transpose that is
//! logically the identity feeding a MatMul, plus a transposed right
//! operand the optimizer can absorb into the MatMul's `trans_b` flag.

use graph_ir::{Graph, OpKind};
use tensor_meta::{DType, Shape};

pub fn execute() -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            graph-plan · Pipeline Demo               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let mut g = Graph::default();
    let a = g.add_tensor(Shape::matrix(2, 3), DType::F32);
    let b = g.add_tensor(Shape::matrix(4, 3), DType::F32);
    let mid = g.add_tensor(Shape::scalar(), DType::F32);
    let back = g.add_tensor(Shape::scalar(), DType::F32);
    let bt = g.add_tensor(Shape::scalar(), DType::F32);
    let out = g.add_tensor(Shape::scalar(), DType::F32);

    // A -> T -> T -> (identity), B -> T, then matmul(A, B^T).
    g.add_operator(OpKind::Transpose { perm: vec![1, 0] }, vec![a], vec![mid])?;
    g.add_operator(OpKind::Transpose { perm: vec![1, 0] }, vec![mid], vec![back])?;
    g.add_operator(OpKind::Transpose { perm: vec![1, 0] }, vec![b], vec![bt])?;
    g.add_operator(
        OpKind::MatMul { trans_a: false, trans_b: false },
        vec![back, bt],
        vec![out],
    )?;
    g.check_valid()?;

    println!("  Before optimization ({} operators):", g.num_operators());
    print_indented(&g);

    g.optimize();
    g.check_valid()?;

    println!("  After optimization ({} operators):", g.num_operators());
    print_indented(&g);

    g.topo_sort()?;
    g.shape_infer()?;
    g.data_malloc()?;

    println!("  Memory plan:");
    for tensor in g.tensors() {
        if let Some(offset) = tensor.offset() {
            println!(
                "   {:<6} {:>10} B @ offset {}",
                format!("{}", tensor.id()),
                tensor.size_bytes(),
                offset,
            );
        }
    }
    println!();
    println!("  Arena: {}", g.arena().stats().summary());

    Ok(())
}

fn print_indented(g: &Graph) {
    for line in format!("{g}").lines() {
        println!("   {line}");
    }
    println!();
}
