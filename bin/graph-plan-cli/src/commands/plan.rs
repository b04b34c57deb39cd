// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `graph-plan plan` command: plan memory for a synthetic chain.
//!
//! Builds `x @ W0 -> relu -> @ W1 -> relu -> …`, runs the full pipeline,
//! and reports every tensor's arena placement. With `--json` the report is
//! emitted as a machine-readable document.

use graph_ir::{Graph, OpKind};
use memory_planner::ArenaStats;
use tensor_meta::{DType, Shape};

/// One tensor's placement in the arena.
#[derive(Debug, serde::Serialize)]
struct TensorPlacement {
    id: u64,
    shape: Shape,
    dtype: &'static str,
    size_bytes: usize,
    offset: usize,
}

/// The complete plan report.
#[derive(Debug, serde::Serialize)]
struct PlanReport {
    layers: usize,
    hidden: usize,
    batch: usize,
    operators: usize,
    tensors: Vec<TensorPlacement>,
    arena: ArenaStats,
}

pub fn execute(layers: usize, hidden: usize, batch: usize, json: bool) -> anyhow::Result<()> {
    anyhow::ensure!(layers > 0, "--layers must be at least 1");
    anyhow::ensure!(hidden > 0, "--hidden must be at least 1");
    anyhow::ensure!(batch > 0, "--batch must be at least 1");

    let mut g = Graph::default();

    // x @ W -> relu, repeated. Shapes stay [batch, hidden] throughout.
    let mut activation = g.add_tensor(Shape::matrix(batch, hidden), DType::F32);
    for _ in 0..layers {
        let weight = g.add_tensor(Shape::matrix(hidden, hidden), DType::F32);
        let product = g.add_tensor(Shape::scalar(), DType::F32);
        let activated = g.add_tensor(Shape::scalar(), DType::F32);
        g.add_operator(
            OpKind::MatMul { trans_a: false, trans_b: false },
            vec![activation, weight],
            vec![product],
        )?;
        g.add_operator(OpKind::Relu, vec![product], vec![activated])?;
        activation = activated;
    }

    g.check_valid()?;
    g.optimize();
    g.topo_sort()?;
    g.shape_infer()?;
    g.data_malloc()?;

    let report = PlanReport {
        layers,
        hidden,
        batch,
        operators: g.num_operators(),
        tensors: g
            .tensors()
            .map(|t| TensorPlacement {
                id: t.id().raw(),
                shape: t.shape().clone(),
                dtype: t.dtype().as_str(),
                size_bytes: t.size_bytes(),
                offset: t.offset().unwrap_or(0),
            })
            .collect(),
        arena: g.arena().stats(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            graph-plan · Memory Planner              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!(
        "  Chain: {} layers, hidden {}, batch {} — {} operators, {} tensors",
        report.layers,
        report.hidden,
        report.batch,
        report.operators,
        report.tensors.len(),
    );
    println!();
    println!("  {:<8} {:<16} {:>12} {:>12}", "Tensor", "Shape", "Bytes", "Offset");
    println!("  {}", "-".repeat(52));
    for t in &report.tensors {
        println!(
            "  t{:<7} {:<16} {:>12} {:>12}",
            t.id,
            format!("{}", t.shape),
            t.size_bytes,
            t.offset,
        );
    }
    println!();
    println!("  Arena: {}", report.arena.summary());

    Ok(())
}
