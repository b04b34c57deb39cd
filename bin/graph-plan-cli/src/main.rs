// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-plan
//!
//! Command-line interface for the tensor-graph planning layer.
//!
//! ## Usage
//! ```bash
//! # Show the optimizer at work on a built-in example graph
//! graph-plan demo
//!
//! # Plan memory for a synthetic matmul/relu chain
//! graph-plan plan --layers 8 --hidden 256
//!
//! # Machine-readable plan report
//! graph-plan plan --layers 4 --hidden 64 --json
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "graph-plan",
    about = "Planning layer for tensor computation graphs: rewrite, order, and pack into one arena",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging (repeat for more: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a small example graph and show each pipeline stage.
    Demo,

    /// Build a synthetic matmul/relu chain and plan its memory.
    Plan {
        /// Number of matmul+relu layers in the chain.
        #[arg(short, long, default_value_t = 4)]
        layers: usize,

        /// Hidden dimension of every layer.
        #[arg(long, default_value_t = 128)]
        hidden: usize,

        /// Batch rows of the chain input.
        #[arg(short, long, default_value_t = 1)]
        batch: usize,

        /// Emit the plan as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Demo => commands::demo::execute(),
        Commands::Plan {
            layers,
            hidden,
            batch,
            json,
        } => commands::plan::execute(layers, hidden, batch, json),
    }
}
