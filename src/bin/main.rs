//! stagebuild, the staged toolchain assembly pipeline.
//!
//! This is the entry point for one pipeline invocation: it reads the
//! configuration, makes sure the bootstrap toolchain is in place, routes
//! the configured build units through the dependency-injection wrapper for
//! the selected stage, and assembles the stage's installation when the
//! stage's raw outputs are declared.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stagebuild::core::executor::GraphExecutor;
use stagebuild::{Builder, Config, Flags};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let flags = Flags::parse();
    let config = Config::parse(flags)?;

    let mut executor = GraphExecutor::new();
    for (library, files) in &config.closures {
        executor.provide_closure(library.clone(), files.clone());
    }

    let mut builder = Builder::new(&config, &mut executor)?;
    builder.run_stage(config.units.clone())?;

    if let Some(outputs) = &config.outputs {
        let installation = builder.finish_stage(outputs)?;
        println!("{}", installation.root().display());
    }
    Ok(())
}
