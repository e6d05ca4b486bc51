//! stagebuild, a staged toolchain assembly pipeline.
//!
//! A self-hosting compiler is built in generations: stage0 is compiled by a
//! downloaded bootstrap toolchain, stage1 by the compiler stage0 produced,
//! stage2 by stage1's. This crate encodes that self-reference as ordinary
//! build-graph structure on top of an external dependency-graph executor:
//!
//! * [`crate::core::config`] enumerates the stages and resolves, per
//!   stage, the compiler and flag set its build units get;
//! * [`crate::core::download`] turns the two bootstrap distribution
//!   archives into an on-disk toolchain installation;
//! * [`crate::core::build_steps::compile`] rewrites each build unit before
//!   it reaches the executor, breaking the standard library's dependency
//!   cycles and routing build-time helpers to the bootstrap compiler;
//! * [`crate::core::build_steps::assemble`] lays the produced binaries and
//!   library closures out as the sysroot the next stage consumes;
//! * [`crate::core::builder`] drives one stage per invocation, in order.
//!
//! The executor itself (scheduling, caching, retries) is out of scope; the
//! pipeline only declares work through [`crate::core::executor::Executor`].

pub mod core;
pub mod utils;

use std::path::{Path, PathBuf};

pub use crate::core::builder::Builder;
pub use crate::core::config::{Config, Flags, Stage, TargetSelection};

/// A directory-shaped artifact containing a compiler executable at
/// `bin/rustc` and its runtime libraries under `lib/`.
///
/// Produced exactly once, by acquisition for the bootstrap toolchain and by
/// assembly for every staged one, and then only read. The producing stage
/// is recorded so the registry can verify that a stage's compiler really
/// came from the previous stage and the chain stays acyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerInstallation {
    root: PathBuf,
    produced_by: Option<Stage>,
}

impl CompilerInstallation {
    /// The downloaded bootstrap toolchain, produced by no stage.
    pub fn bootstrap(root: &Path) -> Self {
        CompilerInstallation { root: root.to_path_buf(), produced_by: None }
    }

    /// An installation assembled at the end of `stage`.
    pub fn staged(root: &Path, stage: Stage) -> Self {
        CompilerInstallation { root: root.to_path_buf(), produced_by: Some(stage) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The compiler executable inside this installation.
    pub fn rustc(&self) -> PathBuf {
        self.root.join("bin").join("rustc")
    }

    /// The runtime library directory inside this installation.
    pub fn libdir(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// Which stage assembled this installation; `None` for the downloaded
    /// bootstrap toolchain.
    pub fn produced_by(&self) -> Option<Stage> {
        self.produced_by
    }
}

/// Any fatal pipeline error. Every variant aborts the invocation; retry
/// policy, if any, belongs to the external executor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] crate::core::config::ConfigurationError),

    #[error(transparent)]
    Extraction(#[from] crate::core::download::ExtractionError),

    #[error(transparent)]
    Assembly(#[from] crate::core::build_steps::assemble::AssemblyError),

    #[error(transparent)]
    Exec(#[from] crate::core::executor::ExecError),
}
