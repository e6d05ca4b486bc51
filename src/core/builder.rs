//! Orchestration of a pipeline invocation.
//!
//! The builder wires the stage registry, the dependency-injection wrapper
//! and the executor together for the one stage the invocation selected.
//! Stage ordering is a data dependency, not a lock: a stage's compiler is
//! the installation the previous stage assembled, so a stage whose
//! predecessor never completed fails fast before a single unit is
//! registered, and a later stage can never run ahead of an earlier one.

use tracing::{debug, info, info_span};

use crate::core::build_steps::assemble;
use crate::core::build_steps::compile::{BuildUnit, UnitWrapper};
use crate::core::config::{Config, ConfigurationError, Stage, StageOutputs, StageRegistry};
use crate::core::download;
use crate::core::executor::{Executor, UnitId};
use crate::{CompilerInstallation, Error};

pub struct Builder<'a> {
    config: &'a Config,
    wrapper: UnitWrapper,
    registry: StageRegistry,
    executor: &'a mut dyn Executor,
}

impl<'a> std::fmt::Debug for Builder<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").finish_non_exhaustive()
    }
}

impl<'a> Builder<'a> {
    /// Prepares an invocation: makes sure the bootstrap toolchain exists
    /// (acquiring it from the configured archives if needed) and loads the
    /// installations earlier invocations assembled under the output
    /// directory.
    pub fn new(config: &'a Config, executor: &'a mut dyn Executor) -> Result<Builder<'a>, Error> {
        let bootstrap = ensure_bootstrap(config)?;
        let mut registry = StageRegistry::new(bootstrap);
        for stage in Stage::ALL {
            let sysroot = config.stage_sysroot_out(stage);
            if sysroot.join("bin").join("rustc").is_file() {
                registry.record(stage, CompilerInstallation::staged(&sysroot, stage))?;
            }
        }
        Ok(Builder {
            config,
            wrapper: UnitWrapper::new(config.rules.clone()),
            registry,
            executor,
        })
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Wraps every unit for the active stage and registers it with the
    /// executor. Fails fast, before any unit is registered, if the
    /// previous stage has not produced the compiler this stage needs.
    pub fn run_stage(&mut self, units: Vec<BuildUnit>) -> Result<Vec<UnitId>, Error> {
        let stage = self.config.stage;
        let span = info_span!("stage", %stage);
        let _guard = span.enter();

        let staged = self.registry.compiler_for(stage)?.clone();
        let bootstrap = self.registry.bootstrap().clone();

        let mut ids = Vec::with_capacity(units.len());
        for unit in units {
            debug!(unit = %unit.name, "registering build unit");
            let id =
                self.wrapper.wrap_and_register(unit, stage, &staged, &bootstrap, self.executor)?;
            ids.push(id);
        }
        info!(units = ids.len(), "build units registered");
        Ok(ids)
    }

    /// Assembles the active stage's outputs into the installation the next
    /// stage will consume, and records it with the registry.
    pub fn finish_stage(&mut self, outputs: &StageOutputs) -> Result<CompilerInstallation, Error> {
        let stage = self.config.stage;
        let compiler = assemble::assemble_compiler(
            stage,
            &outputs.rustc_binary,
            outputs.codegen_backend.as_deref(),
            &self.config.target,
            &self.config.stage_rustc_out(stage),
        )?;
        let sysroot = assemble::assemble_toolchain(
            stage,
            &compiler,
            &outputs.libraries,
            &*self.executor,
            &self.config.target,
            &self.config.stage_sysroot_out(stage),
        )?;
        self.registry.record(stage, sysroot.clone())?;
        info!(%stage, sysroot = %sysroot.root().display(), "stage installation assembled");
        Ok(sysroot)
    }
}

fn ensure_bootstrap(config: &Config) -> Result<CompilerInstallation, Error> {
    let out = config.bootstrap_out();
    if out.join("bin").join("rustc").is_file() {
        debug!(out = %out.display(), "reusing existing bootstrap toolchain");
        return Ok(CompilerInstallation::bootstrap(&out));
    }
    match (&config.rustc_archive, &config.stdlib_archive) {
        (Some(rustc), Some(stdlib)) => {
            Ok(download::acquire(rustc, stdlib, &config.target, &out)?)
        }
        _ => Err(ConfigurationError::MissingBootstrap { out }.into()),
    }
}

#[cfg(test)]
mod tests;
