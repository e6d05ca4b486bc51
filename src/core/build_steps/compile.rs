//! Build-unit descriptors and the dependency-injection wrapper that
//! prepares each unit for the executor.
//!
//! The wrapper is where the self-referential part of bootstrapping is
//! flattened into ordinary build-graph edges: it decides, per unit, whether
//! the original bootstrap compiler or the in-progress staged compiler does
//! the compiling, which flags and environment the invocation gets, how the
//! unit prefers to be linked, and which cycle-breaking dependencies must be
//! supplied out-of-band because the low-level standard-library crates would
//! otherwise resolve their own re-exports through themselves.

use std::collections::BTreeMap;

use tracing::debug;

use crate::CompilerInstallation;
use crate::core::config::Stage;
use crate::core::executor::{ExecError, Executor, UnitId};
use crate::utils::helpers::{NamePattern, any_match};

/// Environment flag that makes a released compiler accept the unstable
/// internal flags the pipeline depends on.
const BOOTSTRAP_ENV: &str = "RUSTC_BOOTSTRAP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Lib,
    Bin,
}

/// How a unit prefers to be linked. `Unspecified` leaves the choice to the
/// executor's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    Static,
    Dynamic,
    #[default]
    Unspecified,
}

/// A dependency supplied under an explicit name, buck-style: the consuming
/// crate resolves `name`, the graph provides `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedDep {
    pub name: String,
    pub target: String,
}

impl NamedDep {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        NamedDep { name: name.into(), target: target.into() }
    }
}

/// One compilable library or binary target.
///
/// Created when a source package is registered, mutated exclusively by
/// [`UnitWrapper::wrap`], and immutable once handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub name: String,
    pub kind: UnitKind,
    deps: Vec<NamedDep>,
    pub env: BTreeMap<String, String>,
    pub linkage: Linkage,
    pub flags: Vec<String>,
    pub compiler: Option<CompilerInstallation>,
}

impl BuildUnit {
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        BuildUnit {
            name: name.into(),
            kind,
            deps: Vec::new(),
            env: BTreeMap::new(),
            linkage: Linkage::Unspecified,
            flags: Vec::new(),
            compiler: None,
        }
    }

    pub fn lib(name: impl Into<String>) -> Self {
        BuildUnit::new(name, UnitKind::Lib)
    }

    pub fn bin(name: impl Into<String>) -> Self {
        BuildUnit::new(name, UnitKind::Bin)
    }

    /// Appends a dependency, keeping the list unique by name. A dependency
    /// that is already present is left untouched, which is what makes
    /// repeated injection of the same table idempotent.
    pub fn push_dep(&mut self, dep: NamedDep) {
        if !self.deps.iter().any(|existing| existing.name == dep.name) {
            self.deps.push(dep);
        }
    }

    pub fn with_dep(mut self, dep: NamedDep) -> Self {
        self.push_dep(dep);
        self
    }

    /// Declared dependencies, in declaration order, unique by name.
    pub fn deps(&self) -> &[NamedDep] {
        &self.deps
    }
}

/// Immutable name-routing tables the wrapper is constructed with.
///
/// These are injected rather than kept as module state so concurrent
/// pipeline instances cannot interfere with each other.
#[derive(Debug, Clone)]
pub struct WrapperRules {
    /// Units that must be compiled by the original bootstrap compiler:
    /// build-time helpers that run while the standard library itself is
    /// being built and therefore cannot depend on it.
    pub force_bootstrap: Vec<NamePattern>,
    /// Units free to be linked dynamically: the standard library's
    /// top-level crate and its test harness. Everything else is pinned to
    /// static linkage.
    pub dynamic_ok: Vec<NamePattern>,
    /// Units whose dependency set must be extended with the cycle-breaking
    /// table below.
    pub needs_low_level: Vec<NamePattern>,
    /// The fixed cycle-breaking table: the workspace shim names the
    /// low-level crates import, mapped to the concrete units that provide
    /// them outside the normal resolver.
    pub injected_deps: Vec<NamedDep>,
}

impl Default for WrapperRules {
    fn default() -> Self {
        WrapperRules {
            force_bootstrap: vec![NamePattern::prefix("build-script")],
            dynamic_ok: vec![NamePattern::prefix("std"), NamePattern::prefix("test")],
            needs_low_level: vec![
                NamePattern::prefix("alloc"),
                NamePattern::prefix("compiler_builtins"),
                NamePattern::prefix("panic_abort"),
                NamePattern::prefix("panic_unwind"),
            ],
            injected_deps: vec![
                NamedDep::new("rustc-std-workspace-core", "//library/core:core"),
                NamedDep::new("rustc-std-workspace-alloc", "//library/alloc:alloc"),
                NamedDep::new("rustc-std-workspace-std", "//library/std:std"),
            ],
        }
    }
}

impl WrapperRules {
    /// Whether the named unit must be compiled by the original bootstrap
    /// compiler regardless of the active stage.
    pub fn forces_bootstrap(&self, name: &str) -> bool {
        any_match([name], &self.force_bootstrap)
    }

    pub fn dynamic_ok(&self, name: &str) -> bool {
        any_match([name], &self.dynamic_ok)
    }

    pub fn needs_low_level(&self, name: &str) -> bool {
        any_match([name], &self.needs_low_level)
    }
}

/// Intercepts build-unit registration and rewrites each descriptor for the
/// active stage before it reaches the executor.
#[derive(Debug, Clone)]
pub struct UnitWrapper {
    rules: WrapperRules,
}

impl UnitWrapper {
    pub fn new(rules: WrapperRules) -> Self {
        UnitWrapper { rules }
    }

    pub fn rules(&self) -> &WrapperRules {
        &self.rules
    }

    /// Rewrites `unit` for compilation under `stage`.
    ///
    /// The bootstrap short-circuit has highest precedence by contract, not
    /// by accident: a unit matching the force-bootstrap list gets the
    /// bootstrap compiler and nothing else (no stage flags, no environment
    /// marker, no linkage pinning, no dependency injection), even if its
    /// name also matches the low-level list.
    pub fn wrap(
        &self,
        unit: BuildUnit,
        stage: Stage,
        staged: &CompilerInstallation,
        bootstrap: &CompilerInstallation,
    ) -> BuildUnit {
        let mut unit = unit;

        if self.rules.forces_bootstrap(&unit.name) {
            debug!(unit = %unit.name, %stage, "forcing bootstrap compiler");
            unit.compiler = Some(bootstrap.clone());
            return unit;
        }

        unit.compiler = Some(staged.clone());
        unit.flags.extend(stage.rustflags());
        unit.env.insert(BOOTSTRAP_ENV.to_string(), "1".to_string());

        if !self.rules.dynamic_ok(&unit.name) {
            unit.linkage = Linkage::Static;
        }

        if self.rules.needs_low_level(&unit.name) {
            debug!(unit = %unit.name, "injecting cycle-breaking dependencies");
            for dep in &self.rules.injected_deps {
                unit.push_dep(dep.clone());
            }
        }

        unit
    }

    /// Wraps `unit` and hands the finished descriptor to the executor.
    pub fn wrap_and_register(
        &self,
        unit: BuildUnit,
        stage: Stage,
        staged: &CompilerInstallation,
        bootstrap: &CompilerInstallation,
        executor: &mut dyn Executor,
    ) -> Result<UnitId, ExecError> {
        executor.register_unit(self.wrap(unit, stage, staged, bootstrap))
    }
}
