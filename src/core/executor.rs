//! The narrow contract this pipeline has with the dependency-graph
//! executor that actually schedules and runs build actions.
//!
//! The pipeline only ever declares work through these primitives and never
//! mutates the filesystem behind the executor's back outside a declared
//! output. Scheduling, caching and retry policy all belong to the executor;
//! an action failure is propagated unchanged because the pipeline does not
//! interpret compiler diagnostics.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::build_steps::compile::BuildUnit;

/// Identity of a build unit registered with the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The underlying command of a declared action failed. Surfaced as-is;
    /// no component of the pipeline retries it.
    #[error("build action failed: {0}")]
    ActionFailed(String),

    /// The executor has no link information for the named library, so its
    /// transitive closure cannot be resolved.
    #[error("no link closure recorded for artifact `{0}`")]
    UnknownArtifact(String),
}

pub trait Executor {
    /// Hands a fully wrapped build-unit descriptor to the executor. The
    /// descriptor is immutable from this point on.
    fn register_unit(&mut self, unit: BuildUnit) -> Result<UnitId, ExecError>;

    /// Resolves the deduplicated set of static and dynamic output files
    /// reachable from the named library's transitive dependencies.
    fn link_closure(&self, library: &str) -> Result<Vec<PathBuf>, ExecError>;
}

/// A recording executor backed by an in-memory table.
///
/// It registers units verbatim and serves link-closure queries from
/// closures declared up front. It performs no scheduling of its own; it
/// exists to drive the pipeline in dry runs and tests while a real
/// dependency-graph executor owns execution in production.
#[derive(Debug, Default)]
pub struct GraphExecutor {
    units: Vec<BuildUnit>,
    closures: BTreeMap<String, Vec<PathBuf>>,
}

impl GraphExecutor {
    pub fn new() -> Self {
        GraphExecutor::default()
    }

    /// Declares the link closure the executor will report for `library`.
    pub fn provide_closure(&mut self, library: impl Into<String>, files: Vec<PathBuf>) {
        self.closures.insert(library.into(), files);
    }

    /// Every unit registered so far, in registration order.
    pub fn units(&self) -> &[BuildUnit] {
        &self.units
    }
}

impl Executor for GraphExecutor {
    fn register_unit(&mut self, unit: BuildUnit) -> Result<UnitId, ExecError> {
        self.units.push(unit);
        Ok(UnitId(self.units.len() - 1))
    }

    fn link_closure(&self, library: &str) -> Result<Vec<PathBuf>, ExecError> {
        self.closures
            .get(library)
            .cloned()
            .ok_or_else(|| ExecError::UnknownArtifact(library.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::build_steps::compile::UnitKind;

    #[test]
    fn registration_order_is_preserved() {
        let mut executor = GraphExecutor::new();
        let first = executor.register_unit(BuildUnit::new("core", UnitKind::Lib)).unwrap();
        let second = executor.register_unit(BuildUnit::new("alloc", UnitKind::Lib)).unwrap();
        assert_eq!(first, UnitId(0));
        assert_eq!(second, UnitId(1));
        assert_eq!(executor.units()[1].name, "alloc");
    }

    #[test]
    fn unknown_closure_is_an_error() {
        let executor = GraphExecutor::new();
        match executor.link_closure("std") {
            Err(ExecError::UnknownArtifact(name)) => assert_eq!(name, "std"),
            other => panic!("expected UnknownArtifact, got {other:?}"),
        }
    }
}
