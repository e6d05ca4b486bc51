//! Assembly of compiler installations.
//!
//! Takes the raw outputs of a stage's build actions (a compiler binary, its
//! codegen backend, library artifacts) and lays them out as a directory
//! tree matching the shape of an installed toolchain, so the next stage can
//! consume it as if it were an ordinary sysroot.
//!
//! A partially assembled toolchain is worse than none: it would silently
//! miscompile every later stage. Both variants therefore build into a
//! staging directory and only rename it into place once complete; on any
//! failure no output is visible at the destination.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::CompilerInstallation;
use crate::core::config::{Stage, TargetSelection};
use crate::core::executor::{ExecError, Executor};
use crate::utils::helpers::{copy_tree, is_dylib, set_executable};

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("declared compiler binary `{0}` is absent")]
    MissingCompiler(PathBuf),

    #[error("library artifact `{0}` is absent")]
    MissingArtifact(PathBuf),

    #[error("failed to resolve link closure of `{library}`")]
    Closure {
        library: String,
        #[source]
        source: ExecError,
    },

    #[error("failed to lay out installation at `{dest}`")]
    Layout {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lays out a compiler-only installation: `bin/rustc` plus the runtime
/// shared objects the compiler itself needs, ready to have a standard
/// library assembled around it.
///
/// Used right after a stage's compiler is built, before that stage's
/// standard library exists.
pub fn assemble_compiler(
    stage: Stage,
    rustc_binary: &Path,
    codegen_backend: Option<&Path>,
    target: &TargetSelection,
    dest: &Path,
) -> Result<CompilerInstallation, AssemblyError> {
    if !rustc_binary.is_file() {
        return Err(AssemblyError::MissingCompiler(rustc_binary.to_path_buf()));
    }
    info!(%stage, dest = %dest.display(), "assembling compiler");

    let staging = staging_dir(dest)?;
    let result = layout_compiler(&staging, rustc_binary, codegen_backend, target);
    commit(staging, dest, result)?;
    Ok(CompilerInstallation::staged(dest, stage))
}

/// Lays out a full toolchain: the compiler installation's `bin` and `lib`
/// trees plus the transitive static/dynamic closure of every given library
/// artifact under `lib/rustlib/<triple>/lib`, where the compiler's sysroot
/// convention will find them.
///
/// The closure of each library is resolved through the executor's
/// link-info provider and deduplicated by output identity, so an artifact
/// reachable through two dependency paths is copied exactly once. Any
/// closure that cannot be resolved aborts the assembly with nothing
/// written to `dest`.
pub fn assemble_toolchain(
    stage: Stage,
    compiler: &CompilerInstallation,
    libraries: &[String],
    executor: &dyn Executor,
    target: &TargetSelection,
    dest: &Path,
) -> Result<CompilerInstallation, AssemblyError> {
    let rustc = compiler.rustc();
    if !rustc.is_file() {
        return Err(AssemblyError::MissingCompiler(rustc));
    }
    info!(%stage, dest = %dest.display(), "assembling toolchain with standard library");

    let mut closure = BTreeSet::new();
    for library in libraries {
        let files = executor
            .link_closure(library)
            .map_err(|source| AssemblyError::Closure { library: library.clone(), source })?;
        closure.extend(files);
    }

    let staging = staging_dir(dest)?;
    let result = layout_toolchain(&staging, compiler, &closure, target);
    commit(staging, dest, result)?;
    Ok(CompilerInstallation::staged(dest, stage))
}

fn layout_compiler(
    staging: &Path,
    rustc_binary: &Path,
    codegen_backend: Option<&Path>,
    target: &TargetSelection,
) -> Result<(), AssemblyError> {
    let layout_err = |dest: &Path| {
        let dest = dest.to_path_buf();
        move |source| AssemblyError::Layout { dest, source }
    };

    let bin_dir = staging.join("bin");
    let lib_dir = staging.join("lib");
    let rustlib_dir = lib_dir.join("rustlib").join(&target.triple);
    for dir in [&bin_dir, &lib_dir, &rustlib_dir.join("bin"), &rustlib_dir.join("codegen-backends")]
    {
        fs::create_dir_all(dir).map_err(layout_err(dir))?;
    }

    if let Some(backend) = codegen_backend {
        if !backend.is_file() {
            return Err(AssemblyError::MissingArtifact(backend.to_path_buf()));
        }
        let name = backend.file_name().unwrap_or_default();
        fs::copy(backend, lib_dir.join(name)).map_err(layout_err(&lib_dir.join(name)))?;
    }

    let rustc = bin_dir.join("rustc");
    fs::copy(rustc_binary, &rustc).map_err(layout_err(&rustc))?;
    set_executable(&rustc).map_err(layout_err(&rustc))?;
    Ok(())
}

fn layout_toolchain(
    staging: &Path,
    compiler: &CompilerInstallation,
    closure: &BTreeSet<PathBuf>,
    target: &TargetSelection,
) -> Result<(), AssemblyError> {
    let copy_err = |dest: &Path| {
        let dest = dest.to_path_buf();
        move |source| AssemblyError::Layout { dest, source }
    };

    let lib_dir = staging.join("lib");
    let bin_dir = staging.join("bin");
    copy_tree(&compiler.libdir(), &lib_dir).map_err(copy_err(&lib_dir))?;
    copy_tree(&compiler.root().join("bin"), &bin_dir).map_err(copy_err(&bin_dir))?;

    let rustlib_lib = lib_dir.join("rustlib").join(&target.triple).join("lib");
    fs::create_dir_all(&rustlib_lib).map_err(copy_err(&rustlib_lib))?;

    let mut dylibs = 0usize;
    for file in closure {
        if !file.is_file() {
            return Err(AssemblyError::MissingArtifact(file.clone()));
        }
        if is_dylib(file) {
            dylibs += 1;
        }
        let name = file.file_name().unwrap_or_default();
        fs::copy(file, rustlib_lib.join(name)).map_err(copy_err(&rustlib_lib.join(name)))?;
    }
    debug!(artifacts = closure.len(), dylibs, "standard library closure installed");
    Ok(())
}

/// A scratch directory next to `dest`, freshly created. Building here and
/// renaming at the end is what keeps failed assemblies invisible.
fn staging_dir(dest: &Path) -> Result<PathBuf, AssemblyError> {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    let staging = dest.with_file_name(name);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .map_err(|source| AssemblyError::Layout { dest: staging.clone(), source })?;
    }
    fs::create_dir_all(&staging)
        .map_err(|source| AssemblyError::Layout { dest: staging.clone(), source })?;
    Ok(staging)
}

fn commit(
    staging: PathBuf,
    dest: &Path,
    result: Result<(), AssemblyError>,
) -> Result<(), AssemblyError> {
    match result {
        Ok(()) => fs::rename(&staging, dest).map_err(|source| {
            let _ = fs::remove_dir_all(&staging);
            AssemblyError::Layout { dest: dest.to_path_buf(), source }
        }),
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::GraphExecutor;

    const TEST_TRIPLE: &str = "i686-unknown-haiku";

    fn target() -> TargetSelection {
        TargetSelection::from_user(TEST_TRIPLE)
    }

    fn touch(path: &Path, contents: &[u8]) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn compiler_only_layout() {
        let dir = tempfile::tempdir().unwrap();
        let rustc = touch(&dir.path().join("outputs/rustc"), b"elf");
        let backend = touch(&dir.path().join("outputs/libLLVM.so"), b"llvm");
        let dest = dir.path().join("stage0-rustc");

        let installation =
            assemble_compiler(Stage::Stage0, &rustc, Some(backend.as_path()), &target(), &dest)
                .unwrap();

        assert_eq!(installation.produced_by(), Some(Stage::Stage0));
        assert!(dest.join("bin/rustc").is_file());
        assert!(dest.join("lib/libLLVM.so").is_file());
        let rustlib = dest.join("lib/rustlib").join(TEST_TRIPLE);
        assert!(rustlib.join("bin").is_dir());
        assert!(rustlib.join("codegen-backends").is_dir());
        assert!(!staging_path_exists(&dest));
    }

    #[test]
    fn missing_compiler_binary_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stage0-rustc");
        let err = assemble_compiler(
            Stage::Stage0,
            &dir.path().join("outputs/rustc"),
            None,
            &target(),
            &dest,
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::MissingCompiler(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn missing_backend_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let rustc = touch(&dir.path().join("outputs/rustc"), b"elf");
        let dest = dir.path().join("stage0-rustc");
        let absent_backend = dir.path().join("outputs/libLLVM.so");
        let err = assemble_compiler(
            Stage::Stage0,
            &rustc,
            Some(absent_backend.as_path()),
            &target(),
            &dest,
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::MissingArtifact(_)));
        assert!(!dest.exists());
        assert!(!staging_path_exists(&dest));
    }

    #[test]
    fn shared_closure_entries_are_copied_once() {
        let dir = tempfile::tempdir().unwrap();
        let rustc = touch(&dir.path().join("outputs/rustc"), b"elf");
        let compiler =
            assemble_compiler(Stage::Stage1, &rustc, None, &target(), &dir.path().join("rustc-dir"))
                .unwrap();

        let libstd = touch(&dir.path().join("outputs/libstd.so"), b"std");
        let libtest = touch(&dir.path().join("outputs/libtest.rlib"), b"test");
        let shared = touch(&dir.path().join("outputs/libshared.rlib"), b"shared");

        let mut executor = GraphExecutor::new();
        executor.provide_closure("std", vec![libstd.clone(), shared.clone()]);
        executor.provide_closure("test", vec![libtest.clone(), shared.clone()]);

        let dest = dir.path().join("stage1-sysroot");
        assemble_toolchain(
            Stage::Stage1,
            &compiler,
            &["std".to_string(), "test".to_string()],
            &executor,
            &target(),
            &dest,
        )
        .unwrap();

        let rustlib_lib = dest.join("lib/rustlib").join(TEST_TRIPLE).join("lib");
        let mut entries: Vec<String> = fs::read_dir(&rustlib_lib)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, ["libshared.rlib", "libstd.so", "libtest.rlib"]);
        assert!(dest.join("bin/rustc").is_file());
    }

    #[test]
    fn unresolved_closure_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let rustc = touch(&dir.path().join("outputs/rustc"), b"elf");
        let compiler =
            assemble_compiler(Stage::Stage1, &rustc, None, &target(), &dir.path().join("rustc-dir"))
                .unwrap();

        let executor = GraphExecutor::new();
        let dest = dir.path().join("stage1-sysroot");
        let err = assemble_toolchain(
            Stage::Stage1,
            &compiler,
            &["std".to_string()],
            &executor,
            &target(),
            &dest,
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::Closure { .. }));
        assert!(!dest.exists());
    }

    fn staging_path_exists(dest: &Path) -> bool {
        let mut name = dest.file_name().unwrap().to_os_string();
        name.push(".partial");
        dest.with_file_name(name).exists()
    }
}
