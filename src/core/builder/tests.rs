use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::*;
use crate::core::build_steps::compile::WrapperRules;
use crate::core::config::{StageOutputs, TargetSelection};
use crate::core::executor::GraphExecutor;

const TEST_TRIPLE: &str = "i686-unknown-haiku";

fn configure(stage: Stage, out: &Path) -> Config {
    Config {
        stage,
        target: TargetSelection::from_user(TEST_TRIPLE),
        out: out.to_path_buf(),
        rustc_archive: None,
        stdlib_archive: None,
        rules: WrapperRules::default(),
        units: Vec::new(),
        outputs: None,
        closures: BTreeMap::new(),
    }
}

fn touch(path: &Path, contents: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

/// Fabricates an already-acquired bootstrap toolchain under `out`.
fn plant_bootstrap(out: &Path) {
    touch(&out.join("bootstrap/bin/rustc"), b"bootstrap rustc");
}

#[test]
fn missing_bootstrap_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = configure(Stage::Stage0, dir.path());
    let mut executor = GraphExecutor::new();
    let err = Builder::new(&config, &mut executor).unwrap_err();
    assert!(matches!(err, Error::Configuration(ConfigurationError::MissingBootstrap { .. })));
}

#[test]
fn stage0_units_are_compiled_by_the_bootstrap_toolchain() {
    let dir = tempfile::tempdir().unwrap();
    plant_bootstrap(dir.path());
    let config = configure(Stage::Stage0, dir.path());
    let mut executor = GraphExecutor::new();

    let mut builder = Builder::new(&config, &mut executor).unwrap();
    builder.run_stage(vec![BuildUnit::lib("core")]).unwrap();
    drop(builder);

    let unit = &executor.units()[0];
    let compiler = unit.compiler.as_ref().unwrap();
    assert_eq!(compiler.produced_by(), None);
    assert_eq!(compiler.root(), dir.path().join("bootstrap"));
}

#[test]
fn stage1_fails_fast_without_stage0s_installation() {
    let dir = tempfile::tempdir().unwrap();
    plant_bootstrap(dir.path());
    let config = configure(Stage::Stage1, dir.path());
    let mut executor = GraphExecutor::new();

    let mut builder = Builder::new(&config, &mut executor).unwrap();
    let err = builder.run_stage(vec![BuildUnit::lib("core")]).unwrap_err();
    match err {
        Error::Configuration(ConfigurationError::MissingInstallation { stage, missing }) => {
            assert_eq!(stage, Stage::Stage1);
            assert_eq!(missing, Stage::Stage0);
        }
        other => panic!("expected MissingInstallation, got {other:?}"),
    }
    drop(builder);
    // Nothing may have reached the executor.
    assert!(executor.units().is_empty());
}

#[test]
fn finishing_a_stage_feeds_the_next_one() {
    let dir = tempfile::tempdir().unwrap();
    plant_bootstrap(dir.path());

    let rustc = touch(&dir.path().join("outputs/rustc"), b"stage0 rustc");
    let libstd = touch(&dir.path().join("outputs/libstd.so"), b"std");
    let outputs = StageOutputs {
        rustc_binary: rustc,
        codegen_backend: None,
        libraries: vec!["std".to_string()],
    };

    // Stage0 invocation: register units, assemble the installation.
    {
        let config = configure(Stage::Stage0, dir.path());
        let mut executor = GraphExecutor::new();
        executor.provide_closure("std", vec![libstd.clone()]);
        let mut builder = Builder::new(&config, &mut executor).unwrap();
        builder.run_stage(vec![BuildUnit::lib("core"), BuildUnit::lib("std")]).unwrap();
        let installation = builder.finish_stage(&outputs).unwrap();
        assert_eq!(installation.produced_by(), Some(Stage::Stage0));
        assert_eq!(installation.root(), dir.path().join("stage0-sysroot"));
    }

    // Stage1 invocation in a fresh builder: the compiler must resolve to
    // the installation stage0 just assembled, never to stage1's own
    // (still unbuilt) output.
    {
        let config = configure(Stage::Stage1, dir.path());
        let mut executor = GraphExecutor::new();
        let mut builder = Builder::new(&config, &mut executor).unwrap();

        let expected = CompilerInstallation::staged(
            &dir.path().join("stage0-sysroot"),
            Stage::Stage0,
        );
        assert_eq!(builder.registry().compiler_for(Stage::Stage1).unwrap(), &expected);

        builder.run_stage(vec![BuildUnit::lib("core")]).unwrap();
        drop(builder);
        let unit = &executor.units()[0];
        assert_eq!(unit.compiler.as_ref().unwrap(), &expected);
    }
}

#[test]
fn failed_assembly_leaves_no_installation_for_the_next_stage() {
    let dir = tempfile::tempdir().unwrap();
    plant_bootstrap(dir.path());

    // The declared compiler binary does not exist, so stage0's assembly
    // fails closed.
    {
        let config = configure(Stage::Stage0, dir.path());
        let mut executor = GraphExecutor::new();
        let mut builder = Builder::new(&config, &mut executor).unwrap();
        let outputs = StageOutputs {
            rustc_binary: dir.path().join("outputs/rustc"),
            codegen_backend: None,
            libraries: Vec::new(),
        };
        let err = builder.finish_stage(&outputs).unwrap_err();
        assert!(matches!(err, Error::Assembly(_)));
    }
    assert!(!dir.path().join("stage0-sysroot").exists());

    // Consequently stage1 must refuse to start.
    {
        let config = configure(Stage::Stage1, dir.path());
        let mut executor = GraphExecutor::new();
        let mut builder = Builder::new(&config, &mut executor).unwrap();
        let err = builder.run_stage(vec![BuildUnit::lib("core")]).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingInstallation { .. })
        ));
    }
}

#[test]
fn force_bootstrap_units_skip_the_staged_compiler_in_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    plant_bootstrap(dir.path());
    // Fabricate stage0's sysroot so stage1 can run.
    touch(&dir.path().join("stage0-sysroot/bin/rustc"), b"stage0 rustc");

    let config = configure(Stage::Stage1, dir.path());
    let mut executor = GraphExecutor::new();
    let mut builder = Builder::new(&config, &mut executor).unwrap();
    builder
        .run_stage(vec![BuildUnit::bin("build-script-main"), BuildUnit::lib("core")])
        .unwrap();
    drop(builder);

    let helper = &executor.units()[0];
    assert_eq!(helper.compiler.as_ref().unwrap().produced_by(), None);
    assert!(helper.flags.is_empty());

    let core = &executor.units()[1];
    assert_eq!(core.compiler.as_ref().unwrap().produced_by(), Some(Stage::Stage0));
    assert_eq!(core.flags, Stage::Stage1.rustflags());
}
