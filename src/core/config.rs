//! Configuration of a pipeline invocation.
//!
//! This module implements the stage registry (which compiler and which flag
//! set every build unit of a stage gets) and parsing of the pipeline's
//! `stagebuild.toml` configuration file, which command-line flags override.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::Deserialize;

use crate::CompilerInstallation;
use crate::core::build_steps::compile::{BuildUnit, NamedDep, UnitKind, WrapperRules};

/// One generation of the bootstrap sequence. Each stage is built by the
/// previous one; stage0 is built by the downloaded bootstrap compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Stage0,
    Stage1,
    Stage2,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Stage0, Stage::Stage1, Stage::Stage2];

    /// The stage whose output compiles this one, or `None` for stage0,
    /// which is compiled by the downloaded bootstrap toolchain.
    pub fn predecessor(self) -> Option<Stage> {
        match self {
            Stage::Stage0 => None,
            Stage::Stage1 => Some(Stage::Stage0),
            Stage::Stage2 => Some(Stage::Stage1),
        }
    }

    /// The ordered compiler flags appended to every build unit compiled
    /// under this stage.
    ///
    /// All stages share a baseline that pins the optimization level, turns
    /// off embedded bitcode, keeps unwind tables, and makes the produced
    /// binaries find their shared libraries relative to their own location.
    /// Stage0 additionally marks everything unstable-if-unmarked so the
    /// standard library's internal features stay gated once the new
    /// compiler is in charge.
    pub fn rustflags(self) -> Vec<String> {
        let mut flags: Vec<String> = [
            "-Copt-level=2",
            "-Cembed-bitcode=no",
            "-Cforce-unwind-tables=yes",
            "-Clink-args=-Wl,-rpath,$ORIGIN/../lib",
        ]
        .iter()
        .map(|flag| flag.to_string())
        .collect();
        if self == Stage::Stage0 {
            flags.push("-Zforce-unstable-if-unmarked".to_string());
        }
        flags
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Stage0 => "stage0",
            Stage::Stage1 => "stage1",
            Stage::Stage2 => "stage2",
        };
        f.write_str(name)
    }
}

impl FromStr for Stage {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage0" => Ok(Stage::Stage0),
            "stage1" => Ok(Stage::Stage1),
            "stage2" => Ok(Stage::Stage2),
            other => Err(ConfigurationError::UnknownStage(other.to_string())),
        }
    }
}

/// The host platform a pipeline invocation builds for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetSelection {
    pub triple: String,
}

impl TargetSelection {
    pub fn from_user(triple: &str) -> Self {
        TargetSelection { triple: triple.to_string() }
    }
}

impl fmt::Display for TargetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

/// Fatal configuration errors. None of these are retried: a broken stage
/// selection would otherwise propagate a corrupted toolchain forward.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown stage `{0}`, expected one of stage0, stage1, stage2")]
    UnknownStage(String),

    #[error("unit `{unit}` has unknown kind `{kind}`, expected `lib` or `bin`")]
    UnknownUnitKind { unit: String, kind: String },

    #[error("missing required configuration value `{0}`")]
    MissingValue(&'static str),

    #[error("cannot build {stage}: no compiler installation was produced by {missing}")]
    MissingInstallation { stage: Stage, missing: Stage },

    #[error(
        "installation registered for {stage} was produced by {produced_by:?}; \
         a stage may only register the installation it produced itself"
    )]
    ForeignInstallation { stage: Stage, produced_by: Option<Stage> },

    #[error(
        "no bootstrap compiler at `{out}` and no compiler/stdlib archives configured to acquire one"
    )]
    MissingBootstrap { out: PathBuf },

    #[error("failed to read config file `{path}`")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file `{path}`")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolves, per stage, the compiler installation its build units are
/// compiled with, and records the installation each stage produces.
///
/// A stage's compiler is always the installation produced by the previous
/// stage (the downloaded bootstrap toolchain for stage0). Registering an
/// installation a stage did not produce itself is rejected so the chain
/// can never become self-referential.
#[derive(Debug)]
pub struct StageRegistry {
    bootstrap: CompilerInstallation,
    staged: BTreeMap<Stage, CompilerInstallation>,
}

impl StageRegistry {
    pub fn new(bootstrap: CompilerInstallation) -> Self {
        StageRegistry { bootstrap, staged: BTreeMap::new() }
    }

    /// The downloaded bootstrap toolchain, used for stage0 and for build
    /// units that must be compiled before any staged compiler exists.
    pub fn bootstrap(&self) -> &CompilerInstallation {
        &self.bootstrap
    }

    /// The compiler every regular unit of `stage` is compiled with.
    pub fn compiler_for(&self, stage: Stage) -> Result<&CompilerInstallation, ConfigurationError> {
        match stage.predecessor() {
            None => Ok(&self.bootstrap),
            Some(previous) => {
                let installation = self
                    .staged
                    .get(&previous)
                    .ok_or(ConfigurationError::MissingInstallation { stage, missing: previous })?;
                debug_assert_eq!(installation.produced_by(), Some(previous));
                Ok(installation)
            }
        }
    }

    /// Records the installation assembled at the end of `stage`, making it
    /// available as the next stage's compiler.
    pub fn record(
        &mut self,
        stage: Stage,
        installation: CompilerInstallation,
    ) -> Result<(), ConfigurationError> {
        match installation.produced_by() {
            Some(producer) if producer == stage => {
                self.staged.insert(stage, installation);
                Ok(())
            }
            produced_by => Err(ConfigurationError::ForeignInstallation { stage, produced_by }),
        }
    }
}

/// Command-line flags for a pipeline invocation. Anything set here
/// overrides the corresponding value from the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "stagebuild", about = "Staged toolchain assembly pipeline", version)]
pub struct Flags {
    /// Active build stage for this invocation (stage0, stage1, stage2).
    #[arg(long)]
    pub stage: Option<String>,

    /// Path to the pipeline config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host target triple.
    #[arg(long)]
    pub target: Option<String>,

    /// Directory where installations are assembled.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Bootstrap compiler distribution archive.
    #[arg(long, value_name = "ARCHIVE")]
    pub rustc_archive: Option<PathBuf>,

    /// Bootstrap standard library distribution archive.
    #[arg(long, value_name = "ARCHIVE")]
    pub stdlib_archive: Option<PathBuf>,
}

/// Structure of the `stagebuild.toml` file that configuration is read from.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TomlConfig {
    stage: Option<String>,
    target: Option<String>,
    out: Option<PathBuf>,
    archives: Option<TomlArchives>,
    #[serde(default)]
    units: Vec<TomlUnit>,
    outputs: Option<TomlOutputs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TomlArchives {
    rustc: Option<PathBuf>,
    stdlib: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TomlUnit {
    name: String,
    kind: Option<String>,
    #[serde(default)]
    deps: BTreeMap<String, String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl TomlUnit {
    fn into_unit(self) -> Result<BuildUnit, ConfigurationError> {
        let kind = match self.kind.as_deref() {
            None | Some("lib") => UnitKind::Lib,
            Some("bin") => UnitKind::Bin,
            Some(other) => {
                return Err(ConfigurationError::UnknownUnitKind {
                    unit: self.name,
                    kind: other.to_string(),
                });
            }
        };
        let mut unit = BuildUnit::new(self.name, kind);
        for (name, target) in self.deps {
            unit.push_dep(NamedDep::new(name, target));
        }
        for (key, value) in self.env {
            unit.env.insert(key, value);
        }
        Ok(unit)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TomlOutputs {
    rustc_binary: PathBuf,
    codegen_backend: Option<PathBuf>,
    #[serde(default)]
    libraries: BTreeMap<String, Vec<PathBuf>>,
}

/// Raw outputs a stage's build actions produced, to be assembled into the
/// installation the next stage consumes.
#[derive(Debug, Clone)]
pub struct StageOutputs {
    pub rustc_binary: PathBuf,
    pub codegen_backend: Option<PathBuf>,
    /// Names of the library build units whose link closures go into the
    /// assembled sysroot.
    pub libraries: Vec<String>,
}

/// Global configuration for one pipeline invocation, merged from the
/// config file and command-line flags. Read once, immutable afterwards.
#[derive(Debug)]
pub struct Config {
    pub stage: Stage,
    pub target: TargetSelection,
    pub out: PathBuf,
    pub rustc_archive: Option<PathBuf>,
    pub stdlib_archive: Option<PathBuf>,
    pub rules: WrapperRules,
    pub units: Vec<BuildUnit>,
    pub outputs: Option<StageOutputs>,
    /// Link closures declared for the libraries in `outputs`, keyed by
    /// unit name. Fed to the executor before assembly.
    pub closures: BTreeMap<String, Vec<PathBuf>>,
}

impl Config {
    pub fn parse(flags: Flags) -> Result<Config, ConfigurationError> {
        let toml = match &flags.config {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| {
                    ConfigurationError::ReadConfig { path: path.clone(), source }
                })?;
                toml::from_str::<TomlConfig>(&contents).map_err(|source| {
                    ConfigurationError::ParseConfig { path: path.clone(), source }
                })?
            }
            None => TomlConfig::default(),
        };

        let stage = flags
            .stage
            .or(toml.stage)
            .map(|s| Stage::from_str(&s))
            .transpose()?
            .unwrap_or(Stage::Stage0);
        let target = flags
            .target
            .or(toml.target)
            .map(|t| TargetSelection::from_user(&t))
            .ok_or(ConfigurationError::MissingValue("target"))?;
        let out = flags
            .out
            .or(toml.out)
            .ok_or(ConfigurationError::MissingValue("out"))?;

        let archives = toml.archives.unwrap_or_default();
        let rustc_archive = flags.rustc_archive.or(archives.rustc);
        let stdlib_archive = flags.stdlib_archive.or(archives.stdlib);

        let units =
            toml.units.into_iter().map(TomlUnit::into_unit).collect::<Result<Vec<_>, _>>()?;

        let (outputs, closures) = match toml.outputs {
            Some(outputs) => {
                let libraries = outputs.libraries.keys().cloned().collect();
                (
                    Some(StageOutputs {
                        rustc_binary: outputs.rustc_binary,
                        codegen_backend: outputs.codegen_backend,
                        libraries,
                    }),
                    outputs.libraries,
                )
            }
            None => (None, BTreeMap::new()),
        };

        Ok(Config {
            stage,
            target,
            out,
            rustc_archive,
            stdlib_archive,
            rules: WrapperRules::default(),
            units,
            outputs,
            closures,
        })
    }

    /// Where the downloaded bootstrap toolchain is installed.
    pub fn bootstrap_out(&self) -> PathBuf {
        self.out.join("bootstrap")
    }

    /// Where `stage`'s compiler-only installation is assembled.
    pub fn stage_rustc_out(&self, stage: Stage) -> PathBuf {
        self.out.join(format!("{stage}-rustc"))
    }

    /// Where `stage`'s full sysroot installation is assembled. This is the
    /// path the next stage resolves its compiler from.
    pub fn stage_sysroot_out(&self, stage: Stage) -> PathBuf {
        self.out.join(format!("{stage}-sysroot"))
    }
}
