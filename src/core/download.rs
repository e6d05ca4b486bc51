//! Acquisition of the bootstrap compiler.
//!
//! Turns the two externally downloaded distribution archives (compiler and
//! matching standard library) into a single on-disk toolchain installation
//! the rest of the pipeline can use as an ordinary build input. A missing
//! bootstrap compiler makes the whole pipeline unbuildable, so every error
//! here is fatal and nothing is retried.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::CompilerInstallation;
use crate::core::config::TargetSelection;
use crate::utils::helpers::set_executable;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("failed to read archive `{archive}`")]
    Archive {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive `{archive}` is missing expected entry `{expected}`")]
    MissingEntry { archive: PathBuf, expected: String },

    #[error("failed to lay out extracted files at `{dest}`")]
    Layout {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Extracts both archives into `dest` so that the compiler executable and
/// the target-specific standard library end up co-located the way an
/// installed toolchain would have them:
///
/// * the compiler archive's `<root>/rustc/{bin,lib}` subtree becomes
///   `dest/{bin,lib}`;
/// * the stdlib archive's `<root>/rust-std-<triple>/lib/rustlib/<triple>`
///   subtree becomes `dest/lib/rustlib/<triple>`.
///
/// Re-running with the same inputs into a fresh destination produces a
/// byte-identical tree. Overlapping destinations are not supported; the
/// caller directs output to a fresh location.
pub fn acquire(
    compiler_archive: &Path,
    stdlib_archive: &Path,
    target: &TargetSelection,
    dest: &Path,
) -> Result<CompilerInstallation, ExtractionError> {
    info!(
        compiler = %compiler_archive.display(),
        stdlib = %stdlib_archive.display(),
        %target,
        dest = %dest.display(),
        "setting up bootstrap toolchain",
    );

    let stdlib_subtree = PathBuf::from(format!("rust-std-{}", target.triple))
        .join("lib")
        .join("rustlib")
        .join(&target.triple);
    let rustlib_dest = dest.join("lib").join("rustlib").join(&target.triple);
    let stdlib_files = extract_subtree(stdlib_archive, &stdlib_subtree, &rustlib_dest)?;

    let compiler_files = extract_subtree(compiler_archive, Path::new("rustc"), dest)?;

    let rustc = dest.join("bin").join("rustc");
    if !rustc.is_file() {
        return Err(ExtractionError::MissingEntry {
            archive: compiler_archive.to_path_buf(),
            expected: "rustc/bin/rustc".to_string(),
        });
    }
    set_executable(&rustc)
        .map_err(|source| ExtractionError::Layout { dest: rustc.clone(), source })?;

    debug!(stdlib_files, compiler_files, "bootstrap toolchain extracted");
    Ok(CompilerInstallation::bootstrap(dest))
}

fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>, ExtractionError> {
    let file = fs::File::open(path)
        .map_err(|source| ExtractionError::Archive { archive: path.to_path_buf(), source })?;
    let gzipped = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".gz") || name.ends_with(".tgz"));
    let reader: Box<dyn Read> =
        if gzipped { Box::new(GzDecoder::new(file)) } else { Box::new(file) };
    Ok(Archive::new(reader))
}

/// Unpacks the entries of `archive_path` living under `<root>/<subtree>`
/// into `dest`, where `<root>` is the archive's single top-level directory.
/// Returns the number of files written; zero matching entries means the
/// archive does not have the conventional internal layout and is an error.
fn extract_subtree(
    archive_path: &Path,
    subtree: &Path,
    dest: &Path,
) -> Result<usize, ExtractionError> {
    let archive_err = |source| ExtractionError::Archive {
        archive: archive_path.to_path_buf(),
        source,
    };

    let mut archive = open_archive(archive_path)?;
    let mut root: Option<PathBuf> = None;
    let mut unpacked = 0usize;

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?.into_owned();

        let mut components = path.components();
        let Some(first) = components.next() else {
            continue;
        };
        if root.is_none() {
            root = Some(PathBuf::from(first.as_os_str()));
        }

        let Ok(rel) = components.as_path().strip_prefix(subtree).map(Path::to_path_buf) else {
            continue;
        };
        let target = dest.join(&rel);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|source| ExtractionError::Layout { dest: target.clone(), source })?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|source| ExtractionError::Layout { dest: target.clone(), source })?;
            }
            entry
                .unpack(&target)
                .map_err(|source| ExtractionError::Layout { dest: target.clone(), source })?;
            unpacked += 1;
        }
    }

    if unpacked == 0 {
        let expected = root.unwrap_or_default().join(subtree);
        return Err(ExtractionError::MissingEntry {
            archive: archive_path.to_path_buf(),
            expected: expected.display().to_string(),
        });
    }
    Ok(unpacked)
}
