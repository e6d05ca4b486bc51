//! Various utilities shared across the pipeline, most importantly the
//! name-pattern predicates that drive compiler selection and dependency
//! injection for every build unit.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// A single name predicate, matched against build-unit and artifact names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    /// The name must equal the pattern exactly.
    Exact(String),
    /// The name must start with the pattern.
    Prefix(String),
}

impl NamePattern {
    pub fn exact(pattern: impl Into<String>) -> Self {
        NamePattern::Exact(pattern.into())
    }

    pub fn prefix(pattern: impl Into<String>) -> Self {
        NamePattern::Prefix(pattern.into())
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(pattern) => name == pattern,
            NamePattern::Prefix(pattern) => name.starts_with(pattern),
        }
    }
}

/// Returns true iff at least one item satisfies at least one pattern.
///
/// Evaluation is lazy: iteration stops at the first satisfying item/pattern
/// pair and no intermediate collection is built.
///
/// An empty `items` sequence yields `false` (there exists no satisfying
/// item), while [`all_match`] yields `true` on the same input. Callers that
/// route on these predicates rely on that asymmetry, so don't "fix" it.
pub fn any_match<I>(items: I, patterns: &[NamePattern]) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    items.into_iter().any(|item| patterns.iter().any(|pattern| pattern.matches(item.as_ref())))
}

/// Returns true iff every item satisfies at least one pattern.
///
/// Evaluation stops at the first item that satisfies no pattern. An empty
/// `items` sequence yields `true` (universal quantification over the empty
/// set); see [`any_match`] for the existential counterpart.
pub fn all_match<I>(items: I, patterns: &[NamePattern]) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    items.into_iter().all(|item| patterns.iter().any(|pattern| pattern.matches(item.as_ref())))
}

/// Whether `path` names a dynamic library, uniformly across platforms.
pub fn is_dylib(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "so" || ext == "dylib" || ext == "dll")
}

/// Recursively copies `src` into `dst`, visiting entries in a deterministic
/// order so that repeated copies of the same tree are byte-identical.
///
/// File permissions are carried over by `fs::copy`, which keeps extracted
/// compiler executables runnable after relocation.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Marks `path` as executable for everyone who can read it.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
