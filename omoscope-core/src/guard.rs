//! Path access guard
//!
//! Every filesystem path the engine reads is first resolved to its real
//! location (following symlinks) and checked against a list of allowed roots.
//! Prefix checks are done on resolved paths so a symlink inside an allowed
//! root that points elsewhere is rejected.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Upper bound on symlink hops while resolving a dangling link chain.
const MAX_LINK_DEPTH: usize = 40;

/// Resolve `path` to a real, absolute path.
///
/// Existing paths are canonicalized. For a path that does not exist yet, the
/// nearest existing ancestor is canonicalized and the missing suffix is
/// re-appended (with `.` and `..` applied lexically). Dangling symlinks are
/// followed to their target so they cannot smuggle a path out of a root.
pub fn resolve_real_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    resolve_with_depth(&absolute, 0)
}

fn resolve_with_depth(path: &Path, depth: usize) -> std::io::Result<PathBuf> {
    if let Ok(real) = path.canonicalize() {
        return Ok(real);
    }
    if depth > MAX_LINK_DEPTH {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "too many levels of symbolic links",
        ));
    }

    // Walk up until something exists, remembering the missing tail.
    let mut missing: Vec<std::ffi::OsString> = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        if let Ok(meta) = std::fs::symlink_metadata(&current) {
            if meta.file_type().is_symlink() {
                // Dangling link: resolve its target, then re-append the tail.
                let target = std::fs::read_link(&current)?;
                let target = match current.parent() {
                    Some(parent) if target.is_relative() => parent.join(target),
                    _ => target,
                };
                let base = resolve_with_depth(&target, depth + 1)?;
                return Ok(append_lexically(base, missing.iter().rev()));
            }
            let base = current.canonicalize()?;
            return Ok(append_lexically(base, missing.iter().rev()));
        }

        match (current.file_name(), current.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                current = parent.to_path_buf();
            }
            _ => {
                // Reached the filesystem root without finding anything.
                return Ok(append_lexically(current, missing.iter().rev()));
            }
        }
    }
}

fn append_lexically<'a>(
    mut base: PathBuf,
    tail: impl Iterator<Item = &'a std::ffi::OsString>,
) -> PathBuf {
    for part in tail {
        for component in Path::new(part).components() {
            match component {
                Component::ParentDir => {
                    base.pop();
                }
                Component::CurDir => {}
                other => base.push(other.as_os_str()),
            }
        }
    }
    base
}

/// A set of pre-resolved allowed roots.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Resolve each root once. Roots that cannot be resolved are kept as given.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|root| {
                let root = root.as_ref();
                resolve_real_path(root).unwrap_or_else(|_| root.to_path_buf())
            })
            .collect();
        Self { roots }
    }

    /// Resolve `candidate` (relative to `base_dir` when relative) and ensure it
    /// lies within one of the roots.
    pub fn check(&self, candidate: &Path, base_dir: Option<&Path>) -> Result<PathBuf> {
        let joined = match base_dir {
            Some(base) if candidate.is_relative() => base.join(candidate),
            _ => candidate.to_path_buf(),
        };

        let resolved = resolve_real_path(&joined).map_err(|e| Error::AccessDenied {
            path: joined.clone(),
            reason: format!("cannot resolve path: {}", e),
        })?;

        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            tracing::warn!(
                path = %joined.display(),
                resolved = %resolved.display(),
                "Rejected path outside allowed roots"
            );
            Err(Error::AccessDenied {
                path: joined,
                reason: "outside allowed roots".to_string(),
            })
        }
    }
}

/// Resolve `candidate` and fail with [`Error::AccessDenied`] unless it equals
/// or is nested under one of `allowed_roots`.
pub fn assert_allowed_path(
    candidate: &Path,
    allowed_roots: &[PathBuf],
    base_dir: Option<&Path>,
) -> Result<PathBuf> {
    PathGuard::new(allowed_roots).check(candidate, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_allows_nested_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a/file.json"), "{}").unwrap();

        let resolved =
            assert_allowed_path(&root.join("a/file.json"), &[root.clone()], None).unwrap();
        assert_eq!(resolved, root.join("a/file.json").canonicalize().unwrap());
    }

    #[test]
    fn test_allows_root_itself() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        assert!(assert_allowed_path(&root, &[root.clone()], None).is_ok());
    }

    #[test]
    fn test_relative_candidate_uses_base_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("x.json"), "{}").unwrap();
        assert!(assert_allowed_path(Path::new("x.json"), &[root.clone()], Some(&root)).is_ok());
    }

    #[test]
    fn test_rejects_parent_escape() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(dir.path().join("secret"), "x").unwrap();

        let err = assert_allowed_path(&root.join("../secret"), &[root.clone()], None).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
    }

    #[test]
    fn test_missing_path_resolves_through_existing_ancestor() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();

        let resolved =
            assert_allowed_path(&root.join("not/yet/here.json"), &[root.clone()], None).unwrap();
        assert!(resolved.starts_with(root.canonicalize().unwrap()));
        assert!(resolved.ends_with("not/yet/here.json"));

        let escape = root.join("missing/../../outside.json");
        assert!(assert_allowed_path(&escape, &[root.clone()], None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("data.json"), "{}").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let err =
            assert_allowed_path(&root.join("link/data.json"), &[root.clone()], None).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_dangling_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), root.join("dangling")).unwrap();

        assert!(assert_allowed_path(&root.join("dangling"), &[root.clone()], None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_allows_symlinked_root() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("f.json"), "{}").unwrap();
        let alias = dir.path().join("alias");
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        assert!(assert_allowed_path(&alias.join("f.json"), &[alias.clone()], None).is_ok());
        assert!(assert_allowed_path(&real.join("f.json"), &[alias.clone()], None).is_ok());
    }
}
