//! Containment checks for save-data paths.
//!
//! Every profile's save subtree must be a direct child of the storage root.
//! These helpers reject anything that could address data outside of it,
//! whether through separators, `..` components or symlinks.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("\"{0}\" is not a plain directory name")]
    InvalidName(String),
    #[error("failed to resolve {}: {source}", path.display())]
    Canonicalize { path: PathBuf, source: io::Error },
    #[error("{} is not inside the storage root {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Verify that `name` is a single normal path component.
///
/// Separators, `.`/`..` and absolute paths are all rejected before any
/// filesystem call is made.
pub fn ensure_subdir_name(name: &str) -> Result<(), PathError> {
    if name.contains(['/', '\\']) {
        return Err(PathError::InvalidName(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(PathError::InvalidName(name.to_string())),
    }
}

/// Resolve `name` to its path under a canonicalized `root`.
///
/// The result is guaranteed to lie strictly inside `root`; the target itself
/// need not exist yet.
pub fn contained_child(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    ensure_subdir_name(name)?;
    Ok(canonicalize(root)?.join(name))
}

/// Canonicalize an existing `path` and verify it lies strictly inside `root`.
///
/// Rejects the root itself and anything escaping it, including symlinks that
/// resolve elsewhere.
pub fn canonical_contained(root: &Path, path: &Path) -> Result<PathBuf, PathError> {
    let root = canonicalize(root)?;
    let path = canonicalize(path)?;
    if path == root || !path.starts_with(&root) {
        return Err(PathError::OutsideRoot { path, root });
    }
    Ok(path)
}

fn canonicalize(path: &Path) -> Result<PathBuf, PathError> {
    path.canonicalize().map_err(|source| PathError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn accepts_plain_names() {
        ensure_subdir_name("5").unwrap();
        ensure_subdir_name("alpha-saves").unwrap();
        ensure_subdir_name("Mein Server").unwrap();
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(ensure_subdir_name("").is_err());
        assert!(ensure_subdir_name(".").is_err());
        assert!(ensure_subdir_name("..").is_err());
        assert!(ensure_subdir_name("a/b").is_err());
        assert!(ensure_subdir_name("a\\b").is_err());
        assert!(ensure_subdir_name("/absolute").is_err());
        assert!(ensure_subdir_name("../escape").is_err());
    }

    #[test]
    fn contained_child_stays_under_root() {
        let root = TempDir::new().unwrap();
        let child = contained_child(root.path(), "7").unwrap();
        assert!(child.starts_with(root.path().canonicalize().unwrap()));
        assert!(contained_child(root.path(), "../7").is_err());
    }

    #[test]
    fn canonical_contained_rejects_root_and_ancestors() {
        let root = TempDir::new().unwrap();
        let inside = root.path().join("saves");
        std::fs::create_dir(&inside).unwrap();

        canonical_contained(root.path(), &inside).unwrap();
        assert!(canonical_contained(root.path(), root.path()).is_err());
        assert!(canonical_contained(root.path(), &root.path().join("..")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn canonical_contained_rejects_symlink_escape() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let link = root.path().join("sneaky");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        assert!(canonical_contained(root.path(), &link).is_err());
    }
}
