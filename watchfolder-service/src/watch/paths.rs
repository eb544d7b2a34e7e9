//! Canonical path handling for the watched tree.
//!
//! Every path that enters the scheduler goes through [`normalize`] first, and
//! every comparison goes through [`path_key`], so the queue index never holds
//! two spellings of the same file.

use std::path::{Path, PathBuf};

use normpath::PathExt;

/// Whether the platform's default filesystem folds case.
pub const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

/// Resolve `path` to its canonical absolute form.
///
/// A path whose last component no longer exists (an unlinked file) is
/// resolved through its parent, so deletions can still be matched against
/// tracked tasks. Returns `None` when neither the path nor its parent
/// resolves.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.normalize() {
        return Some(resolved.into_path_buf());
    }

    let name = path.file_name()?;
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?;
    let parent = parent.normalize().ok()?;
    Some(parent.into_path_buf().join(name))
}

/// Comparison key for an already-normalized path.
///
/// Collapses trailing and repeated separators, and folds case where the
/// filesystem does.
pub fn path_key(path: &Path) -> PathBuf {
    let collapsed: PathBuf = path.components().collect();
    if CASE_INSENSITIVE {
        PathBuf::from(collapsed.to_string_lossy().to_lowercase())
    } else {
        collapsed
    }
}

/// `candidate` is `root` or lies somewhere beneath it. Both must already be
/// normalized; never touches the filesystem.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    // Path::starts_with is component-wise, so /data/inbox2 is not under /data/inbox
    path_key(candidate).starts_with(path_key(root))
}

/// Number of directories between `root` and `candidate`; a file directly in
/// the root has depth 0. `None` if `candidate` is not strictly below `root`.
pub fn depth_below(root: &Path, candidate: &Path) -> Option<usize> {
    let root = path_key(root);
    let candidate = path_key(candidate);
    let relative = candidate.strip_prefix(&root).ok()?;
    relative.components().count().checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_existing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"x").unwrap();

        let normalized = normalize(&file).unwrap();
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("a.txt"));
    }

    #[test]
    fn test_normalize_unlinked_file_uses_parent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.txt");
        fs::write(&file, b"x").unwrap();
        let before = normalize(&file).unwrap();
        fs::remove_file(&file).unwrap();

        assert_eq!(normalize(&file), Some(before));
    }

    #[test]
    fn test_normalize_unresolvable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no").join("such").join("file.txt");
        assert_eq!(normalize(&missing), None);
    }

    #[test]
    fn test_trailing_separator_is_same_path() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("inbox");
        fs::create_dir(&sub).unwrap();

        let with_slash = PathBuf::from(format!("{}/", sub.display()));
        let a = normalize(&sub).unwrap();
        let b = normalize(&with_slash).unwrap();
        assert_eq!(path_key(&a), path_key(&b));
        assert!(is_within(&b, &a));
    }

    #[test]
    fn test_root_is_within_itself() {
        assert!(is_within(Path::new("/watch"), Path::new("/watch")));
        assert!(is_within(Path::new("/watch/"), Path::new("/watch")));
    }

    #[test]
    fn test_sibling_prefix_is_not_inside() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let inbox2 = dir.path().join("inbox2");
        fs::create_dir(&inbox).unwrap();
        fs::create_dir(&inbox2).unwrap();
        fs::write(inbox2.join("a.txt"), b"x").unwrap();

        let inbox = normalize(&inbox).unwrap();
        let inbox2 = normalize(&inbox2).unwrap();
        assert!(!is_within(&inbox, &normalize(&inbox2.join("a.txt")).unwrap()));
        assert!(!is_within(&inbox, &inbox2));
    }

    #[test]
    fn test_nested_file_is_inside() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("c.txt"), b"x").unwrap();

        let root = normalize(dir.path()).unwrap();
        assert!(is_within(&root, &normalize(&nested.join("c.txt")).unwrap()));
    }

    #[test]
    fn test_case_folding_follows_platform() {
        let a = Path::new("/Data/Inbox/Report.PDF");
        let b = Path::new("/data/inbox/report.pdf");
        assert_eq!(path_key(a) == path_key(b), CASE_INSENSITIVE);
        assert_eq!(is_within(Path::new("/DATA"), b), CASE_INSENSITIVE);
    }

    #[test]
    fn test_depth_below() {
        let root = Path::new("/watch");
        assert_eq!(depth_below(root, Path::new("/watch/a.txt")), Some(0));
        assert_eq!(depth_below(root, Path::new("/watch/x/y/a.txt")), Some(2));
        assert_eq!(depth_below(root, Path::new("/watch")), None);
        assert_eq!(depth_below(root, Path::new("/other/a.txt")), None);
    }
}
