//! File discovery for review runs.
//!
//! Yields a `FileContext` per supported source file, with hidden
//! directories, build artifacts, and unusable files already filtered out.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::types::{FileContext, Language};

/// Directories never worth descending into.
const SKIP_DIRS: &[&str] = &[
    "vendor",
    "node_modules",
    "target",
    "__pycache__",
    "dist",
    "build",
];

/// Files larger than this exceed any useful provider context.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// Collect files under the given paths, sorted and de-duplicated by path.
pub fn collect(paths: &[PathBuf]) -> anyhow::Result<Vec<FileContext>> {
    let mut files = Vec::new();

    for path in paths {
        let path = path
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("cannot access {:?}: {}", path, e))?;

        if path.is_file() {
            if let Some(ctx) = load_file(&path) {
                files.push(ctx);
            }
            continue;
        }

        for entry in WalkDir::new(&path)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                if e.file_type().is_dir() && name.starts_with('.') {
                    return false;
                }
                !(e.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()))
            })
        {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Some(ctx) = load_file(entry.path()) {
                    files.push(ctx);
                }
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    Ok(files)
}

fn load_file(path: &Path) -> Option<FileContext> {
    let ext = path.extension()?.to_str()?;
    let language = Language::from_extension(ext)?;

    let meta = fs::metadata(path).ok()?;
    if meta.len() > MAX_FILE_BYTES {
        debug!("skipping oversized file {:?} ({} bytes)", path, meta.len());
        return None;
    }

    let bytes = fs::read(path).ok()?;
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(_) => {
            debug!("skipping non-utf8 file {:?}", path);
            return None;
        }
    };

    Some(FileContext::new(path.to_path_buf(), content, language))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_single_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.py");
        std::fs::write(&path, "x = 1").unwrap();

        let files = collect(&[path]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "x = 1");
        assert_eq!(files[0].language, Language::Python);
    }

    #[test]
    fn test_collect_directory_filters_unsupported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.py"), "x = 1").unwrap();
        std::fs::write(temp.path().join("b.rs"), "fn main() {}").unwrap();
        std::fs::write(temp.path().join("notes.md"), "# notes").unwrap();

        let files = collect(&[temp.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_collect_skips_hidden_and_artifact_dirs() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("good.py"), "x = 1").unwrap();

        for dir in [".git", "node_modules", "__pycache__"] {
            let sub = temp.path().join(dir);
            std::fs::create_dir_all(&sub).unwrap();
            std::fs::write(sub.join("hidden.py"), "x = 1").unwrap();
        }

        let files = collect(&[temp.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("good.py"));
    }

    #[test]
    fn test_collect_nested_dirs() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("src").join("app");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("views.py"), "def view(): pass").unwrap();

        let files = collect(&[temp.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_collect_missing_path_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does_not_exist.py");
        assert!(collect(&[missing]).is_err());
    }

    #[test]
    fn test_collect_dedups_overlapping_paths() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.py");
        std::fs::write(&path, "x = 1").unwrap();

        let files = collect(&[temp.path().to_path_buf(), path]).unwrap();
        assert_eq!(files.len(), 1);
    }
}
