//! Local tree scanning.
//!
//! Walks the configured local root, applies the exclude patterns, and
//! produces one record per regular file with the cheap change signals (size,
//! whole-second mtime). Content hashes are computed lazily, only when the
//! cheap signals disagree with the index.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use globset::{Glob, GlobSet, GlobSetBuilder};
use md5::{Digest, Md5};
use walkdir::WalkDir;

use gdrv_core::{AppError, AppResult, ErrorKind};

/// One regular file found below the local root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    /// Path relative to the sync root, `/`-separated.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    /// Whole seconds since the epoch.
    pub mtime: i64,
}

/// Compiles the exclude patterns of a sync configuration.
pub fn compile_excludes(patterns: &[String]) -> AppResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|error| {
            AppError::new(
                ErrorKind::InvalidArgument,
                format!("invalid exclude pattern '{pattern}': {error}"),
            )
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|error| {
        AppError::new(
            ErrorKind::InvalidArgument,
            format!("failed to compile exclude patterns: {error}"),
        )
    })
}

/// Walks `root` and returns every non-excluded regular file keyed by
/// relative path.
pub fn scan_local(root: &Path, excludes: &GlobSet) -> AppResult<BTreeMap<String, LocalFile>> {
    if !root.exists() {
        return Err(AppError::new(
            ErrorKind::InvalidArgument,
            format!("sync root {} does not exist", root.display()),
        ));
    }
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("failed to walk {}: {error}", root.display()),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if excludes.is_match(&rel_path) || excludes.is_match(rel) {
            tracing::debug!(path = %rel_path, "excluded from scan");
            continue;
        }
        let metadata = entry.metadata().map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("failed to stat {}: {error}", entry.path().display()),
            )
        })?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .and_then(|duration| i64::try_from(duration.as_secs()).ok())
            .unwrap_or(0);
        files.insert(
            rel_path.clone(),
            LocalFile {
                rel_path,
                abs_path: entry.path().to_path_buf(),
                size: metadata.len(),
                mtime,
            },
        );
    }
    Ok(files)
}

/// Computes the hex MD5 digest of a file's contents.
///
/// The platform reports MD5 fingerprints for binary content, so the same
/// digest makes local and remote copies directly comparable.
pub fn md5_file(path: &Path) -> AppResult<String> {
    let mut file = std::fs::File::open(path).map_err(|error| {
        AppError::new(
            ErrorKind::Unknown,
            format!("failed to open {} for hashing: {error}", path.display()),
        )
    })?;
    let mut hasher = Md5::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("failed to read {}: {error}", path.display()),
            )
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_nested_files_with_relative_paths() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("docs/deep")).expect("dirs");
        fs::write(temp.path().join("top.txt"), b"top").expect("write");
        fs::write(temp.path().join("docs/deep/nested.txt"), b"nested").expect("write");

        let excludes = compile_excludes(&[]).expect("empty set");
        let files = scan_local(temp.path(), &excludes).expect("scan");
        assert_eq!(files.len(), 2);
        assert!(files.contains_key("top.txt"));
        let nested = &files["docs/deep/nested.txt"];
        assert_eq!(nested.size, 6);
        assert!(nested.mtime > 0);
    }

    #[test]
    fn excludes_filter_by_glob() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("target")).expect("dirs");
        fs::write(temp.path().join("keep.rs"), b"fn main() {}").expect("write");
        fs::write(temp.path().join("debug.log"), b"noise").expect("write");
        fs::write(temp.path().join("target/artifact.bin"), b"bin").expect("write");

        let excludes = compile_excludes(&[String::from("*.log"), String::from("target/**")])
            .expect("compile");
        let files = scan_local(temp.path(), &excludes).expect("scan");
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("keep.rs"));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let error = compile_excludes(&[String::from("[unclosed")]).expect_err("bad glob");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn md5_matches_a_known_vector() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("hello.txt");
        fs::write(&path, b"hello world").expect("write");
        // md5("hello world")
        assert_eq!(md5_file(&path).expect("hash"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn missing_root_is_invalid_argument() {
        let excludes = compile_excludes(&[]).expect("empty");
        let error = scan_local(Path::new("/nonexistent/sync-root"), &excludes)
            .expect_err("missing root");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }
}
