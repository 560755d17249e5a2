//! Small filesystem utilities.

use globset::{Glob, GlobMatcher};

use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{AgentError, AgentResult};

/// Files directly under `dir` whose name matches `pattern`, sorted by
/// (name length, name) so numeric suffixes keep their order.
pub fn find_matching_files(dir: &Path, pattern: &str) -> AgentResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let matcher = compile_glob(pattern)?;
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(entry.file_name()) {
            out.push(entry.into_path());
        }
    }
    out.sort_by(|a, b| {
        let (a, b) = (a.as_os_str(), b.as_os_str());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    });
    Ok(out)
}

/// Removes every entry directly under `dir` whose name matches `pattern`.
/// Returns the number of removed entries. A missing `dir`, or an entry that
/// disappears meanwhile, is not an error.
pub fn purge_matching(dir: &Path, pattern: &str) -> AgentResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let matcher = compile_glob(pattern)?;
    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry?;
        if !matcher.is_match(entry.file_name()) {
            continue;
        }
        let outcome = if entry.file_type().is_dir() {
            std::fs::remove_dir_all(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        match outcome {
            Ok(()) => removed += 1,
            // Finished workers may remove their own scratch entries concurrently.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

/// Recursively copies `src` into `dst`, creating directories as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> AgentResult<()> {
    if !src.is_dir() {
        return Err(AgentError::MissingInput(format!(
            "{} is not a directory",
            src.display()
        )));
    }
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Replaces whatever lives at `link` with a symlink pointing at `target`.
pub fn replace_with_symlink(link: &Path, target: &Path) -> AgentResult<()> {
    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_dir() => std::fs::remove_dir_all(link)?,
        Ok(_) => std::fs::remove_file(link)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

pub fn file_size(path: &Path) -> AgentResult<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Hex blake3 digest of a file's contents.
pub fn file_checksum(path: &Path) -> AgentResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hex blake3 digest of several files read back to back.
pub fn concat_checksum(paths: &[PathBuf]) -> AgentResult<String> {
    let mut hasher = blake3::Hasher::new();
    for path in paths {
        let mut file = File::open(path)?;
        std::io::copy(&mut file, &mut hasher)?;
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn compile_glob(pattern: &str) -> AgentResult<GlobMatcher> {
    Ok(Glob::new(pattern)?.compile_matcher())
}
