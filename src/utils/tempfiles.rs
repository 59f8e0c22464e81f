use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::config::{REMOVE_RETRIES, REMOVE_RETRY_DELAY};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling work path for a generated artifact: `<dest><suffix>` (e.g. `clip.webm.new`).
pub fn temp_path_for(dest: &Path, suffix: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.parent()
        .unwrap_or(Path::new("."))
        .join(format!("{name}{suffix}"))
}

/// Unique file in the system temp dir with `extension`, for one-shot tool output.
pub fn unique_temp_file(extension: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stamp = chrono::Utc::now().timestamp_micros();
    std::env::temp_dir().join(format!(
        "{}-{}-{:x}-{}.{}",
        env!("CARGO_PKG_NAME"),
        std::process::id(),
        stamp,
        n,
        extension
    ))
}

/// Create the parent directory of `path` if needed.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

/// Move a finished work file over its final path.
pub fn rename_into_place(temp_path: &Path, final_path: &Path) -> Result<()> {
    fs::rename(temp_path, final_path).with_context(|| {
        format!(
            "rename generated file into place ({} -> {})",
            temp_path.display(),
            final_path.display()
        )
    })
}

/// Remove `path`; a missing file is not an error. Returns whether something was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Remove `path`, retrying while the OS reports it busy (Windows share locks, network mounts).
pub fn remove_with_retry(path: &Path) -> Result<()> {
    let mut tries_left = REMOVE_RETRIES;
    loop {
        tries_left -= 1;
        match fs::remove_file(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::ResourceBusy && tries_left > 0 => {
                std::thread::sleep(REMOVE_RETRY_DELAY);
            }
            Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_sibling() {
        let p = temp_path_for(Path::new("/x/_previews/A/B.webm"), ".new");
        assert_eq!(p, PathBuf::from("/x/_previews/A/B.webm.new"));
    }

    #[test]
    fn unique_temp_files_differ() {
        assert_ne!(unique_temp_file("png"), unique_temp_file("png"));
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gone");
        assert!(!remove_if_exists(&p).unwrap());
        fs::write(&p, b"x").unwrap();
        assert!(remove_if_exists(&p).unwrap());
        assert!(!p.exists());
    }
}
