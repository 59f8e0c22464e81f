//! Path, identifier and filter utilities

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use std::path::{Path, PathBuf};

use crate::errors::RequestError;
use crate::utils::config::WATCHDOG_IGNORE_TAG;

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Record identifier for `path`: relative to the media root, extension stripped,
/// `/` separators, upper-cased. Files outside the root keep their full path.
pub fn media_id(path: &Path, media_root: &Path) -> String {
    let rel = path_relative_to(path, media_root).unwrap_or_else(|| path.to_path_buf());
    let stripped = match rel.extension() {
        Some(_) => rel.with_extension(""),
        None => rel,
    };
    stripped
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_uppercase()
}

/// Normalize a caller-supplied identifier (`a\b` and `A/B` are the same record).
pub fn normalize_id(raw: &str) -> Result<String, RequestError> {
    let id = raw.trim().replace('\\', "/").to_uppercase();
    if id.is_empty() || id.chars().any(|c| c.is_control()) {
        return Err(RequestError::MalformedId(raw.to_string()));
    }
    Ok(id)
}

/// True for watchdog sentinel copies; derivation work skips them.
pub fn is_watchdog_copy(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(WATCHDOG_IGNORE_TAG))
        .unwrap_or(false)
}

/// Format epoch milliseconds in local time with a chrono format string.
pub fn format_local_ms(ms: i64, fmt: &str) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format(fmt).to_string(),
        None => "00000000000000".to_string(),
    }
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            _ => name.starts_with("._") || name.starts_with(".Trash-"),
        }
    } else {
        false
    }
}

/// Returns true if `path` should be handed to the scanner.
/// Skips the media root itself, the store files, OS clutter and excluded patterns.
pub fn should_include(
    path: &Path,
    root: &Path,
    db_path: Option<&Path>,
    exclude_patterns: &[String],
) -> bool {
    if path == root {
        return false;
    }
    if let Some(db) = db_path {
        let p = path.to_string_lossy();
        let d = db.to_string_lossy();
        // Also the -wal / -shm siblings.
        if p.starts_with(d.as_ref()) {
            return false;
        }
    }
    if is_os_hidden_file(path) {
        return false;
    }
    if exclude_patterns.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    let path_str = path.to_str().unwrap_or("");
    for pattern in exclude_patterns {
        if glob_match(pattern, name) || glob_match(pattern, path_str) {
            return false;
        }
    }
    true
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);

    let mut pattern_chars = pattern.chars().peekable();
    let mut text_chars = text.chars().peekable();

    while let Some(&p) = pattern_chars.peek() {
        match p {
            '*' => {
                pattern_chars.next();
                if pattern_chars.peek().is_none() {
                    return true; // trailing * matches everything
                }
                while text_chars.peek().is_some() {
                    if glob_match(
                        &pattern_chars.clone().collect::<String>(),
                        &text_chars.clone().collect::<String>(),
                    ) {
                        return true;
                    }
                    text_chars.next();
                }
                return false;
            }
            '?' => {
                pattern_chars.next();
                if text_chars.next().is_none() {
                    return false;
                }
            }
            _ => {
                pattern_chars.next();
                if text_chars.next() != Some(p) {
                    return false;
                }
            }
        }
    }

    text_chars.peek().is_none()
}

/// Canonicalize the media root, creating it when missing.
pub fn prepare_media_root(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create media root {}", path.display()))?;
    }
    path.canonicalize()
        .with_context(|| format!("canonicalize {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_strips_extension_and_uppercases() {
        let root = Path::new("/srv/media");
        assert_eq!(
            media_id(Path::new("/srv/media/News/Intro.mov"), root),
            "NEWS/INTRO"
        );
        assert_eq!(media_id(Path::new("/srv/media/amb.wav"), root), "AMB");
        assert_eq!(media_id(Path::new("/srv/media/noext"), root), "NOEXT");
    }

    #[test]
    fn normalize_rejects_empty() {
        assert_eq!(normalize_id(" news\\intro ").unwrap(), "NEWS/INTRO");
        assert!(normalize_id("").is_err());
        assert!(normalize_id("   ").is_err());
        assert!(normalize_id("a\nb").is_err());
    }

    #[test]
    fn watchdog_copies_are_recognised() {
        assert!(is_watchdog_copy(Path::new(
            "/m/watchdog_watchdogIgnore_1700000000000.mov"
        )));
        assert!(!is_watchdog_copy(Path::new("/m/watchdog.mov")));
    }

    #[test]
    fn include_filter() {
        let root = Path::new("/m");
        let db = Path::new("/m/_mediascan.db");
        let excl = vec!["*.tmp".to_string()];
        assert!(should_include(Path::new("/m/a.mov"), root, Some(db), &excl));
        assert!(!should_include(Path::new("/m/a.tmp"), root, Some(db), &excl));
        assert!(!should_include(Path::new("/m/.DS_Store"), root, Some(db), &excl));
        assert!(!should_include(
            Path::new("/m/_mediascan.db-wal"),
            root,
            Some(db),
            &excl
        ));
        assert!(!should_include(root, root, None, &[]));
    }
}
