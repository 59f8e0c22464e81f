//! Load `.mediascan.toml` and apply environment overrides on top of it.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::utils::config::{Config, EnvKeys, PackagePaths};

/// Load the config file at `path`. Missing file → defaults; unreadable or invalid → error.
pub fn load_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("{} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", path.display()))
}

/// Default config location: `.mediascan.toml` in `dir`.
pub fn default_config_path(dir: &Path) -> PathBuf {
    dir.join(PackagePaths::get().config_filename())
}

/// Overwrite a config field from an environment variable when present and parseable.
macro_rules! apply_env_opt {
    ($key:expr, $target:expr) => {
        if let Ok(raw) = std::env::var($key) {
            match raw.trim().parse() {
                Ok(v) => $target = v,
                Err(_) => warn!("ignoring {}={:?}: not a number", $key, raw),
            }
        }
    };
}

/// Apply `FILE_SCAN_RETRY_LIMIT`, `MS_WATCHDOG_CHECK_INTERVAL`, `MS_WATCHDOG_EXPECT_TIME`.
/// A `.env` in `dir` is loaded first (existing variables win).
pub fn apply_env_overrides(config: &mut Config, dir: &Path) {
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
    }
    apply_env_opt!(EnvKeys::RETRY_LIMIT, config.scanner.retry_limit);
    apply_env_opt!(
        EnvKeys::WATCHDOG_CHECK_INTERVAL,
        config.watchdog.check_interval_ms
    );
    apply_env_opt!(EnvKeys::WATCHDOG_EXPECT_TIME, config.watchdog.expect_time_ms);
    if config.scanner.retry_limit == 0 {
        warn!("retry limit 0 is not usable, falling back to 1");
        config.scanner.retry_limit = 1;
    }
}

/// File config + environment, in that order. CLI flags are applied by the caller afterwards.
pub fn load_config(path: &Path, dir: &Path) -> Result<Config> {
    let mut config = load_config_file(path)?;
    apply_env_overrides(&mut config, dir);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [paths]
            media = "/srv/media"

            [scanner]
            retry_limit = 5

            [previews]
            enable = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.paths.media, PathBuf::from("/srv/media"));
        assert_eq!(cfg.paths.ffprobe, PathBuf::from("ffprobe"));
        assert_eq!(cfg.scanner.retry_limit, 5);
        assert_eq!(cfg.scanner.stability_threshold_ms, 2000);
        assert!(cfg.previews.enable);
        assert_eq!(cfg.previews.bitrate, "40k");
        assert!(cfg.metadata.merge_blacks_and_freezes);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.scanner.retry_limit, 3);
        assert_eq!(cfg.watchdog.expect_time_ms, 30_000);
    }

    #[test]
    fn invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scanner\nretry_limit = ").unwrap();
        assert!(load_config_file(&path).is_err());
    }
}
