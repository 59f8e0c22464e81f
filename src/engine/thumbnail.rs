use std::ffi::OsString;
use std::path::Path;

use crate::engine::analyzer::Tools;
use crate::errors::ScanError;
use crate::types::{FileStat, ThumbnailUpdate};
use crate::utils::config::{Lanes, ThumbnailConfig};
use crate::utils::tempfiles::{remove_if_exists, unique_temp_file};

fn thumbnail_args(config: &ThumbnailConfig, input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-hide_banner".into(),
        "-i".into(),
        input.into(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        format!("thumbnail,scale={}:{}", config.width, config.height).into(),
        "-threads".into(),
        "1".into(),
        output.into(),
    ]
}

/// Grab a representative frame of `input` as PNG. The temp file is removed on every path.
pub fn generate(
    tools: &Tools,
    config: &ThumbnailConfig,
    id: &str,
    input: &Path,
) -> Result<ThumbnailUpdate, ScanError> {
    let tmp = unique_temp_file("png");
    let result = (|| -> Result<ThumbnailUpdate, ScanError> {
        tools.run(Lanes::THUMBNAIL, &tools.ffmpeg, &thumbnail_args(config, input, &tmp))?;
        let png = std::fs::read(&tmp).map_err(|e| ScanError::io("read thumbnail", e))?;
        let stat = FileStat::read(&tmp).map_err(|e| ScanError::io("stat thumbnail", e))?;
        Ok(ThumbnailUpdate {
            display_id: id.to_string(),
            png,
            time_ms: stat.mtime_ms,
        })
    })();
    let _ = remove_if_exists(&tmp);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_uses_config() {
        let cfg = ThumbnailConfig {
            width: 320,
            height: -1,
        };
        let args = thumbnail_args(&cfg, Path::new("/m/a.mov"), Path::new("/tmp/t.png"));
        assert!(args.contains(&OsString::from("thumbnail,scale=320:-1")));
        assert_eq!(args.last(), Some(&OsString::from("/tmp/t.png")));
    }
}
