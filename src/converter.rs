//! ffmpeg fallback conversion for downloads that arrive in the wrong
//! container. yt-dlp normally handles extraction itself; this only runs
//! when the expected output file is missing but a sibling exists.

use std::path::Path;

use log::{debug, info};
use tokio::process::Command;

use crate::errors::{AppError, Result};

pub struct AudioConverter {
    bitrate_kbps: u32,
}

impl AudioConverter {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }

    /// Converts `source` into `target` and removes the source on success.
    pub async fn convert(&self, source: &Path, target: &Path) -> Result<()> {
        let args = self.build_args(source, target);
        debug!("Running ffmpeg {:?}", args);

        let output = Command::new("ffmpeg")
            .args(&args)
            .output()
            .await
            .map_err(|e| AppError::Processing(format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Processing(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or("").trim()
            )));
        }
        if !target.exists() {
            return Err(AppError::File(format!(
                "ffmpeg reported success but {:?} is missing",
                target
            )));
        }

        tokio::fs::remove_file(source).await?;
        info!("Converted {:?} -> {:?}", source, target);
        Ok(())
    }

    fn build_args(&self, source: &Path, target: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-b:a".to_string(),
            format!("{}k", self.bitrate_kbps),
            target.to_string_lossy().into_owned(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn args_carry_bitrate_and_overwrite_flag() {
        let converter = AudioConverter::new(320);
        let args = converter.build_args(&PathBuf::from("in.webm"), &PathBuf::from("out.mp3"));
        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-b:a".to_string()));
        assert!(args.contains(&"320k".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp3"));
    }
}
