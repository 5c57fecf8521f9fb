use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{AppError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub max_concurrent_downloads: usize,
    pub download_quality: AudioQuality,
    pub file_format: AudioFormat,
    pub log_level: String,
    pub retry_attempts: u32,
    pub timeout_seconds: u64,
    pub safe_mode: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    #[serde(rename = "128kbps")]
    Kbps128,
    #[serde(rename = "256kbps")]
    Kbps256,
    #[serde(rename = "320kbps")]
    Kbps320,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads")),
            max_concurrent_downloads: 5,
            download_quality: AudioQuality::Kbps320,
            file_format: AudioFormat::Mp3,
            log_level: "info".to_string(),
            retry_attempts: 3,
            timeout_seconds: 30,
            safe_mode: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("could not find config directory".to_string()))?;
        Ok(config_dir.join("spotfetch").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_concurrent_downloads) {
            return Err(AppError::Validation(format!(
                "max_concurrent_downloads must be 1-10, got {}",
                self.max_concurrent_downloads
            )));
        }
        if self.retry_attempts > 10 {
            return Err(AppError::Validation(format!(
                "retry_attempts must be 0-10, got {}",
                self.retry_attempts
            )));
        }
        if !(5..=300).contains(&self.timeout_seconds) {
            return Err(AppError::Validation(format!(
                "timeout_seconds must be 5-300, got {}",
                self.timeout_seconds
            )));
        }
        Ok(())
    }

    pub fn quality_bitrate(&self) -> u32 {
        match self.download_quality {
            AudioQuality::Kbps128 => 128,
            AudioQuality::Kbps256 => 256,
            AudioQuality::Kbps320 => 320,
        }
    }

    pub fn format_extension(&self) -> &'static str {
        match self.file_format {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
        }
    }
}

impl FromStr for AudioQuality {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_end_matches("kbps") {
            "128" => Ok(AudioQuality::Kbps128),
            "256" => Ok(AudioQuality::Kbps256),
            "320" => Ok(AudioQuality::Kbps320),
            other => Err(AppError::Validation(format!(
                "unsupported quality '{}' (expected 128, 256 or 320)",
                other
            ))),
        }
    }
}

impl FromStr for AudioFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "m4a" => Ok(AudioFormat::M4a),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(AppError::Validation(format!(
                "unsupported format '{}' (expected mp3, m4a or flac)",
                other
            ))),
        }
    }
}
