use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Best,
    Worst,
    /// Explicit height label such as `720p`.
    Height(String),
}

impl Quality {
    pub const STANDARD_LABELS: [&'static str; 9] = [
        "best", "worst", "2160p", "1440p", "1080p", "720p", "480p", "360p", "240p",
    ];

    pub fn label(&self) -> &str {
        match self {
            Quality::Best => "best",
            Quality::Worst => "worst",
            Quality::Height(label) => label,
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Best
    }
}

impl FromStr for Quality {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        let mut label = value.trim().to_ascii_lowercase();
        if !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()) {
            label.push('p');
        }
        match label.as_str() {
            "" => Err(EngineError::Configuration("quality is empty".to_string())),
            "best" => Ok(Quality::Best),
            "worst" => Ok(Quality::Worst),
            other if Quality::STANDARD_LABELS.contains(&other) => Ok(Quality::Height(other.to_string())),
            _ => Err(EngineError::Configuration(format!(
                "unsupported quality {value:?}, expected one of {}",
                Quality::STANDARD_LABELS.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Webm,
    Mkv,
    Avi,
    Mp3,
    Wav,
    Flac,
    M4a,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 8] = [
        ContainerFormat::Mp4,
        ContainerFormat::Webm,
        ContainerFormat::Mkv,
        ContainerFormat::Avi,
        ContainerFormat::Mp3,
        ContainerFormat::Wav,
        ContainerFormat::Flac,
        ContainerFormat::M4a,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Wav => "wav",
            ContainerFormat::Flac => "flac",
            ContainerFormat::M4a => "m4a",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            ContainerFormat::Mp3 | ContainerFormat::Wav | ContainerFormat::Flac | ContainerFormat::M4a
        )
    }
}

impl Default for ContainerFormat {
    fn default() -> Self {
        ContainerFormat::Mp4
    }
}

impl FromStr for ContainerFormat {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        let needle = value.trim().trim_start_matches('.').to_ascii_lowercase();
        ContainerFormat::ALL
            .into_iter()
            .find(|f| f.extension() == needle)
            .ok_or_else(|| EngineError::Configuration(format!("unsupported container format: {value}")))
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// What the caller asked for. Never mutated once a job starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub is_playlist: bool,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub container_format: ContainerFormat,
    #[serde(default)]
    pub audio_only: bool,
    #[serde(default)]
    pub transcribe: bool,
    pub destination_root: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            is_playlist: false,
            quality: Quality::Best,
            container_format: ContainerFormat::Mp4,
            audio_only: false,
            transcribe: false,
            destination_root: destination_root.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(EngineError::Configuration("url is empty".to_string()));
        }
        Ok(())
    }
}
