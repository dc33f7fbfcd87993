use crate::request::{ContainerFormat, DownloadRequest, Quality};
use crate::{EngineError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const FALLBACK_AUDIO_CONTAINER: ContainerFormat = ContainerFormat::Mp3;
const FALLBACK_VIDEO_CONTAINER: ContainerFormat = ContainerFormat::Mp4;

static NON_DIGITS: OnceLock<Regex> = OnceLock::new();

/// Stream selection handed to the resolver, derived from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatSelection {
    pub expression: String,
    pub merge_format: ContainerFormat,
    /// Set for audio-only requests: the resolver converts the chosen stream into this container.
    pub extract_audio: Option<ContainerFormat>,
    pub height_limit: Option<u32>,
}

pub fn resolve(request: &DownloadRequest) -> Result<FormatSelection> {
    if request.audio_only {
        let container = if request.container_format.is_audio() {
            request.container_format
        } else {
            FALLBACK_AUDIO_CONTAINER
        };
        return Ok(FormatSelection {
            expression: "bestaudio/best".to_string(),
            merge_format: container,
            extract_audio: Some(container),
            height_limit: None,
        });
    }

    let merge_format = if request.container_format.is_audio() {
        FALLBACK_VIDEO_CONTAINER
    } else {
        request.container_format
    };

    let (expression, height_limit) = match &request.quality {
        Quality::Best => ("bestvideo+bestaudio/best".to_string(), None),
        Quality::Worst => ("worstvideo+worstaudio/worst".to_string(), None),
        Quality::Height(label) => {
            let height = parse_height(label)?;
            (
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]"),
                Some(height),
            )
        }
    };

    Ok(FormatSelection {
        expression,
        merge_format,
        extract_audio: None,
        height_limit,
    })
}

/// Extracts the height from a quality label by dropping every non-digit (`"720p"` -> 720).
/// Only the standard heights (2160 down to 240) are accepted.
pub fn parse_height(label: &str) -> Result<u32> {
    let re = NON_DIGITS.get_or_init(|| Regex::new(r"\D").expect("static regex"));
    let digits = re.replace_all(label, "");
    if digits.is_empty() {
        return Err(EngineError::Configuration(format!(
            "quality label has no height digits: {label:?}"
        )));
    }
    match digits.parse::<u32>() {
        Ok(height) if Quality::STANDARD_LABELS.contains(&format!("{height}p").as_str()) => {
            Ok(height)
        }
        Ok(height) => Err(EngineError::Configuration(format!(
            "quality label {label:?} resolves to unsupported height {height}"
        ))),
        Err(_) => Err(EngineError::Configuration(format!(
            "quality label height is out of range: {label:?}"
        ))),
    }
}
