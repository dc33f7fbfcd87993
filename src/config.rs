use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_LANGUAGE_HINT: &str = "pt";
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
pub const DEFAULT_WHISPER_MODEL: &str = "base";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Language passed to the recognizer. `None` lets the recognizer detect it.
    pub language_hint: Option<String>,
    /// Subtitle languages requested alongside the media (primary first).
    pub subtitle_langs: Vec<String>,
    /// File naming template, relative to the job's output directory.
    pub output_template: String,
    pub yt_dlp_program: Option<String>,
    pub whisper_program: Option<String>,
    pub whisper_model: String,
    /// 0 disables the timeout.
    pub download_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language_hint: Some(DEFAULT_LANGUAGE_HINT.to_string()),
            subtitle_langs: vec![DEFAULT_LANGUAGE_HINT.to_string(), "en".to_string()],
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            yt_dlp_program: None,
            whisper_program: None,
            whisper_model: DEFAULT_WHISPER_MODEL.to_string(),
            download_timeout_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn language_hint(&self) -> Option<&str> {
        self.language_hint
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        let template = self.output_template.trim();
        if template.is_empty() {
            return Err(EngineError::Configuration(
                "output_template is empty".to_string(),
            ));
        }
        // The template must stay inside the job directory.
        let template_path = Path::new(template);
        if template_path.is_absolute()
            || template_path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(EngineError::Configuration(format!(
                "output_template must be relative to the job directory: {template}"
            )));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let bytes = std::fs::read(path)?;
    let parsed: EngineConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to parse engine config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&dir.path().join("config.json")).expect("load");
        assert_eq!(cfg.language_hint(), Some("pt"));
        assert_eq!(cfg.subtitle_langs, vec!["pt", "en"]);
        assert_eq!(cfg.output_template, "%(title)s.%(ext)s");
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = EngineConfig::default();
        cfg.language_hint = None;
        cfg.yt_dlp_program = Some("/opt/yt-dlp".to_string());
        save_config(&path, &cfg).expect("save");

        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded.language_hint(), None);
        assert_eq!(loaded.yt_dlp_program.as_deref(), Some("/opt/yt-dlp"));
    }

    #[test]
    fn partial_file_falls_back_per_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "whisper_model": "small" }"#).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded.whisper_model, "small");
        assert_eq!(loaded.language_hint(), Some("pt"));
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            load_config(&path),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn template_escaping_the_job_directory_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.output_template = "../%(title)s.%(ext)s".to_string();
        assert!(cfg.validate().is_err());
    }
}
