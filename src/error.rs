use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid download configuration: {0}")]
    Configuration(String),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download failed: {0}")]
    Download(String),

    #[error("download finished but produced no files in {output_dir}")]
    NoOutputProduced { output_dir: PathBuf },

    #[error("transcription failed for {path}: {message}")]
    Transcription { path: PathBuf, message: String },

    #[error("failed to write job report: {0}")]
    ReportWrite(String),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Pipeline stage reported to the caller when this error ends a job.
    pub fn stage(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "format_policy",
            EngineError::Filesystem { .. } => "output_location",
            EngineError::Download(_)
            | EngineError::NoOutputProduced { .. }
            | EngineError::ExternalToolMissing { .. }
            | EngineError::ExternalToolFailed { .. } => "download",
            EngineError::Transcription { .. } => "transcription",
            EngineError::ReportWrite(_) => "report",
            EngineError::Json(_) | EngineError::Io(_) => "engine",
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::Transcription { .. } | EngineError::ReportWrite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_errors_are_not_fatal() {
        let err = EngineError::Transcription {
            path: PathBuf::from("a.mp3"),
            message: "boom".to_string(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.stage(), "transcription");
        assert!(!EngineError::ReportWrite("disk full".to_string()).is_fatal());
    }

    #[test]
    fn download_errors_are_fatal_and_keep_cause() {
        let err = EngineError::Download("HTTP Error 403: Forbidden".to_string());
        assert!(err.is_fatal());
        assert_eq!(err.stage(), "download");
        assert!(err.to_string().contains("403"));
    }
}
