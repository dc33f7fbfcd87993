use crate::format;
use crate::jobs::{ItemFailure, Job, JobStatus, TranscriptLink};
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub schema_version: u32,
    pub job_id: String,
    pub url: String,
    pub is_playlist: bool,
    pub quality: String,
    pub container_format: String,
    pub audio_only: bool,
    pub transcribe: bool,
    pub format_expression: Option<String>,
    pub output_directory: PathBuf,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: JobStatus,
    pub outcome: ManifestOutcome,
    pub downloaded_items: Vec<PathBuf>,
    pub transcripts: Vec<TranscriptLink>,
    pub failures: Vec<ItemFailure>,
    pub notices: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ManifestOutcome {
    pub downloaded: usize,
    pub transcribed: usize,
    pub failed_items: usize,
    pub download_succeeded: bool,
    pub transcription_attempted: bool,
}

impl JobManifest {
    pub fn from_job(job: &Job) -> Self {
        let request = &job.request;
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            job_id: job.id.clone(),
            url: request.url.clone(),
            is_playlist: request.is_playlist,
            quality: request.quality.label().to_string(),
            container_format: request.container_format.extension().to_string(),
            audio_only: request.audio_only,
            transcribe: request.transcribe,
            format_expression: format::resolve(request).ok().map(|s| s.expression),
            output_directory: job.output_directory.clone(),
            started_at: job.started_at.to_rfc3339(),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
            status: job.status,
            outcome: ManifestOutcome {
                downloaded: job.downloaded_items.len(),
                transcribed: job.transcripts.len(),
                failed_items: job.failures.len(),
                download_succeeded: !job.downloaded_items.is_empty(),
                transcription_attempted: request.transcribe && !job.downloaded_items.is_empty(),
            },
            downloaded_items: job.downloaded_items.clone(),
            transcripts: job.transcripts.clone(),
            failures: job.failures.clone(),
            notices: job.notices.clone(),
        }
    }
}

/// Writes `job_manifest.json` into the job's output directory.
pub fn write(job: &Job) -> Result<PathBuf> {
    let out_path = job.paths().manifest_path();
    write_manifest(&out_path, &JobManifest::from_job(job))
        .map_err(|e| EngineError::ReportWrite(format!("{}: {e}", out_path.display())))?;
    Ok(out_path)
}

fn write_manifest(out_path: &Path, manifest: &JobManifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(out_path, format!("{json}\n"))?;
    Ok(())
}

pub fn read(path: &Path) -> Result<JobManifest> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::filesystem(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}
