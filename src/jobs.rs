use crate::asr::SharedRecognizer;
use crate::config::EngineConfig;
use crate::paths::JobPaths;
use crate::progress::ProgressEvent;
use crate::request::DownloadRequest;
use crate::resolver::MediaResolver;
use crate::{download, format, paths, report, transcribe, EngineError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::PartiallyFailed => "partially_failed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::PartiallyFailed | JobStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Download,
    Transcription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: FailureStage,
    pub item: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLink {
    pub audio_path: PathBuf,
    pub document_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub request: DownloadRequest,
    pub output_directory: PathBuf,
    pub status: JobStatus,
    pub downloaded_items: Vec<PathBuf>,
    pub transcripts: Vec<TranscriptLink>,
    pub failures: Vec<ItemFailure>,
    pub notices: Vec<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Job {
    pub fn new(request: DownloadRequest, output_directory: PathBuf) -> Self {
        let started_at = Local::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!(
                "{}-{}",
                started_at.format(paths::JOB_DIR_TIMESTAMP_FORMAT),
                &suffix[..8]
            ),
            request,
            output_directory,
            status: JobStatus::Pending,
            downloaded_items: Vec::new(),
            transcripts: Vec::new(),
            failures: Vec::new(),
            notices: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn start(request: DownloadRequest) -> Result<Self> {
        request.validate()?;
        format::resolve(&request)?;
        let output_directory = paths::allocate(&request.destination_root)?;
        Ok(Self::new(request, output_directory))
    }

    pub fn paths(&self) -> JobPaths {
        JobPaths::new(self.output_directory.clone())
    }

    pub fn transcript_for(&self, audio_path: &Path) -> Option<&Path> {
        self.transcripts
            .iter()
            .find(|t| t.audio_path == audio_path)
            .map(|t| t.document_path.as_path())
    }

    pub fn failures_in(&self, stage: FailureStage) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    pub(crate) fn record_failure(&mut self, failure: ItemFailure, sink: &dyn ProgressSink) {
        let message = match &failure.item {
            Some(item) => format!("{}: {}", item.display(), failure.message),
            None => failure.message.clone(),
        };
        self.log(
            "warn",
            "item_failed",
            serde_json::json!({
                "stage": failure.stage,
                "item": failure.item,
                "message": failure.message,
            }),
        );
        sink.on_notice(&message);
        self.failures.push(failure);
    }

    pub(crate) fn notice(&mut self, message: String, sink: &dyn ProgressSink) {
        self.log("info", "notice", serde_json::json!({ "message": message }));
        sink.on_notice(&message);
        self.notices.push(message);
    }

    /// Appends one JSON line to the job log and mirrors it to `tracing`.
    ///
    /// Logging never fails a job; write errors are dropped.
    pub fn log(&self, level: &str, event: &str, data: serde_json::Value) {
        match level {
            "error" => error!(job_id = %self.id, event = event, data = %data, "job event"),
            "warn" => warn!(job_id = %self.id, event = event, data = %data, "job event"),
            _ => info!(job_id = %self.id, event = event, data = %data, "job event"),
        }

        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "job_id": self.id,
            "level": level,
            "event": event,
            "data": data,
        })
        .to_string();
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths().log_path())
            .and_then(|mut f| f.write_all(format!("{line}\n").as_bytes()));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub output_directory: Option<PathBuf>,
    pub downloaded_items: Vec<PathBuf>,
    pub transcripts: Vec<TranscriptLink>,
    pub failures: Vec<ItemFailure>,
    pub notices: Vec<String>,
    pub report_path: Option<PathBuf>,
    /// Set when a fatal error ended the job.
    pub error: Option<String>,
    pub error_stage: Option<String>,
}

impl JobResult {
    fn from_job(job: &Job, report_path: Option<PathBuf>, fatal: Option<&EngineError>) -> Self {
        Self {
            job_id: Some(job.id.clone()),
            status: job.status,
            output_directory: Some(job.output_directory.clone()),
            downloaded_items: job.downloaded_items.clone(),
            transcripts: job.transcripts.clone(),
            failures: job.failures.clone(),
            notices: job.notices.clone(),
            report_path,
            error: fatal.map(|e| e.to_string()),
            error_stage: fatal.map(|e| e.stage().to_string()),
        }
    }

    fn not_started(err: &EngineError) -> Self {
        Self {
            job_id: None,
            status: JobStatus::Failed,
            output_directory: None,
            downloaded_items: Vec::new(),
            transcripts: Vec::new(),
            failures: Vec::new(),
            notices: Vec::new(),
            report_path: None,
            error: Some(err.to_string()),
            error_stage: Some(err.stage().to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Receives job progress. Called synchronously from the transfer loop, so it must return quickly.
pub trait ProgressSink {
    fn on_progress(&self, event: ProgressEvent);

    fn on_notice(&self, _message: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent),
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    Progress(ProgressEvent),
    Notice { message: String },
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<JobEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.tx.send(JobEvent::Progress(event));
    }

    fn on_notice(&self, message: &str) {
        let _ = self.tx.send(JobEvent::Notice {
            message: message.to_string(),
        });
    }
}

pub fn run_job(
    request: DownloadRequest,
    resolver: &dyn MediaResolver,
    recognizer: &SharedRecognizer,
    config: &EngineConfig,
    sink: &dyn ProgressSink,
) -> JobResult {
    match begin(request, sink) {
        Ok(mut job) => run(&mut job, resolver, recognizer, config, sink),
        Err(e) => JobResult::not_started(&e),
    }
}

fn begin(request: DownloadRequest, sink: &dyn ProgressSink) -> Result<Job> {
    Job::start(request).inspect_err(|e| {
        error!(stage = e.stage(), error = %e, "job could not start");
        sink.on_notice(&format!("{} failed: {e}", e.stage()));
    })
}

/// Drives an allocated job to a terminal status. Never returns an error:
/// fatal problems end up in `JobResult::error`.
pub fn run(
    job: &mut Job,
    resolver: &dyn MediaResolver,
    recognizer: &SharedRecognizer,
    config: &EngineConfig,
    sink: &dyn ProgressSink,
) -> JobResult {
    job.status = JobStatus::Running;
    job.log(
        "info",
        "job_started",
        serde_json::json!({
            "url": job.request.url,
            "playlist": job.request.is_playlist,
            "quality": job.request.quality.label(),
            "format": job.request.container_format.extension(),
            "audio_only": job.request.audio_only,
            "transcribe": job.request.transcribe,
            "output_directory": job.output_directory,
        }),
    );

    if let Err(e) = download::run(job, resolver, config, sink) {
        return fail(job, e, sink);
    }

    if job.request.transcribe {
        transcribe::run(job, recognizer, config, sink);
    }

    job.finished_at = Some(Local::now());
    let report_path = match report::write(job) {
        Ok(path) => Some(path),
        Err(e) => {
            job.log(
                "warn",
                "report_write_failed",
                serde_json::json!({ "error": e.to_string() }),
            );
            sink.on_notice(&e.to_string());
            None
        }
    };

    job.log(
        "info",
        "job_finished",
        serde_json::json!({
            "status": job.status.as_str(),
            "downloaded": job.downloaded_items.len(),
            "transcripts": job.transcripts.len(),
            "failures": job.failures.len(),
        }),
    );
    JobResult::from_job(job, report_path, None)
}

fn fail(job: &mut Job, err: EngineError, sink: &dyn ProgressSink) -> JobResult {
    job.status = JobStatus::Failed;
    job.finished_at = Some(Local::now());
    job.log(
        "error",
        "job_failed",
        serde_json::json!({ "stage": err.stage(), "error": err.to_string() }),
    );
    sink.on_notice(&format!("{} failed: {err}", err.stage()));
    JobResult::from_job(job, None, Some(&err))
}

type StartedSlot = Arc<Mutex<Option<(String, PathBuf)>>>;

#[derive(Debug)]
pub struct JobHandle {
    events: mpsc::Receiver<JobEvent>,
    worker: thread::JoinHandle<JobResult>,
    started: StartedSlot,
}

impl JobHandle {
    pub fn events(&self) -> mpsc::Iter<'_, JobEvent> {
        self.events.iter()
    }

    pub fn wait(self) -> JobResult {
        drop(self.events);
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => {
                let err = EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "job worker panicked",
                ));
                let mut result = JobResult::not_started(&err);
                let started = self
                    .started
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                if let Some((job_id, output_directory)) = started {
                    result.job_id = Some(job_id);
                    result.output_directory = Some(output_directory);
                }
                result
            }
        }
    }
}

/// Starts `request` on a dedicated worker thread. Cancellation is not supported.
pub fn spawn_job(
    request: DownloadRequest,
    resolver: Arc<dyn MediaResolver>,
    recognizer: SharedRecognizer,
    config: EngineConfig,
) -> JobHandle {
    let (tx, rx) = mpsc::channel();
    let started = StartedSlot::default();
    let slot = started.clone();
    let worker = thread::spawn(move || {
        let sink = ChannelSink::new(tx);
        let mut job = match begin(request, &sink) {
            Ok(job) => job,
            Err(e) => return JobResult::not_started(&e),
        };
        *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some((job.id.clone(), job.output_directory.clone()));
        run(&mut job, resolver.as_ref(), &recognizer, &config, &sink)
    });
    JobHandle {
        events: rx,
        worker,
        started,
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
