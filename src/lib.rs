pub mod asr;
pub mod cmd;
pub mod config;
pub mod download;
mod error;
pub mod format;
pub mod jobs;
pub mod paths;
pub mod progress;
pub mod report;
pub mod request;
pub mod resolver;
pub mod transcribe;
pub mod transcript;

pub use error::{EngineError, Result};
pub use jobs::{run_job, spawn_job, JobEvent, JobHandle, JobResult, JobStatus, ProgressSink};
pub use request::{ContainerFormat, DownloadRequest, Quality};
