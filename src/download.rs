use crate::config::EngineConfig;
use crate::jobs::{FailureStage, ItemFailure, Job, JobStatus, ProgressSink};
use crate::paths::JobPaths;
use crate::progress::{ProgressRelay, RawProgress};
use crate::resolver::{DownloadPlan, MediaResolver};
use crate::{format, EngineError, Result};
use std::path::{Path, PathBuf};

/// Fetches the job's media into its output directory.
///
/// Exactly one resolver attempt is made. On success the job is `Succeeded`, or
/// `PartiallyFailed` when some playlist items were skipped; every error
/// returned here is fatal to the job.
pub fn run(
    job: &mut Job,
    resolver: &dyn MediaResolver,
    config: &EngineConfig,
    sink: &dyn ProgressSink,
) -> Result<()> {
    let selection = format::resolve(&job.request)?;
    config.validate()?;

    let paths = job.paths();
    let plan = DownloadPlan {
        url: job.request.url.trim().to_string(),
        selection,
        output_template: paths.output_template_path(config.output_template.trim()),
        subtitle_langs: config.subtitle_langs.clone(),
        ignore_item_errors: job.request.is_playlist,
        allow_playlist: job.request.is_playlist,
        timeout_secs: config.download_timeout_secs,
    };
    job.log(
        "info",
        "download_begin",
        serde_json::json!({
            "format": plan.selection.expression,
            "merge_format": plan.selection.merge_format.extension(),
            "extract_audio": plan.selection.extract_audio.map(|c| c.extension()),
            "template": plan.output_template,
            "ignore_item_errors": plan.ignore_item_errors,
        }),
    );

    let mut relay = ProgressRelay::new();
    let outcome = resolver
        .download(&plan, &mut |raw| {
            if let Some(event) = relay.accept(raw) {
                sink.on_progress(event);
            }
        })
        .map_err(|e| match e.stage() {
            "download" => e,
            _ => EngineError::Download(e.to_string()),
        })?;

    // Post-processing reports Merging last; close the stream with Finished.
    if let Some(event) = relay.accept(RawProgress::finished()) {
        sink.on_progress(event);
    }

    let output_root = JobPaths::new(absolute_or_same(&job.output_directory));
    let mut downloaded: Vec<PathBuf> = Vec::new();
    for file in outcome.files {
        let file = absolute_or_same(&file);
        if !output_root.contains(&file) {
            job.log(
                "warn",
                "download_outside_output_dir",
                serde_json::json!({ "path": file }),
            );
            continue;
        }
        if file.is_file() && !downloaded.contains(&file) {
            downloaded.push(file);
        }
    }

    for message in outcome.item_failures {
        job.record_failure(
            ItemFailure {
                stage: FailureStage::Download,
                item: None,
                message,
            },
            sink,
        );
    }

    job.downloaded_items = downloaded;
    if job.downloaded_items.is_empty() {
        return Err(EngineError::NoOutputProduced {
            output_dir: job.output_directory.clone(),
        });
    }

    job.status = if job.failures_in(FailureStage::Download).next().is_some() {
        JobStatus::PartiallyFailed
    } else {
        JobStatus::Succeeded
    };
    job.log(
        "info",
        "download_done",
        serde_json::json!({
            "files": job.downloaded_items,
            "status": job.status.as_str(),
        }),
    );
    Ok(())
}

fn absolute_or_same(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Phase, ProgressEvent, RawProgress};
    use crate::request::DownloadRequest;
    use crate::resolver::{DownloadOutcome, MediaInfo};
    use std::cell::RefCell;
    use std::path::Path;

    struct FileWriter {
        names: Vec<&'static str>,
        failures: Vec<&'static str>,
    }

    impl MediaResolver for FileWriter {
        fn probe(&self, _url: &str) -> Result<MediaInfo> {
            Err(EngineError::Download("not used".to_string()))
        }

        fn download(
            &self,
            plan: &DownloadPlan,
            on_progress: &mut dyn FnMut(RawProgress),
        ) -> Result<DownloadOutcome> {
            let dir = plan.output_template.parent().expect("template dir").to_path_buf();
            on_progress(RawProgress::downloading(50, Some(100)));
            on_progress(RawProgress::downloading(50, Some(100)));
            on_progress(RawProgress::finished());
            let mut files: Vec<PathBuf> = Vec::new();
            for name in &self.names {
                let path = dir.join(name);
                std::fs::write(&path, b"media").expect("write");
                files.push(path);
            }
            files.push(Path::new("/elsewhere/stray.mp4").to_path_buf());
            Ok(DownloadOutcome {
                files,
                item_failures: self.failures.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<ProgressEvent>>,
        notices: RefCell<Vec<String>>,
    }

    impl ProgressSink for Recorder {
        fn on_progress(&self, event: ProgressEvent) {
            self.events.borrow_mut().push(event);
        }

        fn on_notice(&self, message: &str) {
            self.notices.borrow_mut().push(message.to_string());
        }
    }

    fn job_in(dir: &Path, playlist: bool) -> Job {
        let mut request = DownloadRequest::new("https://example/watch?v=X", dir);
        request.is_playlist = playlist;
        Job::new(request, dir.to_path_buf())
    }

    #[test]
    fn keeps_files_inside_output_dir_and_dedups_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job_in(dir.path(), false);
        let resolver = FileWriter {
            names: vec!["clip.mp4"],
            failures: vec![],
        };
        let sink = Recorder::default();
        run(&mut job, &resolver, &EngineConfig::default(), &sink).expect("download");

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.downloaded_items, vec![dir.path().join("clip.mp4")]);
        let events = sink.events.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].percent, 50.0);
        assert_eq!(events[1].phase, Phase::Finished);
    }

    #[test]
    fn item_failures_mark_job_partially_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job_in(dir.path(), true);
        let resolver = FileWriter {
            names: vec!["a.mp4", "c.mp4"],
            failures: vec!["[youtube] b: Video unavailable"],
        };
        let sink = Recorder::default();
        run(&mut job, &resolver, &EngineConfig::default(), &sink).expect("download");

        assert_eq!(job.status, JobStatus::PartiallyFailed);
        assert_eq!(job.downloaded_items.len(), 2);
        assert_eq!(job.failures_in(FailureStage::Download).count(), 1);
        assert_eq!(sink.notices.borrow().len(), 1);
    }

    #[test]
    fn no_files_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job_in(dir.path(), false);
        let resolver = FileWriter {
            names: vec![],
            failures: vec![],
        };
        let err = run(&mut job, &resolver, &EngineConfig::default(), &Recorder::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::NoOutputProduced { .. }));
    }

    #[test]
    fn resolver_io_errors_are_reported_as_download_errors() {
        struct Broken;
        impl MediaResolver for Broken {
            fn probe(&self, _url: &str) -> Result<MediaInfo> {
                Err(EngineError::Download("not used".to_string()))
            }
            fn download(
                &self,
                _plan: &DownloadPlan,
                _on_progress: &mut dyn FnMut(RawProgress),
            ) -> Result<DownloadOutcome> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into())
            }
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job_in(dir.path(), false);
        let err = run(&mut job, &Broken, &EngineConfig::default(), &Recorder::default())
            .unwrap_err();
        assert_eq!(err.stage(), "download");
        assert!(err.to_string().contains("pipe closed"));
    }
}
