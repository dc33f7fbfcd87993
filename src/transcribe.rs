use crate::asr::SharedRecognizer;
use crate::config::EngineConfig;
use crate::jobs::{FailureStage, ItemFailure, Job, JobStatus, ProgressSink, TranscriptLink};
use crate::{transcript, EngineError, Result};
use chrono::Local;
use std::path::{Path, PathBuf};

pub const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "m4a", "aac", "ogg"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptionSummary {
    pub candidates: usize,
    pub transcribed: usize,
    pub failed: usize,
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Audio files directly inside `dir`, in directory listing order.
pub fn audio_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| EngineError::filesystem(dir, e))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EngineError::filesystem(dir, e))?.path();
        if path.is_file() && has_extension(&path, &AUDIO_EXTENSIONS) {
            out.push(path);
        }
    }
    Ok(out)
}

/// Transcribes every audio file in the job's output directory.
///
/// Nothing here fails the job. A failed file is recorded and the remaining
/// files are still processed; a `Succeeded` job drops to `PartiallyFailed`.
pub fn run(
    job: &mut Job,
    recognizer: &SharedRecognizer,
    config: &EngineConfig,
    sink: &dyn ProgressSink,
) -> TranscriptionSummary {
    let candidates = match audio_candidates(&job.output_directory) {
        Ok(c) => c,
        Err(e) => {
            job.notice(format!("transcription skipped: {e}"), sink);
            return TranscriptionSummary::default();
        }
    };

    let mut summary = TranscriptionSummary {
        candidates: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        job.notice(
            "No audio files found to transcribe. Use audio-only mode to transcribe the soundtrack."
                .to_string(),
            sink,
        );
        return summary;
    }

    let paths = job.paths();
    for audio in candidates {
        let document = paths.unique_transcript_path(&audio, |candidate| {
            candidate.exists() || job.transcripts.iter().any(|t| t.document_path == candidate)
        });
        job.log(
            "info",
            "transcribe_begin",
            serde_json::json!({ "audio": audio, "language_hint": config.language_hint() }),
        );
        let outcome = recognizer
            .transcribe(&audio, config.language_hint())
            .and_then(|t| {
                let name = audio
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                transcript::write_document(&t, &name, Local::now(), &document).map_err(
                    |e| match e {
                        EngineError::Io(io) => EngineError::filesystem(&document, io),
                        other => other,
                    },
                )?;
                Ok(t)
            });

        match outcome {
            Ok(t) => {
                job.log(
                    "info",
                    "transcribe_done",
                    serde_json::json!({
                        "audio": audio,
                        "document": document,
                        "language": t.language,
                        "segments": t.segments.len(),
                    }),
                );
                job.transcripts.push(TranscriptLink {
                    audio_path: audio,
                    document_path: document,
                });
                summary.transcribed += 1;
            }
            Err(e) => {
                job.record_failure(
                    ItemFailure {
                        stage: FailureStage::Transcription,
                        item: Some(audio),
                        message: e.to_string(),
                    },
                    sink,
                );
                summary.failed += 1;
            }
        }
    }

    if summary.failed > 0 && job.status == JobStatus::Succeeded {
        job.status = JobStatus::PartiallyFailed;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::SpeechRecognizer;
    use crate::progress::ProgressEvent;
    use crate::request::DownloadRequest;
    use crate::transcript::{Transcript, TranscriptSegment};

    struct Fixed;

    impl SpeechRecognizer for Fixed {
        fn transcribe(&mut self, audio_path: &Path, language_hint: Option<&str>) -> Result<Transcript> {
            if audio_path.to_string_lossy().contains("broken") {
                return Err(EngineError::Transcription {
                    path: audio_path.to_path_buf(),
                    message: "decoder error".to_string(),
                });
            }
            Ok(Transcript {
                language: language_hint.unwrap_or("und").to_string(),
                full_text: "ola".to_string(),
                segments: vec![TranscriptSegment {
                    start_seconds: 0.0,
                    end_seconds: 2.0,
                    text: "ola".to_string(),
                }],
            })
        }
    }

    fn fixed() -> SharedRecognizer {
        SharedRecognizer::new(|| Ok(Box::new(Fixed) as Box<dyn SpeechRecognizer>))
    }

    fn quiet(_: ProgressEvent) {}

    fn succeeded_job(dir: &Path) -> Job {
        let mut job = Job::new(
            DownloadRequest::new("https://example/x", dir),
            dir.to_path_buf(),
        );
        job.status = JobStatus::Succeeded;
        job
    }

    #[test]
    fn only_audio_extensions_are_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["talk.MP3", "clip.mp4", "notes.txt", "voice.ogg"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }
        std::fs::create_dir(dir.path().join("nested.wav")).expect("mkdir");
        let mut found: Vec<String> = audio_candidates(dir.path())
            .expect("scan")
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        found.sort();
        assert_eq!(found, vec!["talk.MP3".to_string(), "voice.ogg".to_string()]);
    }

    #[test]
    fn writes_one_document_per_audio_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("song.mp3"), b"x").expect("write");
        std::fs::write(dir.path().join("song.mp4"), b"x").expect("write");
        let mut job = succeeded_job(dir.path());

        let summary = run(&mut job, &fixed(), &EngineConfig::default(), &quiet);
        assert_eq!(summary.transcribed, 1);
        assert_eq!(job.transcripts.len(), 1);

        let doc_path = job
            .transcript_for(&dir.path().join("song.mp3"))
            .expect("linked");
        assert_eq!(doc_path, dir.path().join("song_transcript.txt"));
        let doc = std::fs::read_to_string(doc_path).expect("read");
        assert!(doc.contains("[00:00 - 00:02] ola"));
        assert!(doc.contains("Language: pt"));
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[test]
    fn shared_stems_get_separate_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("song.mp3"), b"x").expect("write");
        std::fs::write(dir.path().join("song.m4a"), b"x").expect("write");
        let mut job = succeeded_job(dir.path());

        let summary = run(&mut job, &fixed(), &EngineConfig::default(), &quiet);
        assert_eq!(summary.transcribed, 2);

        let mut documents: Vec<&PathBuf> = job.transcripts.iter().map(|t| &t.document_path).collect();
        documents.sort();
        documents.dedup();
        assert_eq!(documents.len(), 2);

        for link in &job.transcripts {
            let name = link.audio_path.file_name().unwrap().to_string_lossy().to_string();
            let doc = std::fs::read_to_string(&link.document_path).expect("read");
            assert!(doc.contains(&format!("File: {name}")), "{name} -> {doc}");
        }
    }

    #[test]
    fn a_failing_file_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("broken.mp3"), b"x").expect("write");
        std::fs::write(dir.path().join("fine.wav"), b"x").expect("write");
        let mut job = succeeded_job(dir.path());

        let summary = run(&mut job, &fixed(), &EngineConfig::default(), &quiet);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(job.transcripts.len(), 1);
        assert_eq!(job.status, JobStatus::PartiallyFailed);
        let failure = job
            .failures_in(FailureStage::Transcription)
            .next()
            .expect("failure");
        assert_eq!(failure.item.as_deref(), Some(dir.path().join("broken.mp3").as_path()));
    }

    #[test]
    fn no_candidates_leaves_a_notice() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("clip.mp4"), b"x").expect("write");
        let mut job = succeeded_job(dir.path());

        let summary = run(&mut job, &fixed(), &EngineConfig::default(), &quiet);
        assert_eq!(summary, TranscriptionSummary::default());
        assert_eq!(job.notices.len(), 1);
        assert!(job.notices[0].contains("audio-only"));
        assert_eq!(job.status, JobStatus::Succeeded);
    }
}
