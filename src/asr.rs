use crate::config::EngineConfig;
use crate::transcript::{Transcript, TranscriptSegment};
use crate::{cmd, EngineError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

const WHISPER_TOOL: &str = "whisper";

pub trait SpeechRecognizer: Send {
    fn transcribe(&mut self, audio_path: &Path, language_hint: Option<&str>) -> Result<Transcript>;
}

type RecognizerFactory = dyn Fn() -> Result<Box<dyn SpeechRecognizer>> + Send + Sync;

/// Process-wide recognizer handle.
///
/// The wrapped recognizer is built on first use and then reused for every file
/// of every job. Calls are serialized: one transcription runs at a time.
#[derive(Clone)]
pub struct SharedRecognizer {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    factory: Box<RecognizerFactory>,
    slot: Mutex<Option<Box<dyn SpeechRecognizer>>>,
}

impl SharedRecognizer {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn SpeechRecognizer>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SharedInner {
                factory: Box::new(factory),
                slot: Mutex::new(None),
            }),
        }
    }

    pub fn whisper_cli(config: &EngineConfig) -> Self {
        let program = config.whisper_program.clone();
        let model = config.whisper_model.clone();
        Self::new(move || {
            let recognizer = WhisperCliRecognizer::new(program.as_deref(), &model)?;
            Ok(Box::new(recognizer) as Box<dyn SpeechRecognizer>)
        })
    }

    pub fn transcribe(&self, audio_path: &Path, language_hint: Option<&str>) -> Result<Transcript> {
        let mut slot = self
            .inner
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            info!("initializing speech recognizer");
            *slot = Some((self.inner.factory)()?);
        }
        match slot.as_mut() {
            Some(recognizer) => recognizer.transcribe(audio_path, language_hint),
            None => Err(EngineError::Transcription {
                path: audio_path.to_path_buf(),
                message: "speech recognizer is not available".to_string(),
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Drops the loaded recognizer; the next call builds a fresh one.
    pub fn shutdown(&self) {
        let mut slot = self
            .inner
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }
}

impl fmt::Debug for SharedRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRecognizer")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Runs the `whisper` command line tool and reads its JSON output.
#[derive(Debug, Clone)]
pub struct WhisperCliRecognizer {
    program: String,
    model: String,
    scratch_root: PathBuf,
}

impl WhisperCliRecognizer {
    pub fn new(program: Option<&str>, model: &str) -> Result<Self> {
        let program = program.unwrap_or(WHISPER_TOOL).to_string();
        let mut probe = cmd::command(&program);
        probe.arg("--help");
        cmd::run_captured(WHISPER_TOOL, &mut probe)?;
        Ok(Self {
            program,
            model: model.to_string(),
            scratch_root: std::env::temp_dir(),
        })
    }
}

impl SpeechRecognizer for WhisperCliRecognizer {
    fn transcribe(&mut self, audio_path: &Path, language_hint: Option<&str>) -> Result<Transcript> {
        let scratch = self
            .scratch_root
            .join(format!("vidscribe-asr-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&scratch)?;

        let mut run = cmd::command(&self.program);
        run.arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(&scratch)
            .args(["--verbose", "False"]);
        if let Some(lang) = language_hint {
            run.arg("--language").arg(lang);
        }
        debug!(audio = %audio_path.display(), model = %self.model, "running whisper");

        let result = cmd::run_captured(WHISPER_TOOL, &mut run).and_then(|_| {
            let stem = audio_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let bytes = std::fs::read(scratch.join(format!("{stem}.json")))?;
            let parsed: WhisperJson = serde_json::from_slice(&bytes)?;
            Ok(parsed.into_transcript(language_hint))
        });
        let _ = std::fs::remove_dir_all(&scratch);
        result
    }
}

#[derive(Debug, Deserialize)]
struct WhisperJson {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperJsonSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperJson {
    fn into_transcript(self, language_hint: Option<&str>) -> Transcript {
        let language = self
            .language
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| language_hint.map(str::to_string))
            .unwrap_or_else(|| "und".to_string());
        Transcript {
            language,
            full_text: self.text.trim().to_string(),
            segments: normalize_segments(
                self.segments
                    .into_iter()
                    .map(|s| (s.start, s.end, s.text))
                    .collect(),
            ),
        }
    }
}

/// Trims text, drops empty segments and clamps times so `0 <= start <= end`.
pub fn normalize_segments(raw: Vec<(f64, f64, String)>) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    for (start, end, text) in raw {
        let text = text.trim().to_string();
        if text.is_empty() {
            continue;
        }
        let start_seconds = if start.is_finite() { start.max(0.0) } else { 0.0 };
        let end_seconds = if end.is_finite() { end.max(start_seconds) } else { start_seconds };
        segments.push(TranscriptSegment {
            start_seconds,
            end_seconds,
            text,
        });
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoRecognizer;

    impl SpeechRecognizer for EchoRecognizer {
        fn transcribe(&mut self, audio_path: &Path, language_hint: Option<&str>) -> Result<Transcript> {
            Ok(Transcript {
                language: language_hint.unwrap_or("und").to_string(),
                full_text: audio_path.to_string_lossy().to_string(),
                segments: Vec::new(),
            })
        }
    }

    #[test]
    fn shared_recognizer_builds_once_and_reuses() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let shared = SharedRecognizer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoRecognizer) as Box<dyn SpeechRecognizer>)
        });
        assert!(!shared.is_initialized());

        let clone = shared.clone();
        shared.transcribe(Path::new("a.mp3"), Some("pt")).expect("first");
        clone.transcribe(Path::new("b.mp3"), None).expect("second");
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(shared.is_initialized());

        shared.shutdown();
        assert!(!clone.is_initialized());
        clone.transcribe(Path::new("c.mp3"), None).expect("third");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_construction_is_retried_on_next_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let shared = SharedRecognizer::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::ExternalToolMissing {
                    tool: "whisper".to_string(),
                })
            } else {
                Ok(Box::new(EchoRecognizer) as Box<dyn SpeechRecognizer>)
            }
        });
        assert!(shared.transcribe(Path::new("a.mp3"), None).is_err());
        assert!(shared.transcribe(Path::new("a.mp3"), None).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_callers_share_one_instance() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let shared = SharedRecognizer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoRecognizer) as Box<dyn SpeechRecognizer>)
        });
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    shared
                        .transcribe(Path::new(&format!("{i}.mp3")), None)
                        .expect("transcribe")
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn whisper_json_maps_to_transcript() {
        let raw = r#"{
            "text": " ola mundo",
            "language": "pt",
            "segments": [
                {"id": 0, "start": 0.0, "end": 2.0, "text": " ola"},
                {"id": 1, "start": 2.0, "end": 1.5, "text": " mundo"},
                {"id": 2, "start": 3.0, "end": 4.0, "text": "   "}
            ]
        }"#;
        let parsed: WhisperJson = serde_json::from_str(raw).expect("parse");
        let t = parsed.into_transcript(None);
        assert_eq!(t.language, "pt");
        assert_eq!(t.full_text, "ola mundo");
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[0].text, "ola");
        assert_eq!(t.segments[1].start_seconds, 2.0);
        assert_eq!(t.segments[1].end_seconds, 2.0);
    }

    #[test]
    fn missing_language_falls_back_to_hint() {
        let parsed: WhisperJson = serde_json::from_str(r#"{"text": "hi", "segments": []}"#).expect("parse");
        assert_eq!(parsed.into_transcript(Some("en")).language, "en");
    }
}
