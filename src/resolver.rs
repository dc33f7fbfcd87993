use crate::config::EngineConfig;
use crate::format::FormatSelection;
use crate::progress::{RawProgress, TransferStatus};
use crate::{cmd, EngineError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const YT_DLP_TOOL: &str = "yt-dlp";
const PROGRESS_MARKER: &str = "[vidscribe-progress]";
const FILE_MARKER: &str = "[vidscribe-file]";
const ERROR_PREFIX: &str = "ERROR:";
const MAX_ERROR_DETAIL_CHARS: usize = 2000;

pub trait MediaResolver: Send + Sync {
    fn probe(&self, url: &str) -> Result<MediaInfo>;

    /// Calls `on_progress` from within the blocking call, in arrival order.
    fn download(
        &self,
        plan: &DownloadPlan,
        on_progress: &mut dyn FnMut(RawProgress),
    ) -> Result<DownloadOutcome>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_secs: Option<f64>,
    pub view_count: Option<u64>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
    pub streams: Vec<StreamDescriptor>,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub format_id: String,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
}

impl MediaInfo {
    pub fn is_playlist(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.has_video)
    }

    pub fn audio_only_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.has_audio && !s.has_video)
    }

    pub fn best_video(&self) -> Option<&StreamDescriptor> {
        self.video_streams().max_by_key(|s| s.height.unwrap_or(0))
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let title = self.title.as_deref().unwrap_or("Untitled");
        let mut lines = Vec::new();
        if self.is_playlist() {
            lines.push(format!("Playlist: {title}"));
            lines.push(format!("Videos: {}", self.entries.len()));
            for (i, entry) in self.entries.iter().take(3).enumerate() {
                lines.push(format!(
                    "  {}. {} ({})",
                    i + 1,
                    entry.title.as_deref().unwrap_or("Untitled"),
                    format_duration(entry.duration_secs)
                ));
            }
            if self.entries.len() > 3 {
                lines.push(format!("  ... and {} more", self.entries.len() - 3));
            }
            return lines;
        }

        lines.push(format!("Title: {title}"));
        lines.push(format!(
            "Channel: {}",
            self.uploader.as_deref().unwrap_or("Unknown")
        ));
        lines.push(format!("Duration: {}", format_duration(self.duration_secs)));
        lines.push(format!(
            "Views: {}",
            self.view_count
                .map(|v| v.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        ));
        lines.push(format!(
            "Uploaded: {}",
            self.upload_date.as_deref().unwrap_or("N/A")
        ));
        lines.push(format!("Video formats: {}", self.video_streams().count()));
        lines.push(format!("Audio formats: {}", self.audio_only_streams().count()));
        if let Some(best) = self.best_video() {
            lines.push(format!(
                "Best quality: {}p - {}",
                best.height
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                best.ext.as_deref().unwrap_or("N/A")
            ));
        }
        lines
    }
}

fn format_duration(secs: Option<f64>) -> String {
    match secs {
        Some(s) if s.is_finite() && s > 0.0 => {
            let total = s as u64;
            format!("{}:{:02}", total / 60, total % 60)
        }
        _ => "N/A".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub url: String,
    pub selection: FormatSelection,
    /// Absolute naming template rooted at the job's output directory.
    pub output_template: PathBuf,
    pub subtitle_langs: Vec<String>,
    pub ignore_item_errors: bool,
    pub allow_playlist: bool,
    /// 0 means no timeout.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOutcome {
    pub files: Vec<PathBuf>,
    pub item_failures: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct YtDlpResolver {
    program: Option<String>,
}

impl YtDlpResolver {
    pub fn new(program: Option<String>) -> Self {
        Self { program }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.yt_dlp_program.clone())
    }

    fn candidates(&self) -> Vec<(String, Vec<String>)> {
        if let Some(program) = self.program.as_ref().filter(|p| !p.trim().is_empty()) {
            return vec![(program.clone(), Vec::new())];
        }
        let module = vec!["-m".to_string(), "yt_dlp".to_string()];
        vec![
            (YT_DLP_TOOL.to_string(), Vec::new()),
            ("python3".to_string(), module.clone()),
            ("python".to_string(), module),
        ]
    }

    fn spawn(&self, args: &[String]) -> Result<std::process::Child> {
        for (program, prefix) in self.candidates() {
            let mut cmd = cmd::command(&program);
            cmd.args(&prefix)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            match cmd.spawn() {
                Ok(child) => {
                    debug!(%program, "spawned yt-dlp");
                    return Ok(child);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(EngineError::Download(format!("{program} could not start: {e}"))),
            }
        }
        Err(EngineError::ExternalToolMissing {
            tool: YT_DLP_TOOL.to_string(),
        })
    }
}

impl MediaResolver for YtDlpResolver {
    fn probe(&self, url: &str) -> Result<MediaInfo> {
        let args = probe_args(url);
        let child = self.spawn(&args)?;
        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::Download(format!("yt-dlp failed while running: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Download(error_detail(&stderr)));
        }
        parse_probe_json(&output.stdout)
    }

    fn download(
        &self,
        plan: &DownloadPlan,
        on_progress: &mut dyn FnMut(RawProgress),
    ) -> Result<DownloadOutcome> {
        let args = download_args(plan);
        let child = self.spawn(&args)?;
        let (status, scan) = drive_download(child, plan.timeout_secs, on_progress)?;

        for note in &scan.subtitle_errors {
            warn!(detail = %note, "subtitle download failed");
        }

        let files = scan.files;
        if !plan.ignore_item_errors && !scan.item_failures.is_empty() {
            return Err(EngineError::Download(error_detail(
                &scan.item_failures.join("\n"),
            )));
        }
        if files.is_empty() && !status.success() {
            let detail = if scan.item_failures.is_empty() {
                format!("yt-dlp exited with code {:?}", status.code())
            } else {
                error_detail(&scan.item_failures.join("\n"))
            };
            return Err(EngineError::Download(detail));
        }

        Ok(DownloadOutcome {
            files,
            item_failures: scan.item_failures,
        })
    }
}

// On timeout the readers are not joined: an ffmpeg grandchild can keep the pipes open.
fn drive_download(
    mut child: Child,
    timeout_secs: u64,
    on_progress: &mut dyn FnMut(RawProgress),
) -> Result<(ExitStatus, OutputScan)> {
    let (tx, rx) = mpsc::channel::<String>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_line_reader(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_line_reader(stderr, tx.clone()));
    }
    drop(tx);

    let mut scan = OutputScan::default();
    let deadline = (timeout_secs > 0).then(|| Instant::now() + Duration::from_secs(timeout_secs));

    loop {
        let line = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(line) => line,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(EngineError::Download(format!(
                            "yt-dlp timed out after {timeout_secs}s"
                        )));
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(line) => line,
                Err(_) => break,
            },
        };
        if let Some(raw) = scan.accept(&line) {
            on_progress(raw);
        }
    }

    let status = child
        .wait()
        .map_err(|e| EngineError::Download(format!("yt-dlp failed while running: {e}")))?;
    for reader in readers {
        let _ = reader.join();
    }
    Ok((status, scan))
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

pub fn probe_args(url: &str) -> Vec<String> {
    vec![
        "--dump-single-json".to_string(),
        "--flat-playlist".to_string(),
        "--no-warnings".to_string(),
        "--socket-timeout".to_string(),
        "30".to_string(),
        url.to_string(),
    ]
}

pub fn download_args(plan: &DownloadPlan) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--progress".to_string(),
        "--no-simulate".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{PROGRESS_MARKER} %(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s"
        ),
        // Post-processor screen lines are hidden once --print implies --quiet.
        "--progress-template".to_string(),
        format!("postprocess:{PROGRESS_MARKER} processing|NA|NA|NA|NA|NA"),
        "--print".to_string(),
        format!("after_move:{FILE_MARKER} %(filepath)s"),
        // Item failures are classified from the output; subtitle errors must never abort.
        "--ignore-errors".to_string(),
        "-f".to_string(),
        plan.selection.expression.clone(),
    ];

    match plan.selection.extract_audio {
        Some(container) => {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(container.extension().to_string());
        }
        None => {
            args.push("--merge-output-format".to_string());
            args.push(plan.selection.merge_format.extension().to_string());
        }
    }

    let langs: Vec<&str> = plan
        .subtitle_langs
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if !langs.is_empty() {
        args.push("--write-subs".to_string());
        args.push("--write-auto-subs".to_string());
        args.push("--sub-langs".to_string());
        args.push(langs.join(","));
    }

    args.push(if plan.allow_playlist {
        "--yes-playlist".to_string()
    } else {
        "--no-playlist".to_string()
    });
    args.push("-o".to_string());
    args.push(plan.output_template.to_string_lossy().to_string());
    args.push(plan.url.clone());
    args
}

#[derive(Debug, Default)]
struct OutputScan {
    files: Vec<PathBuf>,
    item_failures: Vec<String>,
    subtitle_errors: Vec<String>,
}

impl OutputScan {
    fn accept(&mut self, line: &str) -> Option<RawProgress> {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(PROGRESS_MARKER) {
            return parse_progress_fields(rest);
        }
        if let Some(rest) = trimmed.strip_prefix(FILE_MARKER) {
            let path = rest.trim();
            if !path.is_empty() && path != "NA" {
                let path = PathBuf::from(path);
                if !self.files.contains(&path) {
                    self.files.push(path);
                }
            }
            return None;
        }
        if let Some(rest) = trimmed.strip_prefix(ERROR_PREFIX) {
            let message = rest.trim().to_string();
            if message.to_ascii_lowercase().contains("subtitles") {
                self.subtitle_errors.push(message);
            } else {
                self.item_failures.push(message);
            }
            return None;
        }
        if trimmed.starts_with("[Merger]") || trimmed.starts_with("[ExtractAudio]") {
            return Some(RawProgress::merging());
        }
        if !trimmed.is_empty() {
            debug!(line = %trimmed, "yt-dlp");
        }
        None
    }
}

/// Parses `status|downloaded|total|estimate|speed|eta`; yt-dlp prints `NA` for unknowns.
pub fn parse_progress_fields(fields: &str) -> Option<RawProgress> {
    let parts: Vec<&str> = fields.trim().split('|').map(str::trim).collect();
    if parts.len() != 6 {
        return None;
    }
    Some(RawProgress {
        status: TransferStatus::from_tag(parts[0]),
        downloaded_bytes: parse_count(parts[1]),
        total_bytes: parse_count(parts[2]),
        total_bytes_estimate: parse_count(parts[3]),
        speed: parse_number(parts[4]),
        eta: parse_count(parts[5]),
    })
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_count(raw: &str) -> Option<u64> {
    parse_number(raw).map(|v| v.round() as u64)
}

fn error_detail(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_prefix(ERROR_PREFIX).map(str::trim).unwrap_or(l))
        .collect();
    let joined = if lines.is_empty() {
        "unknown error".to_string()
    } else {
        lines.join(" | ")
    };
    joined.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    upload_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
    #[serde(default)]
    entries: Option<Vec<YtDlpEntry>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    title: Option<String>,
    duration: Option<f64>,
}

fn codec_present(codec: Option<&str>) -> Option<bool> {
    codec.map(|c| !c.eq_ignore_ascii_case("none"))
}

pub fn parse_probe_json(bytes: &[u8]) -> Result<MediaInfo> {
    let info: YtDlpInfo = serde_json::from_slice(bytes)?;
    let entries = match (info.kind.as_deref(), info.entries) {
        (Some("playlist"), Some(entries)) | (None, Some(entries)) => entries
            .into_iter()
            .map(|e| PlaylistEntry {
                title: e.title,
                duration_secs: e.duration,
            })
            .collect(),
        _ => Vec::new(),
    };
    let streams = info
        .formats
        .into_iter()
        .map(|f| {
            let has_video = codec_present(f.vcodec.as_deref()).unwrap_or(f.height.is_some());
            let has_audio = codec_present(f.acodec.as_deref()).unwrap_or(!has_video);
            StreamDescriptor {
                format_id: f.format_id.unwrap_or_default(),
                ext: f.ext,
                height: f.height,
                has_video,
                has_audio,
            }
        })
        .collect();
    Ok(MediaInfo {
        title: info.title,
        uploader: info.uploader,
        duration_secs: info.duration,
        view_count: info.view_count,
        upload_date: info.upload_date,
        description: info.description,
        streams,
        entries,
    })
}
