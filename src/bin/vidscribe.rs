use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vidscribe_engine::asr::SharedRecognizer;
use vidscribe_engine::config::{self, EngineConfig};
use vidscribe_engine::resolver::{MediaResolver, YtDlpResolver};
use vidscribe_engine::{spawn_job, DownloadRequest, JobEvent, JobStatus};

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut url: Option<String> = None;
    let mut dest: Option<PathBuf> = None;
    let mut quality: Option<String> = None;
    let mut format: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut audio_only = false;
    let mut transcribe = false;
    let mut playlist = false;
    let mut probe_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                i += 1;
                url = Some(value(&args, i, "--url")?);
            }
            "--dest" => {
                i += 1;
                dest = Some(PathBuf::from(value(&args, i, "--dest")?));
            }
            "--quality" => {
                i += 1;
                quality = Some(value(&args, i, "--quality")?);
            }
            "--format" => {
                i += 1;
                format = Some(value(&args, i, "--format")?);
            }
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(value(&args, i, "--config")?));
            }
            "--audio-only" => audio_only = true,
            "--transcribe" => transcribe = true,
            "--playlist" => playlist = true,
            "--info" | "--probe" => probe_only = true,
            other => return Err(format!("unknown arg: {other} (try --help)")),
        }
        i += 1;
    }

    let url = url.ok_or_else(|| "--url is required".to_string())?;
    let config = match &config_path {
        Some(path) => config::load_config(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    let resolver = YtDlpResolver::from_config(&config);

    if probe_only {
        let info = resolver.probe(&url).map_err(|e| e.to_string())?;
        for line in info.summary_lines() {
            println!("{line}");
        }
        return Ok(());
    }

    let dest = match dest {
        Some(d) => d,
        None => std::env::current_dir().map_err(|e| e.to_string())?,
    };
    let mut request = DownloadRequest::new(url, dest);
    request.is_playlist = playlist;
    request.audio_only = audio_only;
    request.transcribe = transcribe;
    if let Some(q) = quality {
        request.quality = q.parse().map_err(|e: vidscribe_engine::EngineError| e.to_string())?;
    }
    if let Some(f) = format {
        request.container_format = f
            .parse()
            .map_err(|e: vidscribe_engine::EngineError| e.to_string())?;
    }

    let recognizer = SharedRecognizer::whisper_cli(&config);
    let handle = spawn_job(request, Arc::new(resolver), recognizer, config);
    for event in handle.events() {
        match event {
            JobEvent::Progress(p) => println!("{}", p.status_line()),
            JobEvent::Notice { message } => println!("note: {message}"),
        }
    }
    let result = handle.wait();
    println!(
        "{}",
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?
    );

    if result.status == JobStatus::Failed {
        return Err(format!(
            "{} failed: {}",
            result.error_stage.as_deref().unwrap_or("job"),
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn value(args: &[String], i: usize, flag: &str) -> Result<String, String> {
    args.get(i)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn print_help() {
    println!(
        r#"vidscribe

Downloads a video or playlist and optionally transcribes its audio.

Usage:
  vidscribe --url <URL> [--dest <DIR>] [--quality <best|worst|1080p|720p|480p|360p>]
            [--format <mp4|webm|mkv|avi|mp3|wav|flac|m4a>] [--audio-only]
            [--transcribe] [--playlist] [--config <FILE>]
  vidscribe --url <URL> --info

Flags:
  --url <URL>        Media page or playlist URL
  --dest <DIR>       Destination root (default: current directory)
  --quality <Q>      Quality label (default: best)
  --format <F>       Container format (default: mp4)
  --audio-only       Keep only the audio stream
  --transcribe       Transcribe downloaded audio files
  --playlist         Treat the URL as a playlist
  --config <FILE>    Engine config JSON
  --info, --probe    Print media information and exit

Logging:
  RUST_LOG=debug vidscribe ...
"#
    );
}
