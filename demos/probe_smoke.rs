use std::sync::Arc;

use vidscribe_engine::asr::SharedRecognizer;
use vidscribe_engine::config::EngineConfig;
use vidscribe_engine::progress::ProgressEvent;
use vidscribe_engine::resolver::{MediaResolver, YtDlpResolver};
use vidscribe_engine::{run_job, DownloadRequest, Quality, Result};

// Usage: cargo run --example probe_smoke -- <URL> [--download]
// Set VIDSCRIBE_SMOKE_DEST to choose where the download lands.
fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(url) = args.first().cloned() else {
        eprintln!("usage: probe_smoke <URL> [--download]");
        return Ok(());
    };

    let config = EngineConfig::default();
    let resolver = Arc::new(YtDlpResolver::from_config(&config));
    let info = resolver.probe(&url)?;
    for line in info.summary_lines() {
        println!("{line}");
    }

    if !args.iter().any(|a| a == "--download") {
        return Ok(());
    }

    let dest = std::env::var("VIDSCRIBE_SMOKE_DEST")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("vidscribe-smoke"));
    std::fs::create_dir_all(&dest)?;

    let mut request = DownloadRequest::new(url, dest);
    request.quality = Quality::Height("360p".to_string());
    request.is_playlist = info.is_playlist();
    let recognizer = SharedRecognizer::whisper_cli(&config);
    let print_progress = |event: ProgressEvent| eprintln!("{}", event.status_line());
    let result = run_job(request, resolver.as_ref(), &recognizer, &config, &print_progress);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
