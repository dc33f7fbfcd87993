use crate::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;

const RULE: &str = "==================================================";
pub const DOCUMENT_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language: String,
    pub full_text: String,
    pub segments: Vec<TranscriptSegment>,
}

pub fn write_document(
    transcript: &Transcript,
    source_file_name: &str,
    generated_at: DateTime<Local>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let doc = render_document(transcript, source_file_name, generated_at);
    std::fs::write(path, doc)?;
    Ok(())
}

pub fn render_document(
    transcript: &Transcript,
    source_file_name: &str,
    generated_at: DateTime<Local>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("{RULE}\nAUTOMATIC TRANSCRIPT\n{RULE}\n\n"));
    out.push_str(&format!("File: {source_file_name}\n"));
    out.push_str(&format!(
        "Date: {}\n",
        generated_at.format(DOCUMENT_DATE_FORMAT)
    ));
    out.push_str(&format!("Language: {}\n", transcript.language));
    out.push_str(&format!("\n{RULE}\nFULL TEXT:\n{RULE}\n\n"));
    out.push_str(transcript.full_text.trim());
    out.push_str(&format!("\n\n{RULE}\nSEGMENTS:\n{RULE}\n\n"));
    for seg in &transcript.segments {
        out.push_str(&format!(
            "[{} - {}] {}\n",
            format_timestamp(seg.start_seconds),
            format_timestamp(seg.end_seconds),
            sanitize_text(&seg.text)
        ));
    }
    out
}

/// `MM:SS`, with minutes continuing past 59 for long recordings.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn sanitize_text(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}
