use serde::{Deserialize, Serialize};

const PERCENT_BELOW_COMPLETE: f64 = 99.99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Downloading,
    Merging,
    Finished,
    Other(String),
}

impl TransferStatus {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "downloading" => TransferStatus::Downloading,
            "merging" | "postprocessing" | "processing" => TransferStatus::Merging,
            "finished" => TransferStatus::Finished,
            other => TransferStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProgress {
    pub status: TransferStatus,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    pub speed: Option<f64>,
    pub eta: Option<u64>,
}

impl RawProgress {
    pub fn downloading(downloaded: u64, total: Option<u64>) -> Self {
        Self {
            status: TransferStatus::Downloading,
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            total_bytes_estimate: None,
            speed: None,
            eta: None,
        }
    }

    pub fn finished() -> Self {
        Self::with_status(TransferStatus::Finished)
    }

    pub fn merging() -> Self {
        Self::with_status(TransferStatus::Merging)
    }

    fn with_status(status: TransferStatus) -> Self {
        Self {
            status,
            downloaded_bytes: None,
            total_bytes: None,
            total_bytes_estimate: None,
            speed: None,
            eta: None,
        }
    }

    pub fn known_total(&self) -> Option<u64> {
        self.total_bytes.or(self.total_bytes_estimate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Downloading,
    Merging,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub percent: f64,
    pub rate_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
}

impl ProgressEvent {
    pub fn status_line(&self) -> String {
        match self.phase {
            Phase::Downloading => format!(
                "Downloading: {:.1}% | {} | ETA: {}",
                self.percent,
                format_rate(self.rate_bytes_per_sec),
                format_eta(self.eta_seconds)
            ),
            Phase::Merging => "Processing downloaded streams...".to_string(),
            Phase::Finished => "Download finished".to_string(),
        }
    }
}

/// Translates a raw snapshot into a caller-facing event.
///
/// An unknown total yields 0% rather than the previous value, so percent is not
/// monotonic while the resolver has no size information.
pub fn translate(raw: &RawProgress) -> ProgressEvent {
    match raw.status {
        TransferStatus::Finished => ProgressEvent {
            phase: Phase::Finished,
            percent: 100.0,
            rate_bytes_per_sec: None,
            eta_seconds: None,
        },
        TransferStatus::Merging => ProgressEvent {
            phase: Phase::Merging,
            percent: 100.0,
            rate_bytes_per_sec: None,
            eta_seconds: None,
        },
        TransferStatus::Downloading | TransferStatus::Other(_) => ProgressEvent {
            phase: Phase::Downloading,
            percent: transfer_percent(raw.downloaded_bytes, raw.known_total()),
            rate_bytes_per_sec: raw.speed.filter(|s| s.is_finite() && *s >= 0.0),
            eta_seconds: raw.eta,
        },
    }
}

fn transfer_percent(downloaded: Option<u64>, total: Option<u64>) -> f64 {
    let (Some(downloaded), Some(total)) = (downloaded, total) else {
        return 0.0;
    };
    if total == 0 {
        return 0.0;
    }
    if downloaded >= total {
        return 100.0;
    }
    let pct = 100.0 * (downloaded as f64) / (total as f64);
    pct.clamp(0.0, PERCENT_BELOW_COMPLETE)
}

#[derive(Debug, Default)]
pub struct ProgressRelay {
    last: Option<RawProgress>,
}

impl ProgressRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, raw: RawProgress) -> Option<ProgressEvent> {
        if self.last.as_ref() == Some(&raw) {
            return None;
        }
        let event = translate(&raw);
        self.last = Some(raw);
        Some(event)
    }
}

pub fn format_rate(rate_bytes_per_sec: Option<f64>) -> String {
    match rate_bytes_per_sec {
        Some(rate) if rate > 0.0 => format!("{:.1} MB/s", rate / 1024.0 / 1024.0),
        _ => "N/A".to_string(),
    }
}

pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(eta) if eta > 0 => format!("{eta}s"),
        _ => "N/A".to_string(),
    }
}
