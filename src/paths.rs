use crate::{EngineError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const JOB_DIR_PREFIX: &str = "video_";
pub const JOB_DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const MANIFEST_FILE_NAME: &str = "job_manifest.json";
pub const JOB_LOG_FILE_NAME: &str = "job_log.jsonl";
const TRANSCRIPT_SUFFIX: &str = "_transcript.txt";

/// Creates the output directory for a new job under `destination_root`.
///
/// The returned path is absolute even for a relative root, so it compares
/// with the absolute paths yt-dlp reports. Directories are named per second. Two callers starting a job in the same
/// second under the same root end up sharing one directory.
pub fn allocate(destination_root: &Path) -> Result<PathBuf> {
    allocate_at(destination_root, Local::now())
}

pub fn allocate_at(destination_root: &Path, when: DateTime<Local>) -> Result<PathBuf> {
    if !destination_root.is_dir() {
        return Err(EngineError::filesystem(
            destination_root,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "destination root does not exist or is not a directory",
            ),
        ));
    }

    let root = std::path::absolute(destination_root)
        .map_err(|e| EngineError::filesystem(destination_root, e))?;
    let dir = root.join(job_dir_name(when));
    // create_dir_all is a no-op for an existing directory; nothing inside is touched.
    std::fs::create_dir_all(&dir).map_err(|e| EngineError::filesystem(&dir, e))?;
    Ok(dir)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".to_string())
}

pub fn job_dir_name(when: DateTime<Local>) -> String {
    format!("{JOB_DIR_PREFIX}{}", when.format(JOB_DIR_TIMESTAMP_FORMAT))
}

/// Artifact locations inside one job's output directory.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub output_dir: PathBuf,
}

impl JobPaths {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn output_template_path(&self, template: &str) -> PathBuf {
        self.output_dir.join(template)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(JOB_LOG_FILE_NAME)
    }

    pub fn transcript_path_for(&self, audio_path: &Path) -> PathBuf {
        self.output_dir
            .join(format!("{}{TRANSCRIPT_SUFFIX}", file_stem(audio_path)))
    }

    /// `<stem>_<ext>_transcript.txt`, then `<stem>_<ext>_<n>_transcript.txt`:
    /// the first name for which `taken` is false.
    pub fn unique_transcript_path(
        &self,
        audio_path: &Path,
        taken: impl Fn(&Path) -> bool,
    ) -> PathBuf {
        let plain = self.transcript_path_for(audio_path);
        if !taken(&plain) {
            return plain;
        }
        let stem = file_stem(audio_path);
        let ext = audio_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let with_ext = self
            .output_dir
            .join(format!("{stem}_{ext}{TRANSCRIPT_SUFFIX}"));
        if !taken(&with_ext) {
            return with_ext;
        }
        let mut n = 2u32;
        loop {
            let candidate = self
                .output_dir
                .join(format!("{stem}_{ext}_{n}{TRANSCRIPT_SUFFIX}"));
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// True when `path` sits beneath this job's output directory.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().expect("time")
    }

    #[test]
    fn allocate_builds_timestamped_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = allocate_at(dir.path(), fixed_time()).expect("allocate");
        assert_eq!(out, dir.path().join("video_20240309_070501"));
        assert!(out.is_dir());
    }

    #[test]
    fn allocate_twice_in_same_second_reuses_without_clobbering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = allocate_at(dir.path(), fixed_time()).expect("first");
        std::fs::write(first.join("clip.mp4"), b"data").expect("write");

        let second = allocate_at(dir.path(), fixed_time()).expect("second");
        assert_eq!(first, second);
        assert_eq!(std::fs::read(second.join("clip.mp4")).expect("read"), b"data");
    }

    #[test]
    fn allocate_fails_for_missing_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let err = allocate_at(&missing, fixed_time()).unwrap_err();
        assert!(matches!(err, EngineError::Filesystem { .. }));
        assert!(!missing.exists());
    }

    #[test]
    fn allocate_fails_when_name_is_taken_by_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(job_dir_name(fixed_time())), b"x").expect("write");
        let err = allocate_at(dir.path(), fixed_time()).unwrap_err();
        assert!(matches!(err, EngineError::Filesystem { .. }));
    }

    #[test]
    fn transcript_path_uses_audio_stem() {
        let paths = JobPaths::new(PathBuf::from("/out/video_1"));
        assert_eq!(
            paths.transcript_path_for(Path::new("/out/video_1/Talk.mp3")),
            PathBuf::from("/out/video_1/Talk_transcript.txt")
        );
        assert!(paths.contains(Path::new("/out/video_1/Talk.mp3")));
        assert!(!paths.contains(Path::new("/out/other/Talk.mp3")));
    }

    #[test]
    fn unique_transcript_path_disambiguates_shared_stems() {
        let paths = JobPaths::new(PathBuf::from("/out/video_1"));
        let first = paths.transcript_path_for(Path::new("/out/video_1/song.mp3"));
        let second = paths.unique_transcript_path(Path::new("/out/video_1/song.M4A"), |p| p == first);
        assert_eq!(second, PathBuf::from("/out/video_1/song_m4a_transcript.txt"));

        let third = paths.unique_transcript_path(Path::new("/out/video_1/song.m4a"), |p| {
            p == first || p == second
        });
        assert_eq!(third, PathBuf::from("/out/video_1/song_m4a_2_transcript.txt"));
    }

    #[test]
    fn relative_root_yields_absolute_directory() {
        let cwd = std::env::current_dir().expect("cwd");
        let root = tempfile::tempdir_in(&cwd).expect("tempdir");
        let relative = root.path().strip_prefix(&cwd).expect("under cwd");
        assert!(relative.is_relative());

        let out = allocate_at(relative, fixed_time()).expect("allocate");
        assert!(out.is_absolute());
        assert_eq!(out, root.path().join("video_20240309_070501"));
    }
}
