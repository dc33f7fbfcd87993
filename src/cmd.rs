use crate::{EngineError, Result};
use std::ffi::OsStr;
use std::process::{Command, Output, Stdio};

/// Builds a command for an external tool that never opens a console window.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

/// Runs `cmd` to completion and returns its captured output.
///
/// A missing executable maps to `ExternalToolMissing`, a non-zero exit to
/// `ExternalToolFailed` carrying the trimmed stderr.
pub fn run_captured(tool: &str, cmd: &mut Command) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let output = cmd.output().map_err(|e| spawn_error(tool, e))?;
    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

pub fn spawn_error(tool: &str, err: std::io::Error) -> EngineError {
    if err.kind() == std::io::ErrorKind::NotFound {
        EngineError::ExternalToolMissing {
            tool: tool.to_string(),
        }
    } else {
        EngineError::Io(err)
    }
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_reported_as_missing_tool() {
        let mut cmd = command("vidscribe-definitely-not-installed-tool");
        let err = run_captured("fake-tool", &mut cmd).unwrap_err();
        assert!(matches!(err, EngineError::ExternalToolMissing { ref tool } if tool == "fake-tool"));
    }
}
