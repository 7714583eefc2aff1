//! Opening URLs in the OS default browser.
//!
//! Used by the CI-failure `view_logs` action. Abstracted behind a trait so
//! handlers stay testable without a display.

use std::process::Command;

use crate::error::EngineError;

/// Capability to open a URL for the user
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), EngineError>;
}

/// Opens URLs via the platform's default launcher
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUrlOpener;

impl UrlOpener for SystemUrlOpener {
    fn open(&self, url: &str) -> Result<(), EngineError> {
        open_url(url)
    }
}

/// Open `url` with the OS default handler
pub fn open_url(url: &str) -> Result<(), EngineError> {
    if url.trim().is_empty() {
        return Err(EngineError::EmptyValue("url".to_string()));
    }

    let mut cmd = launcher_command(url)?;
    cmd.spawn()
        .map_err(|e| EngineError::other(format!("failed to open browser: {e}")))?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn launcher_command(url: &str) -> Result<Command, EngineError> {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    Ok(cmd)
}

#[cfg(target_os = "linux")]
fn launcher_command(url: &str) -> Result<Command, EngineError> {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    Ok(cmd)
}

#[cfg(target_os = "windows")]
fn launcher_command(url: &str) -> Result<Command, EngineError> {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "", url]);
    Ok(cmd)
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn launcher_command(_url: &str) -> Result<Command, EngineError> {
    Err(EngineError::UnsupportedOs(std::env::consts::OS.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_rejected() {
        let err = open_url("  ").unwrap_err();
        assert!(matches!(err, EngineError::EmptyValue(_)));
    }
}
