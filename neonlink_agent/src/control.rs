//! Host power actions behind a trait so command handling can be exercised
//! without touching the machine.

use std::process::Command;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("failed to spawn system command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("system command failed: {0}")]
    Failed(String),
    #[error("not supported on this platform")]
    Unsupported,
}

pub trait SystemControl: Send + Sync {
    fn shutdown(&self) -> Result<(), ControlError>;
    fn restart(&self) -> Result<(), ControlError>;
}

/// Runs the platform's own shutdown tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSystemControl;

impl OsSystemControl {
    fn run(program: &str, args: &[&str]) -> Result<(), ControlError> {
        info!(program, ?args, "running host power command");
        let status = Command::new(program).args(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(ControlError::Failed(format!("{program} exited with {status}")))
        }
    }
}

impl SystemControl for OsSystemControl {
    fn shutdown(&self) -> Result<(), ControlError> {
        if cfg!(target_os = "windows") {
            Self::run("shutdown", &["/s", "/t", "0"])
        } else if cfg!(any(target_os = "linux", target_os = "macos")) {
            Self::run("shutdown", &["-h", "now"])
        } else {
            Err(ControlError::Unsupported)
        }
    }

    fn restart(&self) -> Result<(), ControlError> {
        if cfg!(target_os = "windows") {
            Self::run("shutdown", &["/r", "/t", "0"])
        } else if cfg!(any(target_os = "linux", target_os = "macos")) {
            Self::run("shutdown", &["-r", "now"])
        } else {
            Err(ControlError::Unsupported)
        }
    }
}
