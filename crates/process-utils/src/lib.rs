//! Small process-related helpers shared across the workspace.
//!
//! Children are spawned outside the caller's process group (and without a
//! console window on Windows). This crate also knows how to wrap a program in
//! `ionice` so that long-running bulk transfers do not starve the rest of the
//! host of disk bandwidth.

use std::ffi::OsStr;
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` detached from the caller's terminal signals.
///
/// On Windows no console window is created. On unix the child gets its own
/// process group, so a Ctrl+C at the terminal or a group-wide SIGTERM from a
/// service manager reaches only this process. The parent decides when its
/// children stop.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// I/O scheduling class understood by `ionice -c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IoClass {
    /// Class 1, served before everything else.
    Realtime,
    /// Class 2, the kernel default.
    BestEffort,
    /// Class 3, only served when nobody else wants the disk.
    #[default]
    Idle,
}

impl IoClass {
    /// Numeric class passed to `ionice -c`.
    pub fn as_number(self) -> u8 {
        match self {
            IoClass::Realtime => 1,
            IoClass::BestEffort => 2,
            IoClass::Idle => 3,
        }
    }

    /// Whether this class accepts a priority level (`-n`).
    pub fn takes_level(self) -> bool {
        !matches!(self, IoClass::Idle)
    }
}

impl fmt::Display for IoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoClass::Realtime => write!(f, "realtime"),
            IoClass::BestEffort => write!(f, "best-effort"),
            IoClass::Idle => write!(f, "idle"),
        }
    }
}

/// I/O priority applied to a child process through `ionice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IoPriority {
    /// Scheduling class.
    #[serde(default)]
    pub class: IoClass,
    /// Priority within the class, 0 (highest) to 7 (lowest).
    #[serde(default)]
    pub level: Option<u8>,
}

impl IoPriority {
    /// Highest level accepted by `ionice -n`.
    pub const MAX_LEVEL: u8 = 7;

    /// Idle class, no level.
    pub fn idle() -> Self {
        Self {
            class: IoClass::Idle,
            level: None,
        }
    }

    /// Best-effort class at the given level.
    pub fn best_effort(level: u8) -> Self {
        Self {
            class: IoClass::BestEffort,
            level: Some(level),
        }
    }

    /// Check the level is within range for the class.
    pub fn validate(&self) -> Result<(), String> {
        match self.level {
            Some(level) if level > Self::MAX_LEVEL => Err(format!(
                "ionice level {} is out of range (0-{})",
                level,
                Self::MAX_LEVEL
            )),
            Some(_) if !self.class.takes_level() => {
                Err(format!("ionice class {} does not take a level", self.class))
            }
            _ => Ok(()),
        }
    }

    /// Arguments for `ionice`, excluding the wrapped program.
    pub fn ionice_args(&self) -> Vec<String> {
        let mut args = vec!["-c".to_string(), self.class.as_number().to_string()];
        if let Some(level) = self.level.filter(|_| self.class.takes_level()) {
            args.push("-n".to_string());
            args.push(level.to_string());
        }
        args
    }
}

/// Create a `tokio::process::Command` for `program`, wrapped in `ionice` when a
/// priority is given and the target supports it.
///
/// Arguments added afterwards go to `program`, not to `ionice`.
#[cfg(feature = "tokio")]
pub fn prioritized_command(
    program: impl AsRef<OsStr>,
    priority: Option<&IoPriority>,
) -> tokio::process::Command {
    match priority {
        #[cfg(target_os = "linux")]
        Some(priority) => {
            let mut cmd = tokio_command("ionice");
            cmd.args(priority.ionice_args());
            cmd.arg(program);
            cmd
        }
        #[cfg(not(target_os = "linux"))]
        Some(_) => tokio_command(program),
        None => tokio_command(program),
    }
}
