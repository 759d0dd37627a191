//! Path utilities for k4
//!
//! Scripts usually run as an unprivileged user inside a chroot, where `HOME`
//! may be unset and the XDG directories missing. Everything here falls back
//! to a per-uid directory under `/tmp`.

use std::path::PathBuf;

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "k4";

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV: &str = "K4_LOG_DIR";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the log directory
///
/// Location: `$K4_LOG_DIR`, else `$XDG_STATE_HOME/k4/log`, else
/// `/tmp/k4-$UID/log`
pub fn log_dir() -> PathBuf {
    log_dir_from(std::env::var(LOG_DIR_ENV).ok().as_deref())
}

/// Resolve the log directory with an explicit override
pub fn log_dir_from(override_dir: Option<&str>) -> PathBuf {
    match override_dir {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => project_dirs()
            .and_then(|p| p.state_dir().map(|d| d.join("log")))
            .unwrap_or_else(|| fallback_dir().join("log")),
    }
}

fn fallback_dir() -> PathBuf {
    // SAFETY: getuid() is always safe to call
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}
