//! Connection-file discovery for attaching to running kernels.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use jupyter_protocol::ConnectionInfo;

use crate::error::{Result, SessionError};

/// How a session obtains its kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMode {
    /// Start a fresh kernel from the configured kernelspec
    NewKernel,
    /// Attach to a running kernel. The target is a connection-file path or a
    /// fragment of a connection-file name; `None` picks the newest kernel.
    ExistingKernel(Option<String>),
}

/// The Jupyter runtime directory holding `kernel-*.json` files.
pub fn runtime_dir() -> PathBuf {
    runtimelib::dirs::runtime_dir()
}

fn is_connection_file(path: &Path) -> bool {
    if path.extension().and_then(|s| s.to_str()) != Some("json") {
        return false;
    }
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    name.starts_with("kernel-") || name.contains("-kernel-")
}

/// All connection files in `dir`, newest first.
pub fn list_connection_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_connection_file(path))
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    files.sort_by(|a, b| b.0.cmp(&a.0));
    files.into_iter().map(|(_, path)| path).collect()
}

/// Resolve a connection file in `dir`.
///
/// An existing file path wins outright. Otherwise the newest connection file
/// whose name contains `target` (or simply the newest, without a target).
pub fn find_connection_file_in(dir: &Path, target: Option<&str>) -> Result<PathBuf> {
    if let Some(target) = target {
        let direct = Path::new(target);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
    }

    list_connection_files(dir)
        .into_iter()
        .find(|path| match target {
            Some(fragment) => path
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| name.contains(fragment)),
            None => true,
        })
        .ok_or_else(|| SessionError::NoConnectionFile(target.map(str::to_string)))
}

/// Resolve a connection file in the Jupyter runtime directory.
pub fn find_connection_file(target: Option<&str>) -> Result<PathBuf> {
    find_connection_file_in(&runtime_dir(), target)
}

pub fn read_connection_info(path: &Path) -> Result<ConnectionInfo> {
    let content =
        std::fs::read_to_string(path).map_err(|e| SessionError::ConnectionFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&content).map_err(|e| SessionError::ConnectionFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
