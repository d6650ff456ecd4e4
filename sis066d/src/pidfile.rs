//! PID file bookkeeping: written once listeners are
//! bound and removed on a clean shutdown. A PID file left behind after a
//! crash is diagnostic, not cleaned up automatically — explicit, observable
//! failure beats silent retry.

use std::path::{Path, PathBuf};

use sis066_core::error::{Result, Sis066Error};

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn write(path: &Path) -> Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .map_err(|e| Sis066Error::Fatal(format!("failed to write pid file {path:?}: {e}")))?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = ?self.path, error = %e, "failed to remove pid file on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sis066d.pid");
        let pid = PidFile::write(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        pid.remove();
        assert!(!path.exists());
    }
}
