//! Shared file-write helpers for the persistence layer.

use std::path::Path;

use crate::error::{PersistError, PersistResult};

/// Writes `contents` to `path` with mode 0600, via a same-directory temp file
/// renamed into place so a crash mid-write never leaves a truncated file.
pub fn write_atomic_0600(path: &Path, contents: &[u8]) -> PersistResult<()> {
    let tmp_path = path.with_extension("tmp");

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)
            .map_err(|e| PersistError::io(tmp_path.display().to_string(), e))?;
        std::io::Write::write_all(&mut file, contents).map_err(|e| PersistError::io(tmp_path.display().to_string(), e))?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(&tmp_path, contents).map_err(|e| PersistError::io(tmp_path.display().to_string(), e))?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| PersistError::io(path.display().to_string(), e))
}

/// Writes `contents` to `path` with default permissions, same atomic-rename
/// discipline as [`write_atomic_0600`] but without restricting file mode
/// (used for the peer cache and DHT bootstrap files, which hold no secrets).
pub fn write_atomic(path: &Path, contents: &[u8]) -> PersistResult<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents).map_err(|e| PersistError::io(tmp_path.display().to_string(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| PersistError::io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("wgmesh-persist-io-{name}-{suffix}"))
    }

    #[test]
    fn atomic_write_produces_exact_contents() {
        let path = scratch_path("atomic");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        std::fs::remove_file(&path).unwrap();
    }
}
