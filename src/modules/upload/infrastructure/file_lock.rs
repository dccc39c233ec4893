use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::log_warn;

/// Exclusive advisory lock on a sidecar lock file, released on drop
///
/// Serializes access to a shared file across processes. The lock is tied to
/// the open file handle, so separate acquisitions in the same process also
/// exclude each other.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Block until the exclusive lock on `lock_path` is held
    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock()?;
        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    /// Sidecar lock path for `target`: `<file name>.lock` in the same directory
    pub fn sidecar_for(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        target.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log_warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_sidecar_path() {
        let path = FileLockGuard::sidecar_for(Path::new("/tmp/conf/worker_config.json"));
        assert_eq!(path, PathBuf::from("/tmp/conf/worker_config.json.lock"));
    }

    #[test]
    fn test_lock_can_be_reacquired_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("doc.json.lock");

        let guard = FileLockGuard::acquire(&lock_path).unwrap();
        assert_eq!(guard.path(), lock_path.as_path());
        drop(guard);

        let again = FileLockGuard::acquire(&lock_path);
        assert!(again.is_ok());
    }

    #[test]
    fn test_lock_excludes_concurrent_holders() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = Arc::new(dir.path().join("doc.json.lock"));
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock_path = Arc::clone(&lock_path);
                let holders = Arc::clone(&holders);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        let _guard = FileLockGuard::acquire(&lock_path).unwrap();
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(2));
                        holders.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
