use crate::error::StoreError;
use nix::fcntl::{flock, FlockArg};
use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

/// Exclusive advisory lock on `<target>.lock`, held until dropped.
///
/// `flock` locks belong to the open file description, so two guards taken
/// from the same process contend just like guards from different processes.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    pub async fn acquire(target: &Path) -> Result<Self, StoreError> {
        let path = lock_path(target);

        let locked = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || -> io::Result<File> {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let file = OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .read(true)
                    .write(true)
                    .open(&path)?;

                flock(file.as_raw_fd(), FlockArg::LockExclusive)?;
                Ok(file)
            })
            .await
        };

        match locked {
            Ok(Ok(file)) => Ok(Self { _file: file, path }),
            Ok(Err(e)) => Err(StoreError::Lock {
                path,
                reason: e.to_string(),
            }),
            Err(e) => Err(StoreError::Lock {
                path,
                reason: e.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn second_guard_waits_for_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("ledger.db");
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = FileLock::acquire(&target).await.unwrap();
        assert!(first.path().ends_with("ledger.db.lock"));

        let waiter = tokio::spawn({
            let target = target.clone();
            let order = order.clone();
            async move {
                let _second = FileLock::acquire(&target).await.unwrap();
                order.lock().await.push("second");
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        order.lock().await.push("first");
        drop(first);

        waiter.await.unwrap();
        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }
}
