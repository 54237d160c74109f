use crate::{
    config::{DirectoryBackend, Settings},
    error::DirectoryError,
};
use ahash::AHashMap;
use axum::async_trait;
use chrono::NaiveDate;
use compact_str::CompactString;
use parking_lot::Mutex;
use std::{
    process::{Output, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{info, warn};

const EXPIRY_FORMAT: &str = "%Y-%m-%d";

/// `useradd` exit status for "username already in use".
const USERADD_EXISTS: i32 = 9;
/// `userdel` exit status for "user does not exist".
const USERDEL_MISSING: i32 = 6;

/// OS account backing an ssh login.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
        expires_on: NaiveDate,
    ) -> Result<(), DirectoryError>;

    /// Missing principals are not an error.
    async fn delete_principal(&self, username: &str) -> Result<(), DirectoryError>;

    async fn set_expiry(&self, username: &str, expires_on: NaiveDate) -> Result<(), DirectoryError>;

    async fn set_password(&self, username: &str, password: &str) -> Result<(), DirectoryError>;

    async fn exists(&self, username: &str) -> Result<bool, DirectoryError>;
}

pub fn build_directory(settings: &Settings) -> Arc<dyn Directory> {
    match settings.directory {
        DirectoryBackend::System => Arc::new(SystemDirectory::new(settings.tool_timeout)),
        DirectoryBackend::Memory => Arc::new(MemoryDirectory::default()),
    }
}

/// Drives the shadow-utils binaries. Arguments are passed as argv, never through a shell.
#[derive(Debug, Clone)]
pub struct SystemDirectory {
    timeout: Duration,
}

impl SystemDirectory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(
        &self,
        tool: &'static str,
        args: &[&str],
        stdin: Option<String>,
    ) -> Result<Output, DirectoryError> {
        let spawn_error = |e: std::io::Error| DirectoryError::Tool {
            tool,
            detail: e.to_string(),
        };

        let mut child = Command::new(tool)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(spawn_error)?;
        }

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DirectoryError::Timeout(tool))?
            .map_err(spawn_error)
    }

    fn failed(tool: &'static str, output: &Output) -> DirectoryError {
        DirectoryError::Tool {
            tool,
            detail: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }
}

#[async_trait]
impl Directory for SystemDirectory {
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
        expires_on: NaiveDate,
    ) -> Result<(), DirectoryError> {
        let expires_on = expires_on.format(EXPIRY_FORMAT).to_string();
        let output = self
            .run(
                "useradd",
                &["-e", &expires_on, "-s", "/bin/false", "-M", username],
                None,
            )
            .await?;

        match output.status.code() {
            Some(0) => {}
            Some(USERADD_EXISTS) => return Err(DirectoryError::AlreadyExists(username.to_string())),
            _ => return Err(Self::failed("useradd", &output)),
        }

        if let Err(e) = self.set_password(username, password).await {
            // a passwordless principal must not survive
            if let Err(cleanup) = self.delete_principal(username).await {
                warn!(username, error = %cleanup, "failed to remove half-created principal");
            }
            return Err(e);
        }

        info!(username, %expires_on, "principal created");
        Ok(())
    }

    async fn delete_principal(&self, username: &str) -> Result<(), DirectoryError> {
        let output = self.run("userdel", &["--force", username], None).await?;

        match output.status.code() {
            Some(0) | Some(USERDEL_MISSING) => Ok(()),
            _ => Err(Self::failed("userdel", &output)),
        }
    }

    async fn set_expiry(&self, username: &str, expires_on: NaiveDate) -> Result<(), DirectoryError> {
        let expires_on = expires_on.format(EXPIRY_FORMAT).to_string();
        let output = self
            .run("usermod", &["-e", &expires_on, username], None)
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failed("usermod", &output))
        }
    }

    async fn set_password(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        let output = self
            .run("chpasswd", &[], Some(format!("{username}:{password}\n")))
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failed("chpasswd", &output))
        }
    }

    async fn exists(&self, username: &str) -> Result<bool, DirectoryError> {
        let username = username.to_string();

        tokio::task::spawn_blocking(move || nix::unistd::User::from_name(&username))
            .await
            .map_err(|e| DirectoryError::Tool {
                tool: "getpwnam",
                detail: e.to_string(),
            })?
            .map(|user| user.is_some())
            .map_err(|e| DirectoryError::Tool {
                tool: "getpwnam",
                detail: e.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPrincipal {
    pub password: String,
    pub expires_on: NaiveDate,
}

/// Process-local directory for development and tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    principals: Mutex<AHashMap<CompactString, MemoryPrincipal>>,
    unavailable: AtomicBool,
}

impl MemoryDirectory {
    pub fn principal(&self, username: &str) -> Option<MemoryPrincipal> {
        self.principals.lock().get(username).cloned()
    }

    /// While set, every call fails the way a broken tool would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self, tool: &'static str) -> Result<(), DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Tool {
                tool,
                detail: "directory unavailable".to_string(),
            });
        }

        Ok(())
    }

    fn with_principal<T>(
        &self,
        tool: &'static str,
        username: &str,
        f: impl FnOnce(&mut MemoryPrincipal) -> T,
    ) -> Result<T, DirectoryError> {
        self.check(tool)?;

        match self.principals.lock().get_mut(username) {
            Some(principal) => Ok(f(principal)),
            None => Err(DirectoryError::Tool {
                tool,
                detail: format!("user '{username}' does not exist"),
            }),
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
        expires_on: NaiveDate,
    ) -> Result<(), DirectoryError> {
        self.check("useradd")?;

        let mut principals = self.principals.lock();
        if principals.contains_key(username) {
            return Err(DirectoryError::AlreadyExists(username.to_string()));
        }

        principals.insert(
            CompactString::from(username),
            MemoryPrincipal {
                password: password.to_string(),
                expires_on,
            },
        );

        Ok(())
    }

    async fn delete_principal(&self, username: &str) -> Result<(), DirectoryError> {
        self.check("userdel")?;
        self.principals.lock().remove(username);
        Ok(())
    }

    async fn set_expiry(&self, username: &str, expires_on: NaiveDate) -> Result<(), DirectoryError> {
        self.with_principal("usermod", username, |principal| {
            principal.expires_on = expires_on;
        })
    }

    async fn set_password(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        self.with_principal("chpasswd", username, |principal| {
            principal.password = password.to_string();
        })
    }

    async fn exists(&self, username: &str) -> Result<bool, DirectoryError> {
        self.check("getpwnam")?;
        Ok(self.principals.lock().contains_key(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, EXPIRY_FORMAT).unwrap()
    }

    #[tokio::test]
    async fn memory_directory_lifecycle() {
        let directory = MemoryDirectory::default();

        directory
            .create_principal("bob", "hunter2", day("2026-11-01"))
            .await
            .unwrap();
        assert!(matches!(
            directory.create_principal("bob", "x", day("2026-11-01")).await,
            Err(DirectoryError::AlreadyExists(_))
        ));

        directory.set_expiry("bob", day("2026-12-01")).await.unwrap();
        directory.set_password("bob", "s3cret").await.unwrap();
        assert_eq!(
            directory.principal("bob"),
            Some(MemoryPrincipal {
                password: "s3cret".to_string(),
                expires_on: day("2026-12-01"),
            })
        );

        directory.delete_principal("bob").await.unwrap();
        directory.delete_principal("bob").await.unwrap();
        assert!(!directory.exists("bob").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_directory_fails_every_call() {
        let directory = MemoryDirectory::default();
        directory.set_unavailable(true);

        assert!(matches!(
            directory.exists("bob").await,
            Err(DirectoryError::Tool { tool: "getpwnam", .. })
        ));
        assert!(directory.set_expiry("bob", day("2026-11-01")).await.is_err());
    }

    #[tokio::test]
    async fn system_lookup_finds_root() {
        let directory = SystemDirectory::new(Duration::from_secs(5));
        assert!(directory.exists("root").await.unwrap());
        assert!(!directory.exists("no-such-principal-x9").await.unwrap());
    }
}
