use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Fire-and-forget restart of the proxy daemon after a config change.
#[derive(Debug, Clone)]
pub struct DaemonReloader {
    command: Option<Arc<[String]>>,
    timeout: Duration,
}

impl DaemonReloader {
    /// An empty argv disables reloading.
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: (!command.is_empty()).then(|| Arc::from(command)),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            command: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn trigger(&self) {
        let Some(command) = self.command.clone() else {
            debug!("daemon reload disabled");
            return;
        };
        let timeout = self.timeout;

        tokio::spawn(async move {
            let Some((program, args)) = command.split_first() else {
                return;
            };

            let status = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status();

            match tokio::time::timeout(timeout, status).await {
                Ok(Ok(status)) if status.success() => info!(%program, "proxy daemon reloaded"),
                Ok(Ok(status)) => warn!(%program, %status, "proxy daemon reload failed"),
                Ok(Err(e)) => warn!(%program, error = %e, "could not start daemon reload"),
                Err(_) => warn!(%program, ?timeout, "daemon reload timed out"),
            }
        });
    }
}
