//! Companion process launch.
//!
//! The front end starts its companion at most once. A failed launch leaves
//! the gate idle so a later attempt can retry; concurrent attempts wait on
//! the one in flight instead of spawning twice.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn companion: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("no companion launcher configured")]
    NotConfigured,
    #[error("companion launch failed: {0}")]
    Other(String),
}

/// Extension point for different companion launch mechanisms.
#[async_trait]
pub trait CompanionLauncher: Send + Sync {
    async fn launch(&self) -> Result<(), LaunchError>;
}

/// Spawns the companion as a child process.
///
/// The child is tied to the launcher: it is killed when the launcher is
/// dropped, and an exited child is reaped the next time its pid is queried.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            child: Mutex::new(None),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// OS pid of the spawned companion while it is still running.
    pub async fn pid(&self) -> Option<u32> {
        let mut slot = self.child.lock().await;
        let child = slot.as_mut()?;
        match child.try_wait() {
            Ok(None) => child.id(),
            Ok(Some(status)) => {
                tracing::info!(%status, "Companion process exited");
                *slot = None;
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll companion process");
                child.id()
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.pid().await.is_some()
    }
}

#[async_trait]
impl CompanionLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<(), LaunchError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(
            program = %self.program.display(),
            pid = ?child.id(),
            "Companion process launched"
        );
        *self.child.lock().await = Some(child);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Launching,
    Launched,
}

pub(crate) struct LaunchGate {
    launcher: Option<Arc<dyn CompanionLauncher>>,
    state: Mutex<LaunchState>,
}

impl LaunchGate {
    pub(crate) fn new(launcher: Option<Arc<dyn CompanionLauncher>>) -> Self {
        Self {
            launcher,
            state: Mutex::new(LaunchState::Idle),
        }
    }

    /// Launch unless already launched. Returns whether this call launched.
    pub(crate) async fn try_launch(&self) -> Result<bool, LaunchError> {
        let Some(launcher) = &self.launcher else {
            return Err(LaunchError::NotConfigured);
        };

        // Held across the launch so concurrent callers queue behind it.
        let mut state = self.state.lock().await;
        if *state == LaunchState::Launched {
            return Ok(false);
        }

        *state = LaunchState::Launching;
        match launcher.launch().await {
            Ok(()) => {
                *state = LaunchState::Launched;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "Companion launch failed");
                *state = LaunchState::Idle;
                Err(e)
            }
        }
    }

    pub(crate) fn state(&self) -> LaunchState {
        match self.state.try_lock() {
            Ok(state) => *state,
            Err(_) => LaunchState::Launching,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLauncher {
        attempts: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl CompanionLauncher for CountingLauncher {
        async fn launch(&self) -> Result<(), LaunchError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if self.fail_first && attempt == 0 {
                return Err(LaunchError::Other("activation refused".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn launches_only_once() {
        let launcher = Arc::new(CountingLauncher::default());
        let gate = Arc::new(LaunchGate::new(Some(launcher.clone())));

        let first = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.try_launch().await }
        });
        let second = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.try_launch().await }
        });
        let launched = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

        assert_eq!(launched.iter().filter(|l| **l).count(), 1);
        assert_eq!(launcher.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), LaunchState::Launched);
    }

    #[tokio::test]
    async fn failed_launch_can_be_retried() {
        let launcher = Arc::new(CountingLauncher {
            fail_first: true,
            ..Default::default()
        });
        let gate = LaunchGate::new(Some(launcher.clone()));

        assert!(gate.try_launch().await.is_err());
        assert_eq!(gate.state(), LaunchState::Idle);

        assert!(gate.try_launch().await.unwrap());
        assert_eq!(launcher.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_launcher_is_reported() {
        let gate = LaunchGate::new(None);
        assert!(matches!(
            gate.try_launch().await,
            Err(LaunchError::NotConfigured)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_companion_is_reaped() {
        let launcher = ProcessLauncher::new("true");
        launcher.launch().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while launcher.is_running().await {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(launcher.pid().await.is_none());
        assert!(launcher.child.lock().await.is_none());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let launcher = ProcessLauncher::new("/nonexistent/hostbridge-companion").with_args(["--serve"]);
        assert_eq!(launcher.args(), ["--serve".to_string()]);

        let err = launcher.launch().await.unwrap_err();

        assert!(matches!(err, LaunchError::Spawn(_)));
        assert!(launcher.pid().await.is_none());
    }
}
