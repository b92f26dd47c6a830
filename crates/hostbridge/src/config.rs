//! Bridge configuration.

use std::fmt;
use std::sync::Arc;

use crate::launcher::{CompanionLauncher, ProcessLauncher};

/// Method the companion exposes for forwarded log lines.
pub const DEFAULT_LOG_METHOD: &str = "driver.Log";

pub const ENV_LOG_METHOD: &str = "HOSTBRIDGE_LOG_METHOD";
pub const ENV_COMPANION: &str = "HOSTBRIDGE_COMPANION";
pub const ENV_COMPANION_ARGS: &str = "HOSTBRIDGE_COMPANION_ARGS";

#[derive(Clone)]
pub struct BridgeConfig {
    pub log_method: String,
    pub launcher: Option<Arc<dyn CompanionLauncher>>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_method: DEFAULT_LOG_METHOD.to_string(),
            launcher: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `HOSTBRIDGE_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();

        if let Some(method) = lookup(ENV_LOG_METHOD).filter(|m| !m.trim().is_empty()) {
            config = config.with_log_method(method.trim());
        }

        if let Some(program) = lookup(ENV_COMPANION).filter(|p| !p.trim().is_empty()) {
            let args = lookup(ENV_COMPANION_ARGS).unwrap_or_default();
            let launcher = ProcessLauncher::new(program.trim()).with_args(args.split_whitespace());
            config = config.with_launcher(Arc::new(launcher));
        }

        config
    }

    pub fn with_log_method(mut self, method: impl Into<String>) -> Self {
        self.log_method = method.into();
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn CompanionLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("log_method", &self.log_method)
            .field("launcher", &self.launcher.is_some())
            .finish()
    }
}
