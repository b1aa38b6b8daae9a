use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::app::config::AppConfig;
use crate::app::dispatcher::CommandDispatcher;
use crate::app::hdc::gateway::DeviceGateway;
use crate::app::hdc::tracking::TargetTrackerHandle;
use crate::app::models::Panel;
use crate::app::shell::ShellRegistry;

/// What the user is looking at: the chosen device and the outer panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub target: Option<String>,
    pub panel: Panel,
}

pub struct AppState {
    pub gateway: Arc<dyn DeviceGateway>,
    pub config: RwLock<AppConfig>,
    pub config_path: PathBuf,
    pub selection: Mutex<Selection>,
    /// Shells of the selected device; `None` while no device is selected.
    pub shells: Mutex<Option<ShellRegistry>>,
    pub tracker: Mutex<Option<TargetTrackerHandle>>,
}

impl AppState {
    pub fn new(gateway: Arc<dyn DeviceGateway>, config: AppConfig, config_path: PathBuf) -> Self {
        Self {
            gateway,
            config: RwLock::new(config),
            config_path,
            selection: Mutex::new(Selection::default()),
            shells: Mutex::new(None),
            tracker: Mutex::new(None),
        }
    }

    pub fn config_snapshot(&self) -> AppConfig {
        self.config
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Uses the focus delay currently in config.
    pub fn dispatcher(&self) -> CommandDispatcher {
        let delay = Duration::from_millis(self.config_snapshot().shell.focus_delay_ms);
        CommandDispatcher::new(Arc::clone(&self.gateway), delay)
    }
}
