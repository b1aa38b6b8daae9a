use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::app::error::AppError;
use crate::app::hdc::gateway::DeviceGateway;
use crate::app::shell::{ShellRegistry, ShellWriter, WriteOutcome};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CommandShortcut {
    pub title: &'static str,
    pub command: &'static str,
}

pub const SHORTCUTS: &[CommandShortcut] = &[
    CommandShortcut {
        title: "Reboot",
        command: "reboot\n",
    },
    CommandShortcut {
        title: "Device UDID",
        command: "bm get --udid\n",
    },
    CommandShortcut {
        title: "Battery Info",
        command: "hidumper -s BatteryService -a -i\n",
    },
    CommandShortcut {
        title: "Screen Info",
        command: "hidumper -s RenderService -a screen\n",
    },
    CommandShortcut {
        title: "Memory Info",
        command: "cat /proc/meminfo\n",
    },
];

pub fn find_shortcut(title: &str) -> Option<&'static CommandShortcut> {
    let needle = title.trim();
    SHORTCUTS
        .iter()
        .find(|shortcut| shortcut.title.eq_ignore_ascii_case(needle))
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub session_id: String,
    pub write: WriteOutcome,
    /// Returns focus to the terminal once the palette has settled.
    pub focus: Option<JoinHandle<()>>,
}

/// Injects canned commands from the palette into the active shell.
pub struct CommandDispatcher {
    gateway: Arc<dyn DeviceGateway>,
    focus_delay: Duration,
}

impl CommandDispatcher {
    pub fn new(gateway: Arc<dyn DeviceGateway>, focus_delay: Duration) -> Self {
        Self {
            gateway,
            focus_delay,
        }
    }

    pub fn catalog(&self) -> &'static [CommandShortcut] {
        SHORTCUTS
    }

    pub fn is_available(&self, registry: Option<&ShellRegistry>) -> bool {
        registry.and_then(ShellRegistry::active).is_some()
    }

    pub fn shortcut(&self, title: &str, trace_id: &str) -> Result<&'static CommandShortcut, AppError> {
        find_shortcut(title)
            .ok_or_else(|| AppError::not_found(format!("Unknown shortcut: {title}"), trace_id))
    }

    pub fn dispatch(
        &self,
        registry: &ShellRegistry,
        title: &str,
        trace_id: &str,
    ) -> Result<DispatchOutcome, AppError> {
        let shortcut = self.shortcut(title, trace_id)?;
        let writer = registry.active_writer(trace_id)?;
        self.send(shortcut, &writer, trace_id)
    }

    /// Writes `shortcut` through a writer resolved earlier, so no registry lock is needed.
    pub fn send(
        &self,
        shortcut: &CommandShortcut,
        writer: &ShellWriter,
        trace_id: &str,
    ) -> Result<DispatchOutcome, AppError> {
        let write = writer.write(self.gateway.as_ref(), shortcut.command, trace_id)?;
        info!(
            trace_id = %trace_id,
            session = %writer.session_id(),
            shortcut = shortcut.title,
            outcome = ?write,
            "shortcut dispatched"
        );

        let focus = writer.binding().map(|binding| {
            let delay = self.focus_delay;
            thread::spawn(move || {
                thread::sleep(delay);
                binding.focus();
            })
        });

        Ok(DispatchOutcome {
            session_id: writer.session_id().to_string(),
            write,
            focus,
        })
    }
}
