use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::error::AppError;
use crate::app::hdc::gateway::{DeviceGateway, TerminalSink};
use crate::app::models::{Panel, TerminalEvent};

/// The rendering surface a session's output lands in.
pub trait TerminalSurface: Send + Sync {
    fn render(&self, event: &TerminalEvent);

    fn focus(&self);

    /// Called once when the session is closed or the surface is replaced.
    fn release(&self) {}
}

pub type TerminalBinding = Arc<dyn TerminalSurface>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Delivered,
    /// No remote channel yet; the text is lost.
    Dropped,
}

/// Everything needed to write to one session, detached from the registry that owns it.
#[derive(Clone)]
pub struct ShellWriter {
    session_id: String,
    remote_session_id: Option<String>,
    binding: Option<TerminalBinding>,
}

impl ShellWriter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn binding(&self) -> Option<TerminalBinding> {
        self.binding.clone()
    }

    pub fn write(
        &self,
        gateway: &dyn DeviceGateway,
        text: &str,
        trace_id: &str,
    ) -> Result<WriteOutcome, AppError> {
        let Some(remote) = self.remote_session_id.as_deref() else {
            warn!(
                trace_id = %trace_id,
                session = %self.session_id,
                bytes = text.len(),
                "shell write dropped, remote session not established"
            );
            return Ok(WriteOutcome::Dropped);
        };
        gateway.write_shell(remote, text, trace_id)?;
        Ok(WriteOutcome::Delivered)
    }
}

pub struct ShellSession {
    id: String,
    display_name: String,
    remote_session_id: Option<String>,
    // Shared with the output sink handed to the gateway so a remount can swap surfaces.
    binding: Arc<RwLock<Option<TerminalBinding>>>,
    created_at: String,
}

impl ShellSession {
    pub fn new(display_name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name,
            remote_session_id: None,
            binding: Arc::new(RwLock::new(None)),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn remote_session_id(&self) -> Option<&str> {
        self.remote_session_id.as_deref()
    }

    pub fn is_established(&self) -> bool {
        self.remote_session_id.is_some()
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn binding(&self) -> Option<TerminalBinding> {
        self.binding.read().ok().and_then(|guard| guard.clone())
    }

    /// Rebinding (a remount) releases the previous surface.
    pub fn bind_terminal(&self, handle: TerminalBinding) {
        let previous = match self.binding.write() {
            Ok(mut guard) => guard.replace(handle),
            Err(_) => return,
        };
        if let Some(previous) = previous {
            previous.release();
        }
    }

    pub fn on_remote_session_established(&mut self, remote_session_id: &str) {
        if self.remote_session_id.as_deref() == Some(remote_session_id) {
            return;
        }
        if let Some(current) = &self.remote_session_id {
            debug!(
                session = %self.id,
                previous = %current,
                remote = %remote_session_id,
                "remote shell session replaced"
            );
        }
        self.remote_session_id = Some(remote_session_id.to_string());
    }

    /// Routes channel events to whatever surface is bound when they arrive.
    pub fn output_sink(&self) -> TerminalSink {
        let binding = Arc::clone(&self.binding);
        Arc::new(move |event: TerminalEvent| {
            let surface = binding.read().ok().and_then(|guard| guard.clone());
            if let Some(surface) = surface {
                surface.render(&event);
            }
        })
    }

    pub fn writer(&self) -> ShellWriter {
        ShellWriter {
            session_id: self.id.clone(),
            remote_session_id: self.remote_session_id.clone(),
            binding: self.binding(),
        }
    }

    pub fn write(
        &self,
        gateway: &dyn DeviceGateway,
        text: &str,
        trace_id: &str,
    ) -> Result<WriteOutcome, AppError> {
        self.writer().write(gateway, text, trace_id)
    }

    /// Releases the surface and closes the remote channel. Teardown failures are logged only.
    pub fn release(&mut self, gateway: &dyn DeviceGateway, trace_id: &str) {
        let binding = match self.binding.write() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(binding) = binding {
            binding.release();
        }
        if let Some(remote) = self.remote_session_id.take() {
            if let Err(err) = gateway.close_shell(&remote, trace_id) {
                warn!(
                    trace_id = %trace_id,
                    session = %self.id,
                    remote = %remote,
                    error = %err,
                    "failed to close remote shell"
                );
            }
        }
    }

    pub fn is_visible(&self, active_id: Option<&str>, panel: Panel) -> bool {
        active_id == Some(self.id.as_str()) && panel == Panel::Shell
    }
}
