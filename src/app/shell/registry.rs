use std::sync::Arc;

use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::hdc::gateway::{DeviceGateway, TerminalSink};
use crate::app::models::{Panel, ShellSessionInfo};
use crate::app::shell::session::{ShellSession, ShellWriter, TerminalBinding, WriteOutcome};

pub const DEFAULT_LABEL: &str = "Shell";

/// A remote channel still to be opened for a bound session. Opening needs no registry lock.
pub struct PendingMount {
    session_id: String,
    target: String,
    sink: TerminalSink,
}

impl PendingMount {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn open(&self, gateway: &dyn DeviceGateway, trace_id: &str) -> Result<String, AppError> {
        gateway
            .open_shell(&self.target, Arc::clone(&self.sink), trace_id)
            .inspect_err(|err| {
                warn!(
                    trace_id = %trace_id,
                    device = %self.target,
                    session = %self.session_id,
                    error = %err,
                    "failed to open remote shell"
                );
            })
    }
}

/// Shell tabs of the selected device, in tab order, with one active selection.
pub struct ShellRegistry {
    gateway: Arc<dyn DeviceGateway>,
    target: String,
    label: String,
    sessions: Vec<ShellSession>,
    active: Option<String>,
    // Never decremented, so labels stay unique for the life of the registry.
    next_ordinal: u64,
}

impl ShellRegistry {
    pub fn new(gateway: Arc<dyn DeviceGateway>, target: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            gateway,
            target: target.into(),
            label: if label.trim().is_empty() {
                DEFAULT_LABEL.to_string()
            } else {
                label
            },
            sessions: Vec::new(),
            active: None,
            next_ordinal: 1,
        }
    }

    /// A registry holding the first session, as the shell panel starts out.
    pub fn with_initial_session(
        gateway: Arc<dyn DeviceGateway>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        let mut registry = Self::new(gateway, target, label);
        registry.add();
        registry
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn add(&mut self) -> &ShellSession {
        let session = ShellSession::new(format!("{} {}", self.label, self.next_ordinal));
        self.next_ordinal += 1;
        info!(device = %self.target, session = %session.id(), name = %session.display_name(), "shell session added");
        self.active = Some(session.id().to_string());
        self.sessions.push(session);
        &self.sessions[self.sessions.len() - 1]
    }

    /// Removes `id`, tearing down its terminal and remote channel. Unknown ids are a no-op.
    pub fn close(&mut self, id: &str, trace_id: &str) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let mut removed = self.sessions.remove(index);
        removed.release(self.gateway.as_ref(), trace_id);
        info!(trace_id = %trace_id, device = %self.target, session = %id, "shell session closed");

        if self.active.as_deref() == Some(id) {
            self.active = if self.sessions.is_empty() {
                None
            } else {
                let next = index.min(self.sessions.len() - 1);
                Some(self.sessions[next].id().to_string())
            };
        }
        true
    }

    pub fn select(&mut self, id: &str) -> bool {
        if self.index_of(id).is_none() {
            return false;
        }
        self.active = Some(id.to_string());
        true
    }

    /// Binds `binding` and opens the remote channel the first time a session is mounted.
    pub fn mount(&mut self, id: &str, binding: TerminalBinding, trace_id: &str) -> Result<(), AppError> {
        if let Some(pending) = self.begin_mount(id, binding, trace_id)? {
            let remote = pending.open(self.gateway.as_ref(), trace_id)?;
            self.finish_mount(&pending, &remote, trace_id);
        }
        Ok(())
    }

    /// Binds `binding`; returns the channel still to open when the session has none yet.
    pub fn begin_mount(
        &mut self,
        id: &str,
        binding: TerminalBinding,
        trace_id: &str,
    ) -> Result<Option<PendingMount>, AppError> {
        let target = self.target.clone();
        let session = self
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("Shell session not found", trace_id))?;
        session.bind_terminal(binding);
        if session.is_established() {
            return Ok(None);
        }
        Ok(Some(PendingMount {
            session_id: id.to_string(),
            target,
            sink: session.output_sink(),
        }))
    }

    /// Attaches a channel opened for `pending`. A channel whose session was closed, or that lost
    /// a race with another mount, is closed again; returns whether it was attached.
    pub fn finish_mount(&mut self, pending: &PendingMount, remote: &str, trace_id: &str) -> bool {
        let gateway = Arc::clone(&self.gateway);
        let attached = pending.target == self.target
            && match self.get_mut(&pending.session_id) {
                Some(session) if !session.is_established() => {
                    session.on_remote_session_established(remote);
                    true
                }
                _ => false,
            };
        if !attached {
            discard_channel(gateway.as_ref(), pending, remote, trace_id);
        }
        attached
    }

    /// The active session's write handle, usable after the registry lock is released.
    pub fn active_writer(&self, trace_id: &str) -> Result<ShellWriter, AppError> {
        self.active()
            .map(ShellSession::writer)
            .ok_or_else(|| AppError::validation("No active shell session", trace_id))
    }

    pub fn write_active(&self, text: &str, trace_id: &str) -> Result<WriteOutcome, AppError> {
        self.active_writer(trace_id)?
            .write(self.gateway.as_ref(), text, trace_id)
    }

    /// Tears down every session; used when the selected device changes.
    pub fn clear(&mut self, trace_id: &str) {
        for mut session in self.sessions.drain(..) {
            session.release(self.gateway.as_ref(), trace_id);
        }
        self.active = None;
    }

    pub fn active(&self) -> Option<&ShellSession> {
        self.active.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&ShellSession> {
        self.sessions.iter().find(|session| session.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ShellSession> {
        self.sessions.iter_mut().find(|session| session.id() == id)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|session| session.id() == id)
    }

    pub fn sessions(&self) -> &[ShellSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_visible(&self, id: &str, panel: Panel) -> bool {
        self.get(id)
            .map(|session| session.is_visible(self.active_id(), panel))
            .unwrap_or(false)
    }

    pub fn snapshot(&self, panel: Panel) -> Vec<ShellSessionInfo> {
        let active = self.active_id();
        self.sessions
            .iter()
            .map(|session| ShellSessionInfo {
                id: session.id().to_string(),
                display_name: session.display_name().to_string(),
                remote_session_id: session.remote_session_id().map(str::to_string),
                active: active == Some(session.id()),
                visible: session.is_visible(active, panel),
                created_at: session.created_at().to_string(),
            })
            .collect()
    }
}

/// Closes a channel that no session will own.
pub fn discard_channel(gateway: &dyn DeviceGateway, pending: &PendingMount, remote: &str, trace_id: &str) {
    info!(trace_id = %trace_id, session = %pending.session_id, remote = %remote, "discarding unattached shell channel");
    if let Err(err) = gateway.close_shell(remote, trace_id) {
        warn!(trace_id = %trace_id, remote = %remote, error = %err, "failed to close unattached shell channel");
    }
}
