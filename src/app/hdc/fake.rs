//! Scripted in-memory gateway for unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{mpsc, Mutex};

use crate::app::error::AppError;
use crate::app::hdc::gateway::{DeviceGateway, TerminalSink};
use crate::app::models::{TerminalEvent, TerminalEventKind};

#[derive(Default)]
pub struct FakeGateway {
    pub targets: Mutex<Vec<String>>,
    pub targets_error: Mutex<Option<String>>,
    pub parameters: Mutex<HashMap<String, HashMap<String, String>>>,
    pub shell_outputs: Mutex<HashMap<String, String>>,
    pub remote_files: Mutex<HashMap<String, Vec<u8>>>,
    pub shell_log: Mutex<Vec<(String, String)>>,
    pub writes: Mutex<Vec<(String, String)>>,
    pub closed: Mutex<Vec<String>>,
    pub sinks: Mutex<HashMap<String, TerminalSink>>,
    pub fail_open: Mutex<bool>,
    pub fail_close: Mutex<bool>,
    pub kills: Mutex<usize>,
    next_remote: Mutex<usize>,
    stalled: Mutex<Option<StalledWrite>>,
}

struct StalledWrite {
    remote_session_id: String,
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(keys: &[&str]) -> Self {
        let fake = Self::new();
        fake.set_targets(keys);
        fake
    }

    pub fn set_targets(&self, keys: &[&str]) {
        *self.targets.lock().expect("targets") = keys.iter().map(|key| key.to_string()).collect();
        *self.targets_error.lock().expect("targets error") = None;
    }

    pub fn fail_targets(&self, message: &str) {
        *self.targets_error.lock().expect("targets error") = Some(message.to_string());
    }

    pub fn set_parameters(&self, key: &str, params: &[(&str, &str)]) {
        self.parameters.lock().expect("params").insert(
            key.to_string(),
            params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );
    }

    pub fn set_shell_output(&self, command: &str, output: &str) {
        self.shell_outputs
            .lock()
            .expect("shell outputs")
            .insert(command.to_string(), output.to_string());
    }

    pub fn set_remote_file(&self, remote_path: &str, bytes: &[u8]) {
        self.remote_files
            .lock()
            .expect("remote files")
            .insert(remote_path.to_string(), bytes.to_vec());
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().expect("writes").clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().expect("closed").clone()
    }

    pub fn shell_log(&self) -> Vec<(String, String)> {
        self.shell_log.lock().expect("shell log").clone()
    }

    /// The next write to `remote_session_id` signals `entered` and then blocks until `release` fires.
    pub fn stall_next_write(&self, remote_session_id: &str) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.stalled.lock().expect("stalled") = Some(StalledWrite {
            remote_session_id: remote_session_id.to_string(),
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    /// Pushes output into an open channel as if the device printed it.
    pub fn emit_output(&self, remote_session_id: &str, chunk: &str) {
        let sink = self
            .sinks
            .lock()
            .expect("sinks")
            .get(remote_session_id)
            .cloned()
            .expect("open channel");
        sink(TerminalEvent {
            target: "fake".to_string(),
            session_id: remote_session_id.to_string(),
            event: TerminalEventKind::Output,
            stream: Some("stdout".to_string()),
            chunk: Some(chunk.to_string()),
            exit_code: None,
            trace_id: "fake".to_string(),
        });
    }
}

impl DeviceGateway for FakeGateway {
    fn list_targets(&self, trace_id: &str) -> Result<Vec<String>, AppError> {
        if let Some(message) = self.targets_error.lock().expect("targets error").clone() {
            return Err(AppError::dependency(message, trace_id));
        }
        Ok(self.targets.lock().expect("targets").clone())
    }

    fn get_parameters(&self, key: &str, trace_id: &str) -> Result<HashMap<String, String>, AppError> {
        self.parameters
            .lock()
            .expect("params")
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::dependency(format!("unknown target {key}"), trace_id))
    }

    fn shell(&self, key: &str, command: &str, _trace_id: &str) -> Result<String, AppError> {
        self.shell_log
            .lock()
            .expect("shell log")
            .push((key.to_string(), command.to_string()));
        Ok(self
            .shell_outputs
            .lock()
            .expect("shell outputs")
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    fn recv_file(
        &self,
        _key: &str,
        remote_path: &str,
        local_path: &Path,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let bytes = self
            .remote_files
            .lock()
            .expect("remote files")
            .get(remote_path)
            .cloned()
            .ok_or_else(|| AppError::dependency(format!("[Fail]no such file {remote_path}"), trace_id))?;
        std::fs::write(local_path, bytes)
            .map_err(|err| AppError::system(err.to_string(), trace_id))
    }

    fn open_shell(&self, _key: &str, sink: TerminalSink, trace_id: &str) -> Result<String, AppError> {
        if *self.fail_open.lock().expect("fail open") {
            return Err(AppError::dependency("open refused", trace_id));
        }
        let mut next = self.next_remote.lock().expect("next remote");
        *next += 1;
        let remote = format!("remote-{}", *next);
        self.sinks
            .lock()
            .expect("sinks")
            .insert(remote.clone(), sink);
        Ok(remote)
    }

    fn write_shell(&self, remote_session_id: &str, text: &str, _trace_id: &str) -> Result<(), AppError> {
        let stall = {
            let mut guard = self.stalled.lock().expect("stalled");
            match guard.as_ref() {
                Some(stall) if stall.remote_session_id == remote_session_id => guard.take(),
                _ => None,
            }
        };
        if let Some(stall) = stall {
            let _ = stall.entered.send(());
            let _ = stall.release.recv();
        }
        self.writes
            .lock()
            .expect("writes")
            .push((remote_session_id.to_string(), text.to_string()));
        Ok(())
    }

    fn close_shell(&self, remote_session_id: &str, trace_id: &str) -> Result<(), AppError> {
        self.sinks.lock().expect("sinks").remove(remote_session_id);
        self.closed
            .lock()
            .expect("closed")
            .push(remote_session_id.to_string());
        if *self.fail_close.lock().expect("fail close") {
            return Err(AppError::dependency("close refused", trace_id));
        }
        Ok(())
    }

    fn kill(&self, _trace_id: &str) -> Result<(), AppError> {
        *self.kills.lock().expect("kills") += 1;
        Ok(())
    }
}
