use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::error::AppError;
use crate::app::hdc::channel::ShellChannel;
use crate::app::hdc::gateway::{DeviceGateway, TerminalSink};
use crate::app::hdc::parse::{parse_list_targets, parse_parameters};
use crate::app::hdc::runner::{hdc_args, run_hdc, CommandOutput};

const FAIL_MARKER: &str = "[Fail]";

/// `DeviceGateway` backed by the hdc command-line client.
pub struct HdcClient {
    program: String,
    timeout: Duration,
    // Writes happen on a cloned handle after the map lock is released.
    channels: Mutex<HashMap<String, Arc<ShellChannel>>>,
}

fn failure_message(output: &CommandOutput) -> Option<String> {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    if let Some(line) = combined.lines().find(|line| line.contains(FAIL_MARKER)) {
        return Some(line.trim().to_string());
    }
    if !output.success() && output.exit_code.is_some() {
        let stderr = output.stderr.trim();
        return Some(if stderr.is_empty() {
            format!("hdc exited with code {:?}", output.exit_code)
        } else {
            stderr.to_string()
        });
    }
    None
}

impl HdcClient {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn run(&self, target: Option<&str>, args: &[&str], trace_id: &str) -> Result<CommandOutput, AppError> {
        let output = run_hdc(&self.program, target, args, self.timeout, trace_id)?;
        if let Some(message) = failure_message(&output) {
            return Err(AppError::dependency(message, trace_id));
        }
        Ok(output)
    }

    pub fn open_channel_count(&self) -> usize {
        self.channels.lock().map(|guard| guard.len()).unwrap_or_default()
    }

    fn channel(&self, remote_session_id: &str, trace_id: &str) -> Result<Option<Arc<ShellChannel>>, AppError> {
        let guard = self
            .channels
            .lock()
            .map_err(|_| AppError::system("Shell channel registry locked", trace_id))?;
        Ok(guard.get(remote_session_id).cloned())
    }

    fn forget_channel(&self, remote_session_id: &str) {
        if let Ok(mut guard) = self.channels.lock() {
            guard.remove(remote_session_id);
        }
    }
}

impl DeviceGateway for HdcClient {
    fn list_targets(&self, trace_id: &str) -> Result<Vec<String>, AppError> {
        let output = self.run(None, &["list", "targets"], trace_id)?;
        Ok(parse_list_targets(&output.stdout))
    }

    fn get_parameters(&self, key: &str, trace_id: &str) -> Result<HashMap<String, String>, AppError> {
        let output = self.run(Some(key), &["shell", "param", "get"], trace_id)?;
        Ok(parse_parameters(&output.stdout))
    }

    fn shell(&self, key: &str, command: &str, trace_id: &str) -> Result<String, AppError> {
        // Output of the remote command is returned untouched, errors included.
        let output = run_hdc(&self.program, Some(key), &["shell", command], self.timeout, trace_id)?;
        Ok(output.stdout)
    }

    fn recv_file(
        &self,
        key: &str,
        remote_path: &str,
        local_path: &Path,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let local = local_path.to_string_lossy();
        self.run(Some(key), &["file", "recv", remote_path, &local], trace_id)?;
        if !local_path.exists() {
            return Err(AppError::dependency(
                format!("hdc did not produce {}", local_path.display()),
                trace_id,
            ));
        }
        Ok(())
    }

    fn open_shell(&self, key: &str, sink: TerminalSink, trace_id: &str) -> Result<String, AppError> {
        let session_id = Uuid::new_v4().to_string();
        let args = hdc_args(Some(key), &["shell"]);
        let channel = ShellChannel::spawn(
            &self.program,
            &args,
            key.to_string(),
            session_id.clone(),
            trace_id.to_string(),
            sink,
        )
        .map_err(|err| AppError::dependency(format!("Failed to open shell: {err}"), trace_id))?;

        let mut guard = self
            .channels
            .lock()
            .map_err(|_| AppError::system("Shell channel registry locked", trace_id))?;
        guard.insert(session_id.clone(), Arc::new(channel));
        info!(trace_id = %trace_id, device = %key, session_id = %session_id, "shell channel opened");
        Ok(session_id)
    }

    fn write_shell(&self, remote_session_id: &str, text: &str, trace_id: &str) -> Result<(), AppError> {
        let channel = match self.channel(remote_session_id, trace_id)? {
            Some(channel) if channel.is_running() => channel,
            _ => {
                self.forget_channel(remote_session_id);
                return Err(AppError::validation("Shell channel not running", trace_id));
            }
        };
        channel
            .write(text)
            .map_err(|err| AppError::dependency(format!("Shell write failed: {err}"), trace_id))
    }

    fn close_shell(&self, remote_session_id: &str, trace_id: &str) -> Result<(), AppError> {
        let channel = {
            let mut guard = self
                .channels
                .lock()
                .map_err(|_| AppError::system("Shell channel registry locked", trace_id))?;
            guard.remove(remote_session_id)
        };
        match channel {
            Some(channel) => {
                channel.stop();
                info!(trace_id = %trace_id, session_id = %remote_session_id, "shell channel closed");
                Ok(())
            }
            None => Err(AppError::not_found("Shell channel not found", trace_id)),
        }
    }

    fn kill(&self, trace_id: &str) -> Result<(), AppError> {
        let channels: Vec<Arc<ShellChannel>> = match self.channels.lock() {
            Ok(mut guard) => guard.drain().map(|(_, channel)| channel).collect(),
            Err(_) => Vec::new(),
        };
        for channel in channels {
            channel.stop();
        }
        match self.run(None, &["kill"], trace_id) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "hdc kill failed");
                Err(err)
            }
        }
    }
}
