use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::app::error::AppError;
use crate::app::models::TerminalEvent;

/// Receives every event of one remote shell channel.
pub type TerminalSink = Arc<dyn Fn(TerminalEvent) + Send + Sync>;

/// Everything the app needs from hdc. Injected wherever device access happens so tests
/// can swap in a scripted double.
pub trait DeviceGateway: Send + Sync {
    fn list_targets(&self, trace_id: &str) -> Result<Vec<String>, AppError>;

    fn get_parameters(&self, key: &str, trace_id: &str) -> Result<HashMap<String, String>, AppError>;

    fn shell(&self, key: &str, command: &str, trace_id: &str) -> Result<String, AppError>;

    fn shell_batch(
        &self,
        key: &str,
        commands: &[&str],
        trace_id: &str,
    ) -> Result<Vec<String>, AppError> {
        commands
            .iter()
            .map(|command| self.shell(key, command, trace_id))
            .collect()
    }

    fn recv_file(
        &self,
        key: &str,
        remote_path: &str,
        local_path: &Path,
        trace_id: &str,
    ) -> Result<(), AppError>;

    /// Opens an interactive shell channel and returns its remote session id.
    fn open_shell(&self, key: &str, sink: TerminalSink, trace_id: &str) -> Result<String, AppError>;

    fn write_shell(&self, remote_session_id: &str, text: &str, trace_id: &str) -> Result<(), AppError>;

    fn close_shell(&self, remote_session_id: &str, trace_id: &str) -> Result<(), AppError>;

    fn kill(&self, trace_id: &str) -> Result<(), AppError>;
}

/// Result of a call site that degrades instead of failing: callers can tell
/// "nothing there" apart from "could not ask".
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayOutcome<T> {
    Ready { data: T },
    Unavailable { reason: String },
}

impl<T> GatewayOutcome<T> {
    pub fn from_result(result: Result<T, AppError>) -> Self {
        match result {
            Ok(data) => GatewayOutcome::Ready { data },
            Err(err) => GatewayOutcome::Unavailable { reason: err.error },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, GatewayOutcome::Ready { .. })
    }

    pub fn ready(self) -> Option<T> {
        match self {
            GatewayOutcome::Ready { data } => Some(data),
            GatewayOutcome::Unavailable { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            GatewayOutcome::Ready { .. } => None,
            GatewayOutcome::Unavailable { reason } => Some(reason),
        }
    }
}

impl<T: Default> GatewayOutcome<T> {
    pub fn unwrap_or_default(self) -> T {
        self.ready().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_keeps_the_failure_reason() {
        let outcome: GatewayOutcome<Vec<String>> =
            GatewayOutcome::from_result(Err(AppError::dependency("hdc not running", "t")));
        assert!(!outcome.is_ready());
        assert_eq!(outcome.reason(), Some("hdc not running"));
        assert!(outcome.unwrap_or_default().is_empty());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = GatewayOutcome::Ready {
            data: vec!["A".to_string()],
        };
        let value = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(value["status"], "ready");
        assert_eq!(value["data"][0], "A");
    }
}
