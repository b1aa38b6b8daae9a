use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetInfo {
    pub key: String,
    pub name: Option<String>,
    pub ohos_version: Option<String>,
    pub sdk_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceOverview {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub abi: Option<String>,
    pub serial_num: Option<String>,
    pub kernel_version: Option<String>,
    pub processor: Option<String>,
    pub mem_total: u64,
    pub mem_used: u64,
    pub physical_resolution: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalEventKind {
    Output,
    Exit,
    Stopped,
}

/// One chunk of life from a remote shell channel, keyed by the remote session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalEvent {
    pub target: String,
    pub session_id: String,
    pub event: TerminalEventKind,
    pub stream: Option<String>,
    pub chunk: Option<String>,
    pub exit_code: Option<i32>,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellSessionInfo {
    pub id: String,
    pub display_name: String,
    pub remote_session_id: Option<String>,
    pub active: bool,
    pub visible: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HdcInfo {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutCaptureResult {
    pub xml: String,
    pub html: String,
    pub screenshot_data_url: Option<String>,
    pub screenshot_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutExportResult {
    pub target: String,
    pub xml_path: String,
    pub html_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

/// Outer panels of the main window; only `Shell` shows terminals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    #[default]
    Overview,
    Application,
    Process,
    Shell,
    Layout,
    Screenshot,
    Hilog,
    Webview,
}

impl Panel {
    pub const ALL: [Panel; 8] = [
        Panel::Overview,
        Panel::Application,
        Panel::Process,
        Panel::Shell,
        Panel::Layout,
        Panel::Screenshot,
        Panel::Hilog,
        Panel::Webview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Panel::Overview => "overview",
            Panel::Application => "application",
            Panel::Process => "process",
            Panel::Shell => "shell",
            Panel::Layout => "layout",
            Panel::Screenshot => "screenshot",
            Panel::Hilog => "hilog",
            Panel::Webview => "webview",
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Panel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        Panel::ALL
            .into_iter()
            .find(|panel| panel.as_str() == needle)
            .ok_or_else(|| format!("Unknown panel: {value}"))
    }
}
