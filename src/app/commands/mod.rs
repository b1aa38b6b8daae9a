use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::config::{backup_config_path, save_config_to_path, validate_config, AppConfig};
use crate::app::dispatcher::CommandShortcut;
use crate::app::error::AppError;
use crate::app::hdc::device;
use crate::app::hdc::gateway::GatewayOutcome;
use crate::app::hdc::locator::{
    bundled_hdc_path, normalize_command_path, resolve_hdc_program, validate_hdc_program,
};
use crate::app::hdc::runner::run_command_with_timeout;
use crate::app::hdc::tracking::start_target_tracker;
use crate::app::hierarchy::parse_layout;
use crate::app::models::{
    CommandResponse, DeviceOverview, HdcInfo, LayoutCaptureResult, LayoutExportResult, Panel,
    ShellSessionInfo, TargetInfo,
};
use crate::app::shell::registry::discard_channel;
use crate::app::shell::{ShellRegistry, TerminalBinding, WriteOutcome};
use crate::app::state::AppState;
use crate::app::ui_html::render_hierarchy_html;


pub const LAYOUT_XML_NAME: &str = "window_hierarchy.xml";
pub const LAYOUT_HTML_NAME: &str = "window_hierarchy.html";

fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

fn selected_target(state: &AppState, trace_id: &str) -> Result<String, AppError> {
    state
        .selection
        .lock()
        .map_err(|_| AppError::system("Selection locked", trace_id))?
        .target
        .clone()
        .ok_or_else(|| AppError::validation("No target selected", trace_id))
}

fn current_panel(state: &AppState, trace_id: &str) -> Result<Panel, AppError> {
    Ok(state
        .selection
        .lock()
        .map_err(|_| AppError::system("Selection locked", trace_id))?
        .panel)
}

fn lock_shells<'a>(
    state: &'a AppState,
    trace_id: &str,
) -> Result<MutexGuard<'a, Option<ShellRegistry>>, AppError> {
    state
        .shells
        .lock()
        .map_err(|_| AppError::system("Shell registry locked", trace_id))
}

fn with_shells<R>(
    state: &AppState,
    trace_id: &str,
    apply: impl FnOnce(&mut ShellRegistry) -> Result<R, AppError>,
) -> Result<R, AppError> {
    let mut guard = lock_shells(state, trace_id)?;
    let registry = guard
        .as_mut()
        .ok_or_else(|| AppError::validation("No target selected", trace_id))?;
    apply(registry)
}

pub fn get_config(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.config_snapshot(),
    })
}

pub fn save_app_config(
    state: &AppState,
    config: AppConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, path = %state.config_path.display(), "save_app_config");

    let config = validate_config(config);
    save_config_to_path(
        &config,
        &state.config_path,
        &backup_config_path(&state.config_path),
    )
    .map_err(|err| err.with_trace_id(&trace_id))?;
    let mut guard = state
        .config
        .write()
        .map_err(|_| AppError::system("Config locked", &trace_id))?;
    *guard = config.clone();

    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

/// Resolves the hdc binary and runs `hdc version`. Failures are reported in the payload.
pub fn check_hdc(
    state: &AppState,
    command_path: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<HdcInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "check_hdc");

    let config = state.config_snapshot();
    let program = command_path
        .as_deref()
        .map(normalize_command_path)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| {
            resolve_hdc_program(&config.hdc.command_path, bundled_hdc_path().as_deref())
        });

    let unavailable = |program: String, message: String| HdcInfo {
        available: false,
        version_output: String::new(),
        command_path: program,
        error: Some(message),
    };

    if let Err(message) = validate_hdc_program(&program) {
        warn!(trace_id = %trace_id, error = %message, "hdc validation failed");
        return Ok(CommandResponse {
            trace_id,
            data: unavailable(program, message),
        });
    }

    let args = vec!["version".to_string()];
    let output = match run_command_with_timeout(&program, &args, Duration::from_secs(5), &trace_id)
    {
        Ok(output) => output,
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err.error, "hdc check failed");
            return Ok(CommandResponse {
                trace_id,
                data: unavailable(program, err.error),
            });
        }
    };

    let mut version_output = output.stdout.trim().to_string();
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        if !version_output.is_empty() {
            version_output.push('\n');
        }
        version_output.push_str(stderr);
    }

    let available = output.success();
    Ok(CommandResponse {
        trace_id,
        data: HdcInfo {
            available,
            version_output,
            command_path: program,
            error: if available {
                None
            } else if stderr.is_empty() {
                Some("hdc returned a non-zero exit code".to_string())
            } else {
                Some(stderr.to_string())
            },
        },
    })
}

pub fn list_targets(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<GatewayOutcome<Vec<TargetInfo>>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let outcome = device::list_target_infos(state.gateway.as_ref(), &trace_id);
    Ok(CommandResponse {
        trace_id,
        data: outcome,
    })
}

/// Switches devices: the old device's shells are torn down and one fresh shell is created.
pub fn select_target(
    state: &AppState,
    key: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&key, "key", &trace_id)?;
    let key = key.trim().to_string();
    info!(trace_id = %trace_id, device = %key, "select_target");

    let panel = current_panel(state, &trace_id)?;
    let label = state.config_snapshot().shell.label;
    let mut guard = lock_shells(state, &trace_id)?;
    if let Some(mut previous) = guard.take() {
        previous.clear(&trace_id);
    }
    let registry = ShellRegistry::with_initial_session(Arc::clone(&state.gateway), key.as_str(), label);
    let snapshot = registry.snapshot(panel);
    *guard = Some(registry);
    drop(guard);

    state
        .selection
        .lock()
        .map_err(|_| AppError::system("Selection locked", &trace_id))?
        .target = Some(key);

    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

pub fn select_panel(
    state: &AppState,
    panel: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let panel: Panel = panel
        .parse()
        .map_err(|message: String| AppError::validation(message, &trace_id))?;
    state
        .selection
        .lock()
        .map_err(|_| AppError::system("Selection locked", &trace_id))?
        .panel = panel;

    let snapshot = lock_shells(state, &trace_id)?
        .as_ref()
        .map(|registry| registry.snapshot(panel))
        .unwrap_or_default();
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

pub fn get_overview(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<DeviceOverview>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let key = selected_target(state, &trace_id)?;
    info!(trace_id = %trace_id, device = %key, "get_overview");
    let overview = device::fetch_overview(state.gateway.as_ref(), &key, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: overview,
    })
}

pub fn input_key(
    state: &AppState,
    key_code: u32,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let key = selected_target(state, &trace_id)?;
    device::input_key(state.gateway.as_ref(), &key, key_code, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn screencap(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let key = selected_target(state, &trace_id)?;
    let data_url = device::screencap(state.gateway.as_ref(), &key, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: data_url,
    })
}

/// Layout dump as XML and HTML, plus a screenshot when asked. A failed screenshot does not fail the dump.
pub fn dump_layout(
    state: &AppState,
    with_screenshot: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<LayoutCaptureResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let key = selected_target(state, &trace_id)?;
    info!(trace_id = %trace_id, device = %key, with_screenshot, "dump_layout");

    let raw = device::dump_layout(state.gateway.as_ref(), &key, &trace_id)?;
    let root = parse_layout(&raw, &trace_id)?;
    let xml = root.to_xml();
    let html = render_hierarchy_html(&root);

    let (screenshot_data_url, screenshot_error) = if with_screenshot {
        match device::screencap(state.gateway.as_ref(), &key, &trace_id) {
            Ok(url) => (Some(url), None),
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "layout screenshot failed");
                (None, Some(err.error))
            }
        }
    } else {
        (None, None)
    };

    Ok(CommandResponse {
        trace_id,
        data: LayoutCaptureResult {
            xml,
            html,
            screenshot_data_url,
            screenshot_error,
        },
    })
}

pub fn export_layout(
    state: &AppState,
    output_dir: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<LayoutExportResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&output_dir, "output_dir", &trace_id)?;
    let key = selected_target(state, &trace_id)?;

    let raw = device::dump_layout(state.gateway.as_ref(), &key, &trace_id)?;
    let root = parse_layout(&raw, &trace_id)?;

    let dir = PathBuf::from(output_dir.trim());
    fs::create_dir_all(&dir).map_err(|err| {
        AppError::system(format!("Failed to create output dir: {err}"), &trace_id)
    })?;
    let xml_path = dir.join(LAYOUT_XML_NAME);
    let html_path = dir.join(LAYOUT_HTML_NAME);
    fs::write(&xml_path, root.to_xml())
        .map_err(|err| AppError::system(format!("Failed to write XML: {err}"), &trace_id))?;
    fs::write(&html_path, render_hierarchy_html(&root))
        .map_err(|err| AppError::system(format!("Failed to write HTML: {err}"), &trace_id))?;
    info!(trace_id = %trace_id, path = %xml_path.display(), "layout exported");

    Ok(CommandResponse {
        trace_id,
        data: LayoutExportResult {
            target: key,
            xml_path: xml_path.to_string_lossy().to_string(),
            html_path: html_path.to_string_lossy().to_string(),
        },
    })
}

pub fn list_shells(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let panel = current_panel(state, &trace_id)?;
    let snapshot = lock_shells(state, &trace_id)?
        .as_ref()
        .map(|registry| registry.snapshot(panel))
        .unwrap_or_default();
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

pub fn add_shell(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let panel = current_panel(state, &trace_id)?;
    let snapshot = with_shells(state, &trace_id, |registry| {
        let session = registry.add();
        info!(trace_id = %trace_id, session = %session.id(), name = %session.display_name(), "add_shell");
        Ok(registry.snapshot(panel))
    })?;
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

/// Closing the last shell of a selected device opens a fresh one when `shell.keep_one_session` is set.
pub fn close_shell(
    state: &AppState,
    id: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&id, "id", &trace_id)?;
    let panel = current_panel(state, &trace_id)?;
    let keep_one = state.config_snapshot().shell.keep_one_session;
    let snapshot = with_shells(state, &trace_id, |registry| {
        if registry.close(&id, &trace_id) && keep_one && registry.is_empty() {
            registry.add();
        }
        Ok(registry.snapshot(panel))
    })?;
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

pub fn select_shell(
    state: &AppState,
    id: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&id, "id", &trace_id)?;
    let panel = current_panel(state, &trace_id)?;
    let snapshot = with_shells(state, &trace_id, |registry| {
        if !registry.select(&id) {
            return Err(AppError::not_found(format!("Unknown shell: {id}"), &trace_id));
        }
        Ok(registry.snapshot(panel))
    })?;
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

/// Attaches a terminal surface to a shell, opening its remote channel on first mount.
pub fn mount_shell(
    state: &AppState,
    id: String,
    binding: TerminalBinding,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<ShellSessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&id, "id", &trace_id)?;
    let panel = current_panel(state, &trace_id)?;
    let pending = with_shells(state, &trace_id, |registry| {
        registry.begin_mount(&id, binding, &trace_id)
    })?;
    if let Some(pending) = pending {
        // The hdc process is spawned without holding the registry lock.
        let remote = pending.open(state.gateway.as_ref(), &trace_id)?;
        let mut guard = lock_shells(state, &trace_id)?;
        match guard.as_mut() {
            Some(registry) => {
                registry.finish_mount(&pending, &remote, &trace_id);
            }
            None => discard_channel(state.gateway.as_ref(), &pending, &remote, &trace_id),
        }
    }
    let snapshot = with_shells(state, &trace_id, |registry| Ok(registry.snapshot(panel)))?;
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

pub fn write_shell(
    state: &AppState,
    text: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<WriteOutcome>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let writer = with_shells(state, &trace_id, |registry| registry.active_writer(&trace_id))?;
    let outcome = writer.write(state.gateway.as_ref(), &text, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: outcome,
    })
}

pub fn list_shortcuts(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<CommandShortcut>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.dispatcher().catalog().to_vec(),
    })
}

pub fn run_shortcut(
    state: &AppState,
    title: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<WriteOutcome>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&title, "title", &trace_id)?;
    let dispatcher = state.dispatcher();
    let shortcut = dispatcher.shortcut(&title, &trace_id)?;
    let writer = with_shells(state, &trace_id, |registry| registry.active_writer(&trace_id))?;
    let outcome = dispatcher.send(shortcut, &writer, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: outcome.write,
    })
}

/// Starts polling the target list; `on_change` fires once per settled burst of changes.
pub fn start_target_tracking(
    state: &AppState,
    on_change: Arc<dyn Fn() + Send + Sync>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "start_target_tracking");

    let tracking = state.config_snapshot().tracking;
    let mut guard = state
        .tracker
        .lock()
        .map_err(|_| AppError::system("Target tracker registry locked", &trace_id))?;
    if let Some(handle) = guard.take() {
        handle.stop();
    }
    *guard = Some(start_target_tracker(
        Arc::clone(&state.gateway),
        Duration::from_millis(tracking.poll_interval_ms),
        Duration::from_millis(tracking.debounce_ms),
        trace_id.clone(),
        on_change,
    ));

    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn stop_target_tracking(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "stop_target_tracking");

    let mut guard = state
        .tracker
        .lock()
        .map_err(|_| AppError::system("Target tracker registry locked", &trace_id))?;
    let was_running = guard.is_some();
    if let Some(handle) = guard.take() {
        handle.stop();
    }

    Ok(CommandResponse {
        trace_id,
        data: was_running,
    })
}

/// Stops tracking, closes every shell and, when configured, shuts the hdc server down.
pub fn shutdown(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "shutdown");

    stop_target_tracking(state, Some(trace_id.clone()))?;
    if let Some(mut registry) = lock_shells(state, &trace_id)?.take() {
        registry.clear(&trace_id);
    }
    if let Ok(mut selection) = state.selection.lock() {
        selection.target = None;
    }

    let kill_on_exit = state.config_snapshot().hdc.kill_on_exit;
    if kill_on_exit {
        if let Err(err) = state.gateway.kill(&trace_id) {
            warn!(trace_id = %trace_id, error = %err, "hdc kill failed");
        }
    }

    Ok(CommandResponse {
        trace_id,
        data: kill_on_exit,
    })
}
