use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use haro_lib::app::commands::{
    add_shell, check_hdc, close_shell, dump_layout, export_layout, get_overview, list_shells,
    list_shortcuts, list_targets, mount_shell, run_shortcut, select_panel, select_shell,
    select_target, shutdown, start_target_tracking, write_shell,
};
use haro_lib::app::config::{config_path, load_config_from_path, AppConfig};
use haro_lib::app::error::AppError;
use haro_lib::app::hdc::client::HdcClient;
use haro_lib::app::hdc::locator::{bundled_hdc_path, resolve_hdc_program};
use haro_lib::app::logging::init_logging;
use haro_lib::app::models::{ShellSessionInfo, TerminalEvent, TerminalEventKind};
use haro_lib::app::shell::{TerminalSurface, WriteOutcome};
use haro_lib::app::state::AppState;
use tracing::{info, warn};
use uuid::Uuid;

const HELP: &str = "\
:add              open another shell
:close            close the current shell
:tab N            switch to shell N (as listed by :tabs)
:tabs             list shells
:shortcuts        list command shortcuts
:run TITLE        run a shortcut in the current shell
:targets          list connected devices
:target KEY       switch device
:overview         show device overview
:layout DIR       export window_hierarchy.xml/.html to DIR
:quit             exit
anything else is sent to the current shell";

#[derive(Debug, Clone, Default)]
struct Args {
    target: Option<String>,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--target" | "-t" => {
                args.target = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if args.target.is_none() {
                    return Err("--target requires a value".to_string());
                }
            }
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                args.config = Some(PathBuf::from(value));
            }
            "-h" | "--help" => {
                return Err("Usage: haro [--target KEY] [--config PATH]\n".to_string());
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(args)
}

/// Prints a shell's output while it is the visible tab; buffers it otherwise.
struct ConsoleSurface {
    name: String,
    visible: AtomicBool,
    pending: Mutex<String>,
}

impl ConsoleSurface {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            visible: AtomicBool::new(false),
            pending: Mutex::new(String::new()),
        }
    }

    fn set_visible(&self, visible: bool) {
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            self.flush_pending();
        }
    }

    fn flush_pending(&self) {
        let pending = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        if !pending.is_empty() {
            print_chunk(&pending);
        }
    }

    fn emit(&self, text: &str) {
        if self.visible.load(Ordering::SeqCst) {
            print_chunk(text);
        } else if let Ok(mut pending) = self.pending.lock() {
            pending.push_str(text);
        }
    }
}

impl TerminalSurface for ConsoleSurface {
    fn render(&self, event: &TerminalEvent) {
        match event.event {
            TerminalEventKind::Output => {
                if let Some(chunk) = event.chunk.as_deref() {
                    self.emit(chunk);
                }
            }
            TerminalEventKind::Exit => {
                let code = event
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "?".to_string());
                self.emit(&format!("\n[{} exited with code {code}]\n", self.name));
            }
            TerminalEventKind::Stopped => {}
        }
    }

    fn focus(&self) {
        if self.visible.load(Ordering::SeqCst) {
            self.flush_pending();
            let _ = io::stdout().flush();
        }
    }
}

fn print_chunk(text: &str) {
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

struct Console {
    state: AppState,
    surfaces: HashMap<String, Arc<ConsoleSurface>>,
    shells: Vec<ShellSessionInfo>,
}

impl Console {
    fn new(state: AppState) -> Self {
        Self {
            state,
            surfaces: HashMap::new(),
            shells: Vec::new(),
        }
    }

    fn trace() -> Option<String> {
        Some(Uuid::new_v4().to_string())
    }

    /// Mounts the active shell when needed and shows only its output.
    fn sync(&mut self, shells: Vec<ShellSessionInfo>) -> Result<(), AppError> {
        self.surfaces
            .retain(|id, _| shells.iter().any(|info| &info.id == id));
        for info in &shells {
            let surface = self
                .surfaces
                .entry(info.id.clone())
                .or_insert_with(|| Arc::new(ConsoleSurface::new(&info.display_name)));
            if !info.visible {
                surface.set_visible(false);
            }
        }
        self.shells = shells;

        let Some(active) = self.shells.iter().find(|info| info.active).cloned() else {
            return Ok(());
        };
        if active.remote_session_id.is_none() {
            if let Some(surface) = self.surfaces.get(&active.id) {
                let binding = Arc::clone(surface);
                self.shells = mount_shell(&self.state, active.id.clone(), binding, Self::trace())?.data;
            }
        }
        if let Some(surface) = self.surfaces.get(&active.id) {
            surface.set_visible(true);
        }
        Ok(())
    }

    fn print_tabs(&self) {
        for (index, info) in self.shells.iter().enumerate() {
            let marker = if info.active { "*" } else { " " };
            eprintln!("{marker} {} {}", index + 1, info.display_name);
        }
    }

    fn switch_target(&mut self, key: &str) -> Result<(), AppError> {
        let shells = select_target(&self.state, key.to_string(), Self::trace())?.data;
        eprintln!("[target {key}]");
        self.sync(shells)
    }

    /// Returns `false` once the user asked to quit.
    fn handle(&mut self, line: &str) -> Result<bool, AppError> {
        let Some(command) = line.strip_prefix(':') else {
            let outcome = write_shell(&self.state, format!("{line}\n"), Self::trace())?.data;
            if outcome == WriteOutcome::Dropped {
                eprintln!("[shell not connected yet]");
            }
            return Ok(true);
        };
        let (name, rest) = command
            .split_once(' ')
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((command, ""));

        match name {
            "quit" | "q" => return Ok(false),
            "help" => eprintln!("{HELP}"),
            "add" => {
                let shells = add_shell(&self.state, Self::trace())?.data;
                self.sync(shells)?;
            }
            "close" => {
                let Some(active) = self.shells.iter().find(|info| info.active) else {
                    eprintln!("[no shell open]");
                    return Ok(true);
                };
                let shells = close_shell(&self.state, active.id.clone(), Self::trace())?.data;
                self.sync(shells)?;
            }
            "tab" => {
                let index: usize = rest.parse().unwrap_or(0);
                let Some(info) = index.checked_sub(1).and_then(|i| self.shells.get(i)) else {
                    eprintln!("[no shell {rest}]");
                    return Ok(true);
                };
                let shells = select_shell(&self.state, info.id.clone(), Self::trace())?.data;
                self.sync(shells)?;
            }
            "tabs" => {
                let shells = list_shells(&self.state, Self::trace())?.data;
                self.sync(shells)?;
                self.print_tabs();
            }
            "shortcuts" => {
                for shortcut in list_shortcuts(&self.state, Self::trace())?.data {
                    eprintln!("{:<14} {}", shortcut.title, shortcut.command.trim_end());
                }
            }
            "run" => {
                run_shortcut(&self.state, rest.to_string(), Self::trace())?;
            }
            "targets" => match list_targets(&self.state, Self::trace())?.data.ready() {
                Some(targets) if targets.is_empty() => eprintln!("[no devices]"),
                Some(targets) => {
                    for target in targets {
                        eprintln!(
                            "{}  {}  {}",
                            target.key,
                            target.name.unwrap_or_default(),
                            target.ohos_version.unwrap_or_default()
                        );
                    }
                }
                None => eprintln!("[device list unavailable]"),
            },
            "target" => self.switch_target(rest)?,
            "overview" => {
                let overview = get_overview(&self.state, Self::trace())?.data;
                let rendered = serde_json::to_string_pretty(&overview)
                    .map_err(|err| AppError::system(err.to_string(), ""))?;
                eprintln!("{rendered}");
            }
            "layout" => {
                if rest.is_empty() {
                    let capture = dump_layout(&self.state, false, Self::trace())?.data;
                    println!("{}", capture.xml);
                } else {
                    let result = export_layout(&self.state, rest.to_string(), Self::trace())?.data;
                    eprintln!("[saved {} and {}]", result.xml_path, result.html_path);
                }
            }
            other => eprintln!("[unknown command :{other}, try :help]"),
        }
        Ok(true)
    }
}

fn pick_target(state: &AppState, requested: Option<String>) -> Option<String> {
    if requested.is_some() {
        return requested;
    }
    let outcome = list_targets(state, Console::trace()).ok()?.data;
    if let Some(reason) = outcome.reason() {
        warn!(error = %reason, "listing targets failed");
    }
    outcome
        .ready()
        .and_then(|targets| targets.into_iter().next())
        .map(|target| target.key)
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let path = args.config.clone().unwrap_or_else(config_path);
    let (config, config_error) = match load_config_from_path(&path) {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    init_logging(&config.logging.log_level);
    if let Some(err) = config_error {
        warn!(path = %path.display(), error = %err, "config unreadable, using defaults");
    }

    let program = resolve_hdc_program(&config.hdc.command_path, bundled_hdc_path().as_deref());
    let timeout = Duration::from_secs(config.hdc.command_timeout_secs);
    let gateway = Arc::new(HdcClient::new(program, timeout));
    let state = AppState::new(gateway, config, path);

    match check_hdc(&state, None, Console::trace()) {
        Ok(response) if response.data.available => {
            info!(trace_id = %response.trace_id, program = %response.data.command_path, "hdc ready");
        }
        Ok(response) => {
            eprintln!(
                "hdc is not usable ({}): {}",
                response.data.command_path,
                response.data.error.unwrap_or_default()
            );
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }

    let on_change: Arc<dyn Fn() + Send + Sync> = Arc::new(|| eprintln!("[devices changed, :targets to list]"));
    if let Err(err) = start_target_tracking(&state, on_change, Console::trace()) {
        warn!(error = %err, "target tracking unavailable");
    }

    let mut console = Console::new(state);
    if let Err(err) = select_panel(&console.state, "shell".to_string(), Console::trace()) {
        eprintln!("{err}");
    }
    match pick_target(&console.state, args.target) {
        Some(key) => {
            if let Err(err) = console.switch_target(&key) {
                eprintln!("{err}");
            }
        }
        None => eprintln!("[no device connected, use :target KEY once one is]"),
    }
    eprintln!("{HELP}");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "stdin closed");
                break;
            }
        };
        match console.handle(line.trim_end_matches('\r')) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => eprintln!("[{}] {}", err.code, err.error),
        }
    }

    if let Err(err) = shutdown(&console.state, Console::trace()) {
        eprintln!("{err}");
    }
}
