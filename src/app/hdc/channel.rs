use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::app::hdc::gateway::TerminalSink;
use crate::app::models::{TerminalEvent, TerminalEventKind};

const BATCH_DELAY: Duration = Duration::from_millis(50);
const BATCH_MAX_LEN: usize = 16_384;
const EXIT_POLL: Duration = Duration::from_millis(150);

#[derive(Clone)]
struct EventSource {
    target: String,
    session_id: String,
    trace_id: String,
    sink: TerminalSink,
}

impl EventSource {
    fn emit(&self, event: TerminalEventKind, stream: Option<&str>, chunk: Option<String>, exit_code: Option<i32>) {
        (self.sink)(TerminalEvent {
            target: self.target.clone(),
            session_id: self.session_id.clone(),
            event,
            stream: stream.map(str::to_string),
            chunk,
            exit_code,
            trace_id: self.trace_id.clone(),
        });
    }
}

/// One interactive `hdc shell` process with piped stdio.
pub struct ShellChannel {
    source: EventSource,
    child: Arc<Mutex<Child>>,
    stdin: Mutex<ChildStdin>,
    stop_flag: Arc<AtomicBool>,
}

/// Decodes the complete UTF-8 prefix of `buffer` and keeps a trailing partial character for the next read.
fn drain_utf8(buffer: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut consumed = 0;
    while consumed < buffer.len() {
        match std::str::from_utf8(&buffer[consumed..]) {
            Ok(valid) => {
                text.push_str(valid);
                consumed = buffer.len();
            }
            Err(err) => {
                let valid_end = consumed + err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buffer[consumed..valid_end]));
                match err.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_end + invalid;
                    }
                    None => {
                        consumed = valid_end;
                        break;
                    }
                }
            }
        }
    }
    buffer.drain(..consumed);
    text
}

fn pump_output<R: Read + Send + 'static>(
    mut reader: R,
    stream: &'static str,
    source: EventSource,
    stop_flag: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut temp = [0u8; 4096];
        let mut undecoded: Vec<u8> = Vec::new();
        let mut pending = String::new();
        let mut last_emit = Instant::now();
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            let read_count = match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => count,
                Err(err) => {
                    warn!(trace_id = %source.trace_id, stream, error = %err, "failed to read shell output");
                    break;
                }
            };
            undecoded.extend_from_slice(&temp[..read_count]);
            let chunk = drain_utf8(&mut undecoded);
            pending.push_str(&chunk);
            // Reads block, so a short read or a line break is the end of a burst.
            if pending.len() >= BATCH_MAX_LEN
                || read_count < temp.len()
                || chunk.contains(['\n', '\r'])
                || last_emit.elapsed() >= BATCH_DELAY
            {
                let flush = std::mem::take(&mut pending);
                source.emit(TerminalEventKind::Output, Some(stream), Some(flush), None);
                last_emit = Instant::now();
            }
        }
        pending.push_str(&String::from_utf8_lossy(&undecoded));
        if !pending.is_empty() {
            source.emit(TerminalEventKind::Output, Some(stream), Some(pending), None);
        }
    });
}

fn watch_exit(child: Arc<Mutex<Child>>, source: EventSource, stop_flag: Arc<AtomicBool>) {
    std::thread::spawn(move || loop {
        let status = {
            let mut guard = match child.lock() {
                Ok(guard) => guard,
                Err(_) => break,
            };
            match guard.try_wait() {
                Ok(status) => status,
                Err(err) => {
                    warn!(trace_id = %source.trace_id, error = %err, "failed to poll shell process");
                    break;
                }
            }
        };
        if let Some(status) = status {
            // `stop` reports its own event.
            if !stop_flag.load(Ordering::Relaxed) {
                source.emit(TerminalEventKind::Exit, None, None, status.code());
            }
            break;
        }
        std::thread::sleep(EXIT_POLL);
    });
}

impl ShellChannel {
    pub fn spawn(
        program: &str,
        args: &[String],
        target: String,
        session_id: String,
        trace_id: String,
        sink: TerminalSink,
    ) -> Result<Self, std::io::Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stderr"))?;

        let source = EventSource {
            target,
            session_id,
            trace_id,
            sink,
        };
        let stop_flag = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(child));

        pump_output(stdout, "stdout", source.clone(), Arc::clone(&stop_flag));
        pump_output(stderr, "stderr", source.clone(), Arc::clone(&stop_flag));
        watch_exit(Arc::clone(&child), source.clone(), Arc::clone(&stop_flag));

        Ok(Self {
            source,
            child,
            stdin: Mutex::new(stdin),
            stop_flag,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.source.session_id
    }

    pub fn target(&self) -> &str {
        &self.source.target
    }

    /// Writes `data` verbatim; callers include the newline when a command should run.
    pub fn write(&self, data: &str) -> Result<(), std::io::Error> {
        let mut guard = self
            .stdin
            .lock()
            .map_err(|_| std::io::Error::other("stdin lock poisoned"))?;
        guard.write_all(data.as_bytes())?;
        guard.flush()
    }

    pub fn is_running(&self) -> bool {
        let mut guard = match self.child.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        matches!(guard.try_wait(), Ok(None))
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.child.lock() {
            let _ = guard.kill();
            let _ = guard.wait();
        }
        self.source
            .emit(TerminalEventKind::Stopped, None, None, None);
    }
}
