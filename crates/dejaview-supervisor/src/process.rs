//! Backend process spawning and control.

#![allow(missing_docs)]

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use smol_str::SmolStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{SupervisorConfig, TerminateSignal};
use crate::document::DocumentId;
use crate::error::SupervisorError;

/// How a backend process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    #[must_use]
    pub const fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    #[must_use]
    pub const fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Program and arguments for one backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl BackendCommand {
    /// `<engine> <engine_args...> -D <document> --http-port <port>`
    #[must_use]
    pub fn for_document(config: &SupervisorConfig, doc: &DocumentId, port: u16) -> Self {
        let mut args: Vec<OsString> = config
            .engine_args
            .iter()
            .map(|arg| OsString::from(arg.as_str()))
            .collect();
        args.push("-D".into());
        args.push(doc.path().as_os_str().to_owned());
        args.push("--http-port".into());
        args.push(port.to_string().into());
        Self {
            program: config.engine.clone(),
            args,
        }
    }

    /// Shell-like rendering for logs.
    #[must_use]
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

/// Fire-and-forget termination handle for a spawned backend.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    tx: mpsc::UnboundedSender<TerminateSignal>,
}

impl ProcessControl {
    /// A control handle and the receiving end the process owner listens on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TerminateSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn terminate(&self, signal: TerminateSignal) {
        // The owner is gone once the process has exited; nothing left to stop.
        let _ = self.tx.send(signal);
    }
}

/// Handles to a freshly spawned backend.
#[derive(Debug)]
pub struct SpawnedBackend {
    pub pid: Option<u32>,
    /// Combined stdout and stderr, one entry per line.
    pub output: mpsc::UnboundedReceiver<String>,
    pub exit: oneshot::Receiver<ExitReport>,
    pub control: ProcessControl,
}

/// Creates backend processes.
pub trait BackendSpawner: Send + Sync + 'static {
    fn spawn(&self, command: &BackendCommand) -> Result<SpawnedBackend, SupervisorError>;
}

/// Spawns real processes with `tokio::process`. Must be called from within a
/// tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl BackendSpawner for TokioSpawner {
    fn spawn(&self, command: &BackendCommand) -> Result<SpawnedBackend, SupervisorError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: a terminal ^C reaches the host, which then stops
        // backends itself.
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        // Windows: hide console window
        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW
        }

        let mut child = cmd.spawn().map_err(|err| SupervisorError::Spawn {
            program: SmolStr::from(command.program.display().to_string()),
            reason: SmolStr::from(err.to_string()),
        })?;
        let pid = child.id();
        debug!(?pid, "backend process spawned");

        let (line_tx, output) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let (control, signals) = ProcessControl::channel();
        let (exit_tx, exit) = oneshot::channel();
        tokio::spawn(async move {
            let report = own_child(child, signals).await;
            let _ = exit_tx.send(report);
        });

        Ok(SpawnedBackend {
            pid,
            output,
            exit,
            control,
        })
    }
}

/// How long a backend asked to stop gracefully may take before it is killed.
pub const TERM_GRACE: Duration = Duration::from_secs(5);

async fn own_child(
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<TerminateSignal>,
) -> ExitReport {
    let mut control_open = true;
    let mut requested = None;
    let mut kill_at: Option<Instant> = None;
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => ExitReport::from_status(status),
                    Err(err) => {
                        warn!("failed to wait for backend process: {err}");
                        ExitReport::default()
                    }
                };
            }
            signal = signals.recv(), if control_open => match signal {
                Some(signal) => {
                    requested = Some(signal);
                    send_signal(&mut child, signal);
                }
                None => {
                    control_open = false;
                    match requested {
                        Some(TerminateSignal::Term) => {
                            kill_at = Some(Instant::now() + TERM_GRACE);
                        }
                        Some(TerminateSignal::Kill) => {}
                        // Nobody asked it to stop and nobody can any more.
                        None => send_signal(&mut child, TerminateSignal::Kill),
                    }
                }
            },
            () = grace_elapsed(kill_at), if kill_at.is_some() => {
                kill_at = None;
                debug!(pid = ?child.id(), "backend ignored SIGTERM, killing");
                send_signal(&mut child, TerminateSignal::Kill);
            }
        }
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn send_signal(child: &mut Child, signal: TerminateSignal) {
    let result = match signal {
        TerminateSignal::Term => send_term(child),
        TerminateSignal::Kill => child.start_kill(),
    };
    if let Err(err) = result {
        debug!(pid = ?child.id(), signal = signal.as_str(), "signal not delivered: {err}");
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn send_term(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range")
    })?;
    // SAFETY: kill(2) has no memory-safety preconditions; `pid` is a child we
    // still own and have not reaped, so it cannot name a recycled process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_term(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!("backend output stream closed: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_follows_engine_contract() {
        let mut config = SupervisorConfig::default();
        config.engine_args = vec!["--full-sort".into()];
        let doc = DocumentId::from_raw("/traces/boot.perfetto");
        let command = BackendCommand::for_document(&config, &doc, 9001);
        assert_eq!(command.program, PathBuf::from("trace_processor_shell"));
        assert_eq!(
            command.args,
            vec![
                OsString::from("--full-sort"),
                OsString::from("-D"),
                OsString::from("/traces/boot.perfetto"),
                OsString::from("--http-port"),
                OsString::from("9001"),
            ]
        );
        assert_eq!(
            command.display(),
            "trace_processor_shell --full-sort -D /traces/boot.perfetto --http-port 9001"
        );
    }

    #[test]
    fn exit_report_display() {
        assert_eq!(ExitReport::code(2).to_string(), "exit code 2");
        assert_eq!(ExitReport::signal(15).to_string(), "signal 15");
        assert_eq!(ExitReport::default().to_string(), "unknown exit status");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let command = BackendCommand {
            program: PathBuf::from("/nonexistent/dejaview/trace_processor_shell"),
            args: Vec::new(),
        };
        let err = TokioSpawner.spawn(&command).unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_lines_and_exit_are_reported() {
        let command = BackendCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "echo hello; echo oops >&2; exit 3".into()],
        };
        let mut spawned = TokioSpawner.spawn(&command).unwrap();
        let mut lines = Vec::new();
        while let Some(line) = spawned.output.recv().await {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["hello".to_string(), "oops".to_string()]);
        assert_eq!(spawned.exit.await.unwrap(), ExitReport::code(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn term_signal_stops_process() {
        let command = BackendCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exec sleep 30".into()],
        };
        let spawned = TokioSpawner.spawn(&command).unwrap();
        spawned.control.terminate(TerminateSignal::Term);
        let report = spawned.exit.await.unwrap();
        assert_eq!(report.signal, Some(libc::SIGTERM));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn term_handler_runs_after_control_is_dropped() {
        let command = BackendCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec![
                "-c".into(),
                "trap 'exit 7' TERM; echo up; while :; do sleep 0.05; done".into(),
            ],
        };
        let mut spawned = TokioSpawner.spawn(&command).unwrap();
        assert_eq!(spawned.output.recv().await.as_deref(), Some("up"));
        spawned.control.terminate(TerminateSignal::Term);
        drop(spawned.control);
        assert_eq!(spawned.exit.await.unwrap(), ExitReport::code(7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_control_without_a_request_kills() {
        let command = BackendCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exec sleep 30".into()],
        };
        let spawned = TokioSpawner.spawn(&command).unwrap();
        drop(spawned.control);
        let report = spawned.exit.await.unwrap();
        assert_eq!(report.signal, Some(libc::SIGKILL));
    }
}
