#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dejaview_supervisor::{
    BackendCommand, BackendSpawner, ChangeNotifier, DocumentId, ExitReport, FileWatch,
    PortAllocator, ProcessControl, SpawnedBackend, Surface, SurfaceContent, SupervisorConfig,
    SupervisorError, TerminateSignal, WatchFactory,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

pub const READY: &str = "[HTTP] Starting RPC server on localhost:";

pub fn config() -> SupervisorConfig {
    SupervisorConfig::default()
}

pub fn doc(name: &str) -> DocumentId {
    DocumentId::from_raw(format!("/traces/{name}"))
}

/// Poll `check` until it holds, failing the test after a generous deadline.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Default)]
pub struct RecordingSurface {
    contents: Mutex<Vec<SurfaceContent>>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<SurfaceContent> {
        self.contents.lock().last().cloned()
    }

    pub fn history(&self) -> Vec<SurfaceContent> {
        self.contents.lock().clone()
    }

    pub fn is_ready_on(&self, port: u16) -> bool {
        self.current() == Some(SurfaceContent::Ready { port })
    }

    pub fn error_message(&self) -> Option<String> {
        match self.current() {
            Some(SurfaceContent::Error { message }) => Some(message.to_string()),
            _ => None,
        }
    }
}

impl Surface for RecordingSurface {
    fn set_content(&self, content: &SurfaceContent) {
        self.contents.lock().push(content.clone());
    }
}

/// Hands out sequential ports starting at 9001, or fails on demand.
#[derive(Clone, Default)]
pub struct FakePorts {
    next: Arc<AtomicU16>,
    fail: Arc<AtomicBool>,
}

impl FakePorts {
    pub fn failing() -> Self {
        let ports = Self::default();
        ports.fail.store(true, Ordering::SeqCst);
        ports
    }
}

impl PortAllocator for FakePorts {
    async fn allocate(&self) -> Result<u16, SupervisorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::PortAllocation("no ports left".into()));
        }
        Ok(9001 + self.next.fetch_add(1, Ordering::SeqCst))
    }
}

pub struct FakeProcess {
    pub command: BackendCommand,
    output: mpsc::UnboundedSender<String>,
    exit: Option<oneshot::Sender<ExitReport>>,
    signals: mpsc::UnboundedReceiver<TerminateSignal>,
}

/// Records every spawn and lets the test drive each process by index.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    processes: Arc<Mutex<Vec<FakeProcess>>>,
    fail_with: Arc<Mutex<Option<String>>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeSpawner {
    pub fn failing(reason: &str) -> Self {
        let spawner = Self::default();
        *spawner.fail_with.lock() = Some(reason.to_string());
        spawner
    }

    pub fn count(&self) -> usize {
        self.processes.lock().len()
    }

    /// Spawn calls, including the ones that failed.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn command(&self, index: usize) -> BackendCommand {
        self.processes.lock()[index].command.clone()
    }

    pub fn port(&self, index: usize) -> u16 {
        let command = self.command(index);
        let position = command
            .args
            .iter()
            .position(|arg| arg == "--http-port")
            .expect("--http-port argument");
        command.args[position + 1]
            .to_string_lossy()
            .parse()
            .expect("numeric port")
    }

    pub fn emit(&self, index: usize, line: &str) {
        let _ = self.processes.lock()[index].output.send(line.to_string());
    }

    pub fn announce_ready(&self, index: usize) {
        let port = self.port(index);
        self.emit(index, &format!("{READY}{port}"));
    }

    pub fn exit(&self, index: usize, report: ExitReport) {
        if let Some(exit) = self.processes.lock()[index].exit.take() {
            let _ = exit.send(report);
        }
    }

    /// Signals delivered to process `index` so far.
    pub fn signals(&self, index: usize) -> Vec<TerminateSignal> {
        let mut processes = self.processes.lock();
        let mut received = Vec::new();
        while let Ok(signal) = processes[index].signals.try_recv() {
            received.push(signal);
        }
        received
    }
}

impl BackendSpawner for FakeSpawner {
    fn spawn(&self, command: &BackendCommand) -> Result<SpawnedBackend, SupervisorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(SupervisorError::Spawn {
                program: command.program.display().to_string().into(),
                reason: reason.into(),
            });
        }
        let (output_tx, output) = mpsc::unbounded_channel();
        let (exit_tx, exit) = oneshot::channel();
        let (control, signals) = ProcessControl::channel();
        self.processes.lock().push(FakeProcess {
            command: command.clone(),
            output: output_tx,
            exit: Some(exit_tx),
            signals,
        });
        Ok(SpawnedBackend {
            pid: None,
            output,
            exit,
            control,
        })
    }
}

/// Keeps the notifier of every watch so tests can simulate file changes.
#[derive(Clone, Default)]
pub struct FakeWatches {
    notifiers: Arc<Mutex<Vec<(DocumentId, ChangeNotifier)>>>,
    live: Arc<AtomicUsize>,
}

impl FakeWatches {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.notifiers.lock().len()
    }

    pub fn touch(&self, doc: &DocumentId) {
        let notifiers = self.notifiers.lock().clone();
        for (watched, notifier) in notifiers {
            if &watched == doc {
                notifier.notify();
            }
        }
    }
}

struct FakeWatch {
    doc: DocumentId,
    live: Arc<AtomicUsize>,
}

impl FileWatch for FakeWatch {
    fn doc(&self) -> &DocumentId {
        &self.doc
    }
}

impl Drop for FakeWatch {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WatchFactory for FakeWatches {
    fn watch(
        &self,
        doc: &DocumentId,
        notifier: ChangeNotifier,
    ) -> Result<Box<dyn FileWatch>, SupervisorError> {
        self.notifiers.lock().push((doc.clone(), notifier));
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeWatch {
            doc: doc.clone(),
            live: Arc::clone(&self.live),
        }))
    }
}
