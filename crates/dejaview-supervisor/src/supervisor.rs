//! Runtime driver for [`SupervisorCore`].
//!
//! A single task owns the core together with the surface objects, the live
//! process controls and the watch handles. Everything asynchronous (port
//! allocation, process output, exits, timers, file changes) is posted back
//! to that task as a command, so state transitions never interleave.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::document::{DocumentId, Generation, SurfaceId};
use crate::error::SupervisorError;
use crate::port::{LoopbackPortAllocator, PortAllocator};
use crate::process::{
    BackendCommand, BackendSpawner, ExitReport, ProcessControl, SpawnedBackend, TokioSpawner,
    TERM_GRACE,
};
use crate::state::{DocumentSnapshot, Effect, SupervisorCore};
use crate::surface::Surface;
use crate::watch::{ChangeNotifier, FileWatch, NotifyWatchFactory, WatchFactory};

enum Command {
    Open {
        doc: DocumentId,
        surface: SurfaceId,
        target: Arc<dyn Surface>,
    },
    Close {
        doc: DocumentId,
        surface: SurfaceId,
    },
    FileChanged {
        doc: DocumentId,
    },
    PortAllocated {
        doc: DocumentId,
        generation: Generation,
        result: Result<u16, SupervisorError>,
    },
    Output {
        doc: DocumentId,
        generation: Generation,
        line: String,
    },
    Exited {
        doc: DocumentId,
        generation: Generation,
        report: ExitReport,
    },
    StartupTimedOut {
        doc: DocumentId,
        generation: Generation,
    },
    Snapshot {
        respond_to: oneshot::Sender<SupervisorSnapshot>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the whole supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSnapshot {
    pub documents: Vec<DocumentSnapshot>,
    /// Spawned processes that have not been told to stop and have not exited.
    pub live_processes: usize,
    pub active_watches: usize,
}

impl SupervisorSnapshot {
    #[must_use]
    pub fn document(&self, doc: &DocumentId) -> Option<&DocumentSnapshot> {
        self.documents.iter().find(|snapshot| &snapshot.doc == doc)
    }
}

/// Clonable handle to a running supervisor. Dropping every handle stops the
/// supervisor and terminates its backends.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: UnboundedSender<Command>,
    next_surface: Arc<AtomicU64>,
}

impl SupervisorHandle {
    /// Register a surface for `doc`. Returns immediately; the surface receives
    /// its first content from the supervisor task.
    pub fn open_surface(&self, doc: DocumentId, target: Arc<dyn Surface>) -> SurfaceId {
        let surface = SurfaceId::new(self.next_surface.fetch_add(1, Ordering::Relaxed) + 1);
        self.send(Command::Open {
            doc,
            surface,
            target,
        });
        surface
    }

    pub fn close_surface(&self, doc: DocumentId, surface: SurfaceId) {
        self.send(Command::Close { doc, surface });
    }

    /// Treat `doc` as modified on disk.
    pub fn file_changed(&self, doc: DocumentId) {
        self.send(Command::FileChanged { doc });
    }

    pub async fn snapshot(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { respond_to })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Close every surface, terminate every backend and stop the task. Returns
    /// once the backends have exited, or after a bounded wait.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { respond_to })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("supervisor stopped, dropping request");
        }
    }
}

/// Upper bound on how long shutdown waits for terminated backends to exit.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(TERM_GRACE.as_secs() + 1);

struct LiveProcess {
    doc: DocumentId,
    control: ProcessControl,
}

/// Owner of all per-document runtime resources.
pub struct BackendSupervisor<P, S, W> {
    config: Arc<SupervisorConfig>,
    core: SupervisorCore,
    ports: Arc<P>,
    spawner: S,
    watches: W,
    surfaces: HashMap<SurfaceId, Arc<dyn Surface>>,
    processes: HashMap<Generation, LiveProcess>,
    watchers: HashMap<DocumentId, Box<dyn FileWatch>>,
    monitors: JoinSet<()>,
    events: WeakUnboundedSender<Command>,
}

impl BackendSupervisor<LoopbackPortAllocator, TokioSpawner, NotifyWatchFactory> {
    /// Start with real ports, processes and file watches.
    pub fn start_default(config: SupervisorConfig) -> SupervisorHandle {
        Self::start(
            config,
            LoopbackPortAllocator,
            TokioSpawner,
            NotifyWatchFactory,
        )
    }
}

impl<P, S, W> BackendSupervisor<P, S, W>
where
    P: PortAllocator,
    S: BackendSpawner,
    W: WatchFactory,
{
    /// Spawn the supervisor task on the current tokio runtime.
    pub fn start(config: SupervisorConfig, ports: P, spawner: S, watches: W) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            core: SupervisorCore::new(&config),
            config: Arc::new(config),
            ports: Arc::new(ports),
            spawner,
            watches,
            surfaces: HashMap::new(),
            processes: HashMap::new(),
            watchers: HashMap::new(),
            monitors: JoinSet::new(),
            events: tx.downgrade(),
        };
        tokio::spawn(supervisor.run(rx));
        SupervisorHandle {
            tx,
            next_surface: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        let mut stopped_by = None;
        while let Some(command) = rx.recv().await {
            match command {
                Command::Open {
                    doc,
                    surface,
                    target,
                } => {
                    debug!(doc = %doc, %surface, "surface opened");
                    self.surfaces.insert(surface, target);
                    let effects = self.core.open_surface(&doc, surface);
                    self.apply(effects);
                }
                Command::Close { doc, surface } => {
                    debug!(doc = %doc, %surface, "surface closed");
                    self.surfaces.remove(&surface);
                    let effects = self.core.close_surface(&doc, surface);
                    self.apply(effects);
                }
                Command::FileChanged { doc } => {
                    let effects = self.core.file_changed(&doc);
                    self.apply(effects);
                }
                Command::PortAllocated {
                    doc,
                    generation,
                    result,
                } => {
                    let effects = self.core.port_allocated(&doc, generation, result);
                    self.apply(effects);
                }
                Command::Output {
                    doc,
                    generation,
                    line,
                } => {
                    let effects = self.core.output_line(&doc, generation, &line);
                    self.apply(effects);
                }
                Command::Exited {
                    doc,
                    generation,
                    report,
                } => {
                    self.processes.remove(&generation);
                    while self.monitors.try_join_next().is_some() {}
                    let effects = self.core.exited(&doc, generation, report);
                    self.apply(effects);
                }
                Command::StartupTimedOut { doc, generation } => {
                    let effects = self.core.startup_timed_out(&doc, generation);
                    self.apply(effects);
                }
                Command::Snapshot { respond_to } => {
                    let _ = respond_to.send(self.snapshot());
                }
                Command::Shutdown { respond_to } => {
                    stopped_by = Some(respond_to);
                    break;
                }
            }
        }
        self.close_all();
        self.wait_for_backends().await;
        if let Some(respond_to) = stopped_by {
            let _ = respond_to.send(());
        }
        info!("supervisor stopped");
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Render { surface, content } => {
                    if let Some(target) = self.surfaces.get(&surface) {
                        debug!(%surface, content = content.kind(), "updating surface");
                        target.set_content(&content);
                    }
                }
                Effect::AllocatePort { doc, generation } => self.allocate_port(doc, generation),
                Effect::Spawn {
                    doc,
                    generation,
                    port,
                } => {
                    if let Err(err) = self.spawn_backend(&doc, generation, port) {
                        queue.extend(self.core.spawn_failed(&doc, generation, err));
                    }
                }
                Effect::Terminate {
                    doc,
                    generation,
                    signal,
                } => {
                    if let Some(process) = self.processes.remove(&generation) {
                        debug!(doc = %doc, %generation, signal = signal.as_str(), "terminating backend");
                        process.control.terminate(signal);
                    }
                }
                Effect::Watch { doc } => self.watch(doc),
                Effect::Unwatch { doc } => {
                    if self.watchers.remove(&doc).is_some() {
                        debug!(doc = %doc, "trace watch disposed");
                    }
                }
            }
        }
    }

    fn allocate_port(&self, doc: DocumentId, generation: Generation) {
        let ports = Arc::clone(&self.ports);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = ports.allocate().await;
            post(
                &events,
                Command::PortAllocated {
                    doc,
                    generation,
                    result,
                },
            );
        });
    }

    fn spawn_backend(
        &mut self,
        doc: &DocumentId,
        generation: Generation,
        port: u16,
    ) -> Result<(), SupervisorError> {
        let command = BackendCommand::for_document(&self.config, doc, port);
        info!(doc = %doc, %generation, command = %command.display(), "starting backend");
        let SpawnedBackend {
            pid,
            output,
            exit,
            control,
        } = self.spawner.spawn(&command)?;
        debug!(doc = %doc, %generation, ?pid, "backend spawned");

        self.processes.insert(
            generation,
            LiveProcess {
                doc: doc.clone(),
                control,
            },
        );
        self.monitors.spawn(monitor(
            doc.clone(),
            generation,
            output,
            exit,
            self.events.clone(),
        ));

        if let Some(timeout) = self.config.startup_timeout {
            let events = self.events.clone();
            let doc = doc.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                post(&events, Command::StartupTimedOut { doc, generation });
            });
        }
        Ok(())
    }

    fn watch(&mut self, doc: DocumentId) {
        let events = self.events.clone();
        let changed = doc.clone();
        let notifier = ChangeNotifier::new(move || {
            post(
                &events,
                Command::FileChanged {
                    doc: changed.clone(),
                },
            );
        });
        match self.watches.watch(&doc, notifier) {
            Ok(handle) => {
                debug!(doc = %doc, "watching trace file");
                self.watchers.insert(doc, handle);
            }
            Err(err) => warn!(doc = %doc, "reload on change disabled: {err}"),
        }
    }

    fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            documents: self.core.snapshot(),
            live_processes: self.processes.len(),
            active_watches: self.watchers.len(),
        }
    }

    fn close_all(&mut self) {
        let open: Vec<(DocumentId, Vec<SurfaceId>)> = self
            .core
            .documents()
            .map(|doc| (doc.clone(), self.core.surfaces(doc)))
            .collect();
        for (doc, surfaces) in open {
            for surface in surfaces {
                self.surfaces.remove(&surface);
                let effects = self.core.close_surface(&doc, surface);
                self.apply(effects);
            }
        }
        for (generation, process) in self.processes.drain() {
            debug!(doc = %process.doc, %generation, "terminating orphaned backend");
            process.control.terminate(self.config.close_signal);
        }
        self.watchers.clear();
    }

    async fn wait_for_backends(&mut self) {
        let monitors = &mut self.monitors;
        let finished = tokio::time::timeout(SHUTDOWN_WAIT, async {
            while monitors.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(
                remaining = self.monitors.len(),
                "backends still running after {}s, abandoning them",
                SHUTDOWN_WAIT.as_secs()
            );
        }
    }
}

/// Forwards output lines, then the exit report, for one spawn generation.
async fn monitor(
    doc: DocumentId,
    generation: Generation,
    mut output: UnboundedReceiver<String>,
    mut exit: oneshot::Receiver<ExitReport>,
    events: WeakUnboundedSender<Command>,
) {
    let forward = |line: String| {
        debug!(target: "dejaview::backend", doc = %doc, %generation, "{line}");
        post(
            &events,
            Command::Output {
                doc: doc.clone(),
                generation,
                line,
            },
        );
    };

    let mut output_open = true;
    let report = loop {
        tokio::select! {
            line = output.recv(), if output_open => match line {
                Some(line) => forward(line),
                None => output_open = false,
            },
            report = &mut exit => break report.unwrap_or_default(),
        }
    };
    while let Ok(line) = output.try_recv() {
        forward(line);
    }
    info!(doc = %doc, %generation, %report, "backend exited");
    post(
        &events,
        Command::Exited {
            doc,
            generation,
            report,
        },
    );
}

fn post(events: &WeakUnboundedSender<Command>, command: Command) {
    if let Some(tx) = events.upgrade() {
        let _ = tx.send(command);
    }
}
