//! Sans-IO supervisor state machine.
//!
//! `SupervisorCore` owns every per-document map (surfaces, backend slot,
//! watch flag) and never performs I/O. Each input returns the effects the
//! runtime has to carry out, in order. Asynchronous results come back tagged
//! with the generation they were started for; results for any other
//! generation are discarded.

#![allow(missing_docs)]

use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::config::{SupervisorConfig, TerminateSignal};
use crate::document::{DocumentId, Generation, SurfaceId};
use crate::error::SupervisorError;
use crate::process::ExitReport;
use crate::readiness::ReadinessMatcher;
use crate::surface::SurfaceContent;

/// Observable backend state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NotStarted,
    Starting,
    Ready,
    /// The last backend ended (failure or crash) and nothing replaced it yet.
    Terminated,
}

impl BackendState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        }
    }
}

/// Work requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Render {
        surface: SurfaceId,
        content: SurfaceContent,
    },
    AllocatePort {
        doc: DocumentId,
        generation: Generation,
    },
    Spawn {
        doc: DocumentId,
        generation: Generation,
        port: u16,
    },
    /// Fire-and-forget; the slot is already vacant when this is emitted.
    Terminate {
        doc: DocumentId,
        generation: Generation,
        signal: TerminateSignal,
    },
    Watch {
        doc: DocumentId,
    },
    Unwatch {
        doc: DocumentId,
    },
}

#[derive(Debug, Clone)]
enum Phase {
    AllocatingPort,
    Spawned {
        port: u16,
        matcher: ReadinessMatcher,
    },
    Ready {
        port: u16,
    },
}

#[derive(Debug, Clone)]
struct Backend {
    generation: Generation,
    phase: Phase,
}

impl Backend {
    fn port(&self) -> Option<u16> {
        match &self.phase {
            Phase::AllocatingPort => None,
            Phase::Spawned { port, .. } | Phase::Ready { port } => Some(*port),
        }
    }

    fn has_process(&self) -> bool {
        !matches!(self.phase, Phase::AllocatingPort)
    }
}

#[derive(Debug, Default)]
struct DocumentSlot {
    surfaces: IndexSet<SurfaceId>,
    backend: Option<Backend>,
    watched: bool,
    ended: bool,
}

/// Point-in-time view of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub doc: DocumentId,
    pub state: BackendState,
    pub port: Option<u16>,
    pub generation: Option<Generation>,
    pub surfaces: Vec<SurfaceId>,
    pub watched: bool,
}

#[derive(Debug)]
pub struct SupervisorCore {
    documents: IndexMap<DocumentId, DocumentSlot>,
    last_generation: Generation,
    engine_name: String,
    ready_pattern: SmolStr,
    startup_timeout: Option<Duration>,
    restart_signal: TerminateSignal,
    close_signal: TerminateSignal,
}

impl SupervisorCore {
    #[must_use]
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            documents: IndexMap::new(),
            last_generation: Generation::default(),
            engine_name: config.engine_name(),
            ready_pattern: config.ready_pattern.clone(),
            startup_timeout: config.startup_timeout,
            restart_signal: config.restart_signal,
            close_signal: config.close_signal,
        }
    }

    /// Register `surface` under `doc`, starting a backend when none is live.
    pub fn open_surface(&mut self, doc: &DocumentId, surface: SurfaceId) -> Vec<Effect> {
        let slot = self.documents.entry(doc.clone()).or_default();
        if !slot.surfaces.insert(surface) {
            return Vec::new();
        }
        let content = match slot.backend.as_ref().map(|backend| &backend.phase) {
            None => return self.begin_start(doc),
            Some(Phase::Ready { port }) => SurfaceContent::Ready { port: *port },
            Some(Phase::AllocatingPort | Phase::Spawned { .. }) => self.starting_content(doc),
        };
        vec![Effect::Render { surface, content }]
    }

    /// Unregister `surface`. The last close tears the document down.
    pub fn close_surface(&mut self, doc: &DocumentId, surface: SurfaceId) -> Vec<Effect> {
        let Some(slot) = self.documents.get_mut(doc) else {
            return Vec::new();
        };
        if !slot.surfaces.shift_remove(&surface) || !slot.surfaces.is_empty() {
            return Vec::new();
        }
        let Some(slot) = self.documents.shift_remove(doc) else {
            return Vec::new();
        };

        info!(doc = %doc, "last surface closed, releasing backend");
        let mut effects = Vec::new();
        if let Some(backend) = slot.backend.filter(Backend::has_process) {
            effects.push(Effect::Terminate {
                doc: doc.clone(),
                generation: backend.generation,
                signal: self.close_signal,
            });
        }
        if slot.watched {
            effects.push(Effect::Unwatch { doc: doc.clone() });
        }
        effects
    }

    /// Source file modified: supersede the current backend with a fresh one.
    pub fn file_changed(&mut self, doc: &DocumentId) -> Vec<Effect> {
        let Some(slot) = self.documents.get_mut(doc) else {
            return Vec::new();
        };
        if slot.surfaces.is_empty() {
            return Vec::new();
        }
        info!(doc = %doc, "trace file changed, restarting backend");
        let mut effects = Vec::new();
        if let Some(previous) = slot.backend.take().filter(Backend::has_process) {
            effects.push(Effect::Terminate {
                doc: doc.clone(),
                generation: previous.generation,
                signal: self.restart_signal,
            });
        }
        effects.extend(self.begin_start(doc));
        effects
    }

    pub fn port_allocated(
        &mut self,
        doc: &DocumentId,
        generation: Generation,
        result: Result<u16, SupervisorError>,
    ) -> Vec<Effect> {
        let Some(backend) = current_backend(&mut self.documents, doc, generation) else {
            debug!(doc = %doc, %generation, "discarding stale port allocation");
            return Vec::new();
        };
        if !matches!(backend.phase, Phase::AllocatingPort) {
            return Vec::new();
        }
        let port = match result {
            Ok(port) => port,
            Err(err) => return self.fail(doc, &err),
        };
        let matcher = ReadinessMatcher::new(&self.ready_pattern, port);
        debug!(doc = %doc, %generation, expected = matcher.expected(), "waiting for readiness line");
        backend.phase = Phase::Spawned { port, matcher };

        let mut effects = Vec::new();
        if let Some(slot) = self.documents.get_mut(doc) {
            if !slot.watched {
                slot.watched = true;
                effects.push(Effect::Watch { doc: doc.clone() });
            }
        }
        info!(doc = %doc, %generation, port, "spawning backend");
        effects.push(Effect::Spawn {
            doc: doc.clone(),
            generation,
            port,
        });
        effects
    }

    pub fn spawn_failed(
        &mut self,
        doc: &DocumentId,
        generation: Generation,
        err: SupervisorError,
    ) -> Vec<Effect> {
        match current_backend(&mut self.documents, doc, generation) {
            Some(backend) if backend.has_process() => self.fail(doc, &err),
            _ => Vec::new(),
        }
    }

    /// One line of backend output. Only the first readiness line of the
    /// current generation has an effect.
    pub fn output_line(&mut self, doc: &DocumentId, generation: Generation, line: &str) -> Vec<Effect> {
        let Some(backend) = current_backend(&mut self.documents, doc, generation) else {
            return Vec::new();
        };
        let port = match &backend.phase {
            Phase::Spawned { port, matcher } if matcher.matches(line) => *port,
            _ => return Vec::new(),
        };
        backend.phase = Phase::Ready { port };
        info!(doc = %doc, %generation, port, "backend ready");
        self.render_all(doc, &SurfaceContent::Ready { port })
    }

    pub fn exited(&mut self, doc: &DocumentId, generation: Generation, report: ExitReport) -> Vec<Effect> {
        let Some(backend) = current_backend(&mut self.documents, doc, generation) else {
            debug!(doc = %doc, %generation, %report, "superseded backend exited");
            return Vec::new();
        };
        let err = match backend.phase {
            Phase::AllocatingPort => return Vec::new(),
            Phase::Spawned { .. } => SupervisorError::PrematureExit(report),
            Phase::Ready { .. } => SupervisorError::PostReadyCrash(report),
        };
        self.fail(doc, &err)
    }

    pub fn startup_timed_out(&mut self, doc: &DocumentId, generation: Generation) -> Vec<Effect> {
        let Some(backend) = current_backend(&mut self.documents, doc, generation) else {
            return Vec::new();
        };
        if !matches!(backend.phase, Phase::Spawned { .. }) {
            return Vec::new();
        }
        let timeout = self.startup_timeout.unwrap_or_default();
        let mut effects = vec![Effect::Terminate {
            doc: doc.clone(),
            generation,
            signal: TerminateSignal::Kill,
        }];
        effects.extend(self.fail(doc, &SupervisorError::StartupTimeout(timeout)));
        effects
    }

    #[must_use]
    pub fn backend_state(&self, doc: &DocumentId) -> BackendState {
        let Some(slot) = self.documents.get(doc) else {
            return BackendState::NotStarted;
        };
        match slot.backend.as_ref().map(|backend| &backend.phase) {
            None if slot.ended => BackendState::Terminated,
            None => BackendState::NotStarted,
            Some(Phase::AllocatingPort | Phase::Spawned { .. }) => BackendState::Starting,
            Some(Phase::Ready { .. }) => BackendState::Ready,
        }
    }

    #[must_use]
    pub fn backend_port(&self, doc: &DocumentId) -> Option<u16> {
        self.documents
            .get(doc)
            .and_then(|slot| slot.backend.as_ref())
            .and_then(Backend::port)
    }

    #[must_use]
    pub fn current_generation(&self, doc: &DocumentId) -> Option<Generation> {
        self.documents
            .get(doc)
            .and_then(|slot| slot.backend.as_ref())
            .map(|backend| backend.generation)
    }

    #[must_use]
    pub fn surfaces(&self, doc: &DocumentId) -> Vec<SurfaceId> {
        self.documents
            .get(doc)
            .map(|slot| slot.surfaces.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_watched(&self, doc: &DocumentId) -> bool {
        self.documents.get(doc).is_some_and(|slot| slot.watched)
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<DocumentSnapshot> {
        self.documents
            .iter()
            .map(|(doc, slot)| DocumentSnapshot {
                doc: doc.clone(),
                state: self.backend_state(doc),
                port: slot.backend.as_ref().and_then(Backend::port),
                generation: slot.backend.as_ref().map(|backend| backend.generation),
                surfaces: slot.surfaces.iter().copied().collect(),
                watched: slot.watched,
            })
            .collect()
    }

    /// Command line shown on loading pages.
    #[must_use]
    pub fn starting_content(&self, doc: &DocumentId) -> SurfaceContent {
        SurfaceContent::Starting {
            command: format!("{} -D \"{}\"", self.engine_name, doc.file_name()).into(),
        }
    }

    fn begin_start(&mut self, doc: &DocumentId) -> Vec<Effect> {
        self.last_generation = self.last_generation.next();
        let generation = self.last_generation;
        let Some(slot) = self.documents.get_mut(doc) else {
            return Vec::new();
        };
        slot.backend = Some(Backend {
            generation,
            phase: Phase::AllocatingPort,
        });
        slot.ended = false;

        let mut effects = self.render_all(doc, &self.starting_content(doc));
        effects.push(Effect::AllocatePort {
            doc: doc.clone(),
            generation,
        });
        effects
    }

    fn fail(&mut self, doc: &DocumentId, err: &SupervisorError) -> Vec<Effect> {
        let Some(slot) = self.documents.get_mut(doc) else {
            return Vec::new();
        };
        slot.backend = None;
        slot.ended = true;
        warn!(doc = %doc, "backend failed: {err}");
        self.render_all(
            doc,
            &SurfaceContent::Error {
                message: err.user_message().into(),
            },
        )
    }

    fn render_all(&self, doc: &DocumentId, content: &SurfaceContent) -> Vec<Effect> {
        self.documents
            .get(doc)
            .map(|slot| {
                slot.surfaces
                    .iter()
                    .map(|surface| Effect::Render {
                        surface: *surface,
                        content: content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn current_backend<'a>(
    documents: &'a mut IndexMap<DocumentId, DocumentSlot>,
    doc: &DocumentId,
    generation: Generation,
) -> Option<&'a mut Backend> {
    documents
        .get_mut(doc)
        .and_then(|slot| slot.backend.as_mut())
        .filter(|backend| backend.generation == generation)
}
