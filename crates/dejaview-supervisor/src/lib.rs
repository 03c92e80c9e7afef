//! `dejaview-supervisor` - trace processor supervision for DejaView surfaces.
//!
//! One trace processor backend runs per open trace document. Any number of
//! surfaces (webviews) can show the same document; they all follow the
//! backend through starting, ready, reload and failure states.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Supervisor configuration.
pub mod config;
/// Document, surface and generation identities.
pub mod document;
/// Supervisor errors.
pub mod error;
/// HTML pages shown on surfaces.
pub mod html;
/// Messages sent by the rendered application to the host.
pub mod message;
/// Free port allocation.
pub mod port;
/// Backend process spawning and control.
pub mod process;
/// Readiness line detection.
pub mod readiness;
/// Sans-IO supervisor state machine.
pub mod state;
/// Surface contract and content.
pub mod surface;
/// Runtime driver for the state machine.
pub mod supervisor;
/// Source file watching.
pub mod watch;

pub use crate::config::{SupervisorConfig, TerminateSignal};
pub use crate::document::{DocumentId, Generation, SurfaceId};
pub use crate::error::SupervisorError;
pub use crate::message::{parse_client_message, ClientMessage};
pub use crate::port::{LoopbackPortAllocator, PortAllocator};
pub use crate::process::{
    BackendCommand, BackendSpawner, ExitReport, ProcessControl, SpawnedBackend, TokioSpawner,
    TERM_GRACE,
};
pub use crate::readiness::ReadinessMatcher;
pub use crate::state::{BackendState, DocumentSnapshot, Effect, SupervisorCore};
pub use crate::supervisor::{BackendSupervisor, SupervisorHandle, SupervisorSnapshot};
pub use crate::surface::{Surface, SurfaceContent};
pub use crate::watch::{ChangeNotifier, FileWatch, NotifyWatchFactory, WatchFactory};
