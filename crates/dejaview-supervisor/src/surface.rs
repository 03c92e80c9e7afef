//! Surface contract and content.

#![allow(missing_docs)]

use smol_str::SmolStr;

/// What a surface should currently display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceContent {
    /// Backend is starting; `command` is shown to the user.
    Starting { command: SmolStr },
    /// Backend is ready and serves RPC on `port`.
    Ready { port: u16 },
    /// The current spawn attempt failed.
    Error { message: SmolStr },
}

impl SurfaceContent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Starting { .. } => "starting",
            Self::Ready { .. } => "ready",
            Self::Error { .. } => "error",
        }
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Ready { port } => Some(*port),
            _ => None,
        }
    }
}

/// A presentation context bound to one document (an embedded webview, a
/// browser tab, ...). The supervisor only ever replaces its content; closing
/// is reported back to the supervisor by the host.
pub trait Surface: Send + Sync {
    fn set_content(&self, content: &SurfaceContent);
}
