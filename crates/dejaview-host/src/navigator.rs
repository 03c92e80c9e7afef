//! Symbol navigation requested by the rendered application.

use dejaview_supervisor::DocumentId;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::info;

/// Receives `open` requests coming from a surface.
pub trait SymbolNavigator: Send + Sync {
    fn open_symbol(&self, doc: &DocumentId, symbol: &str);
}

/// Logs every request and keeps a history of them.
#[derive(Debug, Default)]
pub struct LogNavigator {
    history: Mutex<Vec<(DocumentId, SmolStr)>>,
}

impl LogNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<(DocumentId, SmolStr)> {
        self.history.lock().clone()
    }
}

impl SymbolNavigator for LogNavigator {
    fn open_symbol(&self, doc: &DocumentId, symbol: &str) {
        info!(doc = %doc, symbol, "quick open #{symbol}");
        self.history.lock().push((doc.clone(), SmolStr::from(symbol)));
    }
}
