//! Browser-backed surfaces.
//!
//! Every surface keeps the last HTML document rendered for it; the web
//! server hands that document to whoever loads `/surfaces/<id>`.

use std::sync::Arc;

use dejaview_supervisor::html::{self, PageOptions};
use dejaview_supervisor::{DocumentId, Surface, SurfaceContent, SurfaceId, SupervisorHandle};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

/// Loading pages reload themselves until the backend settles.
pub const LOADING_REFRESH: &str = r#"<meta http-equiv="refresh" content="1">"#;

#[derive(Debug)]
struct PageState {
    content: Option<SurfaceContent>,
    html: String,
}

/// A surface whose content is a rendered HTML page.
#[derive(Debug)]
pub struct PageSurface {
    options: PageOptions,
    state: Mutex<PageState>,
}

impl PageSurface {
    pub fn new(options: PageOptions) -> Self {
        let html = html::render(
            &SurfaceContent::Starting {
                command: Default::default(),
            },
            &options,
        );
        Self {
            options,
            state: Mutex::new(PageState {
                content: None,
                html,
            }),
        }
    }

    pub fn html(&self) -> String {
        self.state.lock().html.clone()
    }

    /// Last content pushed by the supervisor, if any.
    pub fn content(&self) -> Option<SurfaceContent> {
        self.state.lock().content.clone()
    }
}

impl Surface for PageSurface {
    fn set_content(&self, content: &SurfaceContent) {
        let html = html::render(content, &self.options);
        let mut state = self.state.lock();
        state.content = Some(content.clone());
        state.html = html;
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceEntry {
    pub document: usize,
    pub page: Arc<PageSurface>,
}

/// Documents given on the command line and the surfaces opened on them.
#[derive(Debug)]
pub struct SurfaceRegistry {
    documents: Vec<DocumentId>,
    options: PageOptions,
    surfaces: RwLock<IndexMap<SurfaceId, SurfaceEntry>>,
}

impl SurfaceRegistry {
    pub fn new(documents: Vec<DocumentId>, mut options: PageOptions) -> Self {
        options.loading_head = Some(LOADING_REFRESH.into());
        Self {
            documents,
            options,
            surfaces: RwLock::new(IndexMap::new()),
        }
    }

    pub fn documents(&self) -> &[DocumentId] {
        &self.documents
    }

    /// Open a new surface on document `index`.
    pub fn open(&self, supervisor: &SupervisorHandle, index: usize) -> Option<SurfaceId> {
        let doc = self.documents.get(index)?.clone();
        let page = Arc::new(PageSurface::new(self.options.clone()));
        // Hold the write lock so the id is routable as soon as it exists.
        let mut surfaces = self.surfaces.write();
        let id = supervisor.open_surface(doc, page.clone());
        surfaces.insert(
            id,
            SurfaceEntry {
                document: index,
                page,
            },
        );
        Some(id)
    }

    /// Close surface `id`. Returns false when it is not open.
    pub fn close(&self, supervisor: &SupervisorHandle, id: SurfaceId) -> bool {
        let Some(entry) = self.surfaces.write().shift_remove(&id) else {
            return false;
        };
        if let Some(doc) = self.documents.get(entry.document) {
            supervisor.close_surface(doc.clone(), id);
        }
        true
    }

    pub fn get(&self, id: SurfaceId) -> Option<SurfaceEntry> {
        self.surfaces.read().get(&id).cloned()
    }

    pub fn document_of(&self, id: SurfaceId) -> Option<DocumentId> {
        let entry = self.get(id)?;
        self.documents.get(entry.document).cloned()
    }

    pub fn surfaces_of(&self, index: usize) -> Vec<SurfaceId> {
        self.surfaces
            .read()
            .iter()
            .filter(|(_, entry)| entry.document == index)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.surfaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.read().is_empty()
    }
}
