//! Source file watching.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::document::DocumentId;
use crate::error::SupervisorError;

/// Callback fired when a watched document changes on disk. Safe to call from
/// any thread.
#[derive(Clone)]
pub struct ChangeNotifier {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl ChangeNotifier {
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier").finish_non_exhaustive()
    }
}

/// A live watch. Dropping it stops notifications.
pub trait FileWatch: Send {
    fn doc(&self) -> &DocumentId;
}

/// Creates file watches.
pub trait WatchFactory: Send + Sync + 'static {
    fn watch(
        &self,
        doc: &DocumentId,
        notifier: ChangeNotifier,
    ) -> Result<Box<dyn FileWatch>, SupervisorError>;
}

/// Watches documents with the platform's recommended `notify` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatchFactory;

struct NotifyWatch {
    doc: DocumentId,
    _watcher: RecommendedWatcher,
}

impl FileWatch for NotifyWatch {
    fn doc(&self) -> &DocumentId {
        &self.doc
    }
}

impl WatchFactory for NotifyWatchFactory {
    fn watch(
        &self,
        doc: &DocumentId,
        notifier: ChangeNotifier,
    ) -> Result<Box<dyn FileWatch>, SupervisorError> {
        std::fs::metadata(doc.path()).map_err(|err| {
            SupervisorError::Watch(format!("failed to watch '{doc}': {err}").into())
        })?;
        let Some(dir) = doc.path().parent() else {
            return Err(SupervisorError::Watch(
                format!("failed to watch '{doc}': no parent directory").into(),
            ));
        };

        // Watch the directory: renaming a file onto the trace replaces the inode.
        let doc_for_events = doc.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_document_change(&event, doc_for_events.path()) => {
                    debug!(doc = %doc_for_events, kind = ?event.kind, "trace file modified");
                    notifier.notify();
                }
                Ok(_) => {}
                Err(err) => warn!("trace watcher event error for '{doc_for_events}': {err}"),
            }
        })
        .map_err(|err| SupervisorError::Watch(err.to_string().into()))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                SupervisorError::Watch(format!("failed to watch '{doc}': {err}").into())
            })?;

        Ok(Box::new(NotifyWatch {
            doc: doc.clone(),
            _watcher: watcher,
        }))
    }
}

/// Content written to `doc`, or another file renamed onto it.
fn is_document_change(event: &Event, doc: &Path) -> bool {
    let renamed_onto = |paths: &[PathBuf]| paths.last().is_some_and(|path| path == doc);
    match event.kind {
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            event.paths.iter().any(|path| path == doc)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => {
            renamed_onto(&event.paths)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use notify::event::{CreateKind, DataChange, MetadataKind};

    use super::*;

    #[test]
    fn only_document_modifications_count() {
        let doc = Path::new("/traces/boot.trace");
        let event = |kind, path: &str| Event::new(kind).add_path(PathBuf::from(path));
        let data = || EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(is_document_change(&event(data(), "/traces/boot.trace"), doc));
        assert!(!is_document_change(&event(data(), "/traces/other.trace"), doc));
        assert!(is_document_change(
            &event(EventKind::Modify(ModifyKind::Any), "/traces/boot.trace"),
            doc
        ));
        assert!(is_document_change(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                "/traces/boot.trace"
            ),
            doc
        ));
        assert!(!is_document_change(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                "/traces/boot.trace"
            ),
            doc
        ));
        assert!(!is_document_change(
            &event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                "/traces/boot.trace"
            ),
            doc
        ));
        assert!(!is_document_change(
            &event(EventKind::Create(CreateKind::File), "/traces/boot.trace"),
            doc
        ));
        assert!(!is_document_change(
            &event(
                EventKind::Remove(notify::event::RemoveKind::File),
                "/traces/boot.trace"
            ),
            doc
        ));
    }

    #[test]
    fn missing_file_cannot_be_watched() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentId::from_raw(dir.path().join("missing.trace"));
        let result = NotifyWatchFactory.watch(&doc, ChangeNotifier::new(|| {}));
        assert!(matches!(result, Err(SupervisorError::Watch(_))));
    }

    #[test]
    fn writing_the_file_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.trace");
        std::fs::write(&path, b"first").unwrap();
        let doc = DocumentId::new(&path);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let watch = NotifyWatchFactory
            .watch(
                &doc,
                ChangeNotifier::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(watch.doc(), &doc);

        std::fs::write(&path, b"second").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(hits.load(Ordering::SeqCst) > 0);
    }

    fn counting_watch(doc: &DocumentId) -> (Box<dyn FileWatch>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let watch = NotifyWatchFactory
            .watch(
                doc,
                ChangeNotifier::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        (watch, hits)
    }

    fn wait_for_more(hits: &AtomicUsize, seen: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) <= seen && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        hits.load(Ordering::SeqCst) > seen
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn watch_survives_replacement_by_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.trace");
        std::fs::write(&path, b"first").unwrap();
        let doc = DocumentId::new(&path);
        let (_watch, hits) = counting_watch(&doc);

        let staged = dir.path().join("boot.trace.tmp");
        std::fs::write(&staged, b"second").unwrap();
        std::fs::rename(&staged, &path).unwrap();
        assert!(wait_for_more(&hits, 0), "rename onto the trace was missed");

        std::thread::sleep(Duration::from_millis(100));
        let seen = hits.load(Ordering::SeqCst);
        std::fs::write(&path, b"third").unwrap();
        assert!(wait_for_more(&hits, seen), "write after replacement was missed");
    }

    #[test]
    fn sibling_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.trace");
        std::fs::write(&path, b"first").unwrap();
        let doc = DocumentId::new(&path);
        let (_watch, hits) = counting_watch(&doc);

        std::fs::write(dir.path().join("notes.txt"), b"unrelated").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
