//! HTTP front end for surfaces.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;
use dejaview_supervisor::html::escape;
use dejaview_supervisor::{parse_client_message, ClientMessage, SupervisorHandle, SurfaceId};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, warn};

use crate::navigator::SymbolNavigator;
use crate::pages::SurfaceRegistry;

/// Everything request handlers need.
pub struct HostState {
    pub supervisor: SupervisorHandle,
    /// Runtime the supervisor lives on; used to await snapshots from the
    /// server thread.
    pub runtime: tokio::runtime::Handle,
    pub registry: Arc<SurfaceRegistry>,
    pub navigator: Arc<dyn SymbolNavigator>,
    pub ui_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.into_bytes(),
        }
    }

    fn json(value: Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn text(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: message.into().into_bytes(),
        }
    }

    fn not_found() -> Self {
        Self::text(404, "not found")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn into_response(self) -> Response<std::io::Cursor<Vec<u8>>> {
        let response = Response::from_data(self.body).with_status_code(StatusCode(self.status));
        match Header::from_bytes("Content-Type", self.content_type) {
            Ok(header) => response.with_header(header),
            Err(()) => response,
        }
    }
}

pub struct WebServer {
    server: Arc<Server>,
    handle: thread::JoinHandle<()>,
    pub listen: String,
}

impl WebServer {
    /// Stop accepting requests and wait for the server thread.
    pub fn stop(self) {
        self.server.unblock();
        if self.handle.join().is_err() {
            warn!("web server thread panicked");
        }
    }
}

pub fn start_web_server(listen: &str, state: Arc<HostState>) -> anyhow::Result<WebServer> {
    let server =
        Arc::new(Server::http(listen).map_err(|err| anyhow!("web bind {listen}: {err}"))?);
    let listen = server
        .server_addr()
        .to_ip()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| listen.to_string());
    let worker = Arc::clone(&server);
    let handle = thread::Builder::new()
        .name("dejaview-web".into())
        .spawn(move || {
            for mut request in worker.incoming_requests() {
                let method = request.method().clone();
                let url = request.url().to_string();
                let mut body = String::new();
                if method == Method::Post && request.as_reader().read_to_string(&mut body).is_err()
                {
                    let response = Response::from_string("invalid body").with_status_code(400);
                    let _ = request.respond(response);
                    continue;
                }
                let reply = route(&state, &method, &url, &body);
                debug!(%method, %url, status = reply.status, "http request");
                let _ = request.respond(reply.into_response());
            }
        })?;
    Ok(WebServer {
        server,
        handle,
        listen,
    })
}

/// Dispatch one request. Must not be called from inside the tokio runtime:
/// `/api/status` blocks on the supervisor.
pub fn route(state: &HostState, method: &Method, url: &str, body: &str) -> Reply {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        (Method::Get, [""]) => Reply::html(index_page(state)),
        (Method::Get, ["surfaces", id]) => match parse_surface(id).and_then(|id| state.registry.get(id)) {
            Some(entry) => Reply::html(entry.page.html()),
            None => Reply::not_found(),
        },
        (Method::Delete, ["surfaces", id]) => match parse_surface(id) {
            Some(id) if state.registry.close(&state.supervisor, id) => {
                Reply::json(json!({ "ok": true }))
            }
            _ => Reply::not_found(),
        },
        (Method::Post, ["surfaces", id, "message"]) => post_message(state, id, body),
        (Method::Post, ["documents", index, "surfaces"]) => {
            let opened = index
                .parse::<usize>()
                .ok()
                .and_then(|index| state.registry.open(&state.supervisor, index));
            match opened {
                Some(id) => Reply::json(json!({
                    "surface": id.get(),
                    "url": format!("/surfaces/{id}"),
                })),
                None => Reply::not_found(),
            }
        }
        (Method::Post, ["documents", index, "reload"]) => {
            let doc = index
                .parse::<usize>()
                .ok()
                .and_then(|index| state.registry.documents().get(index).cloned());
            match doc {
                Some(doc) => {
                    state.supervisor.file_changed(doc);
                    Reply::json(json!({ "ok": true }))
                }
                None => Reply::not_found(),
            }
        }
        (Method::Get, ["api", "status"]) => status(state),
        (Method::Get, ["ui", ..]) => match &state.ui_dir {
            Some(root) => serve_ui(root, path.trim_start_matches("/ui/")),
            None => Reply::not_found(),
        },
        _ => Reply::not_found(),
    }
}

fn parse_surface(text: &str) -> Option<SurfaceId> {
    text.parse::<u64>().ok().map(SurfaceId::new)
}

fn post_message(state: &HostState, id: &str, body: &str) -> Reply {
    let Some(doc) = parse_surface(id).and_then(|id| state.registry.document_of(id)) else {
        return Reply::not_found();
    };
    match parse_client_message(body) {
        Ok(ClientMessage::Open { symbol }) => {
            state.navigator.open_symbol(&doc, &symbol);
            Reply::json(json!({ "ok": true }))
        }
        Ok(ClientMessage::Unknown) => {
            debug!(doc = %doc, "ignoring unknown client command");
            Reply::json(json!({ "ok": true, "ignored": true }))
        }
        Err(err) => Reply::text(400, err.to_string()),
    }
}

fn status(state: &HostState) -> Reply {
    let snapshot = match state.runtime.block_on(state.supervisor.snapshot()) {
        Ok(snapshot) => snapshot,
        Err(err) => return Reply::text(503, err.to_string()),
    };
    let documents: Vec<Value> = state
        .registry
        .documents()
        .iter()
        .enumerate()
        .map(|(index, doc)| match snapshot.document(doc) {
            Some(doc_state) => json!({
                "index": index,
                "path": doc.to_string(),
                "state": doc_state.state.as_str(),
                "port": doc_state.port,
                "generation": doc_state.generation.map(|generation| generation.get()),
                "surfaces": doc_state.surfaces.iter().map(|id| id.get()).collect::<Vec<_>>(),
                "watched": doc_state.watched,
            }),
            None => json!({
                "index": index,
                "path": doc.to_string(),
                "state": "closed",
                "port": null,
                "generation": null,
                "surfaces": [],
                "watched": false,
            }),
        })
        .collect();
    Reply::json(json!({
        "documents": documents,
        "live_processes": snapshot.live_processes,
        "active_watches": snapshot.active_watches,
    }))
}

fn index_page(state: &HostState) -> String {
    let mut rows = String::new();
    for (index, doc) in state.registry.documents().iter().enumerate() {
        let links: Vec<String> = state
            .registry
            .surfaces_of(index)
            .into_iter()
            .map(|id| format!(r#"<a href="/surfaces/{id}">surface {id}</a>"#))
            .collect();
        rows.push_str(&format!(
            r#"<li><code>{path}</code> {links}
        <button onclick="fetch('/documents/{index}/surfaces', {{method: 'POST'}}).then(() => location.reload())">New surface</button>
        <button onclick="fetch('/documents/{index}/reload', {{method: 'POST'}})">Reload</button></li>
"#,
            path = escape(&doc.to_string()),
            links = links.join(" "),
        ));
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>DejaView</title></head>
<body>
    <h1>DejaView traces</h1>
    <ul>
{rows}    </ul>
    <p><a href="/api/status">status</a></p>
</body>
</html>"#
    )
}

fn serve_ui(root: &Path, relative: &str) -> Reply {
    let relative = Path::new(relative);
    let safe = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !safe || relative.as_os_str().is_empty() {
        return Reply::text(400, "invalid path");
    }
    let path = root.join(relative);
    match std::fs::read(&path) {
        Ok(body) => Reply {
            status: 200,
            content_type: content_type_for(&path),
            body,
        },
        Err(err) => {
            debug!("ui file {} unavailable: {err}", path.display());
            Reply::not_found()
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("json") | Some("map") => "application/json",
        Some("wasm") => "application/wasm",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
