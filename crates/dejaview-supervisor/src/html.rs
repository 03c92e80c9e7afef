//! HTML pages shown on surfaces.

#![allow(missing_docs)]

use smol_str::SmolStr;

use crate::config::SupervisorConfig;
use crate::surface::SurfaceContent;

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
            display: flex;
            flex-direction: column;
            align-items: center;
            justify-content: center;
            height: 100vh;
            margin: 0;
            padding: 2em;
            box-sizing: border-box;
            background-color: var(--vscode-editor-background);
            color: var(--vscode-editor-foreground);
        }
        h1, h2, p { text-align: center; }
        .spinner {
            width: 40px;
            height: 40px;
            border: 4px solid var(--vscode-descriptionForeground);
            border-top-color: var(--vscode-button-background);
            border-radius: 50%;
            animation: spin 1s linear infinite;
            margin-bottom: 20px;
        }
        @keyframes spin { to { transform: rotate(360deg); } }
        code, pre {
            background-color: var(--vscode-textBlockQuote-background);
            padding: 1em;
            border-radius: 5px;
            white-space: pre-wrap;
            word-break: break-all;
            font-family: "SF Mono", Monaco, Consolas, "Courier New", monospace;
            width: 100%;
            max-width: 800px;
            box-sizing: border-box;
            text-align: left;
        }
        code { padding: 0.2em 0.4em; display: inline-block; white-space: normal; word-break: normal; }
        .error-container h1 { color: var(--vscode-errorForeground); }
        a { color: var(--vscode-textLink-foreground); }
        a:hover { color: var(--vscode-textLink-activeForeground); }
        body.app-loaded { padding: 0; justify-content: flex-start; align-items: stretch; }
"#;

const UI_LOAD_TIMEOUT_MS: u64 = 120_000;

/// Where the application page loads the frontend bundle from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    pub ui_base: SmolStr,
    pub ui_version: SmolStr,
    /// Extra tags for the `<head>` of loading pages (the host adds a refresh).
    pub loading_head: Option<SmolStr>,
}

impl PageOptions {
    #[must_use]
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            ui_base: config.ui_base.clone(),
            ui_version: config.ui_version.clone(),
            loading_head: None,
        }
    }
}

/// Render a full HTML document for `content`.
#[must_use]
pub fn render(content: &SurfaceContent, options: &PageOptions) -> String {
    match content {
        SurfaceContent::Starting { command } => loading_page(command, options),
        SurfaceContent::Ready { port } => app_page(*port, options),
        SurfaceContent::Error { message } => error_page(message, options),
    }
}

fn loading_page(command: &str, options: &PageOptions) -> String {
    let body = format!(
        r#"<div class="spinner"></div>
    <h2>Starting Trace Processor</h2>
    <p>Please wait while the backend starts...</p>
    <code>{}</code>"#,
        escape(command)
    );
    let head = options.loading_head.as_deref().unwrap_or("");
    template("Loading Trace...", &body, head, options)
}

fn error_page(message: &str, options: &PageOptions) -> String {
    let body = format!(
        r#"<div class="error-container">
        <h1>An Error Occurred</h1>
        <p>The DejaView backend encountered a problem:</p>
        <pre>{}</pre>
    </div>"#,
        escape(message)
    );
    template("Error", &body, "", options)
}

fn app_page(port: u16, options: &PageOptions) -> String {
    let script_base = format!("{}/{}", options.ui_base, options.ui_version);
    let head = format!(
        r#"<script type="text/javascript">
    'use strict';
    (function () {{
        let errTimerId;
        function showError(err) {{
            if (errTimerId) clearTimeout(errTimerId);
            const loader = document.getElementById('app-loader');
            const failure = document.getElementById('app-load-failure');
            const details = document.getElementById('app-load-failure-details');
            if (loader) loader.style.display = 'none';
            if (failure) failure.style.display = 'flex';
            if (details) {{ console.error(err); details.innerText = `${{err}}`; }}
        }}
        errTimerId = setTimeout(() => showError('Timed out while loading the UI.'), {timeout});
        window.onerror = (msg, url, line, col, error) => showError(error || msg);
        window.onunhandledrejection = (event) => showError(event.reason);
        window.rpc_port = '{port}';
        document.addEventListener('DOMContentLoaded', () => {{
            const script = document.createElement('script');
            script.async = true;
            script.src = '{src}/frontend_bundle.js';
            script.onload = () => {{
                clearTimeout(errTimerId);
                const loader = document.getElementById('app-loader');
                if (loader) loader.style.display = 'none';
                document.body.classList.add('app-loaded');
            }};
            script.onerror = () => showError(`Failed to load main script from: ${{script.src}}`);
            document.head.append(script);
        }});
    }})();
    </script>"#,
        timeout = UI_LOAD_TIMEOUT_MS,
        port = port,
        src = escape_js(&script_base),
    );
    let body = r#"<div id="app-loader" style="display: flex; flex-direction: column; align-items: center; justify-content: center; width: 100%; height: 100%;">
        <div class="spinner"></div>
        <h2>Loading DejaView UI</h2>
        <p>Fetching and initializing the user interface...</p>
    </div>
    <div id="app-load-failure" style="display: none; flex-direction: column; align-items: center; justify-content: center;" class="error-container">
        <h1>Failed to Load UI</h1>
        <p>An unrecoverable problem occurred while loading the DejaView UI.</p>
        <p>Please <a href="https://github.com/FlorentRevest/DejaView/issues/new" target="_blank">file a bug</a> with the details below.</p>
        <pre id="app-load-failure-details"></pre>
    </div>"#;
    template("DejaView", body, &head, options)
}

fn template(title: &str, body: &str, head: &str, options: &PageOptions) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{style}</style>
    {head}
</head>
<body data-dejaview_version='{{"stable":"{version}"}}'>
    {body}
</body>
</html>"#,
        title = escape(title),
        style = STYLE,
        version = escape(&options.ui_version),
    )
}

/// Escape text for HTML element content and quoted attributes.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '<' => out.push_str("\\x3c"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}
