//! `livepreview serve` command implementation.
//!
//! Live preview server for a project directory:
//!
//! ```text
//! GET /            host page: sandboxed iframe + error panel
//! GET /__preview   current preview document
//! GET /@blob/*     code behind a live module reference (404 once released)
//! GET /__status    session state as JSON
//! GET /__ws        host notifications out, relayed runtime errors in
//! ```
//!
//! A notify watcher feeds file changes into the pipeline. Every pass runs on
//! the blocking pool and goes through the session's recompile gate, so a pass
//! that finishes after a newer one is discarded.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use livepreview_core::config::CONFIG_FILE;
use livepreview_core::preview::{render, RuntimeError, Sandbox, SandboxMessage};
use livepreview_core::registry::BLOB_PREFIX;
use livepreview_core::{
    ApplyOutcome, CompileError, Error, FileSet, Pipeline, PreviewBuild, PreviewDocument,
    PreviewSession, ProjectConfig, RecompileGate, Ticket,
};
use livepreview_util::fs::is_ignored_name;
use miette::{IntoDiagnostic, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Window in which file events are coalesced into one pass.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Serve command action.
#[derive(Debug, Clone)]
pub struct ServeAction {
    /// Project root.
    pub root: PathBuf,
    /// Overrides `server.host` from the project config.
    pub host: Option<String>,
    /// Overrides `server.port` from the project config.
    pub port: Option<u16>,
}

/// Notifications pushed to connected host pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ServerEvent {
    /// A new document is available at `/__preview`.
    Document { version: u64, entry: String },
    /// The latest pass failed; the previous document is still served.
    CompileError {
        code: &'static str,
        message: String,
        path: Option<String>,
    },
    RuntimeError(RuntimeError),
}

impl ServerEvent {
    fn compile_error(error: &CompileError) -> Self {
        Self::CompileError {
            code: error.code(),
            message: error.to_string(),
            path: error.path().map(ToString::to_string),
        }
    }
}

/// Shared server state.
struct ServeState {
    root: PathBuf,
    session: Mutex<PreviewSession>,
    events: broadcast::Sender<ServerEvent>,
}

impl ServeState {
    fn new(root: PathBuf, config: &ProjectConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            root,
            session: Mutex::new(PreviewSession::new(
                Pipeline::from_config(config),
                session_namespace(),
            )),
            events,
        }
    }
}

/// Every connected host page, seen as one sandbox. Pages reload their
/// iframe from `/__preview` when told a new document exists.
struct BroadcastSandbox<'a> {
    events: &'a broadcast::Sender<ServerEvent>,
}

impl Sandbox for BroadcastSandbox<'_> {
    fn load(&mut self, document: &PreviewDocument) {
        let event = ServerEvent::Document {
            version: document.version,
            entry: document.entry.clone(),
        };
        if self.events.send(event).is_err() {
            tracing::debug!(version = document.version, "no host page connected");
        }
    }
}

/// Run the preview server until ctrl-c.
pub async fn run(action: ServeAction) -> Result<()> {
    let root = action.root.canonicalize().map_err(|e| {
        miette::miette!("Cannot open project {}: {}", action.root.display(), e)
    })?;
    let config = ProjectConfig::load(&root).into_diagnostic()?;
    let host = action.host.unwrap_or_else(|| config.server.host.clone());
    let port = action.port.unwrap_or(config.server.port);

    let state = Arc::new(ServeState::new(root.clone(), &config));
    recompile(&state).await;

    let (change_tx, change_rx) = mpsc::channel::<Vec<PathBuf>>(64);
    let watch_root = root.clone();
    std::thread::spawn(move || {
        if let Err(e) = watch_files(&watch_root, &change_tx) {
            tracing::error!(error = %e, "file watcher stopped");
        }
    });
    tokio::spawn(handle_changes(Arc::clone(&state), change_rx));

    let host_ip = if host == "localhost" {
        "127.0.0.1"
    } else {
        host.as_str()
    };
    let addr: SocketAddr = format!("{host_ip}:{port}").parse().into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    let local = listener.local_addr().into_diagnostic()?;

    println!();
    println!("  Preview server running at http://{local}");
    println!("  Watching {}", root.display());
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    let released = state.session.lock().await.teardown();
    tracing::info!(released, "preview server stopped");
    Ok(())
}

fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/", get(serve_host_page))
        .route("/__preview", get(serve_document))
        .route("/__status", get(serve_status))
        .route("/__ws", get(host_websocket))
        .route("/@blob/*path", get(serve_blob))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Identifies this server run. References must not collide with ones a
/// browser cached from an earlier run.
fn session_namespace() -> String {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("s{started:x}")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Preview Passes
// ============================================================================

/// What the blocking half of a pass produced.
enum Pass {
    /// A newer pass was requested before this one started building.
    Superseded,
    /// The snapshot is the one already rendered.
    Unchanged { files: FileSet, fingerprint: String },
    Built(std::result::Result<PreviewBuild, CompileError>),
}

/// Snapshot the project and build it unless the build is already moot.
fn snapshot_pass(
    root: &Path,
    pipeline: &Pipeline,
    gate: &RecompileGate,
    ticket: Ticket,
    rendered: Option<&str>,
) -> std::result::Result<Pass, Error> {
    let files = FileSet::from_dir(root)?;
    if !gate.is_latest(ticket) {
        return Ok(Pass::Superseded);
    }
    let fingerprint = files.fingerprint();
    if rendered == Some(fingerprint.as_str()) {
        return Ok(Pass::Unchanged { files, fingerprint });
    }
    Ok(Pass::Built(pipeline.build(&files)))
}

/// Snapshot the project, build on the blocking pool and apply the result.
async fn recompile(state: &ServeState) {
    let (ticket, pipeline, gate, rendered) = {
        let session = state.session.lock().await;
        (
            session.request(),
            session.pipeline().clone(),
            session.gate(),
            session.fingerprint().map(ToString::to_string),
        )
    };

    let root = state.root.clone();
    let build_pipeline = pipeline.clone();
    let pass = tokio::task::spawn_blocking(move || {
        snapshot_pass(&root, &build_pipeline, &gate, ticket, rendered.as_deref())
    })
    .await;

    let result = match pass {
        Ok(Ok(Pass::Built(result))) => result,
        Ok(Ok(Pass::Superseded)) => {
            tracing::debug!(version = ticket.version(), "skipping superseded preview pass");
            return;
        }
        Ok(Ok(Pass::Unchanged { files, fingerprint })) => {
            if state
                .session
                .lock()
                .await
                .settle_unchanged(ticket, &fingerprint)
                .is_some()
            {
                return;
            }
            // Another pass rendered a different snapshot in the meantime.
            match tokio::task::spawn_blocking(move || pipeline.build(&files)).await {
                Ok(result) => result,
                Err(error) => {
                    tracing::error!(error = %error, "preview pass aborted");
                    return;
                }
            }
        }
        Ok(Err(error)) => {
            tracing::error!(error = %error, "cannot snapshot project");
            return;
        }
        Err(error) => {
            tracing::error!(error = %error, "preview pass aborted");
            return;
        }
    };

    let mut session = state.session.lock().await;
    match session.apply(ticket, result) {
        ApplyOutcome::Applied(_) => {
            if let Some(document) = session.document() {
                render(document, &mut BroadcastSandbox {
                    events: &state.events,
                });
            }
        }
        ApplyOutcome::Failed(error) => {
            tracing::error!(code = error.code(), error = %error, "preview failed to compile");
            let _ = state.events.send(ServerEvent::compile_error(&error));
        }
        ApplyOutcome::Unchanged | ApplyOutcome::Stale => {}
    }
}

/// Coalesce bursts of file events and start one pass per burst.
async fn handle_changes(state: Arc<ServeState>, mut changes: mpsc::Receiver<Vec<PathBuf>>) {
    while let Some(mut changed) = changes.recv().await {
        tokio::time::sleep(DEBOUNCE).await;
        while let Ok(more) = changes.try_recv() {
            changed.extend(more);
        }
        changed.sort();
        changed.dedup();

        for path in &changed {
            tracing::debug!(path = %path.display(), "file changed");
        }
        if changed
            .iter()
            .any(|p| p.file_name().is_some_and(|name| name == CONFIG_FILE))
        {
            tracing::warn!("{CONFIG_FILE} changed; restart the server to apply it");
        }

        let state = Arc::clone(&state);
        tokio::spawn(async move { recompile(&state).await });
    }
}

// ============================================================================
// File Watching
// ============================================================================

/// Whether a changed path lies outside the snapshot.
fn should_ignore(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    relative
        .components()
        .any(|c| c.as_os_str().to_str().map_or(true, is_ignored_name))
}

/// Forward relevant file events until the receiving side goes away.
fn watch_files(root: &Path, changes: &mpsc::Sender<Vec<PathBuf>>) -> notify::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    for event in rx {
        match event {
            Ok(event) => {
                // Snapshots read every file
                if event.kind.is_access() {
                    continue;
                }
                let relevant: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| !should_ignore(root, p))
                    .collect();
                if relevant.is_empty() {
                    continue;
                }
                if changes.blocking_send(relevant).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        }
    }

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

type AppState = Arc<ServeState>;

async fn serve_host_page() -> Html<&'static str> {
    Html(HOST_PAGE)
}

/// Serve the current preview document. Before the first successful pass
/// this is the pending compile error.
async fn serve_document(State(state): State<AppState>) -> Response {
    let session = state.session.lock().await;
    match session.document() {
        Some(document) => (
            [(header::CACHE_CONTROL, "no-cache")],
            Html(document.html.clone()),
        )
            .into_response(),
        None => {
            let message = session
                .last_error()
                .map_or_else(|| "No preview yet".to_string(), ToString::to_string);
            (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
        }
    }
}

/// Dereference a module reference. The sandboxed iframe has an opaque
/// origin; the CORS layer lets it load module responses.
async fn serve_blob(State(state): State<AppState>, AxumPath(path): AxumPath<String>) -> Response {
    let reference = format!("{BLOB_PREFIX}{path}");
    let code = state.session.lock().await.dereference(&reference);
    match code {
        Some(code) => (
            [
                (header::CONTENT_TYPE, "application/javascript"),
                (header::CACHE_CONTROL, "max-age=31536000, immutable"),
            ],
            code.to_string(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("// Unknown or released module reference: {reference}"),
        )
            .into_response(),
    }
}

/// Session state for JSON output.
#[derive(Serialize)]
struct StatusJson {
    version: Option<u64>,
    entry: Option<String>,
    modules: usize,
    live_references: usize,
    error: Option<StatusErrorJson>,
    runtime_errors: Vec<RuntimeError>,
}

#[derive(Serialize)]
struct StatusErrorJson {
    code: &'static str,
    message: String,
    path: Option<String>,
}

async fn serve_status(State(state): State<AppState>) -> Json<StatusJson> {
    let session = state.session.lock().await;
    let document = session.document();
    Json(StatusJson {
        version: document.map(|d| d.version),
        entry: document.map(|d| d.entry.clone()),
        modules: session.registry().len(),
        live_references: session.registry().stats().live,
        error: session.last_error().map(|e| StatusErrorJson {
            code: e.code(),
            message: e.to_string(),
            path: e.path().map(ToString::to_string),
        }),
        runtime_errors: session.runtime_errors().to_vec(),
    })
}

// ============================================================================
// WebSocket
// ============================================================================

async fn host_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_host_socket(socket, state))
}

/// Events that bring a freshly connected (or lagging) page up to date.
async fn current_events(state: &ServeState) -> Vec<ServerEvent> {
    let session = state.session.lock().await;
    let mut events = Vec::new();
    if let Some(document) = session.document() {
        events.push(ServerEvent::Document {
            version: document.version,
            entry: document.entry.clone(),
        });
    }
    if let Some(error) = session.last_error() {
        events.push(ServerEvent::compile_error(error));
    }
    events
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let Ok(json) = serde_json::to_string(event) else {
        return Ok(());
    };
    socket.send(Message::Text(json)).await
}

/// Forward server events to the page and relayed sandbox messages to the
/// session.
async fn handle_host_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.events.subscribe();
    for event in current_events(&state).await {
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "host page lagged behind");
                    for event in current_events(&state).await {
                        if send_event(&mut socket, &event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => handle_sandbox_message(&state, &text).await,
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Record a runtime error relayed from the sandbox and echo it, attributed
/// to its file, to every page.
async fn handle_sandbox_message(state: &ServeState, text: &str) {
    let message = match SandboxMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed sandbox message");
            return;
        }
    };
    let SandboxMessage::RuntimeError(error) = message;

    let mut session = state.session.lock().await;
    if session.record_runtime_error(error) {
        if let Some(recorded) = session.runtime_errors().last() {
            let _ = state.events.send(ServerEvent::RuntimeError(recorded.clone()));
        }
    }
}

/// Host page. Relays sandbox messages over the socket and swaps the iframe
/// document when told a new one exists.
const HOST_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<title>livepreview</title>
<style>
  html, body { margin: 0; height: 100%; font-family: system-ui, sans-serif; }
  #frame { border: 0; width: 100%; height: 100%; display: block; }
  #panel {
    position: fixed; left: 0; right: 0; bottom: 0; max-height: 40%; overflow: auto;
    margin: 0; padding: 12px 16px; display: none; white-space: pre-wrap;
    background: #fef2f2; color: #991b1b; border-top: 1px solid #fecaca;
    font: 13px/1.5 ui-monospace, SFMono-Regular, Menlo, monospace;
  }
</style>
</head>
<body>
<iframe id="frame" src="/__preview" sandbox="allow-scripts allow-forms allow-modals allow-popups"></iframe>
<pre id="panel"></pre>
<script>
(function () {
  var frame = document.getElementById("frame");
  var panel = document.getElementById("panel");
  var loaded = null;
  var socket = null;

  function show(text) {
    panel.textContent = text || "";
    panel.style.display = text ? "block" : "none";
  }

  function describe(error) {
    var text = error.message;
    var at = error.location;
    if (at) {
      text += "\n  at " + at.file + (at.line ? ":" + at.line + (at.column ? ":" + at.column : "") : "");
    }
    if (error.stack) text += "\n\n" + error.stack;
    return text;
  }

  function connect() {
    var scheme = location.protocol === "https:" ? "wss://" : "ws://";
    socket = new WebSocket(scheme + location.host + "/__ws");
    socket.onmessage = function (event) {
      var message = JSON.parse(event.data);
      if (message.type === "document") {
        show("");
        if (loaded !== null && loaded !== message.version) {
          frame.src = "/__preview?v=" + message.version;
        }
        loaded = message.version;
      } else if (message.type === "compile-error") {
        show(message.message);
      } else if (message.type === "runtime-error") {
        show(describe(message));
      }
    };
    socket.onclose = function () {
      setTimeout(connect, 1000);
    };
  }

  window.addEventListener("message", function (event) {
    if (event.source !== frame.contentWindow) return;
    var data = event.data;
    if (!data || data.source !== "livepreview") return;
    if (socket && socket.readyState === WebSocket.OPEN) {
      socket.send(JSON.stringify(data));
    }
  });

  connect();
})();
</script>
</body>
</html>
"##;
