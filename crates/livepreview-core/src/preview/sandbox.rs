//! Host/sandbox message protocol.
//!
//! The sandbox is an isolated actor. The host pushes whole documents, the
//! sandbox pushes runtime errors back. There is no request/response pairing
//! and no shared state.

use super::PreviewDocument;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Host to sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    /// Replace the sandbox's entire content.
    Document { version: u64, html: String },
}

impl HostMessage {
    #[must_use]
    pub fn document(document: &PreviewDocument) -> Self {
        Self::Document {
            version: document.version,
            html: document.html.clone(),
        }
    }
}

/// Sandbox to host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SandboxMessage {
    RuntimeError(RuntimeError),
}

impl SandboxMessage {
    /// Parse a relayed message (the `postMessage` payload as JSON).
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// An error thrown inside the sandbox after the document was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Version of the document that produced the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl RuntimeError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            location: None,
            version: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " ({loc})")?;
        }
        Ok(())
    }
}

/// Where in the sandbox an error was thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Module URL, or the virtual path once mapped back.
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// A rendering surface that accepts whole documents.
pub trait Sandbox {
    /// Replace everything in the sandbox with `document`.
    fn load(&mut self, document: &PreviewDocument);
}

/// Deliver `document` to `sandbox`, replacing its content.
pub fn render(document: &PreviewDocument, sandbox: &mut dyn Sandbox) {
    tracing::debug!(version = document.version, entry = %document.entry, "rendering preview");
    sandbox.load(document);
}

/// Host half of an in-process sandbox channel.
#[derive(Debug)]
pub struct ChannelSandbox {
    documents: mpsc::UnboundedSender<HostMessage>,
    errors: mpsc::UnboundedReceiver<SandboxMessage>,
}

/// Sandbox half of an in-process sandbox channel.
#[derive(Debug)]
pub struct SandboxEndpoint {
    documents: mpsc::UnboundedReceiver<HostMessage>,
    errors: mpsc::UnboundedSender<SandboxMessage>,
}

/// Create a connected host/sandbox pair.
#[must_use]
pub fn channel() -> (ChannelSandbox, SandboxEndpoint) {
    let (doc_tx, doc_rx) = mpsc::unbounded_channel();
    let (err_tx, err_rx) = mpsc::unbounded_channel();
    (
        ChannelSandbox {
            documents: doc_tx,
            errors: err_rx,
        },
        SandboxEndpoint {
            documents: doc_rx,
            errors: err_tx,
        },
    )
}

impl ChannelSandbox {
    /// Next relayed message, waiting for one.
    pub async fn recv(&mut self) -> Option<SandboxMessage> {
        self.errors.recv().await
    }

    /// Next relayed message if one is queued.
    pub fn try_recv(&mut self) -> Option<SandboxMessage> {
        self.errors.try_recv().ok()
    }
}

impl Sandbox for ChannelSandbox {
    fn load(&mut self, document: &PreviewDocument) {
        if self.documents.send(HostMessage::document(document)).is_err() {
            tracing::warn!(version = document.version, "sandbox is gone; document dropped");
        }
    }
}

impl SandboxEndpoint {
    /// Next document pushed by the host.
    pub async fn recv(&mut self) -> Option<HostMessage> {
        self.documents.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HostMessage> {
        self.documents.try_recv().ok()
    }

    /// Relay a runtime error to the host. Returns `false` if the host is gone.
    pub fn report(&self, error: RuntimeError) -> bool {
        self.errors.send(SandboxMessage::RuntimeError(error)).is_ok()
    }
}
