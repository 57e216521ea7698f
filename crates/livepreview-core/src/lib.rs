#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Live preview compiler.
//!
//! Turns a snapshot of a virtual file system (components, stylesheets,
//! package imports) into a standalone preview document:
//!
//! ```text
//! FileSet ─► resolver ─► compiler (SWC) ─► registry (two passes)
//!                                             │
//!                    styles ─► preview ◄── import_map
//! ```
//!
//! [`pipeline::PreviewSession`] drives one pass per snapshot and keeps the
//! last good preview when a pass fails.

pub mod compiler;
pub mod config;
pub mod error;
pub mod import_map;
pub mod package;
pub mod pipeline;
pub mod preview;
pub mod registry;
pub mod resolver;
pub mod styles;
pub mod version;
pub mod vfs;

pub use config::{Config, ProjectConfig};
pub use error::{CompileError, Error};
pub use import_map::ImportMap;
pub use package::{PackageRedirects, PackageSpecifier};
pub use pipeline::{ApplyOutcome, Pipeline, PreviewBuild, PreviewSession, RecompileGate, Ticket};
pub use preview::{PreviewDocument, Sandbox};
pub use registry::{CompiledModule, ModuleReference, Registry};
pub use resolver::{resolve, ResolvedSpecifier, Resolver};
pub use version::VERSION;
pub use vfs::{FileKind, FileSet, MemoryFileSystem, VirtualFile, VirtualFileSystem};
