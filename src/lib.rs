//! `ilweave` is an instrumentation engine for managed bytecode: it rewrites
//! the CIL of selected methods as the host runtime compiles them, injecting
//! a call to an external report function, and can ask the host to recompile
//! an already-compiled method so the injection happens again on a live
//! process.
//!
//! The host runtime is abstracted behind traits ([`host::ProfilerHost`],
//! [`host::CompilationControl`]); the engine never assumes how
//! notifications are delivered, only that they may arrive on arbitrary
//! threads.
//!
//! # Architecture
//!
//! - [`engine::Engine`] is the per-process context: capability negotiation,
//!   event-mask setup, and the notification handlers.
//! - [`registry::MetadataRegistry`] tracks loaded modules, indexes compiled
//!   methods by name, and remembers which methods were already rewritten.
//! - [`rewriter`] is the rewrite pass: candidate checks, reference
//!   resolution, and body replacement.
//! - [`il`] decodes and re-encodes method bodies: envelope ([`il::body`]),
//!   opcode tables ([`il::opcodes`]), and the editable instruction list
//!   ([`il::stream`]).
//! - [`metadata`] models tokens, signature blobs, and the module-local
//!   metadata store surface.
//! - [`reinstrument::ReinstrumentationController`] resolves method names to
//!   compiled methods and issues on-demand recompilation requests.
//!
//! # Lifecycle
//!
//! A process initializes exactly one engine. Module-load notifications
//! populate the registry (runtime tooling modules are filtered out), each
//! compilation notification indexes the method and runs the rewrite pass,
//! and shutdown deactivates the engine permanently. Rewrite failures are
//! contained: the host compiles the original body and the process keeps
//! running.

#![warn(missing_docs)]

#[macro_use]
mod error;

pub mod engine;
pub mod host;
pub mod il;
pub mod io;
pub mod metadata;
pub mod registry;
pub mod reinstrument;
pub mod rewriter;

pub use error::Error;

/// Convenience alias for operations that can fail with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Common imports for embedders.
pub mod prelude {
    pub use crate::engine::{Engine, EngineConfig};
    pub use crate::host::{
        Capability, CompilationControl, EventMask, FunctionId, HostHandle, ModuleId, ProfilerHost,
    };
    pub use crate::metadata::token::Token;
    pub use crate::registry::MetadataRegistry;
    pub use crate::reinstrument::{ReinstrumentOutcome, ReinstrumentationController};
    pub use crate::rewriter::{InstrumentationTarget, RewriteOutcome};
    pub use crate::{Error, Result};
}
