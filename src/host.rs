//! Trait seams between the engine and the host runtime.
//!
//! The host runtime drives the engine through lifecycle and compilation
//! notifications and, in return, provides the capabilities the engine needs:
//! function-identity resolution, metadata store access, raw method bodies,
//! and re-compilation requests. Everything host-side is modeled as traits so
//! the engine never depends on how the host is actually wired.
//!
//! Capability negotiation happens once, at engine construction: the embedder
//! hands the engine a [`HostHandle`], the engine asks it for a
//! [`ProfilerHost`], and an incapable host is a fatal initialization error.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::{metadata::store::MetadataStore, metadata::token::Token, Result};

/// Opaque handle of a loaded module, assigned by the host.
///
/// Only valid between the module's load and unload notifications; the
/// registry treats any lookup after unload as "not found".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

/// Opaque handle of a function instance, assigned by the host.
///
/// Used only transiently: the engine immediately resolves it to a
/// `(module, method token)` pair via [`ProfilerHost::function_info`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u64);

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId(0x{:x})", self.0)
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionId(0x{:x})", self.0)
    }
}

bitflags! {
    /// Event categories the engine asks the host to deliver.
    ///
    /// Set once during initialization. The values mirror the host's
    /// profiling event mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        /// JIT compilation start/finish notifications
        const MONITOR_JIT_COMPILATION = 0x0000_0020;
        /// Module load/unload notifications
        const MONITOR_MODULE_LOADS = 0x0000_0008;
        /// Ask the host not to inline across instrumented methods
        const DISABLE_INLINING = 0x0000_4000;
        /// Ignore precompiled native images so every method is JIT compiled
        const DISABLE_ALL_NGEN_IMAGES = 0x0200_0000;
        /// Relax transparency checks under full trust hosts
        const DISABLE_TRANSPARENCY_CHECKS = 0x0800_0000;
        /// Allow on-demand recompilation requests
        const ENABLE_REJIT = 0x0004_0000;
    }
}

impl EventMask {
    /// The mask this engine always requests.
    #[must_use]
    pub fn required() -> Self {
        EventMask::MONITOR_JIT_COMPILATION
            | EventMask::MONITOR_MODULE_LOADS
            | EventMask::DISABLE_INLINING
            | EventMask::DISABLE_ALL_NGEN_IMAGES
            | EventMask::DISABLE_TRANSPARENCY_CHECKS
            | EventMask::ENABLE_REJIT
    }
}

/// Result of asking a generic host handle for profiling capabilities.
pub enum Capability {
    /// The host provides the full profiling surface
    Capable(Arc<dyn ProfilerHost>),
    /// The host cannot provide it; engine initialization fails
    Incapable,
}

/// A generic handle to the host, queried once for profiling capabilities.
///
/// This models the host's capability-negotiation step as a typed, one-shot
/// exchange: the outcome is cached in the engine context for its lifetime.
pub trait HostHandle {
    /// Negotiate the profiling capability set.
    fn profiling_capability(&self) -> Capability;
}

/// The full profiling surface of a capable host.
pub trait ProfilerHost: Send + Sync {
    /// Configures which event categories the host delivers.
    ///
    /// # Errors
    /// Returns an error if the host rejects the mask.
    fn set_event_mask(&self, mask: EventMask) -> Result<()>;

    /// Resolves a function instance to its module and method token.
    ///
    /// # Errors
    /// Returns an error if the function id is unknown to the host.
    fn function_info(&self, function: FunctionId) -> Result<(ModuleId, Token)>;

    /// Opens the metadata store of a module for reading and writing.
    ///
    /// # Errors
    /// Returns an error if the module is gone or its store is inaccessible.
    fn module_metadata(&self, module: ModuleId) -> Result<Arc<dyn MetadataStore>>;

    /// Fetches the raw (header plus instruction stream) body of a method.
    ///
    /// # Errors
    /// Returns an error if the method has no body or the module is gone.
    fn method_body(&self, module: ModuleId, method: Token) -> Result<Vec<u8>>;

    /// Asks the host to recompile the given methods, which re-enters the
    /// engine through the re-compilation-parameters notification.
    ///
    /// Returns once the request is issued; compilation itself is
    /// asynchronous.
    ///
    /// # Errors
    /// Returns an error if the host rejects the request.
    fn request_recompilation(&self, targets: &[(ModuleId, Token)]) -> Result<()>;
}

/// Sink for a replacement method body during one compilation.
///
/// Handed to the engine alongside a compilation notification; accepting a
/// body makes the host compile it in place of the original.
pub trait CompilationControl {
    /// Supplies the replacement raw body for the method being compiled.
    ///
    /// # Errors
    /// Returns an error if the host rejects the body.
    fn set_body(&self, body: &[u8]) -> Result<()>;
}
