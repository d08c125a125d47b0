//! The engine context: lifecycle, notification handlers, and configuration.
//!
//! One [`Engine`] exists per process. [`Engine::initialize`] negotiates the
//! profiling capability with the host, claims the process-wide instance
//! slot, and configures the event mask; the host then drives the engine
//! through the module and compilation notifications. [`Engine::shutdown`]
//! deactivates the engine, after which every notification is ignored, and
//! the instance slot is never given back: a second initialization in the
//! same process fails regardless of shutdown.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, info, warn};

use crate::{
    host::{Capability, CompilationControl, EventMask, FunctionId, HostHandle, ModuleId, ProfilerHost},
    metadata::token::Token,
    registry::{FunctionRecord, MetadataRegistry, ModuleRecord},
    rewriter::{self, InstrumentationTarget, RewriteOutcome},
    Error, Result,
};

/// Assembly simple names of runtime tooling whose modules are never tracked.
const IGNORED_ASSEMBLY_NAMES: [&str; 2] = ["dotnet", "MSBuild"];

/// Assembly names that identify the runtime's base library.
const RUNTIME_ASSEMBLY_NAMES: [&str; 2] = ["mscorlib", "System.Private.CoreLib"];

static INSTANCE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Engine configuration: what to inject, and into which methods.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The external report function the injected call targets
    pub target: InstrumentationTarget,
    /// Method name rewritten when first compiled
    pub jit_target_method: String,
    /// Method name rewritten when recompiled on demand
    pub rejit_target_method: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            target: InstrumentationTarget::default(),
            jit_target_method: "JitRewriteTarget".to_string(),
            rejit_target_method: "ReJitRewriteTarget".to_string(),
        }
    }
}

/// The instrumentation engine.
pub struct Engine {
    host: Arc<dyn ProfilerHost>,
    registry: MetadataRegistry,
    config: EngineConfig,
    active: AtomicBool,
}

impl Engine {
    /// Initializes the engine against `handle`, claiming the process-wide
    /// instance slot.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyInitialized`] if an engine was already
    /// initialized in this process, even one that has since shut down, and
    /// [`Error::Incapable`] if the host cannot provide the profiling
    /// surface. A failed negotiation releases the slot.
    pub fn initialize(handle: &dyn HostHandle, config: EngineConfig) -> Result<Engine> {
        if INSTANCE_CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyInitialized);
        }

        match Self::attach(handle, config) {
            Ok(engine) => Ok(engine),
            Err(error) => {
                INSTANCE_CLAIMED.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    /// Negotiates capabilities and builds an engine without touching the
    /// process-wide instance slot.
    ///
    /// For embedders that manage the engine lifecycle themselves;
    /// [`Engine::initialize`] is the guarded front door.
    ///
    /// # Errors
    /// Returns [`Error::Incapable`] if the host cannot provide the profiling
    /// surface, or the host's error if it rejects the event mask.
    pub fn attach(handle: &dyn HostHandle, config: EngineConfig) -> Result<Engine> {
        let Capability::Capable(host) = handle.profiling_capability() else {
            return Err(Error::Incapable);
        };

        host.set_event_mask(EventMask::required())?;
        info!(
            "engine initialized, watching for {:?} and {:?}",
            config.jit_target_method, config.rejit_target_method
        );

        Ok(Engine {
            host,
            registry: MetadataRegistry::new(),
            config,
            active: AtomicBool::new(true),
        })
    }

    /// `true` until [`Engine::shutdown`] runs.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The registry backing this engine.
    #[must_use]
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// The negotiated host surface.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn ProfilerHost> {
        &self.host
    }

    /// The configuration this engine runs with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deactivates the engine. Notifications received afterwards are
    /// ignored.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("engine shut down");
    }

    /// Handles a module-load notification.
    ///
    /// Modules belonging to the tooling assemblies named in
    /// [`IGNORED_ASSEMBLY_NAMES`] are not tracked, which makes every later
    /// compilation inside them a skip. The filter compares assembly simple
    /// names, not module paths: framework modules commonly live under a
    /// `dotnet` install directory and must still be tracked. Loading the
    /// runtime's base library captures its assembly identity once.
    pub fn on_module_loaded(&self, module: ModuleId, module_path: &str) {
        if !self.is_active() {
            return;
        }

        let store = match self.host.module_metadata(module) {
            Ok(store) => store,
            Err(error) => {
                warn!("module {module:?} metadata inaccessible: {error}");
                return;
            }
        };

        let identity = match store.assembly_identity() {
            Ok(identity) => identity,
            Err(error) => {
                warn!("module {module:?} has no assembly identity: {error}");
                return;
            }
        };

        if IGNORED_ASSEMBLY_NAMES.contains(&identity.name.as_str()) {
            debug!(
                "ignoring tooling assembly {} at {module_path}",
                identity.name
            );
            return;
        }

        let entry_point = store.entry_point().unwrap_or(None);

        if RUNTIME_ASSEMBLY_NAMES.contains(&identity.name.as_str()) {
            self.registry.capture_runtime_identity(identity.clone());
        }

        match entry_point {
            Some(token) => info!(
                "module {module:?} of {} loaded, entry point {token}",
                identity.name
            ),
            None => debug!("module {module:?} of {} loaded", identity.name),
        }

        self.registry.record_module(
            module,
            ModuleRecord {
                assembly_name: identity.name,
                entry_point,
            },
        );
    }

    /// Handles a module-unload notification. The module stops being tracked
    /// immediately.
    pub fn on_module_unloaded(&self, module: ModuleId) {
        if !self.is_active() {
            return;
        }

        self.registry.forget_module(module);
        debug!("module {module:?} unloaded");
    }

    /// Handles a compilation-starting notification for `function`.
    ///
    /// Indexes the method under its qualified name (declaring type plus
    /// method name) for later on-demand recompilation, then runs the
    /// rewrite pass against the first-compile target name. Failures are logged, never escalated; the host always
    /// proceeds with compilation.
    pub fn on_compilation_starting(&self, function: FunctionId, control: &dyn CompilationControl) {
        if !self.is_active() {
            return;
        }

        let (module, method) = match self.host.function_info(function) {
            Ok(info) => info,
            Err(error) => {
                warn!("cannot resolve {function:?}: {error}");
                return;
            }
        };

        if !self.registry.is_module_tracked(module) {
            return;
        }

        self.index_function(module, method);
        self.run_rewrite(module, method, control, &self.config.jit_target_method);
    }

    /// Handles a recompilation-parameters notification, delivered when the
    /// host recompiles `method` after an on-demand request.
    ///
    /// Indexes the method like the first-compile path does, since a method
    /// may be observed here without ever passing through it, then runs the
    /// rewrite pass against the recompilation target name.
    pub fn on_recompilation_parameters(
        &self,
        module: ModuleId,
        method: Token,
        control: &dyn CompilationControl,
    ) {
        if !self.is_active() {
            return;
        }

        if !self.registry.is_module_tracked(module) {
            return;
        }

        self.index_function(module, method);
        self.run_rewrite(module, method, control, &self.config.rejit_target_method);
    }

    fn index_function(&self, module: ModuleId, method: Token) {
        let name = self
            .host
            .module_metadata(module)
            .and_then(|store| store.method_props(method))
            .map(|props| format!("{}.{}", props.type_name, props.name));

        match name {
            Ok(name) => {
                self.registry
                    .record_function(&name, FunctionRecord { module, token: method });
            }
            Err(error) => warn!("cannot index {method} in {module:?}: {error}"),
        }
    }

    fn run_rewrite(
        &self,
        module: ModuleId,
        method: Token,
        control: &dyn CompilationControl,
        expected_name: &str,
    ) {
        match rewriter::rewrite_method(
            self.host.as_ref(),
            control,
            &self.registry,
            &self.config.target,
            expected_name,
            module,
            method,
        ) {
            RewriteOutcome::Rewritten => info!("rewrote {method} in {module:?}"),
            RewriteOutcome::Skipped => {}
            RewriteOutcome::Failed(error) => {
                warn!("rewrite of {method} in {module:?} failed: {error}");
            }
        }
    }
}
