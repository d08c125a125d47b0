//! On-demand recompilation of a previously compiled method, by name.
//!
//! External tooling names a method; the controller resolves it through the
//! registry's by-name index and asks the host to recompile it, which
//! re-enters the engine through the recompilation-parameters notification.
//! The host call is made from a short-lived worker thread because hosts
//! commonly reject recompilation requests issued from their own callback
//! threads; the controller joins the worker before returning, so the
//! outcome reflects the whole exchange.

use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::engine::Engine;

/// What a reinstrumentation request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinstrumentOutcome {
    /// The request was handed to the host
    Requested,
    /// No compiled method of that name is known, or its module unloaded
    NotFound,
    /// The engine has shut down
    Unavailable,
}

/// Issues on-demand recompilation requests against one engine.
pub struct ReinstrumentationController {
    engine: Arc<Engine>,
}

impl ReinstrumentationController {
    /// Binds a controller to `engine`.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        ReinstrumentationController { engine }
    }

    /// Requests recompilation of the method whose qualified name
    /// (declaring type plus method name, dot-joined) is `method_name`.
    ///
    /// The name must match a method the engine saw compile; a stale record
    /// whose module has unloaded counts as not found. A host that rejects
    /// the request is logged, but the outcome is still
    /// [`ReinstrumentOutcome::Requested`]: the request was issued, what the
    /// host makes of it is out of the engine's hands.
    pub fn request(&self, method_name: &str) -> ReinstrumentOutcome {
        if !self.engine.is_active() {
            return ReinstrumentOutcome::Unavailable;
        }

        let engine = Arc::clone(&self.engine);
        let name = method_name.to_string();

        let worker = thread::spawn(move || {
            let Some(record) = engine.registry().lookup_function_by_name(&name) else {
                return ReinstrumentOutcome::NotFound;
            };
            if !engine.registry().is_module_tracked(record.module) {
                return ReinstrumentOutcome::NotFound;
            }

            info!("requesting recompilation of {} ({})", name, record.token);
            if let Err(error) = engine
                .host()
                .request_recompilation(&[(record.module, record.token)])
            {
                warn!("host rejected recompilation of {name}: {error}");
            }

            ReinstrumentOutcome::Requested
        });

        match worker.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("reinstrumentation worker panicked");
                ReinstrumentOutcome::Unavailable
            }
        }
    }
}
