//! Process-wide registry of modules, named functions, and rewrite marks.
//!
//! Every notification handler reads or writes this registry, and the host
//! delivers notifications on arbitrary threads, so all maps are the
//! concurrent ones used throughout the crate: [`DashMap`]/[`DashSet`] for
//! keyed lookups, [`SkipMap`] for the ordered by-name index.
//!
//! The module map is the single authority for "is this module tracked":
//! unloading a module removes its entry, and any lookup that follows
//! answers "not found". By-name function records are deliberately kept
//! after unload since their module check happens against the module map at
//! use time.

use crossbeam_skiplist::SkipMap;
use dashmap::{DashMap, DashSet};
use std::sync::OnceLock;

use crate::{
    host::ModuleId,
    metadata::{store::AssemblyIdentity, token::Token},
};

/// What the registry keeps per loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Simple name of the assembly the module belongs to
    pub assembly_name: String,
    /// Token of the module's entry-point method, if it has one
    pub entry_point: Option<Token>,
}

/// Where a function named in a reinstrumentation request lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRecord {
    /// Module the function was compiled in
    pub module: ModuleId,
    /// Method token within that module
    pub token: Token,
}

/// Ordered by-name index of functions seen by the engine.
pub type FunctionMap = SkipMap<String, FunctionRecord>;

/// Registry backing all notification handlers.
pub struct MetadataRegistry {
    modules: DashMap<ModuleId, ModuleRecord>,
    functions: FunctionMap,
    rewritten: DashSet<(ModuleId, Token)>,
    runtime_identity: OnceLock<AssemblyIdentity>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        MetadataRegistry {
            modules: DashMap::new(),
            functions: SkipMap::new(),
            rewritten: DashSet::new(),
            runtime_identity: OnceLock::new(),
        }
    }

    /// Tracks a freshly loaded module. Reloading the same id replaces the
    /// previous record.
    pub fn record_module(&self, module: ModuleId, record: ModuleRecord) {
        self.modules.insert(module, record);
    }

    /// Stops tracking an unloaded module. Lookups for `module` answer `None`
    /// from this point on.
    pub fn forget_module(&self, module: ModuleId) {
        self.modules.remove(&module);
    }

    /// The record of a tracked module, `None` once it unloaded.
    #[must_use]
    pub fn lookup_module(&self, module: ModuleId) -> Option<ModuleRecord> {
        self.modules.get(&module).map(|entry| entry.clone())
    }

    /// `true` while `module` is tracked.
    #[must_use]
    pub fn is_module_tracked(&self, module: ModuleId) -> bool {
        self.modules.contains_key(&module)
    }

    /// Number of currently tracked modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Indexes a function under its qualified name, declaring type plus
    /// method name joined by a dot.
    ///
    /// Qualified names are not unique across modules; a later record under
    /// the same name replaces the earlier one.
    pub fn record_function(&self, name: &str, record: FunctionRecord) {
        self.functions.insert(name.to_string(), record);
    }

    /// The most recently recorded function of that name.
    #[must_use]
    pub fn lookup_function_by_name(&self, name: &str) -> Option<FunctionRecord> {
        self.functions.get(name).map(|entry| *entry.value())
    }

    /// Marks a method as carrying the injected call.
    ///
    /// Marks are never cleared, the same method is rewritten at most once
    /// for the lifetime of the process.
    pub fn mark_rewritten(&self, module: ModuleId, method: Token) {
        self.rewritten.insert((module, method));
    }

    /// `true` once [`Self::mark_rewritten`] ran for this method.
    #[must_use]
    pub fn is_rewritten(&self, module: ModuleId, method: Token) -> bool {
        self.rewritten.contains(&(module, method))
    }

    /// Captures the identity of the runtime assembly. Only the first capture
    /// sticks; later calls are ignored.
    pub fn capture_runtime_identity(&self, identity: AssemblyIdentity) {
        let _ = self.runtime_identity.set(identity);
    }

    /// Identity of the runtime assembly, once a runtime module loaded.
    #[must_use]
    pub fn runtime_identity(&self) -> Option<&AssemblyIdentity> {
        self.runtime_identity.get()
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(name: &str) -> ModuleRecord {
        ModuleRecord {
            assembly_name: name.to_string(),
            entry_point: None,
        }
    }

    #[test]
    fn module_lifecycle() {
        let registry = MetadataRegistry::new();
        let module = ModuleId(1);

        assert!(registry.lookup_module(module).is_none());
        registry.record_module(module, record("App"));
        assert_eq!(
            registry.lookup_module(module).unwrap().assembly_name,
            "App"
        );

        registry.forget_module(module);
        assert!(registry.lookup_module(module).is_none());
        assert!(!registry.is_module_tracked(module));
    }

    #[test]
    fn function_records_survive_module_unload() {
        let registry = MetadataRegistry::new();
        let module = ModuleId(7);
        registry.record_module(module, record("App"));
        registry.record_function(
            "Worker",
            FunctionRecord {
                module,
                token: Token::new(0x0600_0001),
            },
        );

        registry.forget_module(module);

        // by-name entry stays; the module map says whether it is usable
        let found = registry.lookup_function_by_name("Worker").unwrap();
        assert!(!registry.is_module_tracked(found.module));
    }

    #[test]
    fn name_collision_overwrites_registry_entry() {
        let registry = MetadataRegistry::new();
        registry.record_function(
            "Run",
            FunctionRecord {
                module: ModuleId(1),
                token: Token::new(0x0600_0001),
            },
        );
        registry.record_function(
            "Run",
            FunctionRecord {
                module: ModuleId(2),
                token: Token::new(0x0600_0009),
            },
        );

        let found = registry.lookup_function_by_name("Run").unwrap();
        assert_eq!(found.module, ModuleId(2));
        assert_eq!(found.token, Token::new(0x0600_0009));
    }

    #[test]
    fn rewrite_marks_are_per_module() {
        let registry = MetadataRegistry::new();
        let token = Token::new(0x0600_0001);

        registry.mark_rewritten(ModuleId(1), token);
        assert!(registry.is_rewritten(ModuleId(1), token));
        assert!(!registry.is_rewritten(ModuleId(2), token));
    }

    #[test]
    fn runtime_identity_captured_once() {
        let registry = MetadataRegistry::new();
        registry.capture_runtime_identity(AssemblyIdentity {
            name: "System.Private.CoreLib".to_string(),
            ..AssemblyIdentity::default()
        });
        registry.capture_runtime_identity(AssemblyIdentity {
            name: "mscorlib".to_string(),
            ..AssemblyIdentity::default()
        });

        assert_eq!(
            registry.runtime_identity().unwrap().name,
            "System.Private.CoreLib"
        );
    }

    #[test]
    fn concurrent_module_churn() {
        let registry = Arc::new(MetadataRegistry::new());
        let mut threads = Vec::new();

        for thread_index in 0..4u64 {
            let registry = Arc::clone(&registry);
            threads.push(std::thread::spawn(move || {
                for round in 0..100u64 {
                    let module = ModuleId(thread_index * 1000 + round);
                    registry.record_module(module, ModuleRecord {
                        assembly_name: format!("A{thread_index}"),
                        entry_point: None,
                    });
                    assert!(registry.is_module_tracked(module));
                    if round % 2 == 0 {
                        registry.forget_module(module);
                    }
                }
            }));
        }

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(registry.module_count(), 4 * 50);
    }
}
