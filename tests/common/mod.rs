//! In-memory host and metadata store used by the integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use widestring::{U16Str, U16String};

use ilweave::il::body;
use ilweave::metadata::store::{
    AssemblyIdentity, AssemblyRefProps, MetadataStore, MethodProps,
};
use ilweave::prelude::*;

/// `static void ()` method signature blob.
pub const STATIC_VOID_SIG: [u8; 3] = [0x00, 0x00, 0x01];

/// `static ref int ()` method signature blob.
pub const STATIC_BYREF_INT_SIG: [u8; 4] = [0x00, 0x00, 0x10, 0x08];

/// One module's worth of fake metadata.
pub struct FakeStore {
    methods: Mutex<HashMap<Token, MethodProps>>,
    assembly_refs: Vec<AssemblyRefProps>,
    identity: AssemblyIdentity,
    entry_point: Option<Token>,
    pub user_strings: Mutex<Vec<U16String>>,
    pub type_refs: Mutex<Vec<(Token, String)>>,
    pub member_refs: Mutex<Vec<(Token, String, Vec<u8>)>>,
}

impl FakeStore {
    pub fn new(assembly_name: &str) -> Self {
        FakeStore {
            methods: Mutex::new(HashMap::new()),
            assembly_refs: Vec::new(),
            identity: AssemblyIdentity {
                name: assembly_name.to_string(),
                ..AssemblyIdentity::default()
            },
            entry_point: None,
            user_strings: Mutex::new(Vec::new()),
            type_refs: Mutex::new(Vec::new()),
            member_refs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_assembly_ref(mut self, row: u32, name: &str) -> Self {
        self.assembly_refs.push(AssemblyRefProps {
            token: Token::from_parts(0x23, row),
            name: name.to_string(),
        });
        self
    }

    pub fn with_entry_point(mut self, token: Token) -> Self {
        self.entry_point = Some(token);
        self
    }

    pub fn with_method(self, token: Token, name: &str, type_name: &str, signature: &[u8]) -> Self {
        self.methods.lock().unwrap().insert(
            token,
            MethodProps {
                name: name.to_string(),
                type_name: type_name.to_string(),
                signature: signature.to_vec(),
            },
        );
        self
    }

    /// The last interned user string, decoded back to UTF-8.
    pub fn last_user_string(&self) -> Option<String> {
        self.user_strings
            .lock()
            .unwrap()
            .last()
            .map(|wide| wide.to_string_lossy())
    }
}

impl MetadataStore for FakeStore {
    fn method_props(&self, method: Token) -> Result<MethodProps> {
        self.methods
            .lock()
            .unwrap()
            .get(&method)
            .cloned()
            .ok_or_else(|| Error::Store(format!("no method {method}")))
    }

    fn assembly_refs(&self) -> Result<Vec<AssemblyRefProps>> {
        Ok(self.assembly_refs.clone())
    }

    fn assembly_identity(&self) -> Result<AssemblyIdentity> {
        Ok(self.identity.clone())
    }

    fn entry_point(&self) -> Result<Option<Token>> {
        Ok(self.entry_point)
    }

    fn define_user_string(&self, value: &U16Str) -> Result<Token> {
        let mut strings = self.user_strings.lock().unwrap();
        strings.push(value.to_owned());
        Ok(Token::from_parts(0x70, strings.len() as u32))
    }

    fn define_type_ref(&self, assembly_ref: Token, type_name: &str) -> Result<Token> {
        assert_eq!(assembly_ref.table(), 0x23);
        let mut rows = self.type_refs.lock().unwrap();
        let token = Token::from_parts(0x01, rows.len() as u32 + 1);
        rows.push((assembly_ref, type_name.to_string()));
        Ok(token)
    }

    fn define_member_ref(
        &self,
        type_ref: Token,
        member_name: &str,
        signature: &[u8],
    ) -> Result<Token> {
        assert_eq!(type_ref.table(), 0x01);
        let mut rows = self.member_refs.lock().unwrap();
        let token = Token::from_parts(0x0A, rows.len() as u32 + 1);
        rows.push((type_ref, member_name.to_string(), signature.to_vec()));
        Ok(token)
    }
}

/// A scriptable host. Modules, functions and bodies are registered up front;
/// tests inspect what the engine asked of it afterwards.
#[derive(Default)]
pub struct FakeHost {
    stores: Mutex<HashMap<ModuleId, Arc<FakeStore>>>,
    functions: Mutex<HashMap<FunctionId, (ModuleId, Token)>>,
    bodies: Mutex<HashMap<(ModuleId, Token), Vec<u8>>>,
    pub event_mask: Mutex<Option<EventMask>>,
    pub recompilation_requests: Mutex<Vec<(ModuleId, Token)>>,
    pub reject_recompilation: Mutex<bool>,
}

impl FakeHost {
    pub fn new() -> Self {
        FakeHost::default()
    }

    pub fn add_module(&self, module: ModuleId, store: Arc<FakeStore>) {
        self.stores.lock().unwrap().insert(module, store);
    }

    pub fn add_function(&self, function: FunctionId, module: ModuleId, method: Token) {
        self.functions
            .lock()
            .unwrap()
            .insert(function, (module, method));
    }

    pub fn set_method_body(&self, module: ModuleId, method: Token, raw: Vec<u8>) {
        self.bodies.lock().unwrap().insert((module, method), raw);
    }

    pub fn store(&self, module: ModuleId) -> Arc<FakeStore> {
        Arc::clone(self.stores.lock().unwrap().get(&module).unwrap())
    }
}

impl ProfilerHost for FakeHost {
    fn set_event_mask(&self, mask: EventMask) -> Result<()> {
        *self.event_mask.lock().unwrap() = Some(mask);
        Ok(())
    }

    fn function_info(&self, function: FunctionId) -> Result<(ModuleId, Token)> {
        self.functions
            .lock()
            .unwrap()
            .get(&function)
            .copied()
            .ok_or_else(|| Error::Error(format!("unknown {function:?}")))
    }

    fn module_metadata(&self, module: ModuleId) -> Result<Arc<dyn MetadataStore>> {
        self.stores
            .lock()
            .unwrap()
            .get(&module)
            .map(|store| Arc::clone(store) as Arc<dyn MetadataStore>)
            .ok_or_else(|| Error::Store(format!("no metadata for {module:?}")))
    }

    fn method_body(&self, module: ModuleId, method: Token) -> Result<Vec<u8>> {
        self.bodies
            .lock()
            .unwrap()
            .get(&(module, method))
            .cloned()
            .ok_or_else(|| Error::Error(format!("no body for {method}")))
    }

    fn request_recompilation(&self, targets: &[(ModuleId, Token)]) -> Result<()> {
        if *self.reject_recompilation.lock().unwrap() {
            return Err(Error::Error("recompilation rejected".to_string()));
        }

        self.recompilation_requests
            .lock()
            .unwrap()
            .extend_from_slice(targets);
        Ok(())
    }
}

/// Handle that negotiates to a capable host.
pub struct CapableHandle(pub Arc<FakeHost>);

impl HostHandle for CapableHandle {
    fn profiling_capability(&self) -> Capability {
        Capability::Capable(Arc::clone(&self.0) as Arc<dyn ProfilerHost>)
    }
}

/// Handle that fails the negotiation.
pub struct IncapableHandle;

impl HostHandle for IncapableHandle {
    fn profiling_capability(&self) -> Capability {
        Capability::Incapable
    }
}

/// Sink capturing the replacement body the rewrite pass supplies.
#[derive(Default)]
pub struct RecordedBody {
    pub body: Mutex<Option<Vec<u8>>>,
}

impl RecordedBody {
    pub fn new() -> Self {
        RecordedBody::default()
    }

    pub fn taken(&self) -> Option<Vec<u8>> {
        self.body.lock().unwrap().clone()
    }
}

impl CompilationControl for RecordedBody {
    fn set_body(&self, body: &[u8]) -> Result<()> {
        *self.body.lock().unwrap() = Some(body.to_vec());
        Ok(())
    }
}

/// Wraps an instruction stream into a raw body envelope.
pub fn raw_body(code: &[u8]) -> Vec<u8> {
    body::encode_body(code, 8, 0, false, &[]).unwrap()
}
