//! The bytecode rewrite pass: injects a report call into one method.
//!
//! Invoked from the compilation notifications with a method that is about to
//! be compiled. The pass is conservative: any condition it cannot satisfy
//! (wrong name, by-ref return, missing assembly reference, already
//! rewritten) makes it skip, and any error leaves the original body in
//! place. The host compiles whatever body the pass did or did not supply;
//! a failed pass never takes the process down.

use log::debug;

use crate::{
    host::{CompilationControl, ModuleId, ProfilerHost},
    il::{body, body::BodyHeader, stream::{Instruction, InstructionStream}},
    metadata::{resolver, signatures, token::Token},
    registry::MetadataRegistry,
    Error, Result,
};

/// Where the injected call goes: assembly, type, and method of the external
/// report function.
#[derive(Debug, Clone)]
pub struct InstrumentationTarget {
    /// Simple name of the instrumentation assembly
    pub assembly: String,
    /// Namespace-qualified name of the report type
    pub type_name: String,
    /// Name of the report method, shaped `static void (string)`
    pub method_name: String,
}

impl Default for InstrumentationTarget {
    fn default() -> Self {
        InstrumentationTarget {
            assembly: "Instrumentation".to_string(),
            type_name: "Instrumentation.Writer".to_string(),
            method_name: "Write".to_string(),
        }
    }
}

/// What one rewrite pass did.
#[derive(Debug)]
pub enum RewriteOutcome {
    /// The replacement body was accepted by the host
    Rewritten,
    /// The method is not a rewrite candidate; original body compiles
    Skipped,
    /// The pass aborted; original body compiles
    Failed(Error),
}

/// Runs the rewrite pass for `method`, which the host is about to compile
/// in `module`.
///
/// `expected_name` is the method name that makes a candidate; everything
/// else is skipped. Errors are folded into [`RewriteOutcome::Failed`], never
/// propagated.
pub fn rewrite_method(
    host: &dyn ProfilerHost,
    control: &dyn CompilationControl,
    registry: &MetadataRegistry,
    target: &InstrumentationTarget,
    expected_name: &str,
    module: ModuleId,
    method: Token,
) -> RewriteOutcome {
    match try_rewrite(host, control, registry, target, expected_name, module, method) {
        Ok(outcome) => outcome,
        Err(error) => RewriteOutcome::Failed(error),
    }
}

fn try_rewrite(
    host: &dyn ProfilerHost,
    control: &dyn CompilationControl,
    registry: &MetadataRegistry,
    target: &InstrumentationTarget,
    expected_name: &str,
    module: ModuleId,
    method: Token,
) -> Result<RewriteOutcome> {
    let store = host.module_metadata(module)?;
    let props = store.method_props(method)?;

    if props.name != expected_name {
        return Ok(RewriteOutcome::Skipped);
    }

    let signature = signatures::parse_method_signature(&props.signature)?;
    if signature.returns_by_ref() {
        debug!(
            "skipping {}.{}: by-ref return",
            props.type_name, props.name
        );
        return Ok(RewriteOutcome::Skipped);
    }

    if registry.is_rewritten(module, method) {
        return Ok(RewriteOutcome::Skipped);
    }

    let Some(assembly_ref) = resolver::find_assembly_ref(store.as_ref(), &target.assembly)? else {
        debug!(
            "skipping {}.{}: module does not reference {}",
            props.type_name, props.name, target.assembly
        );
        return Ok(RewriteOutcome::Skipped);
    };

    let message = format!("Hello from {}!", props.name);
    let string_token = resolver::define_user_string(store.as_ref(), &message)?;
    let type_ref = resolver::define_type_ref(store.as_ref(), assembly_ref, &target.type_name)?;
    let member_ref =
        resolver::define_report_member_ref(store.as_ref(), type_ref, &target.method_name)?;

    let raw = host.method_body(module, method)?;
    let header = BodyHeader::parse(&raw)?;
    let mut stream = InstructionStream::parse(header.code(&raw)?, &header.exception_handlers)?;

    let Some(first) = stream.first() else {
        return Err(Error::Empty);
    };
    stream.insert_before(first, Instruction::load_string(string_token));
    stream.insert_before(first, Instruction::call(member_ref));

    let serialized = stream.serialize()?;
    let replacement = body::encode_body(
        &serialized.code,
        // the injected ldstr holds one extra slot before the call consumes it
        header.max_stack + 1,
        header.local_var_sig_token,
        header.is_init_local,
        &serialized.handlers,
    )?;

    control.set_body(&replacement)?;
    registry.mark_rewritten(module, method);
    Ok(RewriteOutcome::Rewritten)
}
