//! Resolution and definition of the symbolic references a rewrite needs.
//!
//! Before the instruction stream of a method can call into the external
//! report function, its module must carry three metadata entries: an
//! `AssemblyRef` to the instrumentation assembly, a `TypeRef` to the report
//! type inside it, and a `MemberRef` to the report method with the fixed
//! signature shape. The assembly reference is only ever *found* - if a module
//! does not already reference the instrumentation assembly, it is not
//! rewritten at all.

use widestring::U16String;

use crate::{
    metadata::{
        signatures::report_callee_signature,
        store::MetadataStore,
        token::Token,
    },
    Result,
};

/// Scans a module's assembly-reference table for a case-sensitive name match.
///
/// Returns `None` if the assembly is not referenced. Missing references are
/// never created; the caller treats `None` as "skip this module".
///
/// # Errors
/// Returns an error if the reference table cannot be read.
pub fn find_assembly_ref(store: &dyn MetadataStore, assembly_name: &str) -> Result<Option<Token>> {
    let refs = store.assembly_refs()?;
    Ok(refs
        .into_iter()
        .find(|entry| entry.name == assembly_name)
        .map(|entry| entry.token))
}

/// Interns a string literal into the module's user-string heap.
///
/// The literal is converted to UTF-16 before it is handed to the store, as
/// the `#US` heap stores wide characters.
///
/// # Errors
/// Returns an error if the store rejects the write (e.g. read-only module).
pub fn define_user_string(store: &dyn MetadataStore, text: &str) -> Result<Token> {
    let wide = U16String::from_str(text);
    store.define_user_string(&wide)
}

/// Defines a `TypeRef` for `type_name` inside the referenced assembly.
///
/// # Errors
/// Returns an error if the store rejects the write.
pub fn define_type_ref(
    store: &dyn MetadataStore,
    assembly_ref: Token,
    type_name: &str,
) -> Result<Token> {
    store.define_type_ref(assembly_ref, type_name)
}

/// Defines the `MemberRef` for the report method with the fixed signature.
///
/// The signature is always the one shape the engine injects: default calling
/// convention, one `string` parameter, `void` return.
///
/// # Errors
/// Returns an error if the store rejects the write.
pub fn define_report_member_ref(
    store: &dyn MetadataStore,
    type_ref: Token,
    member_name: &str,
) -> Result<Token> {
    store.define_member_ref(type_ref, member_name, &report_callee_signature())
}
