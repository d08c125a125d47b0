//! The module-local metadata store surface the engine reads and extends.
//!
//! Every loaded module owns a metadata store (its table and heap space). The
//! host exposes it to the engine as a [`MetadataStore`] trait object; the
//! engine reads the method and assembly-reference tables through it and
//! writes the new user-string, type-reference and member-reference entries a
//! rewrite needs. Store failures are recoverable at rewrite-pass granularity
//! and are reported as [`crate::Error::Store`].

use widestring::U16Str;

use crate::{metadata::token::Token, Result};

/// Properties of a method definition, resolved from its token.
#[derive(Debug, Clone)]
pub struct MethodProps {
    /// Simple name of the method
    pub name: String,
    /// Simple name of the declaring type
    pub type_name: String,
    /// The method's signature blob (`MethodDefSig`)
    pub signature: Vec<u8>,
}

/// One row of a module's assembly-reference table.
#[derive(Debug, Clone)]
pub struct AssemblyRefProps {
    /// The `AssemblyRef` token of this row
    pub token: Token,
    /// Simple name of the referenced assembly
    pub name: String,
}

/// Strong-name properties of the assembly declared in a module's scope.
///
/// Captured once from the base library module and cached by the registry so
/// later cross-assembly references can be built against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyIdentity {
    /// Simple name of the assembly
    pub name: String,
    /// Public key blob, empty if the assembly is not strong-named
    pub public_key: Vec<u8>,
    /// Hash algorithm id used for file hashes
    pub hash_algorithm: u32,
    /// Metadata version string of the scope
    pub metadata_version: String,
    /// Assembly flags (II.23.1.2)
    pub flags: u32,
}

/// Read/write access to one module's metadata store.
///
/// Reads never mutate the store. Writes intern or define new entries and
/// return the resulting token; a store may reject writes (e.g. a read-only
/// module), which aborts the current rewrite pass only.
pub trait MetadataStore: Send + Sync {
    /// Resolves a method token to its name, declaring type and signature.
    ///
    /// # Errors
    /// Returns an error if the token does not name a valid method in this
    /// module.
    fn method_props(&self, method: Token) -> Result<MethodProps>;

    /// Enumerates the module's assembly-reference table.
    ///
    /// # Errors
    /// Returns an error if the table cannot be read.
    fn assembly_refs(&self) -> Result<Vec<AssemblyRefProps>>;

    /// Reads the strong-name properties of the assembly declared in this
    /// module's scope.
    ///
    /// # Errors
    /// Returns an error if the module declares no assembly.
    fn assembly_identity(&self) -> Result<AssemblyIdentity>;

    /// Token of the module's entry-point method, `None` for libraries.
    ///
    /// # Errors
    /// Returns an error if the module header cannot be read.
    fn entry_point(&self) -> Result<Option<Token>> {
        Ok(None)
    }

    /// Interns a UTF-16 string literal into the `#US` heap, returning a
    /// reusable user-string token.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    fn define_user_string(&self, value: &U16Str) -> Result<Token>;

    /// Defines (or finds) a `TypeRef` row naming `type_name` inside the
    /// assembly referenced by `assembly_ref`.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    fn define_type_ref(&self, assembly_ref: Token, type_name: &str) -> Result<Token>;

    /// Defines (or finds) a `MemberRef` row for `member_name` on `type_ref`
    /// with the given signature blob.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    fn define_member_ref(&self, type_ref: Token, member_name: &str, signature: &[u8])
        -> Result<Token>;
}
