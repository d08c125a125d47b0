//! Method signature blob parsing and the fixed injected-callee signature.
//!
//! The rewrite pass needs two things from signatures: it must parse the
//! candidate method's own signature blob far enough to classify its return
//! type (by-reference returns are never instrumented), and it must emit the
//! one fixed signature shape of the external report function it injects a
//! call to (default calling convention, a single `string` parameter, `void`
//! return).
//!
//! # Reference
//! - ECMA-335 6th Edition, Partition II, Section 23.2 - Blobs and signatures

use crate::{io::Parser, metadata::token::Token, Error::RecursionLimit, Result};

/// Maximum recursion depth for signature parsing
const MAX_RECURSION_DEPTH: usize = 50;

/// Possible bytes that represent various 'Types' within a signature - from coreclr
#[allow(missing_docs)]
pub mod element_type {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1b;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

/// Calling convention bytes for method signatures (II.23.2.1 / II.23.2.3)
#[allow(missing_docs)]
pub mod calling_convention {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;
}

/// A parsed type from a signature blob.
///
/// Trimmed to the information the eligibility rules need; composite types
/// keep enough structure that a well-formed blob parses to completion.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypeSignature {
    /// Not defined
    #[default]
    Unknown,
    /// void
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// System.String
    String,
    /// System.Object
    Object,
    /// System.IntPtr
    IntPtr,
    /// System.UIntPtr
    UIntPtr,
    /// System.TypedReference
    TypedByRef,
    /// Unmanaged pointer to a type
    Ptr(Box<TypeSignature>),
    /// Managed reference to a type
    ByRef(Box<TypeSignature>),
    /// A value type, by `TypeDef` / `TypeRef` / `TypeSpec` token
    ValueType(Token),
    /// A class type, by `TypeDef` / `TypeRef` / `TypeSpec` token
    Class(Token),
    /// Generic parameter of the declaring type, by index
    GenericParamType(u32),
    /// Generic parameter of the method, by index
    GenericParamMethod(u32),
    /// Single-dimensional array with zero lower bound
    SzArray(Box<TypeSignature>),
    /// Multi-dimensional array
    Array {
        /// Element type
        base: Box<TypeSignature>,
        /// Number of dimensions
        rank: u32,
    },
    /// Instantiated generic type
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Function pointer (operand blob skipped)
    FnPtr,
}

/// One parameter (or the return slot) of a method signature (II.23.2.10)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureParameter {
    /// Custom modifiers - `TypeDefOrRefOrSpecEncoded`
    pub modifiers: Vec<Token>,
    /// Passed by reference
    pub by_ref: bool,
    /// The type of the parameter
    pub base: TypeSignature,
}

/// A parsed method signature (II.23.2.1)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureMethod {
    /// Instance method (`HASTHIS` set)
    pub has_this: bool,
    /// Explicit `this` parameter (`EXPLICITTHIS` set)
    pub explicit_this: bool,
    /// Vararg calling convention
    pub vararg: bool,
    /// Number of generic parameters of the method
    pub param_count_generic: u32,
    /// Declared parameter count
    pub param_count: u32,
    /// The return slot
    pub return_type: SignatureParameter,
    /// The parameters
    pub params: Vec<SignatureParameter>,
}

impl SignatureMethod {
    /// `true` if the method returns by reference.
    ///
    /// The injected call shape cannot follow a by-ref return, so such
    /// methods are excluded from instrumentation regardless of name.
    #[must_use]
    pub fn returns_by_ref(&self) -> bool {
        self.return_type.by_ref || matches!(self.return_type.base, TypeSignature::ByRef(_))
    }
}

/// Parses a `MethodDefSig` blob.
///
/// # Errors
/// Returns an error if the blob is empty, truncated, or uses a construct the
/// parser does not model.
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    if data.is_empty() {
        return Err(crate::Error::Empty);
    }

    SignatureReader::new(data).parse_method()
}

/// Encodes the fixed signature of the injected report callee.
///
/// Default calling convention, one parameter, `void` return, parameter type
/// `string`. This is the only member-reference signature the engine ever
/// defines; it is deliberately not generalized.
#[must_use]
pub fn report_callee_signature() -> [u8; 4] {
    [
        calling_convention::DEFAULT,
        0x01,
        element_type::VOID,
        element_type::STRING,
    ]
}

struct SignatureReader<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        SignatureReader {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    fn parse_method(&mut self) -> Result<SignatureMethod> {
        let convention = self.parser.read_le::<u8>()?;

        let mut signature = SignatureMethod {
            has_this: convention & calling_convention::HAS_THIS != 0,
            explicit_this: convention & calling_convention::EXPLICIT_THIS != 0,
            vararg: convention & 0x0F == calling_convention::VARARG,
            ..Default::default()
        };

        if convention & calling_convention::GENERIC != 0 {
            signature.param_count_generic = self.parser.read_compressed_uint()?;
        }

        signature.param_count = self.parser.read_compressed_uint()?;
        signature.return_type = self.parse_parameter()?;

        for _ in 0..signature.param_count {
            if self.parser.has_more_data() && self.parser.peek_byte()? == element_type::SENTINEL {
                // Vararg sentinel - the fixed part of the signature ends here
                break;
            }
            signature.params.push(self.parse_parameter()?);
        }

        Ok(signature)
    }

    fn parse_parameter(&mut self) -> Result<SignatureParameter> {
        let modifiers = self.parse_custom_mods()?;

        let by_ref = self.parser.peek_byte()? == element_type::BYREF;
        if by_ref {
            self.parser.advance_by(1)?;
        }

        Ok(SignatureParameter {
            modifiers,
            by_ref,
            base: self.parse_type()?,
        })
    }

    fn parse_custom_mods(&mut self) -> Result<Vec<Token>> {
        let mut modifiers = Vec::new();
        while self.parser.has_more_data() {
            let prefix = self.parser.peek_byte()?;
            if prefix != element_type::CMOD_REQD && prefix != element_type::CMOD_OPT {
                break;
            }

            self.parser.advance_by(1)?;
            modifiers.push(read_type_def_or_ref(&mut self.parser)?);
        }

        Ok(modifiers)
    }

    fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let current_byte = self.parser.read_le::<u8>()?;
        let result = match current_byte {
            element_type::VOID => Ok(TypeSignature::Void),
            element_type::BOOLEAN => Ok(TypeSignature::Boolean),
            element_type::CHAR => Ok(TypeSignature::Char),
            element_type::I1 => Ok(TypeSignature::I1),
            element_type::U1 => Ok(TypeSignature::U1),
            element_type::I2 => Ok(TypeSignature::I2),
            element_type::U2 => Ok(TypeSignature::U2),
            element_type::I4 => Ok(TypeSignature::I4),
            element_type::U4 => Ok(TypeSignature::U4),
            element_type::I8 => Ok(TypeSignature::I8),
            element_type::U8 => Ok(TypeSignature::U8),
            element_type::R4 => Ok(TypeSignature::R4),
            element_type::R8 => Ok(TypeSignature::R8),
            element_type::STRING => Ok(TypeSignature::String),
            element_type::OBJECT => Ok(TypeSignature::Object),
            element_type::I => Ok(TypeSignature::IntPtr),
            element_type::U => Ok(TypeSignature::UIntPtr),
            element_type::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            element_type::PTR => {
                // Custom mods may precede the pointee
                let _ = self.parse_custom_mods()?;
                Ok(TypeSignature::Ptr(Box::new(self.parse_type()?)))
            }
            element_type::BYREF => Ok(TypeSignature::ByRef(Box::new(self.parse_type()?))),
            element_type::VALUETYPE => {
                Ok(TypeSignature::ValueType(read_type_def_or_ref(&mut self.parser)?))
            }
            element_type::CLASS => {
                Ok(TypeSignature::Class(read_type_def_or_ref(&mut self.parser)?))
            }
            element_type::VAR => Ok(TypeSignature::GenericParamType(
                self.parser.read_compressed_uint()?,
            )),
            element_type::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.parser.read_compressed_uint()?,
            )),
            element_type::SZARRAY => {
                let _ = self.parse_custom_mods()?;
                Ok(TypeSignature::SzArray(Box::new(self.parse_type()?)))
            }
            element_type::ARRAY => {
                let base = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    let _ = self.parser.read_compressed_uint()?;
                }
                let num_lo_bounds = self.parser.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    let _ = self.parser.read_compressed_uint()?;
                }

                Ok(TypeSignature::Array {
                    base: Box::new(base),
                    rank,
                })
            }
            element_type::GENERICINST => {
                let base = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut args = Vec::with_capacity(arg_count as usize);
                for _ in 0..arg_count {
                    args.push(self.parse_type()?);
                }

                Ok(TypeSignature::GenericInst(Box::new(base), args))
            }
            element_type::FNPTR => {
                // The nested method signature is parsed for consistency but
                // its shape is not needed by any eligibility rule.
                let _ = self.parse_method()?;
                Ok(TypeSignature::FnPtr)
            }
            _ => Err(malformed_error!(
                "Unknown element type in signature - {:02X}",
                current_byte
            )),
        };

        self.depth -= 1;
        result
    }
}

/// Reads a `TypeDefOrRefOrSpecEncoded` coded token (II.23.2.8).
fn read_type_def_or_ref(parser: &mut Parser) -> Result<Token> {
    let coded = parser.read_compressed_uint()?;
    let table = match coded & 0x03 {
        0 => crate::metadata::token::table::TYPE_DEF,
        1 => crate::metadata::token::table::TYPE_REF,
        2 => 0x1B, // TypeSpec
        _ => {
            return Err(malformed_error!(
                "Invalid TypeDefOrRef coded tag - {}",
                coded & 0x03
            ))
        }
    };

    Ok(Token::from_parts(table, coded >> 2))
}
