//! Parsing and emission of CIL method body headers.
//!
//! A raw method body starts with a tiny (one byte) or fat (twelve byte)
//! header, followed by the instruction stream, optionally followed by
//! 4-byte-aligned extra data sections that carry exception-handling clauses
//! in a small or fat form. This module decodes that envelope into
//! [`BodyHeader`] and re-emits it after editing.
//!
//! # Reference
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use bitflags::bitflags;

use crate::{
    io::{read_le, read_le_at},
    Error::OutOfBounds,
    Result,
};

bitflags! {
    /// Flags of a fat method body header (II.25.4.4)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BodyFlags: u16 {
        /// Body has a tiny header
        const TINY_FORMAT = 0x02;
        /// Body has a fat header
        const FAT_FORMAT = 0x03;
        /// Extra data sections follow the instruction stream
        const MORE_SECTS = 0x08;
        /// Call default constructor on all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of an extra data section (II.25.4.5)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Section contains exception-handling clauses
        const EHTABLE = 0x01;
        /// Section uses the fat clause layout
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}

bitflags! {
    /// Kind of an exception-handling clause (II.25.4.6)
    ///
    /// A typed catch clause carries no bits at all; use
    /// [`EhClauseFlags::is_typed_exception`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EhClauseFlags: u16 {
        /// Clause is entered through a filter
        const FILTER = 0x0001;
        /// Finally clause
        const FINALLY = 0x0002;
        /// Fault clause (finally that runs on exception only)
        const FAULT = 0x0004;
    }
}

impl EhClauseFlags {
    /// `true` for a typed exception (catch) clause.
    #[must_use]
    pub fn is_typed_exception(&self) -> bool {
        self.is_empty()
    }
}

/// One exception-handling clause in raw (byte offset) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EhClause {
    /// Clause kind
    pub flags: EhClauseFlags,
    /// Offset of the start of the protected region, in bytes from the start
    /// of the instruction stream
    pub try_offset: u32,
    /// Length of the protected region in bytes
    pub try_length: u32,
    /// Offset of the handler
    pub handler_offset: u32,
    /// Length of the handler in bytes
    pub handler_length: u32,
    /// Catch type token, or filter start offset, depending on kind
    pub class_token_or_filter: u32,
}

/// Decoded envelope of one raw method body.
pub struct BodyHeader {
    /// Size of the instruction stream (without header or sections) in bytes
    pub size_code: usize,
    /// Size of the header in bytes (1 for tiny, a multiple of 4 for fat)
    pub size_header: usize,
    /// Token of the local-variable signature, 0 if the method has no locals
    pub local_var_sig_token: u32,
    /// Maximum operand stack depth (8 implied for tiny bodies)
    pub max_stack: usize,
    /// Header format
    pub is_fat: bool,
    /// Zero-initialize locals
    pub is_init_local: bool,
    /// Exception-handling clauses, empty if none
    pub exception_handlers: Vec<EhClause>,
}

impl BodyHeader {
    /// Parses a raw method body envelope from `data`.
    ///
    /// # Errors
    /// Returns an error if the data is empty, truncated, or carries a header
    /// that is neither tiny nor fat.
    pub fn parse(data: &[u8]) -> Result<BodyHeader> {
        if data.is_empty() {
            return Err(crate::Error::Empty);
        }

        let first_byte = read_le::<u8>(data)?;
        match BodyFlags::from_bits_truncate(u16::from(first_byte & 0b0000_0011)) {
            BodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(BodyHeader {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: 8,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            BodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let flags = BodyFlags::from_bits_truncate(first_duo & 0x0FFF);

                let size_header = ((first_duo >> 12) * 4) as usize;
                let max_stack = read_le::<u16>(&data[2..])? as usize;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                let local_var_sig_token = read_le::<u32>(&data[8..])?;

                if size_header < 12 || data.len() < size_code + size_header {
                    return Err(OutOfBounds);
                }

                let mut exception_handlers = Vec::new();
                if flags.contains(BodyFlags::MORE_SECTS) {
                    // Sections start at the next 4-byte boundary after the code
                    let mut cursor = (size_header + size_code + 3) & !3;
                    parse_eh_sections(data, &mut cursor, &mut exception_handlers)?;
                }

                Ok(BodyHeader {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags.contains(BodyFlags::INIT_LOCALS),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "Body header is neither fat nor tiny - {:02X}",
                first_byte
            )),
        }
    }

    /// Full size of header plus instruction stream (without sections).
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// The instruction stream bytes within `data`.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if `data` is not the buffer this header was
    /// parsed from.
    pub fn code<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        if data.len() < self.size() {
            return Err(OutOfBounds);
        }

        Ok(&data[self.size_header..self.size()])
    }
}

fn parse_eh_sections(data: &[u8], cursor: &mut usize, out: &mut Vec<EhClause>) -> Result<()> {
    while data.len() > *cursor + 4 {
        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[*cursor..])?);
        if !section_flags.contains(SectionFlags::EHTABLE) {
            break;
        }

        if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let section_size = read_le::<u32>(&data[*cursor + 1..])? & 0x00FF_FFFF;
            if section_size < 4 || data.len() < *cursor + section_size as usize {
                break;
            }

            *cursor += 4;
            for _ in 0..(section_size - 4) / 24 {
                out.push(EhClause {
                    // The on-disk field is 4 bytes but only the low bits are
                    // meaningful
                    #[allow(clippy::cast_possible_truncation)]
                    flags: EhClauseFlags::from_bits_truncate(
                        read_le_at::<u32>(data, cursor)? as u16
                    ),
                    try_offset: read_le_at::<u32>(data, cursor)?,
                    try_length: read_le_at::<u32>(data, cursor)?,
                    handler_offset: read_le_at::<u32>(data, cursor)?,
                    handler_length: read_le_at::<u32>(data, cursor)?,
                    class_token_or_filter: read_le_at::<u32>(data, cursor)?,
                });
            }
        } else {
            let section_size = u32::from(read_le::<u8>(&data[*cursor + 1..])?);
            if section_size < 4 || data.len() < *cursor + section_size as usize {
                break;
            }

            *cursor += 4;
            for _ in 0..(section_size - 4) / 12 {
                out.push(EhClause {
                    flags: EhClauseFlags::from_bits_truncate(read_le_at::<u16>(data, cursor)?),
                    try_offset: u32::from(read_le_at::<u16>(data, cursor)?),
                    try_length: u32::from(read_le_at::<u8>(data, cursor)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, cursor)?),
                    handler_length: u32::from(read_le_at::<u8>(data, cursor)?),
                    class_token_or_filter: read_le_at::<u32>(data, cursor)?,
                });
            }
        }

        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
    }

    Ok(())
}

/// `true` if every clause fits the small section layout (II.25.4.6).
#[must_use]
pub fn clauses_fit_small_form(clauses: &[EhClause]) -> bool {
    // Small section size field is one byte: 4 + n * 12 <= 255
    if clauses.len() > 20 {
        return false;
    }

    clauses.iter().all(|clause| {
        clause.try_offset <= 0xFFFF
            && clause.try_length <= 0xFF
            && clause.handler_offset <= 0xFFFF
            && clause.handler_length <= 0xFF
    })
}

/// Emits the extra data section carrying `clauses`, choosing the small form
/// when every clause fits it.
#[must_use]
pub fn encode_eh_section(clauses: &[EhClause]) -> Vec<u8> {
    let mut out = Vec::new();
    if clauses.is_empty() {
        return out;
    }

    if clauses_fit_small_form(clauses) {
        let size = 4 + clauses.len() * 12;
        out.push(SectionFlags::EHTABLE.bits());
        #[allow(clippy::cast_possible_truncation)]
        out.push(size as u8);
        out.extend_from_slice(&[0, 0]);

        for clause in clauses {
            out.extend_from_slice(&clause.flags.bits().to_le_bytes());
            out.extend_from_slice(&(clause.try_offset as u16).to_le_bytes());
            out.push(clause.try_length as u8);
            out.extend_from_slice(&(clause.handler_offset as u16).to_le_bytes());
            out.push(clause.handler_length as u8);
            out.extend_from_slice(&clause.class_token_or_filter.to_le_bytes());
        }
    } else {
        let size = (4 + clauses.len() * 24) as u32;
        out.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
        out.extend_from_slice(&size.to_le_bytes()[..3]);

        for clause in clauses {
            out.extend_from_slice(&u32::from(clause.flags.bits()).to_le_bytes());
            out.extend_from_slice(&clause.try_offset.to_le_bytes());
            out.extend_from_slice(&clause.try_length.to_le_bytes());
            out.extend_from_slice(&clause.handler_offset.to_le_bytes());
            out.extend_from_slice(&clause.handler_length.to_le_bytes());
            out.extend_from_slice(&clause.class_token_or_filter.to_le_bytes());
        }
    }

    out
}

/// Emits a complete raw body for `code`, choosing the tiny header when the
/// constraints allow it.
///
/// # Errors
/// Returns [`crate::Error::SizeLimit`] if the instruction stream exceeds the
/// fat header's 32-bit code size field.
pub fn encode_body(
    code: &[u8],
    max_stack: usize,
    local_var_sig_token: u32,
    is_init_local: bool,
    clauses: &[EhClause],
) -> Result<Vec<u8>> {
    let tiny_eligible = code.len() < 64
        && max_stack <= 8
        && local_var_sig_token == 0
        && clauses.is_empty()
        && !is_init_local;

    if tiny_eligible {
        let mut out = Vec::with_capacity(1 + code.len());
        #[allow(clippy::cast_possible_truncation)]
        out.push(BodyFlags::TINY_FORMAT.bits() as u8 | ((code.len() as u8) << 2));
        out.extend_from_slice(code);
        return Ok(out);
    }

    let Ok(size_code) = u32::try_from(code.len()) else {
        return Err(crate::Error::SizeLimit(format!(
            "instruction stream of {} bytes exceeds the fat header code size",
            code.len()
        )));
    };

    let mut flags = BodyFlags::FAT_FORMAT;
    if is_init_local {
        flags |= BodyFlags::INIT_LOCALS;
    }
    if !clauses.is_empty() {
        flags |= BodyFlags::MORE_SECTS;
    }

    // Header size in the upper nibble, in 4-byte units (always 3)
    let first_duo = flags.bits() | (3u16 << 12);
    let max_stack = u16::try_from(max_stack).unwrap_or(u16::MAX);

    let mut out = Vec::with_capacity(12 + code.len());
    out.extend_from_slice(&first_duo.to_le_bytes());
    out.extend_from_slice(&max_stack.to_le_bytes());
    out.extend_from_slice(&size_code.to_le_bytes());
    out.extend_from_slice(&local_var_sig_token.to_le_bytes());
    out.extend_from_slice(code);

    if !clauses.is_empty() {
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&encode_eh_section(clauses));
    }

    Ok(out)
}
