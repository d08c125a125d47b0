//! Editable view of a CIL instruction stream.
//!
//! [`InstructionStream`] decodes an instruction stream into a doubly linked
//! list of nodes held in an arena. Branch operands and exception-handler
//! bounds are resolved to [`NodeId`]s during parsing, so edits never
//! invalidate them: a branch keeps pointing at the same logical instruction
//! no matter how much code is inserted around it. Serialization assigns new
//! byte offsets, widens short-form branches whose displacement no longer
//! fits one signed byte, and maps handler bounds back to offsets.

use crate::{
    il::{
        body::{EhClause, EhClauseFlags},
        opcodes::{self, FlowKind, OperandKind, PREFIX_FE},
    },
    io::Parser,
    metadata::token::Token,
    Result,
};

/// Stable handle of one instruction inside an [`InstructionStream`].
///
/// Ids survive every edit; only the stream that produced an id may use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Inline operand of a decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Signed byte immediate
    Int8(i8),
    /// Unsigned byte immediate
    UInt8(u8),
    /// Unsigned 16-bit immediate
    UInt16(u16),
    /// Signed 32-bit immediate
    Int32(i32),
    /// Signed 64-bit immediate
    Int64(i64),
    /// 32-bit float immediate
    Float32(f32),
    /// 64-bit float immediate
    Float64(f64),
    /// Metadata token
    Token(Token),
    /// Branch target, resolved to a logical instruction
    Target(NodeId),
    /// `switch` jump table
    Switch(Vec<NodeId>),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// `0` for the one-byte page, [`PREFIX_FE`] for the extended page
    pub prefix: u8,
    /// Opcode value within its page
    pub opcode: u8,
    /// Inline operand
    pub operand: Operand,
}

impl Instruction {
    /// `ldstr` of a user-string token.
    #[must_use]
    pub fn load_string(token: Token) -> Self {
        Instruction {
            prefix: 0,
            opcode: opcodes::LDSTR,
            operand: Operand::Token(token),
        }
    }

    /// `call` of a method token.
    #[must_use]
    pub fn call(token: Token) -> Self {
        Instruction {
            prefix: 0,
            opcode: opcodes::CALL,
            operand: Operand::Token(token),
        }
    }

    /// `nop`.
    #[must_use]
    pub fn nop() -> Self {
        Instruction {
            prefix: 0,
            opcode: opcodes::NOP,
            operand: Operand::None,
        }
    }

    fn is_short_branch(&self) -> bool {
        self.prefix == 0 && opcodes::long_branch_form(self.opcode).is_some()
    }
}

/// Exception-handling clause with bounds resolved to logical instructions.
#[derive(Debug, Clone)]
pub struct Handler {
    /// Clause kind
    pub flags: EhClauseFlags,
    /// First instruction of the protected region
    pub try_start: NodeId,
    /// First instruction after the protected region
    pub try_end: NodeId,
    /// First instruction of the handler
    pub handler_start: NodeId,
    /// First instruction after the handler
    pub handler_end: NodeId,
    /// First instruction of the filter, for filter clauses
    pub filter_start: Option<NodeId>,
    /// Catch type token for typed clauses, 0 otherwise
    pub class_token: u32,
}

struct Node {
    instr: Instruction,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Result of serializing a stream: instruction bytes plus remapped clauses.
pub struct Serialized {
    /// Encoded instruction stream
    pub code: Vec<u8>,
    /// Exception-handling clauses in raw offset form
    pub handlers: Vec<EhClause>,
}

/// An editable instruction stream.
pub struct InstructionStream {
    nodes: Vec<Node>,
    head: NodeId,
    /// Sentinel one past the last instruction; valid branch and clause
    /// bound, never emitted.
    end: NodeId,
    handlers: Vec<Handler>,
}

impl InstructionStream {
    /// Decodes `code` into an editable stream, resolving branch operands and
    /// the bounds of `clauses` to logical instructions.
    ///
    /// # Errors
    /// Returns an error on reserved or unknown opcodes, truncated operands,
    /// or targets that do not land on an instruction boundary.
    pub fn parse(code: &[u8], clauses: &[EhClause]) -> Result<InstructionStream> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut boundaries: Vec<(usize, NodeId)> = Vec::new();
        // (node, absolute target offset), resolved after the first pass
        let mut pending_targets: Vec<(NodeId, i64)> = Vec::new();
        let mut pending_switches: Vec<(NodeId, Vec<i64>)> = Vec::new();

        let mut parser = Parser::new(code);
        while parser.has_more_data() {
            let offset = parser.pos();
            let mut first = parser.read_le::<u8>()?;
            let prefix = if first == PREFIX_FE {
                first = parser.read_le::<u8>()?;
                PREFIX_FE
            } else {
                0
            };

            let Some(spec) = opcodes::lookup(prefix, first) else {
                return Err(malformed_error!(
                    "Unknown opcode {:02X} {:02X} at offset {}",
                    prefix,
                    first,
                    offset
                ));
            };

            let id = NodeId(nodes.len());
            let operand = match spec.operand {
                OperandKind::None => Operand::None,
                OperandKind::Int8 => {
                    let value = parser.read_le::<i8>()?;
                    if is_branch(spec.flow) {
                        let base = parser.pos() as i64;
                        pending_targets.push((id, base + i64::from(value)));
                        Operand::Target(NodeId(usize::MAX))
                    } else {
                        Operand::Int8(value)
                    }
                }
                OperandKind::UInt8 => Operand::UInt8(parser.read_le::<u8>()?),
                OperandKind::UInt16 => Operand::UInt16(parser.read_le::<u16>()?),
                OperandKind::Int32 => {
                    let value = parser.read_le::<i32>()?;
                    if is_branch(spec.flow) {
                        let base = parser.pos() as i64;
                        pending_targets.push((id, base + i64::from(value)));
                        Operand::Target(NodeId(usize::MAX))
                    } else {
                        Operand::Int32(value)
                    }
                }
                OperandKind::Int64 => Operand::Int64(parser.read_le::<i64>()?),
                OperandKind::Float32 => Operand::Float32(f32::from_bits(parser.read_le::<u32>()?)),
                OperandKind::Float64 => Operand::Float64(f64::from_bits(parser.read_le::<u64>()?)),
                OperandKind::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
                OperandKind::Switch => {
                    let count = parser.read_le::<u32>()? as usize;
                    let mut raw = Vec::with_capacity(count);
                    for _ in 0..count {
                        raw.push(i64::from(parser.read_le::<i32>()?));
                    }
                    let base = parser.pos() as i64;
                    pending_switches.push((id, raw.iter().map(|d| base + d).collect()));
                    Operand::Switch(Vec::new())
                }
            };

            let prev = if nodes.is_empty() {
                None
            } else {
                Some(NodeId(nodes.len() - 1))
            };
            nodes.push(Node {
                instr: Instruction {
                    prefix,
                    opcode: first,
                    operand,
                },
                prev,
                next: Some(NodeId(nodes.len() + 1)),
            });
            boundaries.push((offset, id));
        }

        let end = NodeId(nodes.len());
        let prev = if nodes.is_empty() {
            None
        } else {
            Some(NodeId(nodes.len() - 1))
        };
        nodes.push(Node {
            instr: Instruction::nop(),
            prev,
            next: None,
        });
        boundaries.push((code.len(), end));
        let head = NodeId(0);

        let resolve = |offset: i64| -> Result<NodeId> {
            if offset < 0 {
                return Err(malformed_error!("Branch target {} before method start", offset));
            }
            match boundaries.binary_search_by_key(&(offset as usize), |entry| entry.0) {
                Ok(index) => Ok(boundaries[index].1),
                Err(_) => Err(malformed_error!(
                    "Target offset {} is not an instruction boundary",
                    offset
                )),
            }
        };

        for (id, target) in pending_targets {
            nodes[id.0].instr.operand = Operand::Target(resolve(target)?);
        }
        for (id, targets) in pending_switches {
            let resolved = targets
                .into_iter()
                .map(&resolve)
                .collect::<Result<Vec<_>>>()?;
            nodes[id.0].instr.operand = Operand::Switch(resolved);
        }

        let mut handlers = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let filter_start = if clause.flags.contains(EhClauseFlags::FILTER) {
                Some(resolve(i64::from(clause.class_token_or_filter))?)
            } else {
                None
            };
            handlers.push(Handler {
                flags: clause.flags,
                try_start: resolve(i64::from(clause.try_offset))?,
                try_end: resolve(i64::from(clause.try_offset) + i64::from(clause.try_length))?,
                handler_start: resolve(i64::from(clause.handler_offset))?,
                handler_end: resolve(
                    i64::from(clause.handler_offset) + i64::from(clause.handler_length),
                )?,
                filter_start,
                class_token: if filter_start.is_some() {
                    0
                } else {
                    clause.class_token_or_filter
                },
            });
        }

        Ok(InstructionStream {
            nodes,
            head,
            end,
            handlers,
        })
    }

    /// First instruction of the stream.
    ///
    /// `None` only for an empty stream.
    #[must_use]
    pub fn first(&self) -> Option<NodeId> {
        if self.head == self.end {
            None
        } else {
            Some(self.head)
        }
    }

    /// Number of instructions currently in the stream.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.iter().count()
    }

    /// The instruction behind `id`.
    #[must_use]
    pub fn instruction(&self, id: NodeId) -> &Instruction {
        &self.nodes[id.0].instr
    }

    /// Iterates the instructions in stream order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Instruction)> {
        let mut cursor = Some(self.head);
        std::iter::from_fn(move || {
            let id = cursor?;
            if id == self.end {
                return None;
            }
            cursor = self.nodes[id.0].next;
            Some((id, &self.nodes[id.0].instr))
        })
    }

    /// Inserts `instr` immediately before `before`, in constant time.
    ///
    /// Branches and handler bounds that refer to `before` are unaffected and
    /// will transfer control to `before`, not to the inserted instruction.
    pub fn insert_before(&mut self, before: NodeId, instr: Instruction) -> NodeId {
        let id = NodeId(self.nodes.len());
        let prev = self.nodes[before.0].prev;
        self.nodes.push(Node {
            instr,
            prev,
            next: Some(before),
        });

        self.nodes[before.0].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.0].next = Some(id),
            None => self.head = id,
        }

        id
    }

    /// Inserts `instr` immediately after `after`, in constant time.
    pub fn insert_after(&mut self, after: NodeId, instr: Instruction) -> NodeId {
        let id = NodeId(self.nodes.len());
        let next = self.nodes[after.0].next;
        self.nodes.push(Node {
            instr,
            prev: Some(after),
            next,
        });

        self.nodes[after.0].next = Some(id);
        if let Some(next) = next {
            self.nodes[next.0].prev = Some(id);
        }

        id
    }

    /// Encodes the stream back into bytes.
    ///
    /// Offsets are assigned fresh. Short-form branches whose displacement no
    /// longer fits one signed byte are widened to their four-byte form, to a
    /// fixed point since each widening can push another displacement over
    /// the limit.
    ///
    /// # Errors
    /// Returns an error if a handler bound cannot be represented, which only
    /// happens when the stream exceeds 4 GiB.
    pub fn serialize(&self) -> Result<Serialized> {
        let order: Vec<NodeId> = {
            let mut order = Vec::with_capacity(self.nodes.len());
            let mut cursor = Some(self.head);
            while let Some(id) = cursor {
                if id == self.end {
                    break;
                }
                order.push(id);
                cursor = self.nodes[id.0].next;
            }
            order
        };

        // Widening state per node, keyed by arena index
        let mut widened = vec![false; self.nodes.len()];
        let mut offsets = vec![0usize; self.nodes.len()];

        loop {
            let mut offset = 0;
            for &id in &order {
                offsets[id.0] = offset;
                offset += self.encoded_size(id, widened[id.0]);
            }
            offsets[self.end.0] = offset;

            let mut changed = false;
            for &id in &order {
                let instr = &self.nodes[id.0].instr;
                if !instr.is_short_branch() || widened[id.0] {
                    continue;
                }
                let Operand::Target(target) = &instr.operand else {
                    continue;
                };

                let next = offsets[id.0] + self.encoded_size(id, false);
                let displacement = offsets[target.0] as i64 - next as i64;
                if i8::try_from(displacement).is_err() {
                    widened[id.0] = true;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        let mut code = Vec::with_capacity(offsets[self.end.0]);
        for &id in &order {
            let instr = &self.nodes[id.0].instr;
            let wide = widened[id.0];

            let opcode = if wide {
                // lookup succeeded during parse, the short form exists
                opcodes::long_branch_form(instr.opcode).unwrap_or(instr.opcode)
            } else {
                instr.opcode
            };
            if instr.prefix != 0 {
                code.push(instr.prefix);
            }
            code.push(opcode);

            match &instr.operand {
                Operand::None => {}
                Operand::Int8(value) => code.push(*value as u8),
                Operand::UInt8(value) => code.push(*value),
                Operand::UInt16(value) => code.extend_from_slice(&value.to_le_bytes()),
                Operand::Int32(value) => code.extend_from_slice(&value.to_le_bytes()),
                Operand::Int64(value) => code.extend_from_slice(&value.to_le_bytes()),
                Operand::Float32(value) => code.extend_from_slice(&value.to_bits().to_le_bytes()),
                Operand::Float64(value) => code.extend_from_slice(&value.to_bits().to_le_bytes()),
                Operand::Token(token) => code.extend_from_slice(&token.value().to_le_bytes()),
                Operand::Target(target) => {
                    let next = offsets[id.0] + self.encoded_size(id, wide);
                    let displacement = offsets[target.0] as i64 - next as i64;
                    if wide || !instr.is_short_branch() {
                        let Ok(displacement) = i32::try_from(displacement) else {
                            return Err(crate::Error::SizeLimit(
                                "branch displacement exceeds 32 bits".to_string(),
                            ));
                        };
                        code.extend_from_slice(&displacement.to_le_bytes());
                    } else {
                        // fixed point above guarantees the fit
                        #[allow(clippy::cast_possible_truncation)]
                        code.push(displacement as i8 as u8);
                    }
                }
                Operand::Switch(targets) => {
                    let Ok(count) = u32::try_from(targets.len()) else {
                        return Err(crate::Error::SizeLimit(
                            "switch table exceeds 32-bit count".to_string(),
                        ));
                    };
                    code.extend_from_slice(&count.to_le_bytes());
                    let next = offsets[id.0] + self.encoded_size(id, wide);
                    for target in targets {
                        let Ok(displacement) =
                            i32::try_from(offsets[target.0] as i64 - next as i64)
                        else {
                            return Err(crate::Error::SizeLimit(
                                "switch displacement exceeds 32 bits".to_string(),
                            ));
                        };
                        code.extend_from_slice(&displacement.to_le_bytes());
                    }
                }
            }
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            let offset_of = |id: NodeId| -> Result<u32> {
                u32::try_from(offsets[id.0]).map_err(|_| {
                    crate::Error::SizeLimit("handler bound exceeds 32 bits".to_string())
                })
            };

            let try_offset = offset_of(handler.try_start)?;
            let handler_offset = offset_of(handler.handler_start)?;
            handlers.push(EhClause {
                flags: handler.flags,
                try_offset,
                try_length: offset_of(handler.try_end)? - try_offset,
                handler_offset,
                handler_length: offset_of(handler.handler_end)? - handler_offset,
                class_token_or_filter: match handler.filter_start {
                    Some(filter) => offset_of(filter)?,
                    None => handler.class_token,
                },
            });
        }

        Ok(Serialized { code, handlers })
    }

    fn encoded_size(&self, id: NodeId, widened: bool) -> usize {
        let instr = &self.nodes[id.0].instr;
        let opcode_size = if instr.prefix == 0 { 1 } else { 2 };
        let operand_size = match &instr.operand {
            Operand::None => 0,
            Operand::Int8(_) | Operand::UInt8(_) => 1,
            Operand::UInt16(_) => 2,
            Operand::Int32(_) | Operand::Float32(_) | Operand::Token(_) => 4,
            Operand::Int64(_) | Operand::Float64(_) => 8,
            Operand::Target(_) => {
                if instr.is_short_branch() && !widened {
                    1
                } else {
                    4
                }
            }
            Operand::Switch(targets) => 4 + 4 * targets.len(),
        };

        opcode_size + operand_size
    }
}

fn is_branch(flow: FlowKind) -> bool {
    matches!(
        flow,
        FlowKind::UnconditionalBranch | FlowKind::ConditionalBranch
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::opcodes::{BR, BR_S, CALL, LDSTR, NOP, RET};

    #[test]
    fn parse_simple_stream() {
        // ldstr 0x70000001; call 0x0A000002; ret
        let code = [
            LDSTR, 0x01, 0x00, 0x00, 0x70, CALL, 0x02, 0x00, 0x00, 0x0A, RET,
        ];
        let stream = InstructionStream::parse(&code, &[]).unwrap();
        assert_eq!(stream.instruction_count(), 3);

        let first = stream.first().unwrap();
        assert_eq!(
            stream.instruction(first).operand,
            Operand::Token(Token::new(0x7000_0001))
        );
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert!(InstructionStream::parse(&[0x24], &[]).is_err());
        assert!(InstructionStream::parse(&[0xFE, 0x08], &[]).is_err());
    }

    #[test]
    fn truncated_operand_rejected() {
        assert!(InstructionStream::parse(&[LDSTR, 0x01], &[]).is_err());
    }

    #[test]
    fn misaligned_branch_target_rejected() {
        // br.s into the middle of the ldstr operand
        let code = [BR_S, 0x01, LDSTR, 0x01, 0x00, 0x00, 0x70, RET];
        assert!(InstructionStream::parse(&code, &[]).is_err());
    }

    #[test]
    fn branch_survives_prefix_insertion() {
        // br.s over one nop to ret
        let code = [BR_S, 0x01, NOP, RET];
        let mut stream = InstructionStream::parse(&code, &[]).unwrap();

        let first = stream.first().unwrap();
        stream.insert_before(first, Instruction::load_string(Token::new(0x7000_0001)));
        stream.insert_before(first, Instruction::call(Token::new(0x0A00_0001)));

        let out = stream.serialize().unwrap();
        // 5 (ldstr) + 5 (call) + 2 (br.s) + 1 (nop) + 1 (ret)
        assert_eq!(out.code.len(), 14);
        // branch still skips the nop and lands on ret
        assert_eq!(out.code[10], BR_S);
        assert_eq!(out.code[11] as i8, 1);
        assert_eq!(out.code[13], RET);
    }

    #[test]
    fn insert_after_links_between_nodes() {
        let code = [NOP, RET];
        let mut stream = InstructionStream::parse(&code, &[]).unwrap();

        let first = stream.first().unwrap();
        stream.insert_after(first, Instruction::call(Token::new(0x0A00_0001)));

        let out = stream.serialize().unwrap();
        assert_eq!(out.code[0], NOP);
        assert_eq!(out.code[1], CALL);
        assert_eq!(*out.code.last().unwrap(), RET);
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let code = [
            NOP, LDSTR, 0x01, 0x00, 0x00, 0x70, CALL, 0x02, 0x00, 0x00, 0x0A, BR_S, 0x00, RET,
        ];
        let stream = InstructionStream::parse(&code, &[]).unwrap();
        let out = stream.serialize().unwrap();
        assert_eq!(out.code, code);
    }

    #[test]
    fn short_branch_widens_when_displacement_grows() {
        // br.s over 125 nops to ret, then grow the gap past the i8 range
        let mut code = vec![BR_S, 0x7D];
        code.extend_from_slice(&[NOP; 125]);
        code.push(RET);
        let mut stream = InstructionStream::parse(&code, &[]).unwrap();

        let ret_id = stream
            .iter()
            .find(|(_, instr)| instr.opcode == RET)
            .map(|(id, _)| id)
            .unwrap();
        for _ in 0..5 {
            stream.insert_before(ret_id, Instruction::nop());
        }

        let out = stream.serialize().unwrap();
        assert_eq!(out.code[0], BR);
        let displacement = i32::from_le_bytes(out.code[1..5].try_into().unwrap());
        assert_eq!(displacement, 130);
        // 5 (br) + 130 nops + ret
        assert_eq!(out.code.len(), 136);
        assert_eq!(*out.code.last().unwrap(), RET);
    }

    #[test]
    fn switch_targets_remap() {
        // switch [+1, +2] over two nops, then nop nop ret
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, NOP,
            NOP, NOP, RET,
        ];
        let mut stream = InstructionStream::parse(&code, &[]).unwrap();

        let first = stream.first().unwrap();
        stream.insert_before(first, Instruction::nop());

        let out = stream.serialize().unwrap();
        // displacements are relative, unchanged by a prefix insertion
        assert_eq!(out.code[0], NOP);
        assert_eq!(&out.code[1..14], &code[..13]);
    }

    #[test]
    fn handler_bounds_shift_with_insertion() {
        let code = [NOP, NOP, NOP, NOP, RET];
        let clauses = [EhClause {
            flags: EhClauseFlags::FINALLY,
            try_offset: 1,
            try_length: 2,
            handler_offset: 3,
            handler_length: 1,
            class_token_or_filter: 0,
        }];
        let mut stream = InstructionStream::parse(&code, &clauses).unwrap();

        let first = stream.first().unwrap();
        stream.insert_before(first, Instruction::load_string(Token::new(0x7000_0001)));

        let out = stream.serialize().unwrap();
        assert_eq!(out.handlers.len(), 1);
        assert_eq!(out.handlers[0].try_offset, 6);
        assert_eq!(out.handlers[0].try_length, 2);
        assert_eq!(out.handlers[0].handler_offset, 8);
        assert_eq!(out.handlers[0].handler_length, 1);
    }

    #[test]
    fn empty_stream_round_trips() {
        let stream = InstructionStream::parse(&[], &[]).unwrap();
        assert!(stream.first().is_none());
        assert!(stream.serialize().unwrap().code.is_empty());
    }
}
