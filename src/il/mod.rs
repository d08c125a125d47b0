//! CIL instruction streams: opcode tables, body envelopes, and editing.
//!
//! [`body`] decodes and re-emits the method body envelope (header plus
//! exception-handling sections), [`opcodes`] carries the static opcode
//! tables, and [`stream::InstructionStream`] is the editable in-memory form
//! the rewrite pass works on.

pub mod body;
pub mod opcodes;
pub mod stream;
