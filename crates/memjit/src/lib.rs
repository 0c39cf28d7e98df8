//! Guest-memory-access code emission for a dynamic recompiler whose guest
//! is a big-endian, 32-bit-addressed CPU and whose host is x86-64.
//!
//! For every guest load or store the translator hands over an
//! [`AccessRequest`]; a pure decision function picks one of three
//! [`AccessStrategy`]s, and the [`BlockEmitter`] generates either a direct
//! access into the arena, a direct access registered with the
//! [`BackpatchRegistry`] for out-of-band fault recovery, or a runtime
//! address check branching between the direct access and a call into the
//! emulated-memory runtime.

#![forbid(unused_must_use)]
#![deny(clippy::undocumented_unsafe_blocks)]

mod access;
mod backpatch;
mod config;
mod emitter;
mod error;
mod mask;
mod runtime;
mod state;
mod strategy;


pub use memjit_assembler::amd64::{Reg, Xmm};

pub use crate::access::{AccessRequest, AccessWidth, AddressOperand, RegMask};
pub use crate::backpatch::{BackpatchRegistry, BackpatchTable};
pub use crate::config::Config;
pub use crate::emitter::{Arena, BlockEmitter, EmittedBlock, CALL_RESULT_REG, GUEST_STATE_REG, TMP_REG};
pub use crate::error::Error;
pub use crate::mask::{AddressMask, ARENA_OFFSET_MASK, EXTENDED_RAM_MASK, HW_ACCESS_MASK, MAIN_RAM_ALIAS_MASK};
pub use crate::runtime::{
    bind_reference_arena, reference_call_counts, reset_reference_call_counts, ReadFn, RuntimeFunctions, WriteFn,
};
pub use crate::state::{GuestContext, EXC_DATA_FAULT, FLAG_CARRY, FLAG_OVERFLOW};
pub use crate::strategy::AccessStrategy;
