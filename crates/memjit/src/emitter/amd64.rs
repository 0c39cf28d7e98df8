use memjit_assembler::amd64::inst::*;
use memjit_assembler::amd64::{Condition, LoadKind, Reg, RegSize, StoreKind, Xmm};
use memjit_assembler::{Instruction, Label};

use crate::access::{AccessRequest, AccessWidth, AddressOperand, RegMask};
use crate::emitter::BlockEmitter;
use crate::mask::ARENA_OFFSET_MASK;
use crate::state::{GuestContext, EXC_DATA_FAULT, FLAG_CARRY, FLAG_OVERFLOW};

/// Scratch register for address materialization and call targets. Stores
/// may not use it as their value register.
pub const TMP_REG: Reg = Reg::rcx;

/// The register runtime calls return their result in; also the address
/// scratch of guarded loads. Never preserved across an access.
pub const CALL_RESULT_REG: Reg = Reg::rax;

/// The pinned register holding the address of the [`GuestContext`].
pub const GUEST_STATE_REG: Reg = Reg::r14;

/// Constant offsets at least this large are folded into the address with a
/// 32-bit `lea` instead of being encoded as a displacement, so an offset
/// with the wrong sign can't carry the effective address past the edge of
/// the arena. This is a heuristic against likely-wrong-sign offsets, not a
/// bounds check; mirroring the first guest page at the end of the arena
/// would be the strict fix.
const LARGE_OFFSET_THRESHOLD: u32 = 0x1000;

enum SlowCallAddress {
    Immediate(u32),
    Register(Reg),
}

impl BlockEmitter {
    fn push(&mut self, instruction: impl Instruction) {
        self.asm.push(instruction);
    }

    /// Emits a raw arena load. Returns the offset of the accessing
    /// instruction, which is always the zero-extending load itself; the
    /// conversion code behind it never faults.
    pub(crate) fn fast_load(&mut self, request: &AccessRequest) -> u32 {
        let dst = request.value_reg;
        let arena_reg = self.arena.base_reg();

        let (index_reg, offset) = match request.address {
            AddressOperand::Register(reg) => {
                if request.offset as u32 >= LARGE_OFFSET_THRESHOLD {
                    self.push(lea32(dst, reg, request.offset));
                    (dst, 0)
                } else {
                    (reg, request.offset)
                }
            }
            AddressOperand::Immediate(immediate) => {
                self.push(load32_imm(dst, immediate.wrapping_add(request.offset as u32)));
                (dst, 0)
            }
        };

        let kind = match request.width {
            AccessWidth::U8 => LoadKind::U8,
            AccessWidth::U16 => LoadKind::U16,
            AccessWidth::U32 => LoadKind::U32,
        };

        let site = self.asm.len() as u32;
        self.push(load_indexed(kind, dst, arena_reg, index_reg, offset));

        // Keep the patch site at least as long as the widest form the
        // fault handler rewrites it into.
        if request.width == AccessWidth::U8 {
            self.push(nop2());
        }

        match request.width {
            AccessWidth::U32 => {
                if request.swap {
                    self.push(bswap(dst));
                }
            }
            AccessWidth::U16 => {
                if request.swap {
                    self.push(bswap(dst));
                    if request.sign_extend {
                        self.push(sar_imm(dst, 16));
                    } else {
                        self.push(shr_imm(dst, 16));
                    }
                } else if request.sign_extend {
                    self.push(movsx16(dst, dst));
                }
            }
            AccessWidth::U8 => {
                if request.sign_extend {
                    self.push(movsx8(dst, dst));
                }
            }
        }

        site
    }

    /// Emits a raw arena store; same patch-site contract as [`Self::fast_load`].
    pub(crate) fn fast_store(&mut self, request: &AccessRequest) -> u32 {
        let src = request.value_reg;
        let arena_reg = self.arena.base_reg();

        if request.swap {
            match request.width {
                AccessWidth::U32 => self.push(bswap(src)),
                AccessWidth::U16 => self.push(ror16_imm(src, 8)),
                AccessWidth::U8 => {}
            }
        }

        let (index_reg, offset) = match request.address {
            AddressOperand::Register(reg) => {
                if request.offset as u32 >= LARGE_OFFSET_THRESHOLD {
                    self.push(lea32(TMP_REG, reg, request.offset));
                    (TMP_REG, 0)
                } else {
                    (reg, request.offset)
                }
            }
            AddressOperand::Immediate(immediate) => {
                self.push(load32_imm(TMP_REG, immediate.wrapping_add(request.offset as u32)));
                (TMP_REG, 0)
            }
        };

        let kind = match request.width {
            AccessWidth::U8 => StoreKind::U8,
            AccessWidth::U16 => StoreKind::U16,
            AccessWidth::U32 => StoreKind::U32,
        };

        let site = self.asm.len() as u32;
        self.push(store_indexed(kind, arena_reg, index_reg, offset, src));

        if request.width == AccessWidth::U8 {
            self.push(nop());
            self.push(nop());
        }

        site
    }

    pub(crate) fn guarded_load(&mut self, request: &AccessRequest, live_regs: RegMask) {
        match request.address {
            AddressOperand::Immediate(immediate) => {
                // Known unsafe at translation time; the fast arm is elided.
                let address = immediate.wrapping_add(request.offset as u32);
                self.slow_read_call(request, SlowCallAddress::Immediate(address), live_regs);
            }
            AddressOperand::Register(reg) => {
                let address_reg = if request.offset != 0 {
                    self.push(mov(RegSize::R32, CALL_RESULT_REG, reg));
                    self.push(add_imm(RegSize::R32, CALL_RESULT_REG, request.offset));
                    CALL_RESULT_REG
                } else {
                    reg
                };

                self.push(test_imm(address_reg, self.mask.bits() as i32));
                let fast = self.asm.forward_declare_label();
                let exit = self.asm.forward_declare_label();
                self.push(jcc_label32(Condition::Equal, fast));

                self.slow_read_call(request, SlowCallAddress::Register(address_reg), live_regs);
                self.push(jmp_label8(exit));

                self.asm.define_label(fast);
                let fast_request = AccessRequest {
                    address: AddressOperand::Register(address_reg),
                    offset: 0,
                    ..*request
                };
                self.fast_load(&fast_request);
                self.asm.define_label(exit);
            }
        }
    }

    /// Destroys the address register: the constant offset is folded into it
    /// before the mask test.
    pub(crate) fn guarded_store(&mut self, request: &AccessRequest, live_regs: RegMask) {
        match request.address {
            AddressOperand::Immediate(immediate) => {
                let address = immediate.wrapping_add(request.offset as u32);
                self.slow_write_call(request, SlowCallAddress::Immediate(address), live_regs);
            }
            AddressOperand::Register(reg) => {
                if request.offset != 0 {
                    self.push(add_imm(RegSize::R32, reg, request.offset));
                }

                self.push(test_imm(reg, self.mask.bits() as i32));
                let fast = self.asm.forward_declare_label();
                let exit = self.asm.forward_declare_label();
                self.push(jcc_label32(Condition::Equal, fast));

                self.slow_write_call(request, SlowCallAddress::Register(reg), live_regs);
                self.push(jmp_label8(exit));

                self.asm.define_label(fast);
                let fast_request = AccessRequest {
                    address: AddressOperand::Register(reg),
                    offset: 0,
                    ..*request
                };
                self.fast_store(&fast_request);
                self.asm.define_label(exit);
            }
        }
    }

    fn slow_read_call(&mut self, request: &AccessRequest, address: SlowCallAddress, live_regs: RegMask) {
        let dst = request.value_reg;

        self.push_live_registers(live_regs);
        match address {
            SlowCallAddress::Immediate(address) => self.push(load32_imm(Reg::rdi, address)),
            SlowCallAddress::Register(reg) => {
                self.push(push(reg));
                self.push(pop(Reg::rdi));
            }
        }

        self.push(load64_imm(TMP_REG, self.runtime.read_address(request.width)));
        self.push(call_reg(TMP_REG));
        self.pop_live_registers(live_regs);

        let skip = self.memcheck_skip_begin();
        if request.sign_extend && request.width != AccessWidth::U32 {
            // The runtime read contract is zero-extending.
            match request.width {
                AccessWidth::U8 => self.push(movsx8(dst, CALL_RESULT_REG)),
                AccessWidth::U16 => self.push(movsx16(dst, CALL_RESULT_REG)),
                AccessWidth::U32 => unreachable!(),
            }
        } else if dst != CALL_RESULT_REG {
            match request.width {
                AccessWidth::U8 => self.push(movzx8(dst, CALL_RESULT_REG)),
                AccessWidth::U16 => self.push(movzx16(dst, CALL_RESULT_REG)),
                AccessWidth::U32 => self.push(mov(RegSize::R32, dst, CALL_RESULT_REG)),
            }
        }
        self.memcheck_skip_end(skip);
    }

    fn slow_write_call(&mut self, request: &AccessRequest, address: SlowCallAddress, live_regs: RegMask) {
        self.push_live_registers(live_regs);
        match address {
            SlowCallAddress::Register(reg) => {
                self.push(push(request.value_reg));
                self.push(push(reg));
                self.push(pop(Reg::rsi));
                self.push(pop(Reg::rdi));
            }
            SlowCallAddress::Immediate(address) => {
                self.push(push(request.value_reg));
                self.push(pop(Reg::rdi));
                self.push(load32_imm(Reg::rsi, address));
            }
        }

        self.push(load64_imm(TMP_REG, self.runtime.write_address(request.width, request.swap)));
        self.push(call_reg(TMP_REG));
        self.pop_live_registers(live_regs);
    }

    fn push_live_registers(&mut self, live_regs: RegMask) {
        for reg in live_regs.iter() {
            self.push(push(reg));
        }

        // Call sites must see a 16-byte aligned stack.
        if live_regs.len() % 2 == 1 {
            self.push(sub_imm(RegSize::R64, Reg::rsp, 8));
        }
    }

    fn pop_live_registers(&mut self, live_regs: RegMask) {
        if live_regs.len() % 2 == 1 {
            self.push(add_imm(RegSize::R64, Reg::rsp, 8));
        }

        for reg in live_regs.iter().rev() {
            self.push(pop(reg));
        }
    }

    /// When mem-check is on, the result conversion of a slow-path call must
    /// be skipped if the call left a data fault pending: the access never
    /// architecturally happened. Entry and exit bracket exactly the
    /// conversion code, not the call.
    fn memcheck_skip_begin(&mut self) -> Option<Label> {
        if !self.config.mem_check {
            return None;
        }

        self.push(test32_indirect_imm(
            GUEST_STATE_REG,
            GuestContext::exceptions_offset(),
            EXC_DATA_FAULT,
        ));
        let skip = self.asm.forward_declare_label();
        self.push(jcc_label8(Condition::NotEqual, skip));
        Some(skip)
    }

    fn memcheck_skip_end(&mut self, skip: Option<Label>) {
        if let Some(label) = skip {
            self.asm.define_label(label);
        }
    }

    pub(crate) fn stamp_guest_pc(&mut self) {
        self.push(store32_indirect_imm(
            GUEST_STATE_REG,
            GuestContext::pc_offset(),
            self.current_pc,
        ));
    }

    /// Writes through the arena at a translation-time-known in-RAM address,
    /// with no check and no byte-order conversion: the value must already
    /// be in guest byte order.
    pub fn store_to_known_ram(&mut self, width: AccessWidth, src: Reg, guest_address: u32) {
        let offset = guest_address & ARENA_OFFSET_MASK;
        assert!(
            offset < self.arena.size(),
            "0x{guest_address:08x} is outside the mapped arena"
        );
        assert!(src != TMP_REG, "{TMP_REG} is the store scratch register");

        let kind = match width {
            AccessWidth::U8 => StoreKind::U8,
            AccessWidth::U16 => StoreKind::U16,
            AccessWidth::U32 => StoreKind::U32,
        };

        self.push(load32_imm(TMP_REG, offset));
        self.push(store_indexed(kind, self.arena.base_reg(), TMP_REG, 0, src));
    }

    /// Stores a single-precision float through the integer store path. The
    /// value's bits are moved into [`CALL_RESULT_REG`] first; that register
    /// does not survive.
    pub fn store_float_from(&mut self, value: Xmm, address_reg: Reg, live_regs: RegMask) {
        self.push(movd_to_gpr(CALL_RESULT_REG, value));
        let request = AccessRequest::new(
            CALL_RESULT_REG,
            AddressOperand::Register(address_reg),
            AccessWidth::U32,
        )
        .with_live_regs(live_regs);
        self.store_from(&request);
    }

    /// Narrows a double to single precision and back, reproducing the guest
    /// FPU's single-precision rounding. A no-op unless the configuration
    /// asks for it. Most guests don't need this, but some get stuck without it.
    pub fn force_single_precision(&mut self, reg: Xmm) {
        if self.config.accurate_single_precision {
            self.push(cvtsd2ss(reg, reg));
            self.push(cvtss2sd(reg, reg));
        }
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        let offset = GuestContext::flags_offset();
        if value {
            self.push(or32_indirect_imm(GUEST_STATE_REG, offset, FLAG_CARRY));
        } else {
            self.push(and32_indirect_imm(GUEST_STATE_REG, offset, !FLAG_CARRY));
        }
    }

    pub fn clear_carry_and_overflow(&mut self, include_overflow: bool) {
        let offset = GuestContext::flags_offset();
        if include_overflow {
            self.push(and32_indirect_imm(GUEST_STATE_REG, offset, !(FLAG_CARRY | FLAG_OVERFLOW)));
        } else {
            self.push(and32_indirect_imm(GUEST_STATE_REG, offset, !FLAG_CARRY));
        }
    }
}
