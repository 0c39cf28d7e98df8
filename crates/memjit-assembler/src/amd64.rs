#![allow(non_camel_case_types)]

use crate::assembler::{EncInst, Label};

/// The REX prefix.
const REX: u8 = 0x40;
const REX_64B_OP: u8 = REX | (1 << 3);
const REX_EXT_MODRM_REG: u8 = REX | (1 << 2);
const REX_EXT_SIB_INDEX: u8 = REX | (1 << 1);
const REX_EXT_MODRM_RM: u8 = REX | (1 << 0);

const PREFIX_OVERRIDE_OP_SIZE: u8 = 0x66;
const PREFIX_OVERRIDE_ADDR_SIZE: u8 = 0x67;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Reg {
    rax = 0,
    rcx = 1,
    rdx = 2,
    rbx = 3,
    rsp = 4,
    rbp = 5,
    rsi = 6,
    rdi = 7,
    r8 = 8,
    r9 = 9,
    r10 = 10,
    r11 = 11,
    r12 = 12,
    r13 = 13,
    r14 = 14,
    r15 = 15,
}

impl Reg {
    pub const ALL: [Reg; 16] = {
        use Reg::*;
        [rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15]
    };

    pub const fn is_reg_preserved(self) -> bool {
        // See page 23 from: https://raw.githubusercontent.com/wiki/hjl-tools/x86-psABI/x86-64-psABI-1.0.pdf
        use Reg::*;
        match self {
            rbx | rsp | rbp | r12 | r13 | r14 | r15 => true,
            rax | rcx | rdx | rsi | rdi | r8 | r9 | r10 | r11 => false,
        }
    }

    pub const fn needs_rex(self) -> bool {
        self as usize >= Reg::r8 as usize
    }

    pub const fn modrm_rm_bits(self) -> u8 {
        (self as usize & 0b111) as u8
    }

    pub const fn modrm_reg_bits(self) -> u8 {
        (((self as usize) << 3) & 0b111000) as u8
    }

    pub const fn rex_bit(self) -> u8 {
        if self as usize >= Reg::r8 as usize {
            REX_EXT_MODRM_RM & !REX
        } else {
            0
        }
    }

    const fn needs_plain_rex_as_byte(self) -> bool {
        // Without a REX prefix the low-byte forms of these encode ah/ch/dh/bh.
        matches!(self, Reg::rsp | Reg::rbp | Reg::rsi | Reg::rdi)
    }

    pub const fn name_from(self, size: RegSize) -> &'static str {
        match size {
            RegSize::R64 => self.name(),
            RegSize::R32 => self.name32(),
        }
    }
}

impl core::fmt::Display for Reg {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        fmt.write_str(self.name())
    }
}

macro_rules! impl_regs {
    ($(($r64:ident, $r32:ident, $r16:ident, $r8:ident)),+) => {
        impl Reg {
            pub const fn name(self) -> &'static str {
                match self {
                    $(
                        Reg::$r64 => stringify!($r64),
                    )+
                }
            }

            pub const fn name32(self) -> &'static str {
                match self {
                    $(
                        Reg::$r64 => stringify!($r32),
                    )+
                }
            }

            pub const fn name16(self) -> &'static str {
                match self {
                    $(
                        Reg::$r64 => stringify!($r16),
                    )+
                }
            }

            pub const fn name8(self) -> &'static str {
                match self {
                    $(
                        Reg::$r64 => stringify!($r8),
                    )+
                }
            }
        }
    };
}

impl_regs! {
    (rax, eax, ax, al),
    (rcx, ecx, cx, cl),
    (rdx, edx, dx, dl),
    (rbx, ebx, bx, bl),
    (rsp, esp, sp, spl),
    (rbp, ebp, bp, bpl),
    (rsi, esi, si, sil),
    (rdi, edi, di, dil),
    (r8, r8d, r8w, r8b),
    (r9, r9d, r9w, r9b),
    (r10, r10d, r10w, r10b),
    (r11, r11d, r11w, r11b),
    (r12, r12d, r12w, r12b),
    (r13, r13d, r13w, r13b),
    (r14, r14d, r14w, r14b),
    (r15, r15d, r15w, r15b)
}

macro_rules! impl_xmm_regs {
    ($($name:ident = $value:expr),+) => {
        #[derive(Copy, Clone, PartialEq, Eq, Debug)]
        pub enum Xmm {
            $($name = $value),+
        }

        impl Xmm {
            pub const fn name(self) -> &'static str {
                match self {
                    $(
                        Xmm::$name => stringify!($name),
                    )+
                }
            }
        }
    };
}

impl_xmm_regs! {
    xmm0 = 0,
    xmm1 = 1,
    xmm2 = 2,
    xmm3 = 3,
    xmm4 = 4,
    xmm5 = 5,
    xmm6 = 6,
    xmm7 = 7,
    xmm8 = 8,
    xmm9 = 9,
    xmm10 = 10,
    xmm11 = 11,
    xmm12 = 12,
    xmm13 = 13,
    xmm14 = 14,
    xmm15 = 15
}

impl Xmm {
    pub const fn needs_rex(self) -> bool {
        self as usize >= Xmm::xmm8 as usize
    }

    pub const fn modrm_rm_bits(self) -> u8 {
        (self as usize & 0b111) as u8
    }

    pub const fn modrm_reg_bits(self) -> u8 {
        (((self as usize) << 3) & 0b111000) as u8
    }
}

impl core::fmt::Display for Xmm {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        fmt.write_str(self.name())
    }
}

#[derive(Copy, Clone)]
enum Imm {
    Imm8(i8),
    Imm32(i32),
}

impl Imm {
    const fn append_into(self, enc: EncInst) -> EncInst {
        match self {
            Imm::Imm8(value) => enc.append(value as u8),
            Imm::Imm32(value) => {
                let xs = value.to_le_bytes();
                enc.append_array([xs[0], xs[1], xs[2], xs[3]])
            }
        }
    }
}

struct Inst {
    prefix: u8,
    override_op_size: bool,
    override_addr_size: bool,
    op_alt: bool,
    enable_modrm: bool,
    rex: u8,
    opcode: u8,
    modrm: u8,
    sib: u8,
    imm: Option<Imm>,
}

// See: https://www-user.tu-chemnitz.de/~heha/hsn/chm/x86.chm/x64.htm
impl Inst {
    const fn new(opcode: u8) -> Self {
        Inst {
            prefix: 0,
            override_op_size: false,
            override_addr_size: false,
            op_alt: false,
            enable_modrm: false,
            rex: 0,
            opcode,
            modrm: 0,
            sib: 0,
            imm: None,
        }
    }

    const fn with_reg_in_op(opcode: u8, reg: Reg) -> Self {
        Inst::new(opcode | reg.modrm_rm_bits()).rex_from_reg(reg)
    }

    const fn prefix(mut self, prefix: u8) -> Self {
        self.prefix = prefix;
        self
    }

    const fn override_op_size(mut self) -> Self {
        self.override_op_size = true;
        self
    }

    const fn override_addr_size(mut self) -> Self {
        self.override_addr_size = true;
        self
    }

    const fn op_alt(mut self) -> Self {
        self.op_alt = true;
        self
    }

    const fn rex(mut self) -> Self {
        self.rex |= REX;
        self
    }

    const fn rex_if(mut self, cond: bool) -> Self {
        if cond {
            self = self.rex();
        }
        self
    }

    const fn rex_from_reg(mut self, reg: Reg) -> Self {
        if reg.needs_rex() {
            self.rex |= REX_EXT_MODRM_RM;
        }
        self
    }

    const fn rex_64b(mut self) -> Self {
        self.rex |= REX_64B_OP;
        self
    }

    const fn rex_64b_if(mut self, cond: bool) -> Self {
        if cond {
            self.rex |= REX_64B_OP;
        }
        self
    }

    const fn modrm_rm_direct(mut self, value: Reg) -> Self {
        if value.needs_rex() {
            self.rex |= REX_EXT_MODRM_RM;
        }
        self.modrm |= value.modrm_rm_bits() | 0b11000000;
        self.enable_modrm = true;
        self
    }

    const fn modrm_rm_direct_xmm(mut self, value: Xmm) -> Self {
        if value.needs_rex() {
            self.rex |= REX_EXT_MODRM_RM;
        }
        self.modrm |= value.modrm_rm_bits() | 0b11000000;
        self.enable_modrm = true;
        self
    }

    const fn modrm_rm_indirect(mut self, value: Reg, offset: i32) -> Self {
        if value.needs_rex() {
            self.rex |= REX_EXT_MODRM_RM;
        }

        if matches!(value, Reg::rsp | Reg::r12) {
            self.modrm |= 0b00000100;
            self.sib = 0b00100100;
        } else if matches!(value, Reg::rbp | Reg::r13) && offset == 0 {
            // [rbp]/[r13] cannot be encoded without a displacement.
            self.modrm |= 0b01000101;
            self.imm = Some(Imm::Imm8(0));
            self.enable_modrm = true;
            return self;
        } else {
            self.modrm |= value.modrm_rm_bits();
        }

        if offset != 0 {
            if offset <= i8::MAX as i32 && offset >= i8::MIN as i32 {
                self.modrm |= 0b01000000;
                self.imm = Some(Imm::Imm8(offset as i8));
            } else {
                self.modrm |= 0b10000000;
                self.imm = Some(Imm::Imm32(offset));
            }
        }

        self.enable_modrm = true;
        self
    }

    const fn modrm_rm_index(mut self, base: Reg, index: Reg, offset: i32) -> Self {
        // rsp cannot be encoded as an index register.
        assert!(!matches!(index, Reg::rsp));

        if base.needs_rex() {
            self.rex |= REX_EXT_MODRM_RM;
        }
        if index.needs_rex() {
            self.rex |= REX_EXT_SIB_INDEX;
        }

        self.modrm |= 0b00000100;
        self.sib = index.modrm_reg_bits() | base.modrm_rm_bits();

        if offset == 0 && !matches!(base, Reg::rbp | Reg::r13) {
            // mod = 00, no displacement.
        } else if offset <= i8::MAX as i32 && offset >= i8::MIN as i32 {
            self.modrm |= 0b01000000;
            self.imm = Some(Imm::Imm8(offset as i8));
        } else {
            self.modrm |= 0b10000000;
            self.imm = Some(Imm::Imm32(offset));
        }

        self.enable_modrm = true;
        self
    }

    const fn modrm_reg(mut self, value: Reg) -> Self {
        if value.needs_rex() {
            self.rex |= REX_EXT_MODRM_REG;
        }
        self.modrm |= value.modrm_reg_bits();
        self.enable_modrm = true;
        self
    }

    const fn modrm_reg_xmm(mut self, value: Xmm) -> Self {
        if value.needs_rex() {
            self.rex |= REX_EXT_MODRM_REG;
        }
        self.modrm |= value.modrm_reg_bits();
        self.enable_modrm = true;
        self
    }

    const fn modrm_opext(mut self, ext: u8) -> Self {
        self.modrm |= ext << 3;
        self.enable_modrm = true;
        self
    }

    const fn imm8(mut self, value: i8) -> Self {
        self.imm = Some(Imm::Imm8(value));
        self
    }

    const fn imm32(mut self, value: i32) -> Self {
        self.imm = Some(Imm::Imm32(value));
        self
    }

    const fn encode(self) -> EncInst {
        let mut enc = EncInst::new();
        if self.override_op_size {
            enc = enc.append(PREFIX_OVERRIDE_OP_SIZE);
        }
        if self.override_addr_size {
            enc = enc.append(PREFIX_OVERRIDE_ADDR_SIZE);
        }
        if self.prefix != 0 {
            enc = enc.append(self.prefix);
        }
        if self.rex != 0 {
            enc = enc.append(self.rex);
        }
        if self.op_alt {
            enc = enc.append(0x0f);
        }
        enc = enc.append(self.opcode);
        if self.enable_modrm {
            enc = enc.append(self.modrm);
            if self.modrm & 0b11000000 != 0b11000000 && self.modrm & 0b111 == 0b100 {
                enc = enc.append(self.sib);
            }
        }
        if let Some(imm) = self.imm {
            enc = imm.append_into(enc);
        }
        enc
    }
}

macro_rules! impl_inst {
    (@generate_test_values $cb:expr, $name:ident, $arg0:ty, $arg1:ty, $arg2:ty, $arg3:ty, $arg4:ty) => {
        <$arg0 as super::tests::GenerateTestValues>::generate_test_values(|arg0|
            <$arg1 as super::tests::GenerateTestValues>::generate_test_values(|arg1|
                <$arg2 as super::tests::GenerateTestValues>::generate_test_values(|arg2|
                    <$arg3 as super::tests::GenerateTestValues>::generate_test_values(|arg3|
                        <$arg4 as super::tests::GenerateTestValues>::generate_test_values(|arg4|
                            $cb($name(arg0, arg1, arg2, arg3, arg4))
                        )
                    )
                )
            )
        )
    };

    (@generate_test_values $cb:expr, $name:ident, $arg0:ty, $arg1:ty, $arg2:ty, $arg3:ty) => {
        <$arg0 as super::tests::GenerateTestValues>::generate_test_values(|arg0|
            <$arg1 as super::tests::GenerateTestValues>::generate_test_values(|arg1|
                <$arg2 as super::tests::GenerateTestValues>::generate_test_values(|arg2|
                    <$arg3 as super::tests::GenerateTestValues>::generate_test_values(|arg3|
                        $cb($name(arg0, arg1, arg2, arg3))
                    )
                )
            )
        )
    };

    (@generate_test_values $cb:expr, $name:ident, $arg0:ty, $arg1:ty, $arg2:ty) => {
        <$arg0 as super::tests::GenerateTestValues>::generate_test_values(|arg0|
            <$arg1 as super::tests::GenerateTestValues>::generate_test_values(|arg1|
                <$arg2 as super::tests::GenerateTestValues>::generate_test_values(|arg2|
                    $cb($name(arg0, arg1, arg2))
                )
            )
        )
    };

    (@generate_test_values $cb:expr, $name:ident, $arg0:ty, $arg1:ty) => {
        <$arg0 as super::tests::GenerateTestValues>::generate_test_values(|arg0|
            <$arg1 as super::tests::GenerateTestValues>::generate_test_values(|arg1|
                $cb($name(arg0, arg1))
            )
        )
    };

    (@generate_test_values $cb:expr, $name:ident, $arg0:ty) => {
        <$arg0 as super::tests::GenerateTestValues>::generate_test_values(|arg0|
            $cb($name(arg0))
        )
    };

    (@generate_test_values $cb:expr, $name:ident,) => {
        $cb($name())
    };

    (|$self:ident, $fmt:ident| $($name:ident($($arg:ty),*) => $body:expr, ($fmt_body:expr),)+) => {
        $(
            #[derive(Copy, Clone, PartialEq, Eq, Debug)]
            pub struct $name($(pub $arg),*);
            impl $name {
                const fn encode_const($self) -> EncInst {
                    $body
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&$self, $fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
                    $fmt_body
                }
            }

            impl crate::Instruction for $name {
                fn encode(self) -> EncInst {
                    self.encode_const()
                }

                fn target_fixup(self) -> Option<(Label, u8, u8)> {
                    None
                }
            }

            #[cfg(test)]
            impl super::tests::GenerateTestValues for $name {
                fn generate_test_values(mut cb: impl FnMut(Self)) {
                    impl_inst!(@generate_test_values cb, $name, $($arg),*);
                }
            }
        )+
    };
}

pub mod inst {
    use super::*;

    const fn alu_imm(size: RegSize, reg: Reg, imm: i32, opext: u8) -> EncInst {
        let inst = if imm <= i8::MAX as i32 && imm >= i8::MIN as i32 {
            Inst::new(0x83).imm8(imm as i8)
        } else {
            Inst::new(0x81).imm32(imm)
        };

        inst.rex_64b_if(matches!(size, RegSize::R64))
            .modrm_opext(opext)
            .modrm_rm_direct(reg)
            .encode()
    }

    fn fmt_mem(fmt: &mut core::fmt::Formatter, offset: i32) -> core::fmt::Result {
        if offset != 0 {
            if offset > 0 {
                fmt.write_fmt(core::format_args!("+0x{:x}", offset))?;
            } else {
                fmt.write_fmt(core::format_args!("-0x{:x}", -(offset as i64)))?;
            }
        }
        fmt.write_str("]")
    }

    impl_inst! { |self, fmt|
        // https://www.felixcloutier.com/x86/ret
        ret() =>
            EncInst::from_array([0xc3]),
            (fmt.write_str("ret")),

        // https://www.felixcloutier.com/x86/nop
        nop() =>
            EncInst::from_array([0x90]),
            (fmt.write_str("nop")),

        nop2() =>
            EncInst::from_array([0x66, 0x90]),
            (fmt.write_str("xchg ax, ax")),

        // https://www.felixcloutier.com/x86/push
        push(Reg) =>
            Inst::with_reg_in_op(0x50, self.0).encode(),
            (fmt.write_fmt(core::format_args!("push {}", self.0))),

        // https://www.felixcloutier.com/x86/pop
        pop(Reg) =>
            Inst::with_reg_in_op(0x58, self.0).encode(),
            (fmt.write_fmt(core::format_args!("pop {}", self.0))),

        // https://www.felixcloutier.com/x86/mov
        mov(RegSize, Reg, Reg) =>
            Inst::new(0x89).rex_64b_if(matches!(self.0, RegSize::R64)).modrm_rm_direct(self.1).modrm_reg(self.2).encode(),
            (fmt.write_fmt(core::format_args!("mov {}, {}", self.1.name_from(self.0), self.2.name_from(self.0)))),

        load32_imm(Reg, u32) =>
            Inst::with_reg_in_op(0xb8, self.0).imm32(self.1 as i32).encode(),
            (fmt.write_fmt(core::format_args!("mov {}, 0x{:x}", self.0.name32(), self.1))),

        load64_imm(Reg, u64) =>
            {
                if self.1 <= 0x7fffffff {
                    let xs = (self.1 as u32).to_le_bytes();
                    EncInst::from_array([
                        REX_64B_OP | self.0.rex_bit(),
                        0xc7,
                        0xc0 | self.0.modrm_rm_bits(),
                        xs[0], xs[1], xs[2], xs[3]
                    ])
                } else {
                    let xs = self.1.to_le_bytes();
                    EncInst::from_array([
                        REX_64B_OP | self.0.rex_bit(),
                        0xb8 | self.0.modrm_rm_bits(),
                        xs[0], xs[1], xs[2], xs[3], xs[4], xs[5], xs[6], xs[7]
                    ])
                }
            },
            (fmt.write_fmt(core::format_args!("mov {}, 0x{:x}", self.0, self.1))),

        // https://www.felixcloutier.com/x86/movzx
        movzx8(Reg, Reg) =>
            Inst::new(0xb6).op_alt().rex_if(self.1.needs_plain_rex_as_byte()).modrm_rm_direct(self.1).modrm_reg(self.0).encode(),
            (fmt.write_fmt(core::format_args!("movzx {}, {}", self.0.name32(), self.1.name8()))),

        movzx16(Reg, Reg) =>
            Inst::new(0xb7).op_alt().modrm_rm_direct(self.1).modrm_reg(self.0).encode(),
            (fmt.write_fmt(core::format_args!("movzx {}, {}", self.0.name32(), self.1.name16()))),

        // https://www.felixcloutier.com/x86/movsx:movsxd
        movsx8(Reg, Reg) =>
            Inst::new(0xbe).op_alt().rex_if(self.1.needs_plain_rex_as_byte()).modrm_rm_direct(self.1).modrm_reg(self.0).encode(),
            (fmt.write_fmt(core::format_args!("movsx {}, {}", self.0.name32(), self.1.name8()))),

        movsx16(Reg, Reg) =>
            Inst::new(0xbf).op_alt().modrm_rm_direct(self.1).modrm_reg(self.0).encode(),
            (fmt.write_fmt(core::format_args!("movsx {}, {}", self.0.name32(), self.1.name16()))),

        // https://www.felixcloutier.com/x86/bswap
        bswap(Reg) =>
            Inst::with_reg_in_op(0xc8, self.0).op_alt().encode(),
            (fmt.write_fmt(core::format_args!("bswap {}", self.0.name32()))),

        // https://www.felixcloutier.com/x86/rcl:rcr:rol:ror
        ror16_imm(Reg, u8) =>
            Inst::new(0xc1).override_op_size().modrm_opext(0b001).modrm_rm_direct(self.0).imm8(self.1 as i8).encode(),
            (fmt.write_fmt(core::format_args!("ror {}, 0x{:x}", self.0.name16(), self.1))),

        // https://www.felixcloutier.com/x86/sal:sar:shl:shr
        shr_imm(Reg, u8) =>
            Inst::new(0xc1).modrm_opext(0b101).modrm_rm_direct(self.0).imm8(self.1 as i8).encode(),
            (fmt.write_fmt(core::format_args!("shr {}, 0x{:x}", self.0.name32(), self.1))),

        sar_imm(Reg, u8) =>
            Inst::new(0xc1).modrm_opext(0b111).modrm_rm_direct(self.0).imm8(self.1 as i8).encode(),
            (fmt.write_fmt(core::format_args!("sar {}, 0x{:x}", self.0.name32(), self.1))),

        // https://www.felixcloutier.com/x86/add
        add(RegSize, Reg, Reg) =>
            Inst::new(0x01).rex_64b_if(matches!(self.0, RegSize::R64)).modrm_rm_direct(self.1).modrm_reg(self.2).encode(),
            (fmt.write_fmt(core::format_args!("add {}, {}", self.1.name_from(self.0), self.2.name_from(self.0)))),

        add_imm(RegSize, Reg, i32) =>
            alu_imm(self.0, self.1, self.2, 0b000),
            ({
                match self.0 {
                    RegSize::R64 => fmt.write_fmt(core::format_args!("add {}, 0x{:x}", self.1, self.2 as i64)),
                    RegSize::R32 => fmt.write_fmt(core::format_args!("add {}, 0x{:x}", self.1.name32(), self.2)),
                }
            }),

        // https://www.felixcloutier.com/x86/sub
        sub_imm(RegSize, Reg, i32) =>
            alu_imm(self.0, self.1, self.2, 0b101),
            ({
                match self.0 {
                    RegSize::R64 => fmt.write_fmt(core::format_args!("sub {}, 0x{:x}", self.1, self.2 as i64)),
                    RegSize::R32 => fmt.write_fmt(core::format_args!("sub {}, 0x{:x}", self.1.name32(), self.2)),
                }
            }),

        // https://www.felixcloutier.com/x86/test
        test_imm(Reg, i32) =>
            Inst::new(0xf7).imm32(self.1).modrm_rm_direct(self.0).encode(),
            (fmt.write_fmt(core::format_args!("test {}, 0x{:x}", self.0.name32(), self.1))),

        // https://www.felixcloutier.com/x86/lea
        lea32(Reg, Reg, i32) =>
            {
                Inst::new(0x8d)
                    .override_addr_size()
                    .modrm_rm_indirect(self.1, self.2)
                    .modrm_reg(self.0)
                    .encode()
            },
            ({
                fmt.write_fmt(core::format_args!("lea {}, [{}", self.0.name32(), self.1.name32()))?;
                fmt_mem(fmt, self.2)
            }),

        load_indexed(LoadKind, Reg, Reg, Reg, i32) =>
            {
                let inst = match self.0 {
                    LoadKind::U8 => Inst::new(0xb6).op_alt(),
                    LoadKind::U16 => Inst::new(0xb7).op_alt(),
                    LoadKind::I8 => Inst::new(0xbe).op_alt(),
                    LoadKind::I16 => Inst::new(0xbf).op_alt(),
                    LoadKind::U32 => Inst::new(0x8b),
                };

                inst.modrm_rm_index(self.2, self.3, self.4)
                    .modrm_reg(self.1)
                    .encode()
            },
            ({
                let (mnemonic, size) = match self.0 {
                    LoadKind::U8 => ("movzx", "byte "),
                    LoadKind::U16 => ("movzx", "word "),
                    LoadKind::I8 => ("movsx", "byte "),
                    LoadKind::I16 => ("movsx", "word "),
                    LoadKind::U32 => ("mov", ""),
                };

                fmt.write_fmt(core::format_args!(
                    "{} {}, {}[{}+{}",
                    mnemonic,
                    self.1.name32(),
                    size,
                    self.2,
                    self.3
                ))?;
                fmt_mem(fmt, self.4)
            }),

        store_indexed(StoreKind, Reg, Reg, i32, Reg) =>
            {
                let inst = match self.0 {
                    StoreKind::U8 => Inst::new(0x88).rex_if(self.4.needs_plain_rex_as_byte()),
                    StoreKind::U16 => Inst::new(0x89).override_op_size(),
                    StoreKind::U32 => Inst::new(0x89),
                };

                inst.modrm_rm_index(self.1, self.2, self.3)
                    .modrm_reg(self.4)
                    .encode()
            },
            ({
                let reg = match self.0 {
                    StoreKind::U8 => self.4.name8(),
                    StoreKind::U16 => self.4.name16(),
                    StoreKind::U32 => self.4.name32(),
                };

                fmt.write_fmt(core::format_args!("mov [{}+{}", self.1, self.2))?;
                fmt_mem(fmt, self.3)?;
                fmt.write_fmt(core::format_args!(", {}", reg))
            }),

        store32_indirect_imm(Reg, i32, u32) =>
            {
                Inst::new(0xc7)
                    .modrm_rm_indirect(self.0, self.1)
                    .encode()
                    .append_array((self.2).to_le_bytes())
            },
            ({
                fmt.write_fmt(core::format_args!("mov dword [{}", self.0))?;
                fmt_mem(fmt, self.1)?;
                fmt.write_fmt(core::format_args!(", 0x{:x}", self.2))
            }),

        // https://www.felixcloutier.com/x86/and
        and32_indirect_imm(Reg, i32, u32) =>
            {
                Inst::new(0x81)
                    .modrm_opext(0b100)
                    .modrm_rm_indirect(self.0, self.1)
                    .encode()
                    .append_array((self.2).to_le_bytes())
            },
            ({
                fmt.write_fmt(core::format_args!("and dword [{}", self.0))?;
                fmt_mem(fmt, self.1)?;
                fmt.write_fmt(core::format_args!(", 0x{:x}", self.2))
            }),

        // https://www.felixcloutier.com/x86/or
        or32_indirect_imm(Reg, i32, u32) =>
            {
                Inst::new(0x81)
                    .modrm_opext(0b001)
                    .modrm_rm_indirect(self.0, self.1)
                    .encode()
                    .append_array((self.2).to_le_bytes())
            },
            ({
                fmt.write_fmt(core::format_args!("or dword [{}", self.0))?;
                fmt_mem(fmt, self.1)?;
                fmt.write_fmt(core::format_args!(", 0x{:x}", self.2))
            }),

        test32_indirect_imm(Reg, i32, u32) =>
            {
                Inst::new(0xf7)
                    .modrm_rm_indirect(self.0, self.1)
                    .encode()
                    .append_array((self.2).to_le_bytes())
            },
            ({
                fmt.write_fmt(core::format_args!("test dword [{}", self.0))?;
                fmt_mem(fmt, self.1)?;
                fmt.write_fmt(core::format_args!(", 0x{:x}", self.2))
            }),

        // https://www.felixcloutier.com/x86/call
        call_reg(Reg) =>
            Inst::new(0xff).modrm_rm_direct(self.0).modrm_opext(0b010).encode(),
            (fmt.write_fmt(core::format_args!("call {}", self.0))),

        // https://www.felixcloutier.com/x86/jmp
        jmp_rel8(i8) =>
            Inst::new(0xeb).imm8(self.0).encode(),
            (fmt.write_fmt(core::format_args!("jmp short 0x{:x}", (self.0 as i64).wrapping_add(2)))),

        jmp_rel32(i32) =>
            Inst::new(0xe9).imm32(self.0).encode(),
            (fmt.write_fmt(core::format_args!("jmp 0x{:x}", (self.0 as i64).wrapping_add(5)))),

        // https://www.felixcloutier.com/x86/jcc
        jcc_rel8(Condition, i8) =>
            Inst::new(0x70 | self.0 as u8).imm8(self.1).encode(),
            (fmt.write_fmt(core::format_args!("j{} short 0x{:x}", self.0.suffix(), (self.1 as i64).wrapping_add(2)))),

        jcc_rel32(Condition, i32) =>
            Inst::new(0x80 | self.0 as u8).op_alt().imm32(self.1).encode(),
            (fmt.write_fmt(core::format_args!("j{} near 0x{:x}", self.0.suffix(), (self.1 as i64).wrapping_add(6)))),

        // https://www.felixcloutier.com/x86/movd:movq
        movd_to_gpr(Reg, Xmm) =>
            Inst::new(0x7e).override_op_size().op_alt().modrm_rm_direct(self.0).modrm_reg_xmm(self.1).encode(),
            (fmt.write_fmt(core::format_args!("movd {}, {}", self.0.name32(), self.1))),

        movd_from_gpr(Xmm, Reg) =>
            Inst::new(0x6e).override_op_size().op_alt().modrm_rm_direct(self.1).modrm_reg_xmm(self.0).encode(),
            (fmt.write_fmt(core::format_args!("movd {}, {}", self.0, self.1.name32()))),

        // https://www.felixcloutier.com/x86/cvtsd2ss
        cvtsd2ss(Xmm, Xmm) =>
            Inst::new(0x5a).prefix(0xf2).op_alt().modrm_rm_direct_xmm(self.1).modrm_reg_xmm(self.0).encode(),
            (fmt.write_fmt(core::format_args!("cvtsd2ss {}, {}", self.0, self.1))),

        // https://www.felixcloutier.com/x86/cvtss2sd
        cvtss2sd(Xmm, Xmm) =>
            Inst::new(0x5a).prefix(0xf3).op_alt().modrm_rm_direct_xmm(self.1).modrm_reg_xmm(self.0).encode(),
            (fmt.write_fmt(core::format_args!("cvtss2sd {}, {}", self.0, self.1))),
    }

    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct jmp_label8(pub Label);
    impl jmp_label8 {
        const fn encode_const(self) -> EncInst {
            jmp_rel8(0).encode_const()
        }
    }

    impl core::fmt::Display for jmp_label8 {
        fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
            fmt.write_fmt(core::format_args!("jmp {}", self.0))
        }
    }

    impl crate::Instruction for jmp_label8 {
        fn encode(self) -> EncInst {
            self.encode_const()
        }

        fn target_fixup(self) -> Option<(Label, u8, u8)> {
            Some((self.0, 1, 1))
        }
    }

    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct jmp_label32(pub Label);
    impl jmp_label32 {
        const fn encode_const(self) -> EncInst {
            jmp_rel32(0).encode_const()
        }
    }

    impl core::fmt::Display for jmp_label32 {
        fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
            fmt.write_fmt(core::format_args!("jmp {}", self.0))
        }
    }

    impl crate::Instruction for jmp_label32 {
        fn encode(self) -> EncInst {
            self.encode_const()
        }

        fn target_fixup(self) -> Option<(Label, u8, u8)> {
            Some((self.0, 1, 4))
        }
    }

    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct jcc_label8(pub Condition, pub Label);
    impl jcc_label8 {
        const fn encode_const(self) -> EncInst {
            jcc_rel8(self.0, 0).encode_const()
        }
    }

    impl core::fmt::Display for jcc_label8 {
        fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
            fmt.write_fmt(core::format_args!("j{} {}", self.0.suffix(), self.1))
        }
    }

    impl crate::Instruction for jcc_label8 {
        fn encode(self) -> EncInst {
            self.encode_const()
        }

        fn target_fixup(self) -> Option<(Label, u8, u8)> {
            Some((self.1, 1, 1))
        }
    }

    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct jcc_label32(pub Condition, pub Label);
    impl jcc_label32 {
        const fn encode_const(self) -> EncInst {
            jcc_rel32(self.0, 0).encode_const()
        }
    }

    impl core::fmt::Display for jcc_label32 {
        fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
            fmt.write_fmt(core::format_args!("j{} {}", self.0.suffix(), self.1))
        }
    }

    impl crate::Instruction for jcc_label32 {
        fn encode(self) -> EncInst {
            self.encode_const()
        }

        fn target_fixup(self) -> Option<(Label, u8, u8)> {
            Some((self.1, 2, 4))
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Condition {
    Overflow = 0,
    NotOverflow = 1,
    Below = 2,        // For unsigned values.
    AboveOrEqual = 3, // For unsigned values.
    Equal = 4,
    NotEqual = 5,
    BelowOrEqual = 6, // For unsigned values.
    Above = 7,        // For unsigned values.
    Sign = 8,
    NotSign = 9,
    Parity = 10,
    NotParity = 11,
    Less = 12,           // For signed values.
    GreaterOrEqual = 13, // For signed values.
    LessOrEqual = 14,    // For signed values.
    Greater = 15,        // For signed values.
}

impl Condition {
    const fn suffix(self) -> &'static str {
        use Condition::*;
        match self {
            Overflow => "o",
            NotOverflow => "no",
            Below => "b",
            AboveOrEqual => "ae",
            Equal => "e",
            NotEqual => "ne",
            BelowOrEqual => "be",
            Above => "a",
            Sign => "s",
            NotSign => "ns",
            Parity => "p",
            NotParity => "np",
            Less => "l",
            GreaterOrEqual => "ge",
            LessOrEqual => "le",
            Greater => "g",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RegSize {
    R32,
    R64,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LoadKind {
    U8,
    U16,
    U32,
    I8,
    I16,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StoreKind {
    U8,
    U16,
    U32,
}

#[cfg(test)]
mod tests {
    extern crate std;

    pub trait GenerateTestValues: Copy {
        fn generate_test_values(cb: impl FnMut(Self));
    }

    impl GenerateTestValues for super::Reg {
        fn generate_test_values(cb: impl FnMut(Self)) {
            use super::Reg::*;
            [rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15]
                .into_iter()
                .for_each(cb);
        }
    }

    impl GenerateTestValues for super::Xmm {
        fn generate_test_values(cb: impl FnMut(Self)) {
            use super::Xmm::*;
            [xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15]
                .into_iter()
                .for_each(cb);
        }
    }

    impl GenerateTestValues for super::Condition {
        fn generate_test_values(cb: impl FnMut(Self)) {
            use super::Condition::*;
            [
                Overflow,
                NotOverflow,
                Below,
                AboveOrEqual,
                Equal,
                NotEqual,
                BelowOrEqual,
                Above,
                Sign,
                NotSign,
                Parity,
                NotParity,
                Less,
                GreaterOrEqual,
                LessOrEqual,
                Greater,
            ]
            .into_iter()
            .for_each(cb);
        }
    }

    impl GenerateTestValues for super::RegSize {
        fn generate_test_values(cb: impl FnMut(Self)) {
            use super::RegSize::*;
            [R32, R64].into_iter().for_each(cb);
        }
    }

    impl GenerateTestValues for super::LoadKind {
        fn generate_test_values(cb: impl FnMut(Self)) {
            use super::LoadKind::*;
            [U8, U16, U32, I8, I16].into_iter().for_each(cb);
        }
    }

    impl GenerateTestValues for super::StoreKind {
        fn generate_test_values(cb: impl FnMut(Self)) {
            use super::StoreKind::*;
            [U8, U16, U32].into_iter().for_each(cb);
        }
    }

    impl GenerateTestValues for u8 {
        fn generate_test_values(cb: impl FnMut(Self)) {
            [0, 0x7f, 0x80, 0xff].into_iter().for_each(cb);
        }
    }

    impl GenerateTestValues for i8 {
        fn generate_test_values(cb: impl FnMut(Self)) {
            [0, 0x1, 0x7f, -0x1, -127, -128].into_iter().for_each(cb);
        }
    }

    impl GenerateTestValues for u32 {
        fn generate_test_values(cb: impl FnMut(Self)) {
            [0, 0x7f, 0x80, 0xff, 0x7fff, 0x8000, 0xffff, 0x7fffffff, 0x80000000, 0xffffffff]
                .into_iter()
                .for_each(cb);
        }
    }

    impl GenerateTestValues for i32 {
        fn generate_test_values(cb: impl FnMut(Self)) {
            [
                0,
                0x1,
                0x7f,
                0x80,
                0xff,
                0x7fff,
                0x8000,
                0xffff,
                0x7fffffff,
                -0x1,
                -128,
                -129,
                -255,
                -256,
                -32768,
                -32769,
                -2147483648,
            ]
            .into_iter()
            .for_each(cb);
        }
    }

    impl GenerateTestValues for u64 {
        fn generate_test_values(cb: impl FnMut(Self)) {
            [
                0,
                0x7f,
                0x80,
                0xff,
                0x7fff,
                0x8000,
                0xffff,
                0x7fffffff,
                0x80000000,
                0xffffffff,
                0x7fffffffffffffff,
                0x8000000000000000,
                0xffffffffffffffff,
            ]
            .into_iter()
            .for_each(cb);
        }
    }

    fn disassemble(mut code: &[u8]) -> std::string::String {
        use iced_x86::Formatter;
        use std::fmt::Write;
        use std::string::String;

        let mut output = String::new();
        let mut formatter = iced_x86::NasmFormatter::new();
        formatter.options_mut().set_space_after_operand_separator(true);
        formatter.options_mut().set_hex_prefix("0x");
        formatter.options_mut().set_hex_suffix("");
        formatter.options_mut().set_uppercase_hex(false);
        formatter.options_mut().set_small_hex_numbers_in_decimal(false);
        formatter.options_mut().set_show_useless_prefixes(true);
        formatter.options_mut().set_branch_leading_zeros(false);
        formatter.options_mut().set_rip_relative_addresses(true);
        let code_origin = 0;
        let mut position = 0;
        loop {
            let mut decoder = iced_x86::Decoder::with_ip(64, code, code_origin, iced_x86::DecoderOptions::NONE);
            if !decoder.can_decode() {
                break;
            }
            let mut instruction = iced_x86::Instruction::default();
            decoder.decode_out(&mut instruction);

            write!(&mut output, "{:08x} ", position).unwrap();
            let start_index = (instruction.ip() - code_origin) as usize;
            let instr_bytes = &code[start_index..start_index + instruction.len()];
            for b in instr_bytes.iter() {
                write!(&mut output, "{:02x}", b).unwrap();
            }
            write!(&mut output, " ").unwrap();

            formatter.format(&instruction, &mut output);
            writeln!(&mut output).unwrap();
            code = &code[instruction.len()..];
            position += instruction.len();
        }

        output.pop();
        output
    }

    macro_rules! test_asm {
        ($($inst:expr),+) => {{
            use core::fmt::Write;
            use std::string::String;
            use std::vec::Vec;

            let mut asm = crate::Assembler::new();
            let mut ranges = Vec::new();
            $(
                {
                    let inst = $inst;
                    let position = asm.len();
                    asm.push(inst);
                    let range = position..asm.len();
                    ranges.push((inst, range));
                }
            )+

            let code = asm.finalize().to_vec();
            let mut disassembly_1 = String::new();
            let mut position = 0;
            for (inst, range) in ranges {
                write!(&mut disassembly_1, "{:08x} ", position).unwrap();
                for &b in &code[range.clone()] {
                    write!(&mut disassembly_1, "{:02x}", b).unwrap();
                }
                position += range.len();
                writeln!(&mut disassembly_1, " {}", inst).unwrap();
            }

            disassembly_1.pop();
            let disassembly_2 = disassemble(&code);

            assert_eq!(disassembly_1, disassembly_2);
        }};
    }

    macro_rules! generate_tests {
        ($($inst_name:ident,)+) => {
            $(
                #[test]
                fn $inst_name() {
                    <super::inst::$inst_name as GenerateTestValues>::generate_test_values(|inst| test_asm!(inst));
                }
            )+
        }
    }

    generate_tests! {
        add,
        add_imm,
        and32_indirect_imm,
        bswap,
        call_reg,
        cvtsd2ss,
        cvtss2sd,
        jcc_rel32,
        jcc_rel8,
        jmp_rel32,
        jmp_rel8,
        lea32,
        load32_imm,
        load64_imm,
        mov,
        movd_from_gpr,
        movd_to_gpr,
        movsx16,
        movsx8,
        movzx16,
        movzx8,
        nop,
        nop2,
        or32_indirect_imm,
        pop,
        push,
        ret,
        ror16_imm,
        sar_imm,
        shr_imm,
        store32_indirect_imm,
        sub_imm,
        test32_indirect_imm,
        test_imm,
    }

    // `load_indexed`/`store_indexed` can't use the generated harness because
    // rsp is not encodable as an index register.
    #[test]
    fn load_indexed() {
        use super::inst::load_indexed;
        use super::{LoadKind, Reg};

        LoadKind::generate_test_values(|kind| {
            Reg::generate_test_values(|base| {
                Reg::generate_test_values(|index| {
                    if index == Reg::rsp {
                        return;
                    }

                    for dst in [Reg::rax, Reg::rdx, Reg::rbp, Reg::r9] {
                        for offset in [0, 0x10, 0x7f, 0x80, -0x1, -0x80, 0x1000, -0x1000] {
                            test_asm!(load_indexed(kind, dst, base, index, offset));
                        }
                    }
                });
            });
        });
    }

    #[test]
    fn store_indexed() {
        use super::inst::store_indexed;
        use super::{Reg, StoreKind};

        StoreKind::generate_test_values(|kind| {
            Reg::generate_test_values(|base| {
                Reg::generate_test_values(|index| {
                    if index == Reg::rsp {
                        return;
                    }

                    for src in [Reg::rax, Reg::rdx, Reg::rsi, Reg::r9] {
                        for offset in [0, 0x10, 0x7f, 0x80, -0x1, -0x80, 0x1000, -0x1000] {
                            test_asm!(store_indexed(kind, base, index, offset, src));
                        }
                    }
                });
            });
        });
    }

    #[test]
    fn jmp_label8_infinite_loop() {
        use super::inst::*;
        let mut asm = crate::Assembler::new();
        let label = asm.forward_declare_label();
        asm.push_with_label(label, jmp_label8(label));
        let disassembly = disassemble(asm.finalize());
        assert_eq!(disassembly, "00000000 ebfe jmp short 0x0");
    }

    #[test]
    fn jmp_label32_infinite_loop() {
        use super::inst::*;
        let mut asm = crate::Assembler::new();
        let label = asm.forward_declare_label();
        asm.push_with_label(label, jmp_label32(label));
        let disassembly = disassemble(asm.finalize());
        assert_eq!(disassembly, "00000000 e9fbffffff jmp 0x0");
    }

    #[test]
    fn jcc_label8_jump_forward() {
        use super::inst::*;
        super::Condition::generate_test_values(|cond| {
            let mut asm = crate::Assembler::new();
            let label = asm.forward_declare_label();
            asm.push(jcc_label8(cond, label));
            asm.push_with_label(label, nop());
            let disassembly = disassemble(asm.finalize());
            assert_eq!(
                disassembly,
                std::format!(
                    concat!("00000000 {:02x}00 j{} short 0x2\n", "00000002 90 nop",),
                    0x70 + cond as u8,
                    cond.suffix()
                )
            );
        })
    }

    #[test]
    fn jcc_label32_jump_forward() {
        use super::inst::*;
        super::Condition::generate_test_values(|cond| {
            let mut asm = crate::Assembler::new();
            let label = asm.forward_declare_label();
            asm.push(jcc_label32(cond, label));
            asm.push_with_label(label, nop());
            let disassembly = disassemble(asm.finalize());
            assert_eq!(
                disassembly,
                std::format!(
                    concat!("00000000 0f{:02x}00000000 j{} near 0x6\n", "00000006 90 nop",),
                    0x80 + cond as u8,
                    cond.suffix()
                )
            );
        });
    }

    #[test]
    fn jcc_label8_jump_backward() {
        use super::inst::*;
        super::Condition::generate_test_values(|cond| {
            let mut asm = crate::Assembler::new();
            let label = asm.forward_declare_label();
            asm.push_with_label(label, nop());
            asm.push(jcc_label8(cond, label));
            let disassembly = disassemble(asm.finalize());
            assert_eq!(
                disassembly,
                std::format!(
                    concat!("00000000 90 nop\n", "00000001 {:02x}fd j{} short 0xffffffffffffffff",),
                    0x70 + cond as u8,
                    cond.suffix()
                )
            );
        });
    }
}
