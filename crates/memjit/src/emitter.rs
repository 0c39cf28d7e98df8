use memjit_assembler::amd64::Reg;
use memjit_assembler::Assembler;

use crate::access::{AccessRequest, AddressOperand};
use crate::backpatch::BackpatchRegistry;
use crate::config::Config;
use crate::error::Error;
use crate::mask::AddressMask;
use crate::runtime::RuntimeFunctions;
use crate::strategy::AccessStrategy;

mod amd64;

pub use self::amd64::{CALL_RESULT_REG, GUEST_STATE_REG, TMP_REG};

/// The capability for the reserved host memory region standing in for the
/// guest's address space: the pinned register holding its base address and
/// the size of the mapped span.
///
/// The runtime pins the register before entering generated code; the
/// emitter never materializes the base address itself.
#[derive(Copy, Clone, Debug)]
pub struct Arena {
    base_reg: Reg,
    size: u32,
}

impl Arena {
    pub fn new(base_reg: Reg, size: u32) -> Result<Self, Error> {
        if base_reg == Reg::rsp || !base_reg.is_reg_preserved() {
            return Err(Error::from_static_str(
                "the arena base must be pinned to a callee-saved register",
            ));
        }

        if base_reg == GUEST_STATE_REG {
            return Err(Error::from_static_str(
                "the arena base register is already pinned to the guest context",
            ));
        }

        Ok(Arena { base_reg, size })
    }

    pub fn base_reg(&self) -> Reg {
        self.base_reg
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// The finished output of one translation unit: the machine code and the
/// patch-site bookkeeping that belongs to it. Both are immutable from here
/// on and share the block's lifetime.
pub struct EmittedBlock {
    pub code: Vec<u8>,
    pub backpatch: BackpatchRegistry,
}

/// Emits the guest-memory-access portions of one translation unit.
///
/// The translator drives this once per guest load/store; everything else it
/// emits for the block goes through [`BlockEmitter::asm`] so the whole unit
/// lands in a single code buffer.
///
/// Emitted call sites assume the stack pointer is 16-byte aligned at guest
/// instruction boundaries; the block prologue has to establish that.
pub struct BlockEmitter {
    asm: Assembler,
    config: Config,
    mask: AddressMask,
    arena: Arena,
    runtime: RuntimeFunctions,
    backpatch: BackpatchRegistry,
    current_pc: u32,
}

impl BlockEmitter {
    pub fn new(config: Config, arena: Arena, runtime: RuntimeFunctions) -> Self {
        let mask = AddressMask::compute(&config);
        BlockEmitter {
            asm: Assembler::new(),
            config,
            mask,
            arena,
            runtime,
            backpatch: BackpatchRegistry::new(),
            current_pc: 0,
        }
    }

    pub fn asm(&mut self) -> &mut Assembler {
        &mut self.asm
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn address_mask(&self) -> AddressMask {
        self.mask
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn backpatch(&self) -> &BackpatchRegistry {
        &self.backpatch
    }

    /// Sets the guest program counter of the instruction being translated;
    /// stores stamp it into the guest context so out-of-band collaborators
    /// can attribute the access.
    pub fn set_current_pc(&mut self, pc: u32) {
        self.current_pc = pc;
    }

    /// Emits a guest load into `request.value_reg`.
    pub fn load_into(&mut self, request: &AccessRequest) {
        self.check_request(request, false);

        let strategy = AccessStrategy::select(&self.config, self.mask, &request.address, request.offset);
        log::trace!("emitting {} load: {}", request.width, strategy);

        let mut live_regs = request.live_regs.without(CALL_RESULT_REG);
        if !self.config.mem_check {
            // Without mem-check the destination can't hold anything worth
            // keeping across the access.
            live_regs.remove(request.value_reg);
        }

        match strategy {
            AccessStrategy::PureFast => {
                self.fast_load(request);
            }
            AccessStrategy::FastWithBackpatch => {
                let site = self.fast_load(request);
                self.backpatch.record(site, live_regs);
            }
            AccessStrategy::GuardedBranch => {
                // The runtime read functions convert byte order themselves;
                // a raw load can't be routed through them.
                assert!(request.swap, "a checked load cannot suppress the byte-order conversion");
                self.guarded_load(request, live_regs);
            }
        }
    }

    /// Emits a guest store of `request.value_reg`.
    ///
    /// When the byte-order conversion is on, the value register is swapped
    /// in place and left that way; a guarded store additionally folds the
    /// constant offset into the address register.
    pub fn store_from(&mut self, request: &AccessRequest) {
        self.check_request(request, true);

        let strategy = AccessStrategy::select(&self.config, self.mask, &request.address, request.offset);
        log::trace!("emitting {} store: {}", request.width, strategy);

        let live_regs = request.live_regs.without(CALL_RESULT_REG);
        self.stamp_guest_pc();

        match strategy {
            AccessStrategy::PureFast => {
                self.fast_store(request);
            }
            AccessStrategy::FastWithBackpatch => {
                let site = self.fast_store(request);
                self.backpatch.record(site, live_regs);
            }
            AccessStrategy::GuardedBranch => {
                self.guarded_store(request, live_regs);
            }
        }
    }

    /// Resolves every pending branch and hands the finished block over.
    pub fn finish(mut self) -> EmittedBlock {
        let code = self.asm.finalize().to_vec();
        EmittedBlock {
            code,
            backpatch: self.backpatch,
        }
    }

    fn check_request(&self, request: &AccessRequest, is_store: bool) {
        let reserved = [Reg::rsp, self.arena.base_reg, GUEST_STATE_REG];
        assert!(
            !reserved.contains(&request.value_reg),
            "value register {} is reserved",
            request.value_reg
        );

        if is_store {
            assert!(
                request.value_reg != TMP_REG,
                "{} is the store scratch register",
                TMP_REG
            );
        }

        if let AddressOperand::Register(reg) = request.address {
            assert!(!reserved.contains(&reg), "address register {} is reserved", reg);
            if is_store {
                assert!(
                    reg != request.value_reg,
                    "a store cannot address memory through its value register"
                );
            }
        }

        debug_assert!(!request.live_regs.contains(Reg::rsp));
    }
}
