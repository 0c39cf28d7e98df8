use crate::access::AddressOperand;
use crate::config::Config;
use crate::mask::AddressMask;

/// How the code for one access gets emitted. Decided exactly once per
/// [`AccessRequest`](crate::AccessRequest), before any code is emitted.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AccessStrategy {
    /// A direct arena access with no runtime check and no bookkeeping;
    /// chosen only when the address is provably safe at translation time.
    PureFast,
    /// A direct arena access with no runtime check, registered with the
    /// patch-site bookkeeping so an out-of-range access can be recovered
    /// out-of-band after the hardware trap.
    FastWithBackpatch,
    /// A runtime test of the address against the mask, branching between a
    /// direct access and a call into the emulated-memory runtime. For an
    /// address already known unsafe at translation time the fast arm is
    /// elided and only the call is emitted.
    GuardedBranch,
}

impl core::fmt::Display for AccessStrategy {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            AccessStrategy::PureFast => "pure-fast",
            AccessStrategy::FastWithBackpatch => "fast-with-backpatch",
            AccessStrategy::GuardedBranch => "guarded-branch",
        };

        fmt.write_str(name)
    }
}

impl AccessStrategy {
    /// Picks the strategy for one access. Pure: identical inputs always
    /// produce the identical strategy, and nothing is emitted here.
    pub fn select(config: &Config, mask: AddressMask, address: &AddressOperand, offset: i32) -> AccessStrategy {
        // Direct-mapped memory is an explicit trust boundary: when it's on
        // the residual risk of an out-of-range access is accepted and
        // recovery is delegated to the fault handler, no matter what kind
        // of address we were given.
        if config.fast_direct_memory && !config.mmu_emulation && !config.debugger {
            return AccessStrategy::FastWithBackpatch;
        }

        match *address {
            AddressOperand::Immediate(immediate) => {
                let address = immediate.wrapping_add(offset as u32);
                if mask.classifies_as_safe(address) {
                    AccessStrategy::PureFast
                } else {
                    AccessStrategy::GuardedBranch
                }
            }
            AddressOperand::Register(_) => AccessStrategy::GuardedBranch,
        }
    }
}
