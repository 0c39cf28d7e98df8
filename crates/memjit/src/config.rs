use crate::error::{bail, Error};

/// A snapshot of the emulator-wide memory-model flags.
///
/// A `Config` is taken by value when a translation session starts and stays
/// fixed for the whole session; none of the emitted code depends on flags
/// read after that point.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) mmu_emulation: bool,
    pub(crate) tlb_aliasing: bool,
    pub(crate) fast_direct_memory: bool,
    pub(crate) debugger: bool,
    pub(crate) mem_check: bool,
    pub(crate) accurate_single_precision: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, Error> {
    if let Some(value) = std::env::var_os(name) {
        if value == "1" || value == "true" {
            Ok(Some(true))
        } else if value == "0" || value == "false" {
            Ok(Some(false))
        } else {
            bail!("invalid value of {name}; must be either '1' or '0'")
        }
    } else {
        Ok(None)
    }
}

impl Config {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Config {
            mmu_emulation: false,
            tlb_aliasing: false,
            fast_direct_memory: false,
            debugger: false,
            mem_check: false,
            accurate_single_precision: false,
        }
    }

    /// Creates a new default configuration and seeds it from the environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();
        if let Some(value) = env_bool("MEMJIT_MMU")? {
            config.mmu_emulation = value;
        }

        if let Some(value) = env_bool("MEMJIT_TLB_ALIASING")? {
            config.tlb_aliasing = value;
        }

        if let Some(value) = env_bool("MEMJIT_FASTMEM")? {
            config.fast_direct_memory = value;
        }

        if let Some(value) = env_bool("MEMJIT_DEBUGGER")? {
            config.debugger = value;
        }

        if let Some(value) = env_bool("MEMJIT_MEM_CHECK")? {
            config.mem_check = value;
        }

        if let Some(value) = env_bool("MEMJIT_ACCURATE_SINGLES")? {
            config.accurate_single_precision = value;
        }

        Ok(config)
    }

    /// Enables full MMU emulation. Every access whose safety cannot be
    /// proven at translation time is routed through a runtime check.
    ///
    /// Default: `false`
    ///
    /// Corresponding environment variable: `MEMJIT_MMU` (`true`, `false`)
    pub fn set_mmu_emulation(&mut self, value: bool) -> &mut Self {
        self.mmu_emulation = value;
        self
    }

    pub fn mmu_emulation(&self) -> bool {
        self.mmu_emulation
    }

    /// Treats the primary guest RAM region as aliased, widening the address
    /// mask the same way full MMU emulation does.
    ///
    /// Default: `false`
    ///
    /// Corresponding environment variable: `MEMJIT_TLB_ALIASING` (`true`, `false`)
    pub fn set_tlb_aliasing(&mut self, value: bool) -> &mut Self {
        self.tlb_aliasing = value;
        self
    }

    pub fn tlb_aliasing(&self) -> bool {
        self.tlb_aliasing
    }

    /// Maps guest addresses directly into the host arena with no runtime
    /// check at all; an out-of-range access traps and is recovered
    /// out-of-band using the registered patch-site bookkeeping.
    ///
    /// Default: `false`
    ///
    /// Corresponding environment variable: `MEMJIT_FASTMEM` (`true`, `false`)
    pub fn set_fast_direct_memory(&mut self, value: bool) -> &mut Self {
        self.fast_direct_memory = value;
        self
    }

    pub fn fast_direct_memory(&self) -> bool {
        self.fast_direct_memory
    }

    /// Enables debugger support. Widens the address mask to cover the
    /// extended memory region and disqualifies the direct-mapped fast path.
    ///
    /// Default: `false`
    ///
    /// Corresponding environment variable: `MEMJIT_DEBUGGER` (`true`, `false`)
    pub fn set_debugger(&mut self, value: bool) -> &mut Self {
        self.debugger = value;
        self
    }

    pub fn debugger(&self) -> bool {
        self.debugger
    }

    /// Makes slow-path calls visible to the watchpoint machinery: the
    /// result conversion after each call is emitted inside a region which is
    /// skipped when the call left a data fault pending.
    ///
    /// Default: `false`
    ///
    /// Corresponding environment variable: `MEMJIT_MEM_CHECK` (`true`, `false`)
    pub fn set_mem_check(&mut self, value: bool) -> &mut Self {
        self.mem_check = value;
        self
    }

    pub fn mem_check(&self) -> bool {
        self.mem_check
    }

    /// Emulates the guest FPU's single-precision rounding by narrowing
    /// affected double-precision values on every operation.
    ///
    /// Default: `false`
    ///
    /// Corresponding environment variable: `MEMJIT_ACCURATE_SINGLES` (`true`, `false`)
    pub fn set_accurate_single_precision(&mut self, value: bool) -> &mut Self {
        self.accurate_single_precision = value;
        self
    }

    pub fn accurate_single_precision(&self) -> bool {
        self.accurate_single_precision
    }
}
