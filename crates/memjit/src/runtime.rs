use core::cell::Cell;

use crate::access::AccessWidth;

/// A zero-extending read of one guest address.
pub type ReadFn = unsafe extern "C" fn(u32) -> u32;

/// A write of `(value, address)`. The plain variants convert the value to
/// guest byte order themselves; the `_swapped` variants expect a value
/// which is already in guest byte order and store its bytes unchanged.
pub type WriteFn = unsafe extern "C" fn(u32, u32);

/// The emulated-memory runtime functions called by slow-path code.
///
/// These are external collaborators; the emitter only needs their
/// addresses. A reference implementation backed by a per-thread arena is
/// available through [`RuntimeFunctions::reference`] for embedders and
/// tests which don't bring their own.
#[derive(Copy, Clone)]
pub struct RuntimeFunctions {
    pub read_u8: ReadFn,
    pub read_u16: ReadFn,
    pub read_u32: ReadFn,
    pub write_u8: WriteFn,
    pub write_u16: WriteFn,
    pub write_u32: WriteFn,
    pub write_u16_swapped: WriteFn,
    pub write_u32_swapped: WriteFn,
}

impl RuntimeFunctions {
    pub fn reference() -> Self {
        RuntimeFunctions {
            read_u8: reference::read_u8,
            read_u16: reference::read_u16,
            read_u32: reference::read_u32,
            write_u8: reference::write_u8,
            write_u16: reference::write_u16,
            write_u32: reference::write_u32,
            write_u16_swapped: reference::write_u16_swapped,
            write_u32_swapped: reference::write_u32_swapped,
        }
    }

    pub(crate) fn read_address(&self, width: AccessWidth) -> u64 {
        let function = match width {
            AccessWidth::U8 => self.read_u8,
            AccessWidth::U16 => self.read_u16,
            AccessWidth::U32 => self.read_u32,
        };

        function as usize as u64
    }

    pub(crate) fn write_address(&self, width: AccessWidth, swap: bool) -> u64 {
        let function = match (width, swap) {
            (AccessWidth::U8, _) => self.write_u8,
            (AccessWidth::U16, true) => self.write_u16,
            (AccessWidth::U16, false) => self.write_u16_swapped,
            (AccessWidth::U32, true) => self.write_u32,
            (AccessWidth::U32, false) => self.write_u32_swapped,
        };

        function as usize as u64
    }
}

pub use reference::{bind_reference_arena, reference_call_counts, reset_reference_call_counts};

mod reference {
    //! A minimal stand-in for the emulated-memory subsystem: big-endian
    //! accesses into a per-thread arena, with addresses wrapped into the
    //! arena's length. Real embedders dispatch to MMIO and friends instead;
    //! the wrapping keeps tests small without caring where the mask places
    //! the unsafe regions.

    use super::Cell;

    std::thread_local! {
        static ARENA: Cell<(*mut u8, usize)> = const { Cell::new((core::ptr::null_mut(), 0)) };
        static SLOW_READS: Cell<usize> = const { Cell::new(0) };
        static SLOW_WRITES: Cell<usize> = const { Cell::new(0) };
    }

    /// Binds the arena the reference runtime functions operate on, for the
    /// current thread.
    ///
    /// # Safety
    ///
    /// `base` must stay valid for `length` bytes until the binding is
    /// replaced, and nothing else may alias it while any of the reference
    /// functions can be called.
    pub unsafe fn bind_reference_arena(base: *mut u8, length: usize) {
        ARENA.with(|cell| cell.set((base, length)));
    }

    /// Returns how many reference `(reads, writes)` ran on this thread.
    pub fn reference_call_counts() -> (usize, usize) {
        (SLOW_READS.with(Cell::get), SLOW_WRITES.with(Cell::get))
    }

    pub fn reset_reference_call_counts() {
        SLOW_READS.with(|cell| cell.set(0));
        SLOW_WRITES.with(|cell| cell.set(0));
    }

    fn read_byte(address: u32) -> u8 {
        ARENA.with(|cell| {
            let (base, length) = cell.get();
            if length == 0 {
                log::error!("out of range read at 0x{:08x}: no arena bound", address);
                return 0;
            }

            // SAFETY: The caller of `bind_reference_arena` promised the
            // pointer stays valid and unaliased; the index is wrapped into
            // the arena's length.
            unsafe { *base.add(address as usize % length) }
        })
    }

    fn write_byte(address: u32, value: u8) {
        ARENA.with(|cell| {
            let (base, length) = cell.get();
            if length == 0 {
                log::error!("out of range write at 0x{:08x}: no arena bound", address);
                return;
            }

            // SAFETY: Same as in `read_byte`.
            unsafe {
                *base.add(address as usize % length) = value;
            }
        });
    }

    pub unsafe extern "C" fn read_u8(address: u32) -> u32 {
        SLOW_READS.with(|cell| cell.set(cell.get() + 1));
        u32::from(read_byte(address))
    }

    pub unsafe extern "C" fn read_u16(address: u32) -> u32 {
        SLOW_READS.with(|cell| cell.set(cell.get() + 1));
        (u32::from(read_byte(address)) << 8) | u32::from(read_byte(address.wrapping_add(1)))
    }

    pub unsafe extern "C" fn read_u32(address: u32) -> u32 {
        SLOW_READS.with(|cell| cell.set(cell.get() + 1));
        (u32::from(read_byte(address)) << 24)
            | (u32::from(read_byte(address.wrapping_add(1))) << 16)
            | (u32::from(read_byte(address.wrapping_add(2))) << 8)
            | u32::from(read_byte(address.wrapping_add(3)))
    }

    pub unsafe extern "C" fn write_u8(value: u32, address: u32) {
        SLOW_WRITES.with(|cell| cell.set(cell.get() + 1));
        write_byte(address, value as u8);
    }

    pub unsafe extern "C" fn write_u16(value: u32, address: u32) {
        SLOW_WRITES.with(|cell| cell.set(cell.get() + 1));
        write_byte(address, (value >> 8) as u8);
        write_byte(address.wrapping_add(1), value as u8);
    }

    pub unsafe extern "C" fn write_u32(value: u32, address: u32) {
        SLOW_WRITES.with(|cell| cell.set(cell.get() + 1));
        write_byte(address, (value >> 24) as u8);
        write_byte(address.wrapping_add(1), (value >> 16) as u8);
        write_byte(address.wrapping_add(2), (value >> 8) as u8);
        write_byte(address.wrapping_add(3), value as u8);
    }

    pub unsafe extern "C" fn write_u16_swapped(value: u32, address: u32) {
        SLOW_WRITES.with(|cell| cell.set(cell.get() + 1));
        write_byte(address, value as u8);
        write_byte(address.wrapping_add(1), (value >> 8) as u8);
    }

    pub unsafe extern "C" fn write_u32_swapped(value: u32, address: u32) {
        SLOW_WRITES.with(|cell| cell.set(cell.get() + 1));
        write_byte(address, value as u8);
        write_byte(address.wrapping_add(1), (value >> 8) as u8);
        write_byte(address.wrapping_add(2), (value >> 16) as u8);
        write_byte(address.wrapping_add(3), (value >> 24) as u8);
    }
}
