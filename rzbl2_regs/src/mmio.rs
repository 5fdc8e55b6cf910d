// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{PhysAddr, RegisterStore};

/// Registers reached by volatile loads and stores at their physical
/// address.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// # Safety
    ///
    /// Every address later passed to this store must be a mapped, 4-byte
    /// aligned device (or memory) location that nothing else is accessing
    /// concurrently. On BL2 that holds because the stage is single-threaded
    /// and runs with the SoC register space identity mapped.
    pub const unsafe fn new() -> Mmio {
        Mmio { _private: () }
    }
}

impl RegisterStore for Mmio {
    fn read32(&mut self, addr: PhysAddr) -> u32 {
        // Safety: upheld by the contract of `Mmio::new`.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn write32(&mut self, addr: PhysAddr, value: u32) {
        // Safety: upheld by the contract of `Mmio::new`.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}
