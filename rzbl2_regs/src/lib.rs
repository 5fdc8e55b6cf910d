// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register access for BL2.
//!
//! Everything that touches hardware goes through [`RegisterStore`], so the
//! same sequences run against real MMIO on the target and against
//! [`mock::MockRegisters`] on a host.

use log::{debug, warn};

pub mod cm33;
pub mod mmio;
pub mod mock;
pub mod poll;

pub use poll::{poll_until, Deadline, Delay, PollBudget, PollTimeout, Unbounded, POLL_DELAY_MS};

/// Physical address of a 32-bit register.
pub type PhysAddr = usize;

/// Something 32-bit registers can be read from and written to.
pub trait RegisterStore {
    fn read32(&mut self, addr: PhysAddr) -> u32;
    fn write32(&mut self, addr: PhysAddr, value: u32);
}

impl<T: RegisterStore + ?Sized> RegisterStore for &mut T {
    fn read32(&mut self, addr: PhysAddr) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&mut self, addr: PhysAddr, value: u32) {
        (**self).write32(addr, value)
    }
}

/// A write and what the register held when it was read straight back.
///
/// Only ever used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterTransaction {
    pub addr: PhysAddr,
    pub intended: u32,
    pub observed: u32,
}

impl RegisterTransaction {
    pub fn matched(&self) -> bool {
        self.intended == self.observed
    }
}

/// Result of [`write_register`].
///
/// A mismatch is a soft outcome: it has been logged and the caller carries
/// on. It is deliberately not an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Verified(RegisterTransaction),
    Mismatch(RegisterTransaction),
}

impl WriteOutcome {
    pub fn transaction(&self) -> RegisterTransaction {
        match *self {
            WriteOutcome::Verified(t) | WriteOutcome::Mismatch(t) => t,
        }
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, WriteOutcome::Mismatch(_))
    }
}

/// Write `value` to `addr` and read it back.
pub fn write_register<R: RegisterStore + ?Sized>(
    regs: &mut R,
    addr: PhysAddr,
    value: u32,
) -> WriteOutcome {
    regs.write32(addr, value);
    let observed = regs.read32(addr);
    let txn = RegisterTransaction {
        addr,
        intended: value,
        observed,
    };

    if txn.matched() {
        debug!("BL2: Write register addr = {addr:#x} <-- value = {value:#x} - passed");
        WriteOutcome::Verified(txn)
    } else {
        warn!(
            "BL2: Write register addr = {addr:#x} <-- value = {value:#x} - failed \
             (read back {observed:#x})"
        );
        WriteOutcome::Mismatch(txn)
    }
}
