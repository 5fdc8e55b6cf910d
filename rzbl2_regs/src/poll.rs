// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{PhysAddr, RegisterStore};
use log::trace;
use thiserror::Error;

/// Time between two reads of a monitor register.
pub const POLL_DELAY_MS: u32 = 10;

/// Busy-wait provider (the platform's `mdelay`).
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// Decides when a poll stops waiting.
///
/// Asked once after every read that did not match.
pub trait Deadline {
    fn expired(&mut self) -> bool;
}

/// Never expires. A monitor that never settles hangs the boot, which is
/// what the hardware sequence expects.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl Deadline for Unbounded {
    fn expired(&mut self) -> bool {
        false
    }
}

/// Expires after a fixed number of failed checks.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    remaining: u32,
}

impl PollBudget {
    pub fn new(retries: u32) -> PollBudget {
        PollBudget { remaining: retries }
    }
}

impl Deadline for PollBudget {
    fn expired(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}

/// A poll ran out of its injected deadline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("register {addr:#x} still reads {last:#x} after {polls} polls, wanted {expected:#x}")]
pub struct PollTimeout {
    pub addr: PhysAddr,
    pub expected: u32,
    pub last: u32,
    pub polls: u32,
}

/// Read `addr` until it equals `expected`, delaying [`POLL_DELAY_MS`]
/// between reads. Returns how many reads it took.
pub fn poll_until<R, D, L>(
    regs: &mut R,
    delay: &mut D,
    deadline: &mut L,
    addr: PhysAddr,
    expected: u32,
) -> Result<u32, PollTimeout>
where
    R: RegisterStore + ?Sized,
    D: Delay + ?Sized,
    L: Deadline + ?Sized,
{
    let mut polls: u32 = 0;
    loop {
        let last = regs.read32(addr);
        polls = polls.saturating_add(1);

        if last == expected {
            trace!("BL2: {addr:#x} reads {expected:#x} after {polls} polls");
            return Ok(polls);
        }

        if deadline.expired() {
            return Err(PollTimeout {
                addr,
                expected,
                last,
                polls,
            });
        }

        delay.delay_ms(POLL_DELAY_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CountingDelay, MockRegisters};

    #[test]
    fn settles_after_the_scripted_number_of_reads() {
        let mut regs = MockRegisters::new();
        regs.monitor(0x40, 0x0, 0x1, 3);
        let mut delay = CountingDelay::default();

        let polls = poll_until(&mut regs, &mut delay, &mut Unbounded, 0x40, 0x1).unwrap();

        assert_eq!(polls, 4);
        assert_eq!(delay.calls, 3);
        assert_eq!(delay.total_ms, 3 * u64::from(POLL_DELAY_MS));
    }

    #[test]
    fn budget_turns_a_stuck_monitor_into_a_timeout() {
        let mut regs = MockRegisters::new();
        regs.stick(0x40, 0x7);
        let mut delay = CountingDelay::default();

        let err = poll_until(&mut regs, &mut delay, &mut PollBudget::new(5), 0x40, 0x0)
            .unwrap_err();

        assert_eq!(
            err,
            PollTimeout {
                addr: 0x40,
                expected: 0x0,
                last: 0x7,
                polls: 6,
            }
        );
        assert_eq!(delay.calls, 5);
    }

    #[test]
    fn already_settled_register_needs_no_delay() {
        let mut regs = MockRegisters::new();
        regs.preset(0x40, 0x3);
        let mut delay = CountingDelay::default();

        assert_eq!(
            poll_until(&mut regs, &mut delay, &mut PollBudget::new(0), 0x40, 0x3),
            Ok(1)
        );
        assert_eq!(delay.calls, 0);
    }
}
