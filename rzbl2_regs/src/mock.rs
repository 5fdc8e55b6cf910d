// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side stand-ins for hardware, used by tests and the simulator.

use crate::{Delay, PhysAddr, RegisterStore};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read { addr: PhysAddr, value: u32 },
    Write { addr: PhysAddr, value: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Monitor {
    before: u32,
    after: u32,
    ready_after: u32,
    reads: u32,
}

/// A register file backed by a map.
///
/// Plain registers read back what was last written (or zero). Two kinds
/// of register can be scripted on top of that:
/// * *stuck* registers ignore writes and always read a fixed value,
/// * *monitors* read `before` for a number of reads, then `after`.
#[derive(Debug, Default)]
pub struct MockRegisters {
    values: HashMap<PhysAddr, u32>,
    stuck: HashMap<PhysAddr, u32>,
    monitors: HashMap<PhysAddr, Monitor>,
    journal: Vec<Access>,
}

impl MockRegisters {
    pub fn new() -> MockRegisters {
        MockRegisters::default()
    }

    pub fn preset(&mut self, addr: PhysAddr, value: u32) {
        self.values.insert(addr, value);
    }

    pub fn stick(&mut self, addr: PhysAddr, value: u32) {
        self.stuck.insert(addr, value);
    }

    /// Reads of `addr` return `before` `ready_after` times, then `after`.
    /// Use `u32::MAX` for a monitor that never settles.
    pub fn monitor(&mut self, addr: PhysAddr, before: u32, after: u32, ready_after: u32) {
        self.monitors.insert(
            addr,
            Monitor {
                before,
                after,
                ready_after,
                reads: 0,
            },
        );
    }

    pub fn journal(&self) -> &[Access] {
        &self.journal
    }

    pub fn writes(&self) -> Vec<(PhysAddr, u32)> {
        self.journal
            .iter()
            .filter_map(|a| match *a {
                Access::Write { addr, value } => Some((addr, value)),
                Access::Read { .. } => None,
            })
            .collect()
    }

    pub fn reads_of(&self, addr: PhysAddr) -> usize {
        self.journal
            .iter()
            .filter(|a| matches!(a, Access::Read { addr: read, .. } if *read == addr))
            .count()
    }
}

impl RegisterStore for MockRegisters {
    fn read32(&mut self, addr: PhysAddr) -> u32 {
        let value = if let Some(v) = self.stuck.get(&addr) {
            *v
        } else if let Some(m) = self.monitors.get_mut(&addr) {
            if m.reads >= m.ready_after {
                m.after
            } else {
                m.reads += 1;
                m.before
            }
        } else {
            self.values.get(&addr).copied().unwrap_or(0)
        };
        self.journal.push(Access::Read { addr, value });
        value
    }

    fn write32(&mut self, addr: PhysAddr, value: u32) {
        self.journal.push(Access::Write { addr, value });
        if !self.stuck.contains_key(&addr) {
            self.values.insert(addr, value);
        }
    }
}

/// Counts delays instead of waiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingDelay {
    pub calls: u32,
    pub total_ms: u64,
}

impl Delay for CountingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls += 1;
        self.total_ms += u64::from(ms);
    }
}
