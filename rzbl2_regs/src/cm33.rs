// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up of the Cortex-M33 co-processor.
//!
//! The M33 sits behind the CPG (clock pulse generator) and the SYSC
//! configuration block. Starting it means programming its vector
//! addresses, supplying its clock, and releasing its resets, waiting on
//! the matching monitor register after each of the last two steps.
//!
//! Once the core is out of reset it runs on its own; nothing here talks to
//! it again.

use crate::{
    poll_until, write_register, Deadline, Delay, PhysAddr, PollTimeout, RegisterStore,
    RegisterTransaction,
};
use bitfield::bitfield;
use log::{info, warn};

/// PLL3 (SSCG) monitor
pub const CPG_SIPLL3_MON: PhysAddr = 0x1101_013C;
/// Clock control, Cortex-M33
pub const CPG_CLKON_CM33: PhysAddr = 0x1101_0504;
/// Clock monitor, Cortex-M33
pub const CPG_CLKMON_CM33: PhysAddr = 0x1101_0684;
/// Reset control, Cortex-M33
pub const CPG_RST_CM33: PhysAddr = 0x1101_0804;
/// Reset monitor, Cortex-M33
pub const CPG_RSTMON_CM33: PhysAddr = 0x1101_0984;

pub const SYS_CM33_CFG0: PhysAddr = 0x1102_0804;
pub const SYS_CM33_CFG1: PhysAddr = 0x1102_0808;
/// Secure vector address
pub const SYS_CM33_CFG2: PhysAddr = 0x1102_080C;
/// Non-secure vector address
pub const SYS_CM33_CFG3: PhysAddr = 0x1102_0810;
pub const SYS_CM33_CTL: PhysAddr = 0x1102_0818;
/// Low-power sequence control 1
pub const SYS_LP_CM33CTL1: PhysAddr = 0x1102_0D28;

/// CFG0/CFG1 timing when the SSCG PLL3 is running
pub const CFG_TIMING_PLL3_ON: u32 = 0x0010_3CE5;
/// CFG0/CFG1 timing otherwise
pub const CFG_TIMING_PLL3_OFF: u32 = 0x0000_3D08;

/// DEBUGQREQn request written to SYS_LP_CM33CTL1
pub const LP_CM33CTL1_DEBUGQREQN: u32 = 0x0000_1100;

/// Vectors BL2 starts the M33 with.
pub const SECURE_VECTOR: u32 = 0x1001_FF80;
pub const NON_SECURE_VECTOR: u32 = 0x0001_0000;

bitfield! {
    /// CPG_CLKON_CM33. Bits 16+ are write enables for the bit 16 places
    /// below them; a write only lands where its enable is set.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ClkOnCm33(u32);
    impl Debug;
    pub clkin, set_clkin: 0;
    pub tsclk, set_tsclk: 1;
    pub clkin_we, set_clkin_we: 16;
    pub tsclk_we, set_tsclk_we: 17;
}

impl ClkOnCm33 {
    pub fn supply(clkin: bool, tsclk: bool) -> ClkOnCm33 {
        let mut r = ClkOnCm33(0);
        r.set_clkin(clkin);
        r.set_clkin_we(clkin);
        r.set_tsclk(tsclk);
        r.set_tsclk_we(tsclk);
        r
    }
}

bitfield! {
    /// CPG_CLKMON_CM33: set bits are clocks actually being supplied.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ClkMonCm33(u32);
    impl Debug;
    pub clkin, set_clkin: 0;
    pub tsclk, set_tsclk: 1;
}

bitfield! {
    /// CPG_RST_CM33. A set bit releases the reset; write enables as for
    /// `ClkOnCm33`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RstCm33(u32);
    impl Debug;
    pub nporeset, set_nporeset: 0;
    pub nsysreset, set_nsysreset: 1;
    pub miscresetn, set_miscresetn: 2;
    pub nporeset_we, set_nporeset_we: 16;
    pub nsysreset_we, set_nsysreset_we: 17;
    pub miscresetn_we, set_miscresetn_we: 18;
}

impl RstCm33 {
    pub fn release_all() -> RstCm33 {
        let mut r = RstCm33(0);
        r.set_nporeset(true);
        r.set_nporeset_we(true);
        r.set_nsysreset(true);
        r.set_nsysreset_we(true);
        r.set_miscresetn(true);
        r.set_miscresetn_we(true);
        r
    }
}

bitfield! {
    /// SYS_CM33_CTL
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Cm33Ctl(u32);
    impl Debug;
    /// Holds the core at its first instruction fetch while set.
    pub fetchcnt, set_fetchcnt: 0;
}

impl Cm33Ctl {
    pub fn fetch_hold(hold: bool) -> Cm33Ctl {
        let mut r = Cm33Ctl(0);
        r.set_fetchcnt(hold);
        r
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Normal,
    Debug,
}

/// One completed step of a bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    TimingProfile { pll3_on: bool },
    SecureVector,
    NonSecureVector,
    ClockSupply,
    ClockMonitor { polls: u32 },
    DebugRequest,
    FetchHold,
    ResetRelease,
    ResetMonitor { polls: u32 },
    FetchRelease,
}

/// What a bring-up did, kept until the sequencer returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BringUp {
    pub requested: BootMode,
    pub executed: BootMode,
    pub secure_vector: u32,
    pub non_secure_vector: u32,
    pub steps: Vec<Step>,
    pub transactions: Vec<RegisterTransaction>,
}

impl BringUp {
    fn new(requested: BootMode, secure_vector: u32, non_secure_vector: u32) -> BringUp {
        BringUp {
            requested,
            executed: BootMode::Normal,
            secure_vector,
            non_secure_vector,
            steps: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &RegisterTransaction> {
        self.transactions.iter().filter(|t| !t.matched())
    }
}

/// Drives the M33 clock/reset/config registers.
pub struct Cm33<'a, R: RegisterStore + ?Sized, D: Delay + ?Sized> {
    regs: &'a mut R,
    delay: &'a mut D,
}

impl<'a, R: RegisterStore + ?Sized, D: Delay + ?Sized> Cm33<'a, R, D> {
    pub fn new(regs: &'a mut R, delay: &'a mut D) -> Self {
        Cm33 { regs, delay }
    }

    fn write(&mut self, state: &mut BringUp, addr: PhysAddr, value: u32) {
        let outcome = write_register(self.regs, addr, value);
        state.transactions.push(outcome.transaction());
    }

    /// Configure the vectors and start the core.
    ///
    /// `mode` is recorded in the returned [`BringUp`] but the core is always
    /// started with [`Cm33::boot_normal_mode`]; debug bring-up is only
    /// reachable by calling [`Cm33::boot_debug_mode`] directly.
    pub fn start<L: Deadline + ?Sized>(
        &mut self,
        mode: BootMode,
        secure_vector: u32,
        non_secure_vector: u32,
        deadline: &mut L,
    ) -> Result<BringUp, PollTimeout> {
        let mut state = BringUp::new(mode, secure_vector, non_secure_vector);
        if mode == BootMode::Debug {
            warn!("BL2: CM33 debug mode requested; starting in normal mode");
        }

        self.configure(&mut state);
        self.boot_normal_mode(&mut state, deadline)?;

        info!(
            "BL2: CM33 started (secure vector {secure_vector:#x}, \
             non-secure vector {non_secure_vector:#x})"
        );
        Ok(state)
    }

    /// Timing profile and vector addresses.
    pub fn configure(&mut self, state: &mut BringUp) {
        let pll3_on = self.regs.read32(CPG_SIPLL3_MON) & 0x1 == 0x1;
        let timing = if pll3_on {
            CFG_TIMING_PLL3_ON
        } else {
            CFG_TIMING_PLL3_OFF
        };
        self.write(state, SYS_CM33_CFG0, timing);
        self.write(state, SYS_CM33_CFG1, timing);
        state.steps.push(Step::TimingProfile { pll3_on });

        self.write(state, SYS_CM33_CFG2, state.secure_vector);
        state.steps.push(Step::SecureVector);

        self.write(state, SYS_CM33_CFG3, state.non_secure_vector);
        state.steps.push(Step::NonSecureVector);
    }

    pub fn boot_normal_mode<L: Deadline + ?Sized>(
        &mut self,
        state: &mut BringUp,
        deadline: &mut L,
    ) -> Result<(), PollTimeout> {
        state.executed = BootMode::Normal;

        self.write(state, CPG_CLKON_CM33, ClkOnCm33::supply(true, false).0);
        state.steps.push(Step::ClockSupply);

        let mut expected = ClkMonCm33(0);
        expected.set_clkin(true);
        let polls = poll_until(self.regs, self.delay, deadline, CPG_CLKMON_CM33, expected.0)?;
        state.steps.push(Step::ClockMonitor { polls });

        self.write(state, CPG_RST_CM33, RstCm33::release_all().0);
        state.steps.push(Step::ResetRelease);

        let polls = poll_until(self.regs, self.delay, deadline, CPG_RSTMON_CM33, 0)?;
        state.steps.push(Step::ResetMonitor { polls });

        Ok(())
    }

    /// Start the core halted at its first fetch with debug requested, then
    /// let it go.
    pub fn boot_debug_mode<L: Deadline + ?Sized>(
        &mut self,
        state: &mut BringUp,
        deadline: &mut L,
    ) -> Result<(), PollTimeout> {
        state.executed = BootMode::Debug;

        self.write(state, CPG_CLKON_CM33, ClkOnCm33::supply(true, true).0);
        state.steps.push(Step::ClockSupply);

        let mut expected = ClkMonCm33(0);
        expected.set_clkin(true);
        expected.set_tsclk(true);
        let polls = poll_until(self.regs, self.delay, deadline, CPG_CLKMON_CM33, expected.0)?;
        state.steps.push(Step::ClockMonitor { polls });

        // TODO: wait for DEBUGQACCEPTn once its bit in SYS_LP_CM33CTL1 is
        // documented.
        self.write(state, SYS_LP_CM33CTL1, LP_CM33CTL1_DEBUGQREQN);
        state.steps.push(Step::DebugRequest);

        self.write(state, SYS_CM33_CTL, Cm33Ctl::fetch_hold(true).0);
        state.steps.push(Step::FetchHold);

        self.write(state, CPG_RST_CM33, RstCm33::release_all().0);
        state.steps.push(Step::ResetRelease);

        let polls = poll_until(self.regs, self.delay, deadline, CPG_RSTMON_CM33, 0)?;
        state.steps.push(Step::ResetMonitor { polls });

        self.write(state, SYS_CM33_CTL, Cm33Ctl::fetch_hold(false).0);
        state.steps.push(Step::FetchRelease);

        Ok(())
    }
}

/// Start the M33 the way BL2 does on every boot.
pub fn kick_cm33<R, D>(regs: &mut R, delay: &mut D) -> Result<BringUp, PollTimeout>
where
    R: RegisterStore + ?Sized,
    D: Delay + ?Sized,
{
    Cm33::new(regs, delay).start(
        BootMode::Debug,
        SECURE_VECTOR,
        NON_SECURE_VECTOR,
        &mut crate::Unbounded,
    )
}
