// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the orchestrator needs from the rest of the firmware.

use crate::error::{BootError, InitError, PlatformError};
use rzbl2_images::{Authenticator, ExceptionLevel, LoadHooks, MeasuredBoot};

/// Board-specific setup and teardown. The [`LoadHooks`] half is called by
/// the chain loader around every image.
pub trait Platform: LoadHooks {
    /// Console, boot arguments and the basic memory map.
    fn early_platform_setup(&mut self, args: [u64; 4]) -> Result<(), PlatformError>;

    /// Translation tables for BL2's own execution.
    fn plat_arch_setup(&mut self) -> Result<(), PlatformError>;

    /// Exception vectors and architectural state.
    fn arch_setup(&mut self) -> Result<(), PlatformError>;

    fn pauth_present(&self) -> bool {
        false
    }

    /// Select the boot device subsequent loads read from.
    fn preload_setup(&mut self) -> Result<(), PlatformError>;

    fn console_flush(&mut self);

    fn disable_mmu_icache(&mut self);

    /// Turn off pointer authentication for the level BL2 leaves from.
    fn disable_pauth(&mut self, el: ExceptionLevel);

    /// Halt or reset. Never returns.
    fn panic(&mut self, err: &BootError) -> !;
}

pub trait CryptoModule {
    fn init(&mut self) -> Result<(), InitError>;
}

pub trait AuthModule: Authenticator {
    fn init(&mut self) -> Result<(), InitError>;
}

pub trait MeasuredBootBackend: MeasuredBoot {
    fn init(&mut self) -> Result<(), InitError>;

    /// Seal the event log.
    fn finish(&mut self) -> Result<(), InitError>;
}

pub trait FirmwareUpdate {
    fn init(&mut self) -> Result<(), InitError>;
}
