// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::{Bl2Config, ExecWidth, Topology};
use crate::error::{BootError, InitError, InitStage, PlatformError};
use crate::handoff::{Handoff, Transfer};
use crate::platform::{AuthModule, CryptoModule, FirmwareUpdate, MeasuredBootBackend, Platform};
use crate::{BUILD_MESSAGE, VERSION_STRING};
use log::{debug, error, info, warn};
use rzbl2_images::{ChainLoader, ImageChain, ImageSource, ResolvedHandoff};
use rzbl2_regs::cm33::Cm33;
use rzbl2_regs::{Deadline, Delay, RegisterStore, Unbounded};
use std::convert::Infallible;
use std::error::Error as _;

/// Everything BL2 calls out to.
pub struct Collaborators<'a> {
    pub platform: &'a mut dyn Platform,
    pub crypto: &'a mut dyn CryptoModule,
    pub auth: &'a mut dyn AuthModule,
    pub measured_boot: &'a mut dyn MeasuredBootBackend,
    /// Required when the configuration enables firmware update.
    pub fwu: Option<&'a mut dyn FirmwareUpdate>,
    pub source: &'a mut dyn ImageSource,
    pub regs: &'a mut dyn RegisterStore,
    pub delay: &'a mut dyn Delay,
    /// Bounds the CM33 monitor polls. `None` waits forever.
    pub deadline: Option<&'a mut dyn Deadline>,
    pub handoff: &'a mut dyn Handoff,
}

/// The second boot stage: one pass from setup to handoff.
pub struct Bl2<'a> {
    config: Bl2Config,
    chain: ImageChain,
    io: Collaborators<'a>,
}

impl<'a> Bl2<'a> {
    /// Builds and validates the image chain up front so a malformed chain
    /// is never walked.
    pub fn new(config: Bl2Config, io: Collaborators<'a>) -> Result<Bl2<'a>, BootError> {
        let chain = config.profile().build()?;
        Ok(Bl2 { config, chain, io })
    }

    pub fn config(&self) -> &Bl2Config {
        &self.config
    }

    pub fn chain(&self) -> &ImageChain {
        &self.chain
    }

    /// Early platform setup and BL2's own translation tables.
    pub fn setup(&mut self, args: [u64; 4]) -> Result<(), BootError> {
        let platform = &mut *self.io.platform;
        platform.early_platform_setup(args)?;
        platform.plat_arch_setup()?;
        if self.config.pauth && !platform.pauth_present() {
            return Err(PlatformError::PauthMissing.into());
        }
        Ok(())
    }

    /// Initialise, load, start the CM33, tear down and hand off. Only
    /// returns on failure.
    pub fn main(&mut self) -> Result<Infallible, BootError> {
        info!("BL2: {VERSION_STRING}");
        info!("BL2: {BUILD_MESSAGE}");

        self.io.platform.arch_setup()?;

        if self.config.firmware_update {
            let fwu = self.io.fwu.as_deref_mut().ok_or(BootError::Init {
                stage: InitStage::FirmwareUpdate,
                source: InitError::Unsupported,
            })?;
            fwu.init().map_err(BootError::init(InitStage::FirmwareUpdate))?;
        }

        self.io
            .crypto
            .init()
            .map_err(BootError::init(InitStage::Crypto))?;
        self.io
            .auth
            .init()
            .map_err(BootError::init(InitStage::Auth))?;
        self.io
            .measured_boot
            .init()
            .map_err(BootError::init(InitStage::MeasuredBoot))?;

        self.io.platform.preload_setup()?;

        let next = self.load_images()?;

        self.start_cm33()?;

        self.io
            .measured_boot
            .finish()
            .map_err(BootError::init(InitStage::MeasuredBootFinish))?;

        self.prepare_exit(&next);

        // Terminal: a successful transfer does not come back.
        let transfer = Transfer::for_topology(self.config.topology);
        Err(self.io.handoff.run_next_image(transfer, next).into())
    }

    pub fn run(&mut self, args: [u64; 4]) -> Result<Infallible, BootError> {
        self.setup(args)?;
        self.main()
    }

    /// Run and, on any failure, end in the platform panic path.
    pub fn boot(mut self, args: [u64; 4]) -> ! {
        match self.run(args) {
            Ok(never) => match never {},
            Err(err) => {
                log_fatal(&err);
                self.io.platform.panic(&err)
            }
        }
    }

    fn load_images(&mut self) -> Result<ResolvedHandoff, BootError> {
        let io = &mut self.io;
        let mut loader = ChainLoader {
            source: &mut *io.source,
            auth: &mut *io.auth,
            measure: &mut *io.measured_boot,
            hooks: &mut *io.platform,
            params_base: self.config.memory_map.params_base,
        };
        Ok(loader.load_chain(&self.chain, self.chain.head())?)
    }

    fn start_cm33(&mut self) -> Result<(), BootError> {
        let cfg = &self.config.cm33;
        if !cfg.enabled {
            info!("BL2: CM33 disabled");
            return Ok(());
        }

        let io = &mut self.io;
        let mut cm33 = Cm33::new(&mut *io.regs, &mut *io.delay);
        let bring_up = match io.deadline.as_deref_mut() {
            Some(deadline) => cm33.start(
                cfg.mode(),
                cfg.secure_vector,
                cfg.non_secure_vector,
                deadline,
            ),
            None => cm33.start(
                cfg.mode(),
                cfg.secure_vector,
                cfg.non_secure_vector,
                &mut Unbounded,
            ),
        }?;

        let mismatches = bring_up.mismatches().count();
        if mismatches != 0 {
            warn!("BL2: CM33 started with {mismatches} register(s) not reading back");
        }
        Ok(())
    }

    fn prepare_exit(&mut self, next: &ResolvedHandoff) {
        let platform = &mut *self.io.platform;
        match self.config.topology {
            Topology::El3 => {
                info!("BL2: Booting BL31");
                info!("BL2: Entry point address = {:#x}", next.ep.pc);
                info!("BL2: SPSR = {:#x}", next.ep.spsr.0);
                for (i, arg) in next.ep.args.iter().enumerate() {
                    debug!("BL2: arg{i} = {arg:#x}");
                }
                platform.console_flush();
            }
            Topology::Sel1 => {
                if self.config.execution_width == ExecWidth::Aarch32 {
                    platform.disable_mmu_icache();
                }
                platform.console_flush();
            }
        }
        if self.config.pauth {
            platform.disable_pauth(self.config.topology.exception_level());
        }
    }
}

fn log_fatal(err: &BootError) {
    error!("BL2: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        error!("BL2:   caused by: {cause}");
        source = cause.source();
    }
}
