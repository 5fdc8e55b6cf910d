// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-boot runs against recording collaborators.

use rzbl2::{
    AuthModule, Bl2, Bl2Config, BootError, Collaborators, CryptoModule, ExecWidth,
    FirmwareUpdate, Handoff, HandoffRejected, InitError, InitStage, MeasuredBootBackend,
    Platform, PlatformError, Topology, Transfer, BL1_SMC_RUN_IMAGE,
};
use rzbl2_images::{
    AuthError, Authenticator, ExceptionLevel, ImageDescNode, ImageId, ImageSource,
    LoadChainError, LoadError, LoadHooks, LoadedImage, MeasureError, MeasuredBoot, NextBlParams,
    ResolvedHandoff,
};
use rzbl2_regs::cm33::*;
use rzbl2_regs::mock::{CountingDelay, MockRegisters};
use rzbl2_regs::{Deadline, PhysAddr, PollBudget, RegisterStore};
use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

#[derive(Default)]
struct Shared {
    log: Vec<String>,
    handoff: Option<(Transfer, ResolvedHandoff)>,
    params: Option<NextBlParams>,
}

/// Plays every collaborator; clones share one log.
#[derive(Clone, Default)]
struct Board {
    shared: Rc<RefCell<Shared>>,
    fail: Option<&'static str>,
    missing: Option<ImageId>,
    pauth: bool,
}

impl Board {
    fn step(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        let failing = self.fail == Some(name.as_str());
        self.shared.borrow_mut().log.push(name);
        failing
    }

    fn init_step(&self, name: &str) -> Result<(), InitError> {
        if self.step(name) {
            return Err(InitError::Hardware(name.to_owned()));
        }
        Ok(())
    }

    fn hook(&self, name: &str) -> Result<(), PlatformError> {
        if self.step(name) {
            return Err(PlatformError::Status(-1));
        }
        Ok(())
    }

    fn log(&self) -> Vec<String> {
        self.shared.borrow().log.clone()
    }
}

impl LoadHooks for Board {
    fn platform_setup(&mut self) {
        self.step("platform-setup");
    }

    fn flush_next_bl_params(&mut self, params: &NextBlParams) -> Result<(), rzbl2_images::HookError> {
        self.step("flush-params");
        self.shared.borrow_mut().params = Some(params.clone());
        Ok(())
    }
}

impl Platform for Board {
    fn early_platform_setup(&mut self, args: [u64; 4]) -> Result<(), PlatformError> {
        assert_eq!(args, [1, 2, 3, 4]);
        self.hook("early-setup")
    }

    fn plat_arch_setup(&mut self) -> Result<(), PlatformError> {
        self.hook("plat-arch-setup")
    }

    fn arch_setup(&mut self) -> Result<(), PlatformError> {
        self.hook("arch-setup")
    }

    fn pauth_present(&self) -> bool {
        self.pauth
    }

    fn preload_setup(&mut self) -> Result<(), PlatformError> {
        self.hook("preload-setup")
    }

    fn console_flush(&mut self) {
        self.step("console-flush");
    }

    fn disable_mmu_icache(&mut self) {
        self.step("disable-mmu");
    }

    fn disable_pauth(&mut self, el: ExceptionLevel) {
        self.step(format!("disable-pauth {el:?}"));
    }

    fn panic(&mut self, err: &BootError) -> ! {
        panic!("platform panic: {err}");
    }
}

impl CryptoModule for Board {
    fn init(&mut self) -> Result<(), InitError> {
        self.init_step("crypto-init")
    }
}

impl Authenticator for Board {
    fn authenticate(&mut self, image: &LoadedImage) -> Result<(), AuthError> {
        self.step(format!("auth {}", image.id));
        Ok(())
    }
}

impl AuthModule for Board {
    fn init(&mut self) -> Result<(), InitError> {
        self.init_step("auth-init")
    }
}

impl MeasuredBoot for Board {
    fn measure_image(&mut self, image: &LoadedImage) -> Result<(), MeasureError> {
        self.step(format!("measure {}", image.id));
        Ok(())
    }
}

impl MeasuredBootBackend for Board {
    fn init(&mut self) -> Result<(), InitError> {
        self.init_step("mboot-init")
    }

    fn finish(&mut self) -> Result<(), InitError> {
        self.init_step("mboot-finish")
    }
}

impl FirmwareUpdate for Board {
    fn init(&mut self) -> Result<(), InitError> {
        self.init_step("fwu-init")
    }
}

impl ImageSource for Board {
    fn load_image(&mut self, node: &ImageDescNode) -> Result<u32, LoadError> {
        self.step(format!("load {}", node.id));
        if self.missing == Some(node.id) {
            return Err(LoadError::NotFound);
        }
        Ok(node.image.max_size.min(0x100))
    }
}

impl Handoff for Board {
    fn run_next_image(&mut self, transfer: Transfer, next: ResolvedHandoff) -> HandoffRejected {
        self.step("handoff");
        let image = next.image;
        self.shared.borrow_mut().handoff = Some((transfer, next));
        HandoffRejected { image, status: -1 }
    }
}

/// Logs the CM33 clock and reset writes into the board log.
struct TracedRegs {
    inner: MockRegisters,
    board: Board,
}

impl RegisterStore for TracedRegs {
    fn read32(&mut self, addr: PhysAddr) -> u32 {
        self.inner.read32(addr)
    }

    fn write32(&mut self, addr: PhysAddr, value: u32) {
        match addr {
            CPG_CLKON_CM33 => {
                self.board.step("cm33-clock");
            }
            CPG_RST_CM33 => {
                self.board.step("cm33-reset");
            }
            _ => {}
        }
        self.inner.write32(addr, value)
    }
}

struct Rig {
    board: Board,
    regs: TracedRegs,
    delay: CountingDelay,
    config: Bl2Config,
}

impl Rig {
    fn new(config: Bl2Config) -> Rig {
        let board = Board::default();
        let mut inner = MockRegisters::new();
        inner.monitor(CPG_CLKMON_CM33, 0x0, 0x1, 2);
        inner.monitor(CPG_RSTMON_CM33, 0x7, 0x0, 2);
        Rig {
            regs: TracedRegs {
                inner,
                board: board.clone(),
            },
            board,
            delay: CountingDelay::default(),
            config,
        }
    }

    fn run(&mut self, poll_budget: Option<u32>) -> Result<Infallible, BootError> {
        let mut platform = self.board.clone();
        let mut crypto = self.board.clone();
        let mut auth = self.board.clone();
        let mut mboot = self.board.clone();
        let mut fwu = self.board.clone();
        let mut source = self.board.clone();
        let mut handoff = self.board.clone();
        let mut budget = poll_budget.map(PollBudget::new);
        self.regs.board = self.board.clone();

        let io = Collaborators {
            platform: &mut platform,
            crypto: &mut crypto,
            auth: &mut auth,
            measured_boot: &mut mboot,
            fwu: Some(&mut fwu),
            source: &mut source,
            regs: &mut self.regs,
            delay: &mut self.delay,
            deadline: budget.as_mut().map(|b| b as &mut dyn Deadline),
            handoff: &mut handoff,
        };
        let mut bl2 = Bl2::new(self.config.clone(), io)?;
        bl2.run([1, 2, 3, 4])
    }

    fn log(&self) -> Vec<String> {
        self.board.log()
    }

    fn handoff(&self) -> Option<(Transfer, ResolvedHandoff)> {
        self.board.shared.borrow_mut().handoff.take()
    }
}

const CHAIN: [&str; 7] = [
    "bl31",
    "fw-config",
    "hw-config",
    "soc-fw-config",
    "rmm",
    "bl331",
    "bl332",
];

#[test]
fn full_boot_follows_the_fixed_order() {
    let mut rig = Rig::new(Bl2Config {
        firmware_update: true,
        ..Default::default()
    });
    let err = rig.run(None).unwrap_err();
    assert!(matches!(
        err,
        BootError::HandoffRejected(HandoffRejected {
            image: ImageId::BL31,
            ..
        })
    ));

    let mut expected: Vec<String> = [
        "early-setup",
        "plat-arch-setup",
        "arch-setup",
        "fwu-init",
        "crypto-init",
        "auth-init",
        "mboot-init",
        "preload-setup",
        "platform-setup",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for image in CHAIN {
        expected.push(format!("load {image}"));
        expected.push(format!("auth {image}"));
        expected.push(format!("measure {image}"));
    }
    expected.extend(
        [
            "flush-params",
            "cm33-clock",
            "cm33-reset",
            "mboot-finish",
            "console-flush",
            "handoff",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    assert_eq!(rig.log(), expected);

    let (transfer, next) = rig.handoff().unwrap();
    assert_eq!(transfer, Transfer::Direct);
    assert_eq!(next.image, ImageId::BL31);
    assert_eq!(next.ep.pc, 0x4400_0000);
    assert_eq!(next.ep.args[0], rig.config.memory_map.params_base);
    assert_eq!(next.ep.spsr.el(), 3);

    let params = rig.board.shared.borrow().params.clone().unwrap();
    let ids: Vec<_> = params.entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![ImageId::BL31, ImageId::RMM, ImageId::BL332]);
}

#[test]
fn init_failure_is_fatal() {
    let mut rig = Rig::new(Bl2Config::default());
    rig.board.fail = Some("auth-init");
    let err = rig.run(None).unwrap_err();
    assert!(matches!(
        err,
        BootError::Init {
            stage: InitStage::Auth,
            ..
        }
    ));
    assert_eq!(rig.log().last().map(String::as_str), Some("auth-init"));
    assert!(!rig.log().iter().any(|s| s.starts_with("load")));
    assert!(rig.handoff().is_none());
}

#[test]
fn load_failure_stops_before_the_cm33() {
    let mut rig = Rig::new(Bl2Config::default());
    rig.board.missing = Some(ImageId::RMM);
    let err = rig.run(None).unwrap_err();
    assert!(matches!(
        err,
        BootError::Load(LoadChainError::Load {
            id: ImageId::RMM,
            source: LoadError::NotFound
        })
    ));
    let log = rig.log();
    assert_eq!(log.last().map(String::as_str), Some("load rmm"));
    assert!(!log.contains(&"load bl331".to_string()));
    assert!(!log.contains(&"cm33-clock".to_string()));
    assert!(!log.contains(&"mboot-finish".to_string()));
    assert!(rig.regs.inner.writes().is_empty());
}

#[test]
fn debug_kick_still_runs_normal_mode() {
    let mut rig = Rig::new(Bl2Config::default());
    assert!(rig.config.cm33.debug);
    rig.run(None).unwrap_err();

    let writes = rig.regs.inner.writes();
    let addrs: Vec<_> = writes.iter().map(|(a, _)| *a).collect();
    assert_eq!(
        addrs,
        vec![
            SYS_CM33_CFG0,
            SYS_CM33_CFG1,
            SYS_CM33_CFG2,
            SYS_CM33_CFG3,
            CPG_CLKON_CM33,
            CPG_RST_CM33,
        ]
    );
    assert!(writes.contains(&(SYS_CM33_CFG2, 0x1001_FF80)));
    assert!(writes.contains(&(SYS_CM33_CFG3, 0x0001_0000)));
    assert!(!addrs.contains(&SYS_CM33_CTL));
    assert!(!addrs.contains(&SYS_LP_CM33CTL1));
}

#[test]
fn read_back_mismatch_does_not_stop_the_boot() {
    let mut rig = Rig::new(Bl2Config::default());
    rig.regs.inner.stick(SYS_CM33_CFG2, 0xFFFF_FFFF);
    let err = rig.run(None).unwrap_err();
    assert!(matches!(err, BootError::HandoffRejected(_)));
    assert!(rig.log().contains(&"cm33-reset".to_string()));
}

#[test]
fn stuck_monitor_with_a_deadline_is_fatal() {
    let mut rig = Rig::new(Bl2Config::default());
    rig.regs.inner.monitor(CPG_RSTMON_CM33, 0x7, 0x0, u32::MAX);
    let err = rig.run(Some(3)).unwrap_err();
    match err {
        BootError::Coprocessor(timeout) => {
            assert_eq!(timeout.addr, CPG_RSTMON_CM33);
            assert_eq!(timeout.last, 0x7);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!rig.log().contains(&"mboot-finish".to_string()));
    assert!(rig.handoff().is_none());
}

#[test]
fn cm33_can_be_left_off() {
    let mut config = Bl2Config::default();
    config.cm33.enabled = false;
    let mut rig = Rig::new(config);
    rig.run(None).unwrap_err();
    assert!(rig.regs.inner.journal().is_empty());
    assert!(rig.log().contains(&"handoff".to_string()));
}

#[test]
fn sel1_aarch32_tears_down_before_the_smc() {
    let mut rig = Rig::new(Bl2Config {
        topology: Topology::Sel1,
        execution_width: ExecWidth::Aarch32,
        pauth: true,
        ..Default::default()
    });
    rig.board.pauth = true;
    rig.run(None).unwrap_err();

    let log = rig.log();
    assert_eq!(
        &log[log.len() - 5..],
        &["mboot-finish", "disable-mmu", "console-flush", "disable-pauth El1", "handoff"]
    );
    let (transfer, _) = rig.handoff().unwrap();
    assert_eq!(
        transfer,
        Transfer::Smc {
            fid: BL1_SMC_RUN_IMAGE
        }
    );
}

#[test]
fn el3_keeps_the_mmu_on() {
    let mut rig = Rig::new(Bl2Config {
        execution_width: ExecWidth::Aarch32,
        ..Default::default()
    });
    rig.run(None).unwrap_err();
    let log = rig.log();
    assert!(!log.contains(&"disable-mmu".to_string()));
    assert!(!log.iter().any(|s| s.starts_with("disable-pauth")));
    assert_eq!(&log[log.len() - 2..], &["console-flush", "handoff"]);
}

#[test]
fn el3_disables_pauth_at_el3_after_the_flush() {
    let mut rig = Rig::new(Bl2Config {
        pauth: true,
        ..Default::default()
    });
    rig.board.pauth = true;
    rig.run(None).unwrap_err();
    let log = rig.log();
    assert_eq!(
        &log[log.len() - 3..],
        &["console-flush", "disable-pauth El3", "handoff"]
    );
}

#[test]
fn pauth_context_needs_pauth_hardware() {
    let mut rig = Rig::new(Bl2Config {
        pauth: true,
        ..Default::default()
    });
    let err = rig.run(None).unwrap_err();
    assert!(matches!(
        err,
        BootError::Platform(PlatformError::PauthMissing)
    ));
    assert_eq!(rig.log(), vec!["early-setup", "plat-arch-setup"]);
}

#[test]
fn bl32_joins_the_chain_when_configured() {
    let mut config = Bl2Config::default();
    config.chain.bl32 = true;
    let mut rig = Rig::new(config);
    rig.run(None).unwrap_err();
    let loads: Vec<_> = rig
        .log()
        .into_iter()
        .filter(|s| s.starts_with("load "))
        .collect();
    assert_eq!(loads.len(), 8);
    assert_eq!(loads[1], "load bl32");
}
