// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-ins for everything BL2 talks to.

use crate::trailer;
use colored::Colorize;
use hex::ToHex as _;
use log::{debug, error, info, trace};
use rzbl2::{
    AuthModule, BootError, CryptoModule, FirmwareUpdate, Handoff, HandoffRejected, InitError,
    MeasuredBootBackend, Platform, PlatformError, Transfer,
};
use rzbl2_images::{
    AuthError, Authenticator, ExceptionLevel, HookError, ImageDescNode, ImageId, ImageSource,
    LoadError, LoadHooks, LoadedImage, MeasureError, MeasuredBoot, NextBlParams, ResolvedHandoff,
};
use rzbl2_regs::cm33::{
    CPG_CLKMON_CM33, CPG_CLKON_CM33, CPG_RSTMON_CM33, CPG_RST_CM33, CPG_SIPLL3_MON,
};
use rzbl2_regs::{Delay, PhysAddr, RegisterStore};
use sha2::{Digest as _, Sha256};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

/// Only the bytes that were written are stored.
#[derive(Debug, Default)]
pub struct SparseMemory {
    chunks: BTreeMap<u64, Vec<u8>>,
}

impl SparseMemory {
    pub fn write(&mut self, addr: u64, bytes: &[u8]) {
        self.chunks.insert(addr, bytes.to_vec());
    }

    pub fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let (base, chunk) = self.chunks.range(..=addr).next_back()?;
        let off = usize::try_from(addr - base).ok()?;
        chunk.get(off..off.checked_add(len)?)
    }
}

pub type Memory = Rc<RefCell<SparseMemory>>;

fn file_name(id: ImageId) -> String {
    match id.name() {
        Some(name) => format!("{name}.bin"),
        None => format!("image{}.bin", id.0),
    }
}

/// Reads `<dir>/<image>.bin` into simulated memory.
pub struct FileSource {
    pub dir: PathBuf,
    pub mem: Memory,
}

impl ImageSource for FileSource {
    fn load_image(&mut self, node: &ImageDescNode) -> Result<u32, LoadError> {
        let path = self.dir.join(file_name(node.id));
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("BL2: {} not found", path.display());
                return Err(LoadError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|len| *len <= node.image.max_size)
            .ok_or(LoadError::TooLarge {
                len: bytes.len() as u64,
                max_size: node.image.max_size,
            })?;
        self.mem.borrow_mut().write(node.image.load_base, &bytes);
        debug!(
            "BL2: {} -> {:#x} ({len:#x} bytes)",
            path.display(),
            node.image.load_base
        );
        Ok(len)
    }
}

fn loaded_bytes(mem: &Memory, image: &LoadedImage) -> Option<Vec<u8>> {
    let len = usize::try_from(image.len).ok()?;
    mem.borrow().read(image.base, len).map(<[u8]>::to_vec)
}

/// Checks the CRC trailer of every loaded image.
pub struct CrcAuthenticator {
    pub mem: Memory,
}

impl Authenticator for CrcAuthenticator {
    fn authenticate(&mut self, image: &LoadedImage) -> Result<(), AuthError> {
        let bytes = loaded_bytes(&self.mem, image).ok_or(AuthError::Truncated)?;
        trailer::check(&bytes)?;
        debug!("BL2: {} CRC passed", image.id);
        Ok(())
    }
}

impl AuthModule for CrcAuthenticator {
    fn init(&mut self) -> Result<(), InitError> {
        info!("BL2: authentication: CRC32/MPEG-2 trailer");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub id: ImageId,
    pub digest: [u8; 32],
}

#[derive(Debug, Default)]
pub struct EventLogState {
    pub entries: Vec<Measurement>,
    pub sealed: bool,
}

/// SHA-256 measured boot log.
pub struct EventLog {
    pub mem: Memory,
    pub state: Rc<RefCell<EventLogState>>,
    pub capacity: usize,
}

impl MeasuredBoot for EventLog {
    fn measure_image(&mut self, image: &LoadedImage) -> Result<(), MeasureError> {
        let mut state = self.state.borrow_mut();
        if state.sealed {
            return Err(MeasureError::Backend("event log already sealed".into()));
        }
        if state.entries.len() == self.capacity {
            return Err(MeasureError::LogFull);
        }
        let bytes = loaded_bytes(&self.mem, image)
            .ok_or_else(|| MeasureError::Backend(format!("{} is not in memory", image.id)))?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        trace!("BL2: {} sha256 {}", image.id, digest.encode_hex::<String>());
        state.entries.push(Measurement {
            id: image.id,
            digest,
        });
        Ok(())
    }
}

impl MeasuredBootBackend for EventLog {
    fn init(&mut self) -> Result<(), InitError> {
        let mut state = self.state.borrow_mut();
        state.entries.clear();
        state.sealed = false;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), InitError> {
        let mut state = self.state.borrow_mut();
        state.sealed = true;
        info!("BL2: event log sealed with {} measurements", state.entries.len());
        Ok(())
    }
}

pub struct SimCrypto;

impl CryptoModule for SimCrypto {
    fn init(&mut self) -> Result<(), InitError> {
        Ok(())
    }
}

pub struct SimFwu;

impl FirmwareUpdate for SimFwu {
    fn init(&mut self) -> Result<(), InitError> {
        info!("BL2: firmware update: nothing pending");
        Ok(())
    }
}

pub struct SimPlatform {
    pub mem: Memory,
    pub params_base: u64,
    pub boot_device: String,
    pub pauth: bool,
}

impl LoadHooks for SimPlatform {
    fn platform_setup(&mut self) {
        debug!("BL2: platform setup");
    }

    fn flush_next_bl_params(&mut self, params: &NextBlParams) -> Result<(), HookError> {
        let bytes = params.to_bytes().map_err(|e| {
            error!("BL2: cannot serialise next-stage parameters: {e}");
            HookError(-1)
        })?;
        self.mem.borrow_mut().write(self.params_base, &bytes);
        debug!(
            "BL2: {} entry point(s) published at {:#x}",
            params.entries.len(),
            self.params_base
        );
        Ok(())
    }
}

impl Platform for SimPlatform {
    fn early_platform_setup(&mut self, args: [u64; 4]) -> Result<(), PlatformError> {
        debug!("BL2: early setup, args {args:#x?}");
        Ok(())
    }

    fn plat_arch_setup(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn arch_setup(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn pauth_present(&self) -> bool {
        self.pauth
    }

    fn preload_setup(&mut self) -> Result<(), PlatformError> {
        info!("BL2: boot device {}", self.boot_device);
        Ok(())
    }

    fn console_flush(&mut self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }

    fn disable_mmu_icache(&mut self) {
        debug!("BL2: MMU and I-cache off");
    }

    fn disable_pauth(&mut self, el: ExceptionLevel) {
        debug!("BL2: pointer authentication off at {el:?}");
    }

    fn panic(&mut self, err: &BootError) -> ! {
        eprintln!("{}: {err}", "BL2 PANIC".red());
        std::process::exit(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    value: u32,
    reads_left: u32,
}

/// CM33 clock and reset controller. The monitors follow the control
/// registers after `settle` reads.
#[derive(Debug)]
pub struct SimCpg {
    regs: HashMap<PhysAddr, u32>,
    pending: HashMap<PhysAddr, Pending>,
    clocks: u32,
    released: u32,
    settle: u32,
}

impl SimCpg {
    pub fn new(settle: u32, pll3_on: bool) -> SimCpg {
        let mut regs = HashMap::new();
        regs.insert(CPG_SIPLL3_MON, u32::from(pll3_on));
        regs.insert(CPG_RSTMON_CM33, 0x7);
        SimCpg {
            regs,
            pending: HashMap::new(),
            clocks: 0,
            released: 0,
            settle,
        }
    }

    /// Apply the low half of `write` where its upper-half enable is set.
    fn masked(old: u32, write: u32) -> u32 {
        let enable = write >> 16;
        (old & !enable) | (write & enable & 0xFFFF)
    }

    fn schedule(&mut self, addr: PhysAddr, value: u32) {
        self.pending.insert(
            addr,
            Pending {
                value,
                reads_left: self.settle,
            },
        );
    }
}

impl RegisterStore for SimCpg {
    fn read32(&mut self, addr: PhysAddr) -> u32 {
        if let Some(p) = self.pending.get_mut(&addr) {
            if p.reads_left == 0 {
                let value = p.value;
                self.pending.remove(&addr);
                self.regs.insert(addr, value);
            } else {
                p.reads_left -= 1;
            }
        }
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn write32(&mut self, addr: PhysAddr, value: u32) {
        trace!("BL2: [{addr:#010x}] <- {value:#010x}");
        self.regs.insert(addr, value);
        match addr {
            CPG_CLKON_CM33 => {
                self.clocks = SimCpg::masked(self.clocks, value);
                self.schedule(CPG_CLKMON_CM33, self.clocks);
            }
            CPG_RST_CM33 => {
                self.released = SimCpg::masked(self.released, value);
                self.schedule(CPG_RSTMON_CM33, !self.released & 0x7);
            }
            _ => {}
        }
    }
}

pub struct HostDelay;

impl Delay for HostDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Prints where BL2 would jump and exits.
pub struct PrintHandoff {
    pub json: bool,
    pub events: Rc<RefCell<EventLogState>>,
}

impl PrintHandoff {
    fn to_json(&self, transfer: Transfer, next: &ResolvedHandoff) -> serde_json::Value {
        let transfer = match transfer {
            Transfer::Direct => serde_json::json!("direct"),
            Transfer::Smc { fid } => serde_json::json!({ "smc": format!("{fid:#x}") }),
        };
        let measurements: Vec<_> = self
            .events
            .borrow()
            .entries
            .iter()
            .map(|m| {
                serde_json::json!({
                    "image": m.id.to_string(),
                    "sha256": m.digest.encode_hex::<String>(),
                })
            })
            .collect();
        serde_json::json!({
            "image": next.image.to_string(),
            "id": next.image.0,
            "transfer": transfer,
            "pc": format!("{:#x}", next.ep.pc),
            "spsr": format!("{:#x}", next.ep.spsr.0),
            "args": next.ep.args.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>(),
            "measurements": measurements,
        })
    }
}

impl Handoff for PrintHandoff {
    fn run_next_image(&mut self, transfer: Transfer, next: ResolvedHandoff) -> HandoffRejected {
        if self.json {
            println!("{:#}", self.to_json(transfer, &next));
        } else {
            println!(
                "{} {} at {:#x} (spsr {:#x}, {:?})",
                "handoff:".green(),
                next.image,
                next.ep.pc,
                next.ep.spsr.0,
                transfer
            );
            for m in &self.events.borrow().entries {
                println!("  {:<14} {}", m.id.to_string(), m.digest.encode_hex::<String>());
            }
        }
        let _ = std::io::stdout().flush();
        std::process::exit(0)
    }
}
