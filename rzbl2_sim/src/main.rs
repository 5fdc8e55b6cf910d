// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::info;
use rzbl2::{Bl2, Bl2Config, Collaborators};
use rzbl2_regs::PollBudget;
use rzbl2_sip::{FunctionId, SipFunction};
use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

mod sim;
mod trailer;

use sim::{
    CrcAuthenticator, EventLog, EventLogState, FileSource, HostDelay, Memory, PrintHandoff,
    SimCpg, SimCrypto, SimFwu, SimPlatform,
};

/// Reads of a CPG monitor before it follows its control register.
const CPG_SETTLE_READS: u32 = 3;

/// Room in the event log; one slot per image in the largest chain.
const EVENT_LOG_ENTRIES: usize = 16;

#[derive(Debug, Parser)]
enum Command {
    /// Run BL2 against images in a directory
    Boot {
        /// BL2 configuration (TOML); the RZ/G2L defaults otherwise
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Directory holding `<image>.bin` files
        #[clap(short, long)]
        images: PathBuf,

        /// Print the handoff as JSON
        #[clap(long)]
        json: bool,

        #[clap(short, long)]
        verbose: bool,

        /// Give up on a CM33 monitor after this many failed polls
        #[clap(long)]
        poll_budget: Option<u32>,

        /// Report PAC support from the simulated core
        #[clap(long)]
        pauth: bool,
    },
    /// Validate and print the image chain
    Chain {
        #[clap(short, long)]
        config: Option<PathBuf>,
    },
    /// Append the CRC trailer BL2 authenticates against
    #[clap(name = "crc")]
    Crc {
        #[clap(short = 'i', long = "in", help = "source file (binary)")]
        src_bin: PathBuf,
        #[clap(short = 'o', long = "out", help = "output file (binary)")]
        dest_bin: PathBuf,
    },
    /// Decode a SiP function identifier (name or number)
    Sip { function: String },
}

#[derive(Debug, Parser)]
#[clap(name = "rzbl2_sim", max_term_width = 80)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format(|buf, record| {
            let mut level_style = buf.style();

            level_style.set_color(match record.level() {
                log::Level::Info => env_logger::fmt::Color::Cyan,
                log::Level::Trace => env_logger::fmt::Color::Blue,
                log::Level::Warn => env_logger::fmt::Color::Yellow,
                log::Level::Error => env_logger::fmt::Color::Red,
                log::Level::Debug => env_logger::fmt::Color::Green,
            });

            writeln!(
                buf,
                "{: <5} | {}",
                level_style.value(match record.level() {
                    log::Level::Info => "",
                    log::Level::Trace => "TRACE",
                    log::Level::Warn => "WARN",
                    log::Level::Error => "ERROR",
                    log::Level::Debug => "DEBUG",
                }),
                record.args().to_string().replace('\n', "\n      | ")
            )
        })
        .filter(
            None,
            if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            },
        )
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Bl2Config> {
    let Some(path) = path else {
        return Ok(Bl2Config::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    Bl2Config::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn print_chain(config: &Bl2Config) -> Result<()> {
    let chain = config.profile().build().context("image chain is invalid")?;
    println!("{} {} images, head {}", "chain:".green(), chain.len(), chain.head());
    for node in chain.walk(chain.head()) {
        println!(
            "  {:<14} {:#012x} max {:#09x} {:?}{}{}",
            node.id.to_string(),
            node.image.load_base,
            node.image.max_size,
            node.image.attributes.security,
            if node.is_executable() { " exec" } else { "" },
            if node.image.attributes.plat_setup {
                " plat-setup"
            } else {
                ""
            },
        );
    }
    println!("  params at {:#x}", config.memory_map.params_base);
    Ok(())
}

fn parse_sip(function: &str) -> Result<FunctionId> {
    if let Ok(f) = SipFunction::from_str(function) {
        return Ok(f.id());
    }
    parse_int::parse::<u32>(function)
        .map(FunctionId)
        .map_err(|_| anyhow!("{function} is neither a SiP function name nor a number"))
}

fn print_sip(id: FunctionId) {
    println!("{:#010x}", id.0);
    println!(
        "  {} call, {}",
        if id.fast() { "fast" } else { "yielding" },
        if id.smc64() { "SMC64" } else { "SMC32" }
    );
    match id.owner() {
        Some(owner) => println!("  owner {owner}"),
        None => println!("  owner {} (reserved)", id.owner_number()),
    }
    println!("  number {:#06x}", id.number());
    match id.known() {
        Some(f) => println!("  {} ({})", f.to_string().green(), f.service()),
        None => println!("  {}", "not a known SiP function".yellow()),
    }
}

fn boot(
    config: Bl2Config,
    images: PathBuf,
    json: bool,
    poll_budget: Option<u32>,
    pauth: bool,
) -> Result<()> {
    let mem: Memory = Rc::default();
    let events = Rc::new(RefCell::new(EventLogState::default()));

    let mut platform = SimPlatform {
        mem: mem.clone(),
        params_base: config.memory_map.params_base,
        boot_device: images.display().to_string(),
        pauth,
    };
    let mut crypto = SimCrypto;
    let mut auth = CrcAuthenticator { mem: mem.clone() };
    let mut measured_boot = EventLog {
        mem: mem.clone(),
        state: events.clone(),
        capacity: EVENT_LOG_ENTRIES,
    };
    let mut fwu = SimFwu;
    let mut source = FileSource { dir: images, mem };
    let mut regs = SimCpg::new(CPG_SETTLE_READS, true);
    let mut delay = HostDelay;
    let mut budget = poll_budget.map(PollBudget::new);
    let mut handoff = PrintHandoff { json, events };

    let io = Collaborators {
        platform: &mut platform,
        crypto: &mut crypto,
        auth: &mut auth,
        measured_boot: &mut measured_boot,
        fwu: Some(&mut fwu),
        source: &mut source,
        regs: &mut regs,
        delay: &mut delay,
        deadline: budget.as_mut().map(|b| b as &mut dyn rzbl2_regs::Deadline),
        handoff: &mut handoff,
    };

    let bl2 = Bl2::new(config, io).context("image chain is invalid")?;
    info!("BL2: {} images in the chain", bl2.chain().len());
    bl2.boot([0; 4])
}

fn main() -> Result<()> {
    let cmd = Opts::parse();

    match cmd.cmd {
        Command::Boot {
            config,
            images,
            json,
            verbose,
            poll_budget,
            pauth,
        } => {
            init_logger(verbose);
            let config = load_config(config.as_deref())?;
            boot(config, images, json, poll_budget, pauth)?;
        }
        Command::Chain { config } => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
            print_chain(&load_config(config.as_deref())?)?;
        }
        Command::Crc { src_bin, dest_bin } => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
            let image = std::fs::read(&src_bin)
                .with_context(|| format!("could not read {}", src_bin.display()))?;
            std::fs::write(&dest_bin, trailer::append(image))
                .with_context(|| format!("could not write {}", dest_bin.display()))?;
            info!("CRC image written to {:?}", &dest_bin);
        }
        Command::Sip { function } => {
            print_sip(parse_sip(&function)?);
        }
    }

    Ok(())
}
