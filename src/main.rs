//! Oxidized-Espresso - Espresso CPU core emulator
//!
//! Runs a flat big-endian code image as the main guest thread and prints
//! the final register file.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use oe_core::config::{Config, CpuBackend};
use oe_integration::Emulator;
use oe_kernel::{Affinity, DEFAULT_PRIORITY, MAX_CORES};

const USAGE: &str = "Usage: oxidized-espresso <image> [--base ADDR] [--entry ADDR] \
[--backend interpreter|jit|jit_verify] [--cores N] [--timeout SECS]";

struct Args {
    image: PathBuf,
    base: u32,
    entry: Option<u32>,
    backend: Option<CpuBackend>,
    cores: Option<usize>,
    timeout: Duration,
}

fn parse_address(value: &str) -> Result<u32> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid address {}", value))
}

fn parse_args() -> Result<Args> {
    let mut image = None;
    let mut args = Args {
        image: PathBuf::new(),
        base: 0x0100_0000,
        entry: None,
        backend: None,
        cores: None,
        timeout: Duration::from_secs(30),
    };

    let mut argv = env::args().skip(1);
    while let Some(arg) = argv.next() {
        let mut value = |name: &str| argv.next().with_context(|| format!("{} needs a value", name));
        match arg.as_str() {
            "--base" => args.base = parse_address(&value("--base")?)?,
            "--entry" => args.entry = Some(parse_address(&value("--entry")?)?),
            "--backend" => {
                args.backend = Some(match value("--backend")?.as_str() {
                    "interpreter" => CpuBackend::Interpreter,
                    "jit" => CpuBackend::Jit,
                    "jit_verify" => CpuBackend::JitVerify,
                    other => bail!("unknown backend {}", other),
                })
            }
            "--cores" => {
                let cores: usize = value("--cores")?.parse().context("invalid core count")?;
                if !(1..=MAX_CORES).contains(&cores) {
                    bail!("core count must be between 1 and {}", MAX_CORES);
                }
                args.cores = Some(cores);
            }
            "--timeout" => {
                let secs: u64 = value("--timeout")?.parse().context("invalid timeout")?;
                args.timeout = Duration::from_secs(secs);
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {}\n{}", other, USAGE),
            other => image = Some(PathBuf::from(other)),
        }
    }

    args.image = image.context(USAGE)?;
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let mut config = Config::load().unwrap_or_default();
    if let Some(backend) = args.backend {
        config.cpu.backend = backend;
    }
    if let Some(cores) = args.cores {
        config.cpu.core_count = cores;
    }

    let mut emulator = Emulator::new(config).context("Failed to initialize emulator")?;
    tracing::info!("Starting Oxidized-Espresso");

    let loaded_entry = emulator
        .load_file(&args.image, args.base)
        .with_context(|| format!("Failed to load {}", args.image.display()))?;
    let entry = args.entry.unwrap_or(loaded_entry);

    let main = emulator.create_thread(entry, &[], DEFAULT_PRIORITY, Affinity::ANY, "main")?;
    emulator.start()?;

    let exit = emulator
        .wait_for_thread(main, args.timeout)
        .context("Main thread did not exit in time")?;
    let context = emulator.scheduler().thread_context(main);
    emulator.shutdown();

    println!("Main thread exited with {} (0x{:08X})", exit, exit as u32);
    if let Some(context) = context {
        println!("{}", context);
    }
    Ok(())
}
