//! Espresso decoder self-test
//!
//! Checks every instruction descriptor in three steps:
//! 1. its opcode and operand fields cover the 32-bit word exactly once
//! 2. random operand values never change how the word decodes
//! 3. the disassembler produces a mnemonic for the encoded word

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use oe_cpu::decoder::{Decoder, Field, OperationId};
use oe_debug::Disassembler;
use tracing::{debug, warn};

struct Options {
    iterations: u32,
    seed: u64,
    verbose: bool,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        iterations: 256,
        seed: 0x9E37_79B9_7F4A_7C15,
        verbose: false,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--iterations" => {
                let value = args.next().context("--iterations needs a value")?;
                options.iterations = value.parse().context("invalid iteration count")?;
            }
            "--seed" => {
                let value = args.next().context("--seed needs a value")?;
                options.seed = value.parse().context("invalid seed")?;
            }
            "-v" | "--verbose" => options.verbose = true,
            "-h" | "--help" => {
                println!("Usage: isa-selftest [--iterations N] [--seed S] [--verbose]");
                std::process::exit(0);
            }
            other => bail!("unknown argument {}", other),
        }
    }
    Ok(options)
}

/// xorshift64*, enough to spread operand values over the field widths
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        (self.0.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32
    }
}

fn operand_fields(decoder: &Decoder, id: OperationId) -> Vec<Field> {
    let Some(descriptor) = decoder.descriptor(id) else {
        return Vec::new();
    };
    descriptor
        .fields()
        .into_iter()
        .filter(|f| !f.is_marker() && !descriptor.opcode.iter().any(|fv| fv.field == *f))
        .collect()
}

/// Returns the number of failed checks for one descriptor
fn check(decoder: &Decoder, disassembler: &Disassembler, id: OperationId, rng: &mut Rng, iterations: u32) -> u32 {
    let mut failures = 0;

    if let Err(err) = decoder.validate_fields(id) {
        warn!("Field coverage: {}", err);
        failures += 1;
    }

    let fields = operand_fields(decoder, id);
    for _ in 0..iterations {
        let mut instr = decoder.encode(id);
        for &field in &fields {
            instr = instr.with(field, rng.next());
        }
        match decoder.decode_id(instr) {
            Some(decoded) if decoded == id => {}
            other => {
                warn!("0x{:08X} encoded as {} decodes as {:?}", instr.word(), id, other);
                failures += 1;
                break;
            }
        }
    }

    let word = decoder.encode(id).word();
    let text = disassembler.disassemble(0, word);
    if text.mnemonic == ".long" {
        warn!("{} (0x{:08X}) does not disassemble", id, word);
        failures += 1;
    } else {
        debug!("{:<12} {}", id, text.text());
    }
    failures
}

fn main() -> Result<()> {
    let options = parse_args()?;
    let level = if options.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .with_target(false)
        .init();

    let decoder = Arc::new(Decoder::new());
    let disassembler = Disassembler::new(decoder.clone());
    let mut rng = Rng(options.seed.max(1));

    println!("=== Espresso ISA self-test ===\n");
    println!("Descriptors: {}", OperationId::COUNT);
    println!("Iterations per descriptor: {}", options.iterations);

    let mut failed = Vec::new();
    for &id in OperationId::ALL {
        if check(&decoder, &disassembler, id, &mut rng, options.iterations) > 0 {
            failed.push(id);
        }
    }

    println!("\n=== Summary ===");
    println!("Passed: {}", OperationId::COUNT - failed.len());
    println!("Failed: {}", failed.len());
    if !failed.is_empty() {
        for id in &failed {
            println!("  - {}", id);
        }
        bail!("{} descriptors failed the self-test", failed.len());
    }
    Ok(())
}
