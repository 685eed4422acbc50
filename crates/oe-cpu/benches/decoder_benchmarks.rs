//! Decoder and single-step benchmarks

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use oe_core::config::{CpuBackend, CpuConfig};
use oe_cpu::decoder::{Decoder, Instruction};
use oe_cpu::{ExecutionEngine, KernelCallTable, ThreadContext};
use oe_memory::{Address, MemoryManager};

const WORDS: [u32; 8] = [
    0x3860_0005, // addi
    0x7CA3_2214, // add
    0x4E80_0020, // blr
    0x7C08_02A6, // mflr
    0x9421_FFF0, // stwu
    0xFC20_0890, // fmr
    0x1022_1828, // ps_sub
    0x0400_0000, // undefined
];

fn bench_decode(c: &mut Criterion) {
    let decoder = Decoder::new();

    c.bench_function("decode_mixed", |b| {
        b.iter(|| {
            for &word in &WORDS {
                black_box(decoder.decode_id(Instruction(black_box(word))));
            }
        })
    });

    c.bench_function("decoder_build", |b| b.iter(|| black_box(Decoder::new())));
}

fn bench_step(c: &mut Criterion) {
    for backend in [CpuBackend::Interpreter, CpuBackend::Jit] {
        let config = CpuConfig {
            backend,
            ..CpuConfig::default()
        };
        let engine = ExecutionEngine::new(
            &config,
            Arc::new(Decoder::new()),
            MemoryManager::new().unwrap(),
            Arc::new(KernelCallTable::new()),
        );
        // addi r3,r3,1; addi r4,r4,-1; kc 0
        for (i, word) in [0x3863_0001u32, 0x3884_FFFF, 0x4400_0001].iter().enumerate() {
            engine.memory().write_be32(Address(4 * i as u32), *word).unwrap();
        }

        c.bench_function(&format!("run_three_{:?}", backend), |b| {
            b.iter(|| {
                let mut ctx = ThreadContext::new();
                ctx.nia = 0;
                engine.run(&mut ctx, 0).unwrap();
                black_box(ctx.gpr[3])
            })
        });
    }
}

criterion_group!(benches, bench_decode, bench_step);
criterion_main!(benches);
