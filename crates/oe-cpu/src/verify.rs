//! JIT compliance checking
//!
//! Every instruction runs twice: through the interpreter on the live context
//! and as a freshly compiled single-instruction block on a copy. The two
//! contexts must agree on every architectural field. A single instruction
//! never both reads and writes guest memory, so the second run stores the
//! same bytes the first one did and memory needs no snapshot.

use oe_core::error::CpuError;
use oe_core::jit_trace;
use oe_memory::Address;

use crate::context::ThreadContext;
use crate::decoder::{Decoder, Instruction, OperationId};
use crate::interpreter::{ExecEnv, Flow, Interpreter};
use crate::jit::Jit;

/// Operations that are not compared
///
/// Kernel calls run host code with side effects of their own. The
/// reservation instructions change the shared reservation table, so a second
/// run would not observe the same reservation.
pub const EXCLUDED: &[OperationId] = &[OperationId::Kc, OperationId::Lwarx, OperationId::StwcxRc];

pub fn is_excluded(id: OperationId) -> bool {
    EXCLUDED.contains(&id)
}

/// Runs the interpreter and the JIT side by side
pub struct ComplianceChecker<'a> {
    decoder: &'a Decoder,
    interpreter: &'a Interpreter,
    jit: &'a Jit,
}

impl<'a> ComplianceChecker<'a> {
    pub fn new(decoder: &'a Decoder, interpreter: &'a Interpreter, jit: &'a Jit) -> Self {
        Self {
            decoder,
            interpreter,
            jit,
        }
    }

    /// Execute the instruction at NIA with both backends and compare
    pub fn step(&self, ctx: &mut ThreadContext, env: &ExecEnv<'_>) -> Result<Flow, CpuError> {
        let address = ctx.nia;
        let word = match env.memory.fetch_instruction(Address(address)) {
            Ok(word) => word,
            // Let the interpreter report the fault
            Err(_) => return self.interpreter.step(ctx, env),
        };
        let instr = Instruction(word);

        let compiled = match self.decoder.decode_id(instr) {
            Some(id) if !is_excluded(id) => self.jit.compile_instruction(address, instr),
            _ => return self.interpreter.step(ctx, env),
        };
        let block = match compiled {
            Ok(block) => block,
            Err(failure) => {
                jit_trace!("Compliance check skipped at 0x{:08X}: {}", address, failure);
                return self.interpreter.step(ctx, env);
            }
        };

        let mut shadow = ctx.clone();
        shadow.tracer = None;

        let flow = self.interpreter.step(ctx, env)?;
        if let Err(err) = block.run(&mut shadow, env) {
            return Err(CpuError::ComplianceMismatch {
                address,
                word,
                diff: format!("compiled code failed: {}", err),
            });
        }

        compare(address, word, ctx, &shadow)?;
        Ok(flow)
    }
}

/// Fail with a field by field diff unless `compiled` matches `interpreted`
pub fn compare(
    address: u32,
    word: u32,
    interpreted: &ThreadContext,
    compiled: &ThreadContext,
) -> Result<(), CpuError> {
    let diffs = compiled.diff(interpreted);
    if diffs.is_empty() {
        return Ok(());
    }
    let diff = diffs
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    Err(CpuError::ComplianceMismatch { address, word, diff })
}
