//! PowerPC interpreter
//!
//! One handler per operation id. [`handler`] is an exhaustive match, so
//! adding an operation to the decoder table without deciding how it
//! executes is a compile error.

pub mod branch;
pub mod condition;
pub mod float;
pub mod integer;
pub mod loadstore;
pub mod paired;
pub mod system;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use oe_core::cpu_trace;
use oe_core::error::CpuError;
use oe_memory::{Address, MemoryManager};

use crate::context::ThreadContext;
use crate::decoder::{Decoder, Instruction, OperationId};
use crate::kernel::KernelCallDispatch;

/// What the guest thread does after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep executing at NIA
    Continue,
    /// A kernel call asked to hand control back to the scheduler
    Yield,
}

/// Everything an instruction can reach besides its own thread context
#[derive(Clone, Copy)]
pub struct ExecEnv<'a> {
    pub memory: &'a MemoryManager,
    pub kernel: &'a dyn KernelCallDispatch,
    pub core_id: usize,
    /// Set by the host when the core should return to the scheduler
    pub interrupt: Option<&'a AtomicBool>,
}

impl ExecEnv<'_> {
    /// Whether the host is waiting for this core, without consuming the request
    #[inline]
    pub fn interrupt_pending(&self) -> bool {
        self.interrupt.is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// Interpreter instruction handler
pub type Handler = fn(&mut ThreadContext, &ExecEnv<'_>, Instruction) -> Result<Flow, CpuError>;

/// The handler for an operation, `None` when the operation is not implemented
pub fn handler(id: OperationId) -> Option<Handler> {
    use OperationId::*;

    Some(match id {
        Add => integer::add,
        Addc => integer::addc,
        Adde => integer::adde,
        Addi => integer::addi,
        Addic => integer::addic,
        AddicRc => integer::addic_rc,
        Addis => integer::addis,
        Addme => integer::addme,
        Addze => integer::addze,
        Divw => integer::divw,
        Divwu => integer::divwu,
        Mulhw => integer::mulhw,
        Mulhwu => integer::mulhwu,
        Mulli => integer::mulli,
        Mullw => integer::mullw,
        Neg => integer::neg,
        Subf => integer::subf,
        Subfc => integer::subfc,
        Subfe => integer::subfe,
        Subfic => integer::subfic,
        Subfme => integer::subfme,
        Subfze => integer::subfze,
        And => integer::and,
        Andc => integer::andc,
        AndiRc => integer::andi_rc,
        AndisRc => integer::andis_rc,
        Cntlzw => integer::cntlzw,
        Eqv => integer::eqv,
        Extsb => integer::extsb,
        Extsh => integer::extsh,
        Nand => integer::nand,
        Nor => integer::nor,
        Or => integer::or,
        Orc => integer::orc,
        Ori => integer::ori,
        Oris => integer::oris,
        Xor => integer::xor,
        Xori => integer::xori,
        Xoris => integer::xoris,
        Rlwimi => integer::rlwimi,
        Rlwinm => integer::rlwinm,
        Rlwnm => integer::rlwnm,
        Slw => integer::slw,
        Sraw => integer::sraw,
        Srawi => integer::srawi,
        Srw => integer::srw,

        Cmp => condition::cmp,
        Cmpi => condition::cmpi,
        Cmpl => condition::cmpl,
        Cmpli => condition::cmpli,
        Fcmpo => condition::fcmpo,
        Fcmpu => condition::fcmpu,
        Crand => condition::crand,
        Crandc => condition::crandc,
        Creqv => condition::creqv,
        Crnand => condition::crnand,
        Crnor => condition::crnor,
        Cror => condition::cror,
        Crorc => condition::crorc,
        Crxor => condition::crxor,
        Mcrf => condition::mcrf,
        Mcrfs => condition::mcrfs,
        Mcrxr => condition::mcrxr,
        Mfcr => condition::mfcr,
        Mtcrf => condition::mtcrf,

        Fadd => float::fadd,
        Fadds => float::fadds,
        Fdiv => float::fdiv,
        Fdivs => float::fdivs,
        Fmul => float::fmul,
        Fmuls => float::fmuls,
        Fres => float::fres,
        Frsqrte => float::frsqrte,
        Fsub => float::fsub,
        Fsubs => float::fsubs,
        Fsel => float::fsel,
        Fmadd => float::fmadd,
        Fmadds => float::fmadds,
        Fmsub => float::fmsub,
        Fmsubs => float::fmsubs,
        Fnmadd => float::fnmadd,
        Fnmadds => float::fnmadds,
        Fnmsub => float::fnmsub,
        Fnmsubs => float::fnmsubs,
        Fctiw => float::fctiw,
        Fctiwz => float::fctiwz,
        Frsp => float::frsp,
        Fabs => float::fabs,
        Fmr => float::fmr,
        Fnabs => float::fnabs,
        Fneg => float::fneg,
        Mffs => float::mffs,
        Mtfsb0 => float::mtfsb0,
        Mtfsb1 => float::mtfsb1,
        Mtfsf => float::mtfsf,
        Mtfsfi => float::mtfsfi,

        Lbz => loadstore::lbz,
        Lbzu => loadstore::lbzu,
        Lbzx => loadstore::lbzx,
        Lbzux => loadstore::lbzux,
        Lha => loadstore::lha,
        Lhau => loadstore::lhau,
        Lhax => loadstore::lhax,
        Lhaux => loadstore::lhaux,
        Lhz => loadstore::lhz,
        Lhzu => loadstore::lhzu,
        Lhzx => loadstore::lhzx,
        Lhzux => loadstore::lhzux,
        Lwz => loadstore::lwz,
        Lwzu => loadstore::lwzu,
        Lwzx => loadstore::lwzx,
        Lwzux => loadstore::lwzux,
        Stb => loadstore::stb,
        Stbu => loadstore::stbu,
        Stbx => loadstore::stbx,
        Stbux => loadstore::stbux,
        Sth => loadstore::sth,
        Sthu => loadstore::sthu,
        Sthx => loadstore::sthx,
        Sthux => loadstore::sthux,
        Stw => loadstore::stw,
        Stwu => loadstore::stwu,
        Stwx => loadstore::stwx,
        Stwux => loadstore::stwux,
        Lhbrx => loadstore::lhbrx,
        Lwbrx => loadstore::lwbrx,
        Sthbrx => loadstore::sthbrx,
        Stwbrx => loadstore::stwbrx,
        Lmw => loadstore::lmw,
        Stmw => loadstore::stmw,
        Lswi => loadstore::lswi,
        Lswx => loadstore::lswx,
        Stswi => loadstore::stswi,
        Stswx => loadstore::stswx,
        Lwarx => loadstore::lwarx,
        StwcxRc => loadstore::stwcx_rc,
        Lfd => loadstore::lfd,
        Lfdu => loadstore::lfdu,
        Lfdx => loadstore::lfdx,
        Lfdux => loadstore::lfdux,
        Lfs => loadstore::lfs,
        Lfsu => loadstore::lfsu,
        Lfsx => loadstore::lfsx,
        Lfsux => loadstore::lfsux,
        Stfd => loadstore::stfd,
        Stfdu => loadstore::stfdu,
        Stfdx => loadstore::stfdx,
        Stfdux => loadstore::stfdux,
        Stfiwx => loadstore::stfiwx,
        Stfs => loadstore::stfs,
        Stfsu => loadstore::stfsu,
        Stfsx => loadstore::stfsx,
        Stfsux => loadstore::stfsux,
        PsqL => loadstore::psq_l,
        PsqLu => loadstore::psq_lu,
        PsqLx => loadstore::psq_lx,
        PsqLux => loadstore::psq_lux,
        PsqSt => loadstore::psq_st,
        PsqStu => loadstore::psq_stu,
        PsqStx => loadstore::psq_stx,
        PsqStux => loadstore::psq_stux,

        B => branch::b,
        Bc => branch::bc,
        Bcctr => branch::bcctr,
        Bclr => branch::bclr,

        Kc => system::kc,
        Rfi => system::rfi,
        Mfmsr => system::mfmsr,
        Mtmsr => system::mtmsr,
        Mfspr => system::mfspr,
        Mtspr => system::mtspr,
        Mftb => system::mftb,
        Mfsr => system::mfsr,
        Mfsrin => system::mfsrin,
        Mtsr => system::mtsr,
        Mtsrin => system::mtsrin,
        Dcbz | DcbzL => system::dcbz,
        Eieio | Isync | Sync | Dcbf | Dcbi | Dcbst | Dcbt | Dcbtst | Icbi | Tlbie | Tlbsync => {
            system::no_op
        }

        PsAdd => paired::ps_add,
        PsDiv => paired::ps_div,
        PsMul => paired::ps_mul,
        PsSub => paired::ps_sub,
        PsAbs => paired::ps_abs,
        PsNabs => paired::ps_nabs,
        PsNeg => paired::ps_neg,
        PsSel => paired::ps_sel,
        PsRes => paired::ps_res,
        PsRsqrte => paired::ps_rsqrte,
        PsMsub => paired::ps_msub,
        PsMadd => paired::ps_madd,
        PsNmsub => paired::ps_nmsub,
        PsNmadd => paired::ps_nmadd,
        PsMr => paired::ps_mr,
        PsSum0 => paired::ps_sum0,
        PsSum1 => paired::ps_sum1,
        PsMuls0 => paired::ps_muls0,
        PsMuls1 => paired::ps_muls1,
        PsMadds0 => paired::ps_madds0,
        PsMadds1 => paired::ps_madds1,
        PsCmpu0 => paired::ps_cmpu0,
        PsCmpo0 => paired::ps_cmpo0,
        PsCmpu1 => paired::ps_cmpu1,
        PsCmpo1 => paired::ps_cmpo1,
        PsMerge00 => paired::ps_merge00,
        PsMerge01 => paired::ps_merge01,
        PsMerge10 => paired::ps_merge10,
        PsMerge11 => paired::ps_merge11,

        // Guest OS system calls, traps and external control go through kc
        Sc | Tw | Twi | Eciwx | Ecowx => return None,
    })
}

/// Fetch, decode and execute guest code one instruction at a time
pub struct Interpreter {
    decoder: Arc<Decoder>,
    branch_trace: bool,
}

impl Interpreter {
    pub fn new(decoder: Arc<Decoder>) -> Self {
        Self {
            decoder,
            branch_trace: false,
        }
    }

    /// Log every taken branch at trace level
    pub fn with_branch_trace(mut self, enabled: bool) -> Self {
        self.branch_trace = enabled;
        self
    }

    pub fn decoder(&self) -> &Arc<Decoder> {
        &self.decoder
    }

    /// Execute the instruction at NIA
    ///
    /// Decode failures and unimplemented operations are fatal for the
    /// thread; CIA is left pointing at the offending instruction.
    pub fn step(&self, ctx: &mut ThreadContext, env: &ExecEnv<'_>) -> Result<Flow, CpuError> {
        ctx.cia = ctx.nia;
        ctx.nia = ctx.cia.wrapping_add(4);

        let word = env.memory.fetch_instruction(Address(ctx.cia))?;
        let instr = Instruction(word);
        let descriptor = self.decoder.decode(instr).ok_or(CpuError::Decode {
            address: ctx.cia,
            word,
        })?;
        let execute = handler(descriptor.id).ok_or(CpuError::Unimplemented {
            address: ctx.cia,
            word,
            name: descriptor.name,
        })?;

        let tracer = ctx.tracer.clone();
        if let Some(tracer) = &tracer {
            tracer.lock().begin(ctx, descriptor, instr);
        }

        let flow = execute(ctx, env, instr)?;

        if let Some(tracer) = &tracer {
            tracer.lock().finish(ctx, descriptor);
        }
        if self.branch_trace && ctx.nia != ctx.cia.wrapping_add(4) {
            cpu_trace!(
                "branch {} 0x{:08X} -> 0x{:08X}",
                descriptor.name,
                ctx.cia,
                ctx.nia
            );
        }
        Ok(flow)
    }

    /// Execute one already-fetched instruction as if it were at CIA
    ///
    /// Used by the compliance checker, which runs the same word through
    /// both backends.
    pub fn execute(&self, ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result<Flow, CpuError> {
        let descriptor = self.decoder.decode(instr).ok_or(CpuError::Decode {
            address: ctx.cia,
            word: instr.word(),
        })?;
        let execute = handler(descriptor.id).ok_or(CpuError::Unimplemented {
            address: ctx.cia,
            word: instr.word(),
            name: descriptor.name,
        })?;
        execute(ctx, env, instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{cr, XER_CA, XER_OV, XER_SO};
    use crate::decoder::Field;
    use crate::kernel::KernelCallTable;
    use oe_memory::constants::HEAP_BASE;
    use oe_memory::PageFlags;

    struct Harness {
        memory: Arc<MemoryManager>,
        kernel: KernelCallTable,
        decoder: Arc<Decoder>,
        interpreter: Interpreter,
    }

    impl Harness {
        fn new() -> Self {
            let decoder = Arc::new(Decoder::new());
            Self {
                memory: MemoryManager::new().unwrap(),
                kernel: KernelCallTable::new(),
                interpreter: Interpreter::new(decoder.clone()),
                decoder,
            }
        }

        fn env(&self) -> ExecEnv<'_> {
            ExecEnv {
                memory: &self.memory,
                kernel: &self.kernel,
                core_id: 0,
                interrupt: None,
            }
        }

        fn ins(&self, id: OperationId, fields: &[(Field, u32)]) -> Instruction {
            fields
                .iter()
                .fold(Instruction::new(&self.decoder, id), |i, (f, v)| i.with(*f, *v))
        }

        /// Run a single instruction placed at 0x1000
        fn run(&self, ctx: &mut ThreadContext, instr: Instruction) -> Result<Flow, CpuError> {
            self.memory.write_be32(Address(0x1000), instr.word()).unwrap();
            ctx.nia = 0x1000;
            self.interpreter.step(ctx, &self.env())
        }
    }

    #[test]
    fn test_every_operation_has_a_decision() {
        let implemented = OperationId::ALL.iter().filter(|id| handler(**id).is_some()).count();
        assert_eq!(implemented, OperationId::COUNT - 5);
    }

    #[test]
    fn test_add_sets_cr0_and_overflow() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[3] = 0x7FFF_FFFF;
        ctx.gpr[4] = 1;
        // addo. r5, r3, r4
        let instr = h.ins(OperationId::Add, &[(Field::Rd, 5), (Field::Ra, 3), (Field::Rb, 4), (Field::Oe, 1), (Field::Rc, 1)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.gpr[5], 0x8000_0000);
        assert_eq!(ctx.xer & (XER_OV | XER_SO), XER_OV | XER_SO);
        assert_eq!(ctx.cr_field(0), cr::LT | cr::SO);
        assert_eq!(ctx.cia, 0x1000);
        assert_eq!(ctx.nia, 0x1004);
    }

    #[test]
    fn test_addi_uses_zero_for_r0() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[0] = 100;
        let instr = h.ins(OperationId::Addi, &[(Field::Rd, 3), (Field::Ra, 0), (Field::Simm, 0xFFFF)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.gpr[3], u32::MAX);
    }

    #[test]
    fn test_subfc_carry() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[3] = 3;
        ctx.gpr[4] = 5;
        // r5 = r4 - r3, no borrow sets CA
        let instr = h.ins(OperationId::Subfc, &[(Field::Rd, 5), (Field::Ra, 3), (Field::Rb, 4)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.gpr[5], 2);
        assert_eq!(ctx.xer & XER_CA, XER_CA);
    }

    #[test]
    fn test_divw_by_zero() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[3] = (-7i32) as u32;
        let instr = h.ins(OperationId::Divw, &[(Field::Rd, 5), (Field::Ra, 3), (Field::Rb, 4), (Field::Oe, 1)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.gpr[5], u32::MAX);
        assert!(ctx.xer_ov());
    }

    #[test]
    fn test_rlwinm() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[3] = 0x1234_5678;
        // extrwi r4, r3, 8, 8
        let instr = h.ins(
            OperationId::Rlwinm,
            &[(Field::Ra, 4), (Field::Rs, 3), (Field::Sh, 16), (Field::Mb, 24), (Field::Me, 31)],
        );
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.gpr[4], 0x34);
    }

    #[test]
    fn test_branch_and_link() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        // bl +0x20
        let instr = h.ins(OperationId::B, &[(Field::Li, 0x20 >> 2), (Field::Lk, 1)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.nia, 0x1020);
        assert_eq!(ctx.lr, 0x1004);
    }

    #[test]
    fn test_store_and_load_update() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[1] = HEAP_BASE;
        ctx.gpr[3] = 0xDEAD_BEEF;
        let stwu = h.ins(OperationId::Stwu, &[(Field::Rs, 3), (Field::Ra, 1), (Field::D, 0x10)]);
        h.run(&mut ctx, stwu).unwrap();
        assert_eq!(ctx.gpr[1], HEAP_BASE + 0x10);
        assert_eq!(h.memory.read_be32(Address(HEAP_BASE + 0x10)).unwrap(), 0xDEAD_BEEF);

        let lha = h.ins(OperationId::Lha, &[(Field::Rd, 4), (Field::Ra, 1), (Field::D, 0)]);
        h.run(&mut ctx, lha).unwrap();
        assert_eq!(ctx.gpr[4], 0xFFFF_DEAD);

        let lhbrx = h.ins(OperationId::Lhbrx, &[(Field::Rd, 5), (Field::Ra, 0), (Field::Rb, 1)]);
        h.run(&mut ctx, lhbrx).unwrap();
        assert_eq!(ctx.gpr[5], 0xADDE);
    }

    #[test]
    fn test_string_load_wraps_registers() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        h.memory
            .write_bytes(Address(HEAP_BASE), &[1, 2, 3, 4, 5, 6])
            .unwrap();
        ctx.gpr[3] = HEAP_BASE;
        // lswi r31, r3, 6
        let instr = h.ins(OperationId::Lswi, &[(Field::Rd, 31), (Field::Ra, 3), (Field::Nb, 6)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.gpr[31], 0x0102_0304);
        assert_eq!(ctx.gpr[0], 0x0506_0000);
    }

    #[test]
    fn test_reservation() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[3] = HEAP_BASE;
        ctx.gpr[4] = 42;
        let lwarx = h.ins(OperationId::Lwarx, &[(Field::Rd, 5), (Field::Ra, 0), (Field::Rb, 3)]);
        let stwcx = h.ins(OperationId::StwcxRc, &[(Field::Rs, 4), (Field::Ra, 0), (Field::Rb, 3)]);

        h.run(&mut ctx, lwarx).unwrap();
        h.run(&mut ctx, stwcx).unwrap();
        assert_eq!(ctx.cr_field(0), cr::EQ);
        assert_eq!(h.memory.read_be32(Address(HEAP_BASE)).unwrap(), 42);

        // No reservation held any more
        h.run(&mut ctx, stwcx).unwrap();
        assert_eq!(ctx.cr_field(0), 0);
    }

    #[test]
    fn test_float_arithmetic_and_store() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.fpr[1].set_f64(1.5);
        ctx.fpr[2].set_f64(2.25);
        let fadds = h.ins(OperationId::Fadds, &[(Field::FrD, 3), (Field::FrA, 1), (Field::FrB, 2)]);
        h.run(&mut ctx, fadds).unwrap();
        assert_eq!(ctx.fpr[3].ps0(), 3.75);
        assert_eq!(ctx.fpr[3].ps1(), 3.75);

        ctx.gpr[1] = HEAP_BASE;
        let stfs = h.ins(OperationId::Stfs, &[(Field::FrS, 3), (Field::Ra, 1), (Field::D, 0)]);
        h.run(&mut ctx, stfs).unwrap();
        assert_eq!(h.memory.read::<f32>(Address(HEAP_BASE)).unwrap(), 3.75);
    }

    #[test]
    fn test_fctiwz() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.fpr[1].set_f64(-2.75);
        let instr = h.ins(OperationId::Fctiwz, &[(Field::FrD, 2), (Field::FrB, 1)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.fpr[2].ps0, 0xFFF8_0000_FFFF_FFFE);
    }

    #[test]
    fn test_quantized_load() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        h.memory.write::<i16>(Address(HEAP_BASE), -8).unwrap();
        h.memory.write::<i16>(Address(HEAP_BASE + 2), 12).unwrap();
        // gqr1: load s16 with scale 2 (divide by 4)
        ctx.gqr[1] = (2 << 24) | (7 << 16);
        ctx.gpr[3] = HEAP_BASE;
        let instr = h.ins(OperationId::PsqL, &[(Field::FrD, 1), (Field::Ra, 3), (Field::I, 1)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.fpr[1].ps0(), -2.0);
        assert_eq!(ctx.fpr[1].ps1(), 3.0);
    }

    #[test]
    fn test_paired_sum() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.fpr[1].set_ps0(1.0);
        ctx.fpr[2].set_ps1(2.0);
        ctx.fpr[3].set_ps1(7.0);
        let instr = h.ins(
            OperationId::PsSum0,
            &[(Field::FrD, 4), (Field::FrA, 1), (Field::FrB, 2), (Field::FrC, 3)],
        );
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(ctx.fpr[4].ps0(), 3.0);
        assert_eq!(ctx.fpr[4].ps1(), 7.0);
    }

    #[test]
    fn test_mtspr_mfspr_roundtrip() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        ctx.gpr[3] = 0x1234;
        let mtlr = h.ins(OperationId::Mtspr, &[(Field::Rs, 3)]).with_spr(crate::context::spr::LR);
        h.run(&mut ctx, mtlr).unwrap();
        assert_eq!(ctx.lr, 0x1234);

        let mfctr = h.ins(OperationId::Mfspr, &[(Field::Rd, 4)]).with_spr(crate::context::spr::CTR);
        ctx.ctr = 99;
        h.run(&mut ctx, mfctr).unwrap();
        assert_eq!(ctx.gpr[4], 99);

        let unknown = h.ins(OperationId::Mfspr, &[(Field::Rd, 4)]).with_spr(1023);
        assert!(matches!(h.run(&mut ctx, unknown), Err(CpuError::Unimplemented { .. })));
    }

    #[test]
    fn test_dcbz_clears_block() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        h.memory.fill(Address(HEAP_BASE), 0xAA, 64).unwrap();
        ctx.gpr[3] = HEAP_BASE + 0x25;
        let instr = h.ins(OperationId::Dcbz, &[(Field::Ra, 0), (Field::Rb, 3)]);
        h.run(&mut ctx, instr).unwrap();
        assert_eq!(h.memory.read::<u8>(Address(HEAP_BASE + 0x1F)).unwrap(), 0xAA);
        assert_eq!(h.memory.read::<u64>(Address(HEAP_BASE + 0x20)).unwrap(), 0);
        assert_eq!(h.memory.read::<u64>(Address(HEAP_BASE + 0x38)).unwrap(), 0);
    }

    #[test]
    fn test_decode_error_and_unimplemented() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        assert_eq!(
            h.run(&mut ctx, Instruction(0)),
            Err(CpuError::Decode { address: 0x1000, word: 0 })
        );
        let sc = h.decoder.encode(OperationId::Sc);
        assert!(matches!(
            h.run(&mut ctx, sc),
            Err(CpuError::Unimplemented { name: "sc", .. })
        ));
    }

    #[test]
    fn test_fetch_from_non_executable_memory() {
        let h = Harness::new();
        let mut ctx = ThreadContext::new();
        let heap = h.memory.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
        ctx.nia = heap.get();
        assert!(matches!(
            h.interpreter.step(&mut ctx, &h.env()),
            Err(CpuError::Memory(_))
        ));
    }

    #[test]
    fn test_tracer_records_steps() {
        let h = Harness::new();
        let mut ctx = ThreadContext::with_tracer(8);
        let instr = h.ins(OperationId::Addi, &[(Field::Rd, 3), (Field::Ra, 0), (Field::Simm, 5)]);
        h.run(&mut ctx, instr).unwrap();
        let tracer = ctx.tracer.as_ref().unwrap().lock();
        assert_eq!(tracer.len(), 1);
        assert_eq!(tracer.last(1)[0].op, OperationId::Addi);
    }
}
