//! Load and store instructions

use oe_core::endian::GuestValue;
use oe_core::error::CpuError;
use oe_memory::Address;

use super::float::{extend_single_bits, truncate_double_bits, SINGLE_EXPONENT_THRESHOLD};
use super::{ExecEnv, Flow};
use crate::context::{cr, ThreadContext, XER_BYTE_COUNT};
use crate::decoder::{Field, Instruction};

type Result = std::result::Result<Flow, CpuError>;

/// Effective address form of a load or store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// `(rA|0) + d`
    Displacement,
    /// `rA + d`, rA receives the address
    DisplacementUpdate,
    /// `(rA|0) + rB`
    Indexed,
    /// `rA + rB`, rA receives the address
    IndexedUpdate,
}

impl Mode {
    #[inline]
    fn update(self) -> bool {
        matches!(self, Mode::DisplacementUpdate | Mode::IndexedUpdate)
    }
}

#[inline]
fn effective_address(ctx: &ThreadContext, instr: Instruction, mode: Mode) -> u32 {
    match mode {
        Mode::Displacement => ctx.gpr_or_zero(instr.ra()).wrapping_add(instr.d()),
        Mode::DisplacementUpdate => ctx.gpr[instr.ra()].wrapping_add(instr.d()),
        Mode::Indexed => ctx.gpr_or_zero(instr.ra()).wrapping_add(ctx.gpr[instr.rb()]),
        Mode::IndexedUpdate => ctx.gpr[instr.ra()].wrapping_add(ctx.gpr[instr.rb()]),
    }
}

#[inline]
fn load<T: GuestValue>(
    ctx: &mut ThreadContext,
    env: &ExecEnv<'_>,
    instr: Instruction,
    mode: Mode,
    extend: fn(T) -> u32,
) -> Result {
    let ea = effective_address(ctx, instr, mode);
    let value: T = env.memory.read(Address(ea))?;
    ctx.gpr[instr.rd()] = extend(value);
    if mode.update() {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

#[inline]
fn store<T: GuestValue>(
    ctx: &mut ThreadContext,
    env: &ExecEnv<'_>,
    instr: Instruction,
    mode: Mode,
    truncate: fn(u32) -> T,
) -> Result {
    let ea = effective_address(ctx, instr, mode);
    env.memory.write(Address(ea), truncate(ctx.gpr[instr.rs()]))?;
    if mode.update() {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

macro_rules! load_handlers {
    ($($name:ident: $ty:ty, $mode:ident, $extend:expr;)*) => {
        $(
            pub fn $name(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
                load::<$ty>(ctx, env, instr, Mode::$mode, $extend)
            }
        )*
    };
}

macro_rules! store_handlers {
    ($($name:ident: $ty:ty, $mode:ident, $truncate:expr;)*) => {
        $(
            pub fn $name(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
                store::<$ty>(ctx, env, instr, Mode::$mode, $truncate)
            }
        )*
    };
}

load_handlers! {
    lbz: u8, Displacement, |v| v as u32;
    lbzu: u8, DisplacementUpdate, |v| v as u32;
    lbzx: u8, Indexed, |v| v as u32;
    lbzux: u8, IndexedUpdate, |v| v as u32;
    lha: i16, Displacement, |v| v as i32 as u32;
    lhau: i16, DisplacementUpdate, |v| v as i32 as u32;
    lhax: i16, Indexed, |v| v as i32 as u32;
    lhaux: i16, IndexedUpdate, |v| v as i32 as u32;
    lhz: u16, Displacement, |v| v as u32;
    lhzu: u16, DisplacementUpdate, |v| v as u32;
    lhzx: u16, Indexed, |v| v as u32;
    lhzux: u16, IndexedUpdate, |v| v as u32;
    lwz: u32, Displacement, |v| v;
    lwzu: u32, DisplacementUpdate, |v| v;
    lwzx: u32, Indexed, |v| v;
    lwzux: u32, IndexedUpdate, |v| v;
    lhbrx: u16, Indexed, |v| v.swap_bytes() as u32;
    lwbrx: u32, Indexed, |v| v.swap_bytes();
}

store_handlers! {
    stb: u8, Displacement, |v| v as u8;
    stbu: u8, DisplacementUpdate, |v| v as u8;
    stbx: u8, Indexed, |v| v as u8;
    stbux: u8, IndexedUpdate, |v| v as u8;
    sth: u16, Displacement, |v| v as u16;
    sthu: u16, DisplacementUpdate, |v| v as u16;
    sthx: u16, Indexed, |v| v as u16;
    sthux: u16, IndexedUpdate, |v| v as u16;
    stw: u32, Displacement, |v| v;
    stwu: u32, DisplacementUpdate, |v| v;
    stwx: u32, Indexed, |v| v;
    stwux: u32, IndexedUpdate, |v| v;
    sthbrx: u16, Indexed, |v| (v as u16).swap_bytes();
    stwbrx: u32, Indexed, |v| v.swap_bytes();
}

pub fn lmw(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let mut ea = effective_address(ctx, instr, Mode::Displacement);
    for r in instr.rd()..32 {
        ctx.gpr[r] = env.memory.read(Address(ea))?;
        ea = ea.wrapping_add(4);
    }
    Ok(Flow::Continue)
}

pub fn stmw(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let mut ea = effective_address(ctx, instr, Mode::Displacement);
    for r in instr.rs()..32 {
        env.memory.write(Address(ea), ctx.gpr[r])?;
        ea = ea.wrapping_add(4);
    }
    Ok(Flow::Continue)
}

/// Load `count` bytes into consecutive registers starting at `first`,
/// filling each register from its most significant byte and wrapping
/// from r31 to r0
fn load_string(ctx: &mut ThreadContext, env: &ExecEnv<'_>, first: usize, mut ea: u32, count: u32) -> Result {
    let mut reg = first;
    for n in 0..count {
        let shift = 24 - 8 * (n % 4);
        if n % 4 == 0 {
            if n > 0 {
                reg = (reg + 1) % 32;
            }
            ctx.gpr[reg] = 0;
        }
        let byte: u8 = env.memory.read(Address(ea))?;
        ctx.gpr[reg] |= (byte as u32) << shift;
        ea = ea.wrapping_add(1);
    }
    Ok(Flow::Continue)
}

fn store_string(ctx: &ThreadContext, env: &ExecEnv<'_>, first: usize, mut ea: u32, count: u32) -> Result {
    let mut reg = first;
    for n in 0..count {
        if n > 0 && n % 4 == 0 {
            reg = (reg + 1) % 32;
        }
        let shift = 24 - 8 * (n % 4);
        env.memory.write(Address(ea), (ctx.gpr[reg] >> shift) as u8)?;
        ea = ea.wrapping_add(1);
    }
    Ok(Flow::Continue)
}

/// Byte count of an immediate string instruction, 0 meaning 32
#[inline]
fn immediate_count(instr: Instruction) -> u32 {
    match instr.nb() {
        0 => 32,
        n => n,
    }
}

pub fn lswi(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = ctx.gpr_or_zero(instr.ra());
    load_string(ctx, env, instr.rd(), ea, immediate_count(instr))
}

pub fn lswx(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = effective_address(ctx, instr, Mode::Indexed);
    let count = ctx.xer & XER_BYTE_COUNT;
    load_string(ctx, env, instr.rd(), ea, count)
}

pub fn stswi(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = ctx.gpr_or_zero(instr.ra());
    store_string(ctx, env, instr.rs(), ea, immediate_count(instr))
}

pub fn stswx(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = effective_address(ctx, instr, Mode::Indexed);
    store_string(ctx, env, instr.rs(), ea, ctx.xer & XER_BYTE_COUNT)
}

pub fn lwarx(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = effective_address(ctx, instr, Mode::Indexed);
    let (value, reservation) = env.memory.load_reserved(Address(ea))?;
    ctx.gpr[instr.rd()] = value;
    ctx.reserve = Some(reservation);
    Ok(Flow::Continue)
}

pub fn stwcx_rc(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = effective_address(ctx, instr, Mode::Indexed);
    let stored = match ctx.reserve.take() {
        Some(reservation) => {
            env.memory
                .store_conditional(reservation, Address(ea), ctx.gpr[instr.rs()])?
        }
        None => false,
    };
    let so = if ctx.xer_so() { cr::SO } else { 0 };
    ctx.set_cr_field(0, if stored { cr::EQ } else { 0 } | so);
    Ok(Flow::Continue)
}

fn load_single(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction, mode: Mode) -> Result {
    let ea = effective_address(ctx, instr, mode);
    let bits = extend_single_bits(env.memory.read::<u32>(Address(ea))?);
    let fr = &mut ctx.fpr[instr.frd()];
    fr.ps0 = bits;
    fr.ps1 = bits;
    if mode.update() {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

fn load_double(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction, mode: Mode) -> Result {
    let ea = effective_address(ctx, instr, mode);
    ctx.fpr[instr.frd()].ps0 = env.memory.read::<u64>(Address(ea))?;
    if mode.update() {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

fn store_single(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction, mode: Mode) -> Result {
    let ea = effective_address(ctx, instr, mode);
    env.memory
        .write(Address(ea), truncate_double_bits(ctx.fpr[instr.frs()].ps0))?;
    if mode.update() {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

fn store_double(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction, mode: Mode) -> Result {
    let ea = effective_address(ctx, instr, mode);
    env.memory.write(Address(ea), ctx.fpr[instr.frs()].ps0)?;
    if mode.update() {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

macro_rules! float_handlers {
    ($($name:ident: $op:ident, $mode:ident;)*) => {
        $(
            pub fn $name(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
                $op(ctx, env, instr, Mode::$mode)
            }
        )*
    };
}

float_handlers! {
    lfs: load_single, Displacement;
    lfsu: load_single, DisplacementUpdate;
    lfsx: load_single, Indexed;
    lfsux: load_single, IndexedUpdate;
    lfd: load_double, Displacement;
    lfdu: load_double, DisplacementUpdate;
    lfdx: load_double, Indexed;
    lfdux: load_double, IndexedUpdate;
    stfs: store_single, Displacement;
    stfsu: store_single, DisplacementUpdate;
    stfsx: store_single, Indexed;
    stfsux: store_single, IndexedUpdate;
    stfd: store_double, Displacement;
    stfdu: store_double, DisplacementUpdate;
    stfdx: store_double, Indexed;
    stfdux: store_double, IndexedUpdate;
}

pub fn stfiwx(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = effective_address(ctx, instr, Mode::Indexed);
    env.memory.write(Address(ea), ctx.fpr[instr.frs()].ps0 as u32)?;
    Ok(Flow::Continue)
}

/// Graphics quantization register data types
pub mod quantized {
    pub const FLOAT: u32 = 0;
    pub const U8: u32 = 4;
    pub const U16: u32 = 5;
    pub const S8: u32 = 6;
    pub const S16: u32 = 7;
}

/// Unpacked GQR fields for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantization {
    pub kind: u32,
    /// Signed scale exponent
    pub scale: i32,
}

impl Quantization {
    pub fn load(gqr: u32) -> Self {
        Self::new((gqr >> 16) & 7, (gqr >> 24) & 0x3F)
    }

    pub fn store(gqr: u32) -> Self {
        Self::new(gqr & 7, (gqr >> 8) & 0x3F)
    }

    fn new(kind: u32, scale: u32) -> Self {
        let scale = scale as i32;
        Self {
            kind,
            scale: scale - ((scale & 32) << 1),
        }
    }

    /// Element size in bytes; reserved types behave as floats
    pub fn size(self) -> u32 {
        match self.kind {
            quantized::U8 | quantized::S8 => 1,
            quantized::U16 | quantized::S16 => 2,
            _ => 4,
        }
    }
}

/// Read one element and convert it to double bits
pub fn dequantize(env: &ExecEnv<'_>, ea: u32, q: Quantization) -> std::result::Result<u64, CpuError> {
    let address = Address(ea);
    let factor = 2f64.powi(-q.scale);
    let value = match q.kind {
        quantized::U8 => env.memory.read::<u8>(address)? as f64 * factor,
        quantized::U16 => env.memory.read::<u16>(address)? as f64 * factor,
        quantized::S8 => env.memory.read::<i8>(address)? as f64 * factor,
        quantized::S16 => env.memory.read::<i16>(address)? as f64 * factor,
        _ => return Ok(extend_single_bits(env.memory.read::<u32>(address)?)),
    };
    Ok(value.to_bits())
}

/// Convert a double to one element and write it
pub fn quantize(env: &ExecEnv<'_>, ea: u32, value: f64, q: Quantization) -> std::result::Result<(), CpuError> {
    let address = Address(ea);
    let negative = value.is_sign_negative();
    let scaled = value * 2f64.powi(q.scale);
    // Float to int casts saturate, NaN is handled separately
    match q.kind {
        quantized::U8 => {
            let v = if value.is_nan() { if negative { 0 } else { u8::MAX } } else { scaled as u8 };
            env.memory.write(address, v)?
        }
        quantized::U16 => {
            let v = if value.is_nan() { if negative { 0 } else { u16::MAX } } else { scaled as u16 };
            env.memory.write(address, v)?
        }
        quantized::S8 => {
            let v = if value.is_nan() { if negative { i8::MIN } else { i8::MAX } } else { scaled as i8 };
            env.memory.write(address, v)?
        }
        quantized::S16 => {
            let v = if value.is_nan() { if negative { i16::MIN } else { i16::MAX } } else { scaled as i16 };
            env.memory.write(address, v)?
        }
        _ => {
            let bits = value.to_bits();
            let single = if (bits >> 52) & 0x7FF <= SINGLE_EXPONENT_THRESHOLD {
                // Keep the sign of values too small for a single
                ((bits >> 63) as u32) << 31
            } else {
                truncate_double_bits(bits)
            };
            env.memory.write(address, single)?
        }
    }
    Ok(())
}

/// Quantized load addressing: displacement forms use W/I, indexed forms Qw/Qi
fn psq_load(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction, indexed: bool, update: bool) -> Result {
    let (ea, w, i) = psq_operands(ctx, instr, indexed, update);
    let q = Quantization::load(ctx.gqr[i]);
    let ps0 = dequantize(env, ea, q)?;
    let ps1 = if w {
        1.0f64.to_bits()
    } else {
        dequantize(env, ea.wrapping_add(q.size()), q)?
    };
    let fr = &mut ctx.fpr[instr.frd()];
    fr.ps0 = ps0;
    fr.ps1 = ps1;
    if update {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

fn psq_store(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction, indexed: bool, update: bool) -> Result {
    let (ea, w, i) = psq_operands(ctx, instr, indexed, update);
    let q = Quantization::store(ctx.gqr[i]);
    let fr = ctx.fpr[instr.frs()];
    quantize(env, ea, fr.ps0(), q)?;
    if !w {
        quantize(env, ea.wrapping_add(q.size()), fr.ps1(), q)?;
    }
    if update {
        ctx.gpr[instr.ra()] = ea;
    }
    Ok(Flow::Continue)
}

fn psq_operands(ctx: &ThreadContext, instr: Instruction, indexed: bool, update: bool) -> (u32, bool, usize) {
    let base = if update {
        ctx.gpr[instr.ra()]
    } else {
        ctx.gpr_or_zero(instr.ra())
    };
    if indexed {
        let ea = base.wrapping_add(ctx.gpr[instr.rb()]);
        (ea, instr.get(Field::Qw) != 0, instr.get(Field::Qi) as usize)
    } else {
        let offset = oe_core::bits::sign_extend(instr.get(Field::Qd), 12);
        (
            base.wrapping_add(offset),
            instr.get(Field::W) != 0,
            instr.get(Field::I) as usize,
        )
    }
}

pub fn psq_l(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_load(ctx, env, instr, false, false)
}

pub fn psq_lu(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_load(ctx, env, instr, false, true)
}

pub fn psq_lx(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_load(ctx, env, instr, true, false)
}

pub fn psq_lux(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_load(ctx, env, instr, true, true)
}

pub fn psq_st(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_store(ctx, env, instr, false, false)
}

pub fn psq_stu(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_store(ctx, env, instr, false, true)
}

pub fn psq_stx(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_store(ctx, env, instr, true, false)
}

pub fn psq_stux(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    psq_store(ctx, env, instr, true, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_fields() {
        // ld: s16 scale -2, st: u8 scale 4
        let gqr = (0x3E << 24) | (quantized::S16 << 16) | (4 << 8) | quantized::U8;
        let ld = Quantization::load(gqr);
        assert_eq!(ld, Quantization { kind: quantized::S16, scale: -2 });
        assert_eq!(ld.size(), 2);
        let st = Quantization::store(gqr);
        assert_eq!(st, Quantization { kind: quantized::U8, scale: 4 });
        assert_eq!(st.size(), 1);
        assert_eq!(Quantization::load(0).size(), 4);
    }
}
