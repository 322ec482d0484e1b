//! Specialized invocation
//!
//! A bind-time [`CallPlan`] fixes which register every argument word or
//! struct chunk goes to. The call itself fills a register frame and jumps
//! through one of a handful of fixed-shape `extern "C"` function pointer
//! types that take every argument register of the convention, so the
//! compiler loads the registers directly. Unused registers carry zero.
//!
//! Floats narrower than a register are passed in the low bits of the
//! corresponding double, which is where the callee reads them.

use std::ptr;

use crate::abi::{ArgStep, CallPlan, Part, Reg, RetStep, ReturnShape};

/// Integer argument registers in a frame (upper bound over conventions)
const FRAME_INTS: usize = 8;
const FRAME_FLOATS: usize = 8;

#[derive(Default)]
struct Frame {
    ints: [u64; FRAME_INTS],
    floats: [f64; FRAME_FLOATS],
}

impl Frame {
    fn put(&mut self, reg: Reg, bits: u64) {
        match reg {
            Reg::Int(i) => self.ints[i as usize] = bits,
            Reg::Float(i) => self.floats[i as usize] = f64::from_bits(bits),
        }
    }
}

/// Raw result registers
#[derive(Default)]
struct Returned {
    ints: [u64; 2],
    floats: [u64; 4],
}

impl Returned {
    fn get(&self, reg: Reg) -> u64 {
        match reg {
            Reg::Int(i) => self.ints[i as usize],
            Reg::Float(i) => self.floats[i as usize],
        }
    }
}

#[repr(C)]
struct IntInt(u64, u64);
#[repr(C)]
struct FloatFloat(f64, f64);
#[repr(C)]
struct IntFloat(u64, f64);
#[repr(C)]
struct FloatInt(f64, u64);
#[repr(C)]
struct Hfa4(f64, f64, f64, f64);

#[cfg(all(target_arch = "x86_64", not(windows), target_endian = "little"))]
mod trampoline {
    use super::Frame;

    type Target<R> = unsafe extern "C" fn(
        u64, u64, u64, u64, u64, u64,
        f64, f64, f64, f64, f64, f64, f64, f64,
    ) -> R;

    /// Jump to `fun` with every argument register loaded from `frame`.
    ///
    /// # Safety
    ///
    /// `fun` must be a function whose register arguments are a subset of
    /// the frame and whose result comes back in the registers of `R`.
    #[inline(always)]
    pub unsafe fn call<R>(fun: usize, frame: &Frame) -> R {
        let target: Target<R> = std::mem::transmute_copy(&fun);
        let [i0, i1, i2, i3, i4, i5, ..] = frame.ints;
        let [f0, f1, f2, f3, f4, f5, f6, f7] = frame.floats;
        target(i0, i1, i2, i3, i4, i5, f0, f1, f2, f3, f4, f5, f6, f7)
    }
}

#[cfg(all(target_arch = "aarch64", not(windows), target_endian = "little"))]
mod trampoline {
    use super::Frame;

    type Target<R> = unsafe extern "C" fn(
        u64, u64, u64, u64, u64, u64, u64, u64,
        f64, f64, f64, f64, f64, f64, f64, f64,
    ) -> R;

    /// Jump to `fun` with every argument register loaded from `frame`.
    ///
    /// # Safety
    ///
    /// `fun` must be a function whose register arguments are a subset of
    /// the frame and whose result comes back in the registers of `R`.
    #[inline(always)]
    pub unsafe fn call<R>(fun: usize, frame: &Frame) -> R {
        let target: Target<R> = std::mem::transmute_copy(&fun);
        let [i0, i1, i2, i3, i4, i5, i6, i7] = frame.ints;
        let [f0, f1, f2, f3, f4, f5, f6, f7] = frame.floats;
        target(i0, i1, i2, i3, i4, i5, i6, i7, f0, f1, f2, f3, f4, f5, f6, f7)
    }
}

pub(crate) struct SpecializedInvoker {
    plan: CallPlan,
}

impl SpecializedInvoker {
    pub fn new(plan: CallPlan) -> Self {
        Self { plan }
    }

    /// Call `fun` with argument words.
    ///
    /// # Safety
    ///
    /// Same contract as the generic invoker: `fun` has the planned
    /// signature, struct words address readable regions of the struct's
    /// size, and `ret` addresses a writable region for struct results.
    #[cfg(any(
        all(target_arch = "x86_64", not(windows), target_endian = "little"),
        all(target_arch = "aarch64", not(windows), target_endian = "little")
    ))]
    pub unsafe fn call(&self, fun: usize, words: &[u64], ret: *mut u8) -> u64 {
        let mut frame = Frame::default();
        if self.plan.indirect_result {
            frame.ints[0] = ret as usize as u64;
        }
        for (step, &word) in self.plan.args.iter().zip(words) {
            match step {
                ArgStep::Int(slot) => frame.ints[*slot as usize] = word,
                ArgStep::Float(slot) => frame.floats[*slot as usize] = f64::from_bits(word),
                ArgStep::Struct(parts) => {
                    let base = word as usize as *const u8;
                    for part in parts.iter() {
                        frame.put(part.reg, load_part(base, part));
                    }
                }
            }
        }

        let out = dispatch(fun, &frame, self.plan.shape);

        match &self.plan.ret {
            RetStep::Void | RetStep::Indirect => 0,
            RetStep::Int => out.ints[0],
            RetStep::Float => out.floats[0],
            RetStep::Struct(parts) => {
                for part in parts.iter() {
                    store_part(ret, part, out.get(part.reg));
                }
                0
            }
        }
    }

    /// Never reached: without a host convention no plan is ever built.
    #[cfg(not(any(
        all(target_arch = "x86_64", not(windows), target_endian = "little"),
        all(target_arch = "aarch64", not(windows), target_endian = "little")
    )))]
    pub unsafe fn call(&self, _fun: usize, _words: &[u64], _ret: *mut u8) -> u64 {
        0
    }
}

#[cfg(any(
    all(target_arch = "x86_64", not(windows), target_endian = "little"),
    all(target_arch = "aarch64", not(windows), target_endian = "little")
))]
#[inline(always)]
unsafe fn dispatch(fun: usize, frame: &Frame, shape: ReturnShape) -> Returned {
    let mut out = Returned::default();
    match shape {
        ReturnShape::Void => trampoline::call::<()>(fun, frame),
        ReturnShape::Int => out.ints[0] = trampoline::call::<u64>(fun, frame),
        ReturnShape::Float => out.floats[0] = trampoline::call::<f64>(fun, frame).to_bits(),
        ReturnShape::IntInt => {
            let IntInt(a, b) = trampoline::call(fun, frame);
            out.ints = [a, b];
        }
        ReturnShape::FloatFloat => {
            let FloatFloat(a, b) = trampoline::call(fun, frame);
            out.floats[0] = a.to_bits();
            out.floats[1] = b.to_bits();
        }
        ReturnShape::IntFloat => {
            let IntFloat(a, b) = trampoline::call(fun, frame);
            out.ints[0] = a;
            out.floats[0] = b.to_bits();
        }
        ReturnShape::FloatInt => {
            let FloatInt(a, b) = trampoline::call(fun, frame);
            out.floats[0] = a.to_bits();
            out.ints[0] = b;
        }
        ReturnShape::Hfa4 => {
            let Hfa4(a, b, c, d) = trampoline::call(fun, frame);
            out.floats = [a.to_bits(), b.to_bits(), c.to_bits(), d.to_bits()];
        }
    }
    out
}

/// Read up to eight bytes of a struct into the low bits of a word
#[inline(always)]
unsafe fn load_part(base: *const u8, part: &Part) -> u64 {
    let mut bits = 0u64;
    ptr::copy_nonoverlapping(
        base.add(part.offset as usize),
        &mut bits as *mut u64 as *mut u8,
        part.len as usize,
    );
    bits
}

#[inline(always)]
unsafe fn store_part(base: *mut u8, part: &Part, bits: u64) {
    ptr::copy_nonoverlapping(
        &bits as *const u64 as *const u8,
        base.add(part.offset as usize),
        part.len as usize,
    );
}

#[cfg(all(
    test,
    any(
        all(target_arch = "x86_64", not(windows), target_endian = "little"),
        all(target_arch = "aarch64", not(windows), target_endian = "little")
    )
))]
mod tests {
    use super::*;
    use crate::abi::Convention;
    use crate::layout::{c, LayoutDescriptor};
    use crate::signature::FunctionDescriptor;

    fn invoker(f: &FunctionDescriptor) -> SpecializedInvoker {
        let conv = Convention::host().unwrap();
        SpecializedInvoker::new(conv.plan(f).unwrap())
    }

    extern "C" fn negate(x: i32) -> i32 {
        -x
    }

    extern "C" fn half(x: f32) -> f32 {
        x / 2.0
    }

    extern "C" fn weigh(a: i64, b: f64, c: i64, d: f64, e: i64) -> f64 {
        a as f64 * b + c as f64 * d + e as f64
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Mixed {
        d: f64,
        i: i32,
        j: i32,
    }

    extern "C" fn bump(m: Mixed) -> Mixed {
        Mixed {
            d: m.d + 1.0,
            i: m.i + 1,
            j: m.j + 1,
        }
    }

    #[test]
    fn test_narrow_int_roundtrip() {
        let inv = invoker(&FunctionDescriptor::of(c::int(), [c::int()]));
        let word = unsafe { inv.call(negate as usize, &[7], ptr::null_mut()) };
        assert_eq!(word as u32 as i32, -7);
    }

    #[test]
    fn test_f32_in_low_bits() {
        let inv = invoker(&FunctionDescriptor::of(c::float(), [c::float()]));
        let word = unsafe { inv.call(half as usize, &[3.0f32.to_bits() as u64], ptr::null_mut()) };
        assert_eq!(f32::from_bits(word as u32), 1.5);
    }

    #[test]
    fn test_interleaved_classes() {
        let f = FunctionDescriptor::of(
            c::double(),
            [c::long_long(), c::double(), c::long_long(), c::double(), c::long_long()],
        );
        let inv = invoker(&f);
        let words = [2, 0.5f64.to_bits(), 4, 0.25f64.to_bits(), 10];
        let word = unsafe { inv.call(weigh as usize, &words, ptr::null_mut()) };
        assert_eq!(f64::from_bits(word), 12.0);
    }

    #[test]
    fn test_mixed_struct_roundtrip() {
        let layout = LayoutDescriptor::of_struct([c::double(), c::int(), c::int()]).unwrap();
        let inv = invoker(&FunctionDescriptor::of(layout.clone(), [layout]));
        let input = Mixed { d: 1.5, i: -2, j: 41 };
        let mut output = Mixed { d: 0.0, i: 0, j: 0 };
        unsafe {
            inv.call(
                bump as usize,
                &[&input as *const Mixed as usize as u64],
                &mut output as *mut Mixed as *mut u8,
            );
        }
        assert_eq!(output, Mixed { d: 2.5, i: -1, j: 42 });
    }
}
