//! Calling-Convention Tables
//!
//! Each supported convention turns a [`FunctionDescriptor`] into a
//! [`CallPlan`]: which integer or floating-point argument register every
//! argument (or struct chunk) lands in, and how the result comes back.
//! A plan only exists when everything travels in registers; anything that
//! would spill to the stack, or be copied to memory by the caller, has no
//! plan and runs on the generic path instead.
//!
//! | Convention | Targets | Int regs | Float regs | Struct return |
//! |------------|---------|----------|------------|---------------|
//! | System V AMD64 | x86-64 Linux, macOS, BSD | 6 | 8 | ≤16 bytes in rax/rdx/xmm0/xmm1, else hidden pointer in rdi |
//! | AAPCS64 | AArch64 Linux, macOS | 8 | 8 | HFA in v0-v3, ≤16 bytes in x0/x1, else x8 (not planned) |
//!
//! The planners are plain functions so both tables can be exercised on any
//! host; only the trampolines that use a plan are target-gated.

pub mod aapcs64;
pub mod sysv_x86_64;

use crate::layout::LayoutDescriptor;
use crate::signature::FunctionDescriptor;

/// Calling conventions with a register plan table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// System V AMD64 ABI (Linux, macOS, BSD)
    SysVAmd64,
    /// ARM64 AAPCS (Procedure Call Standard)
    Aapcs64,
}

impl Convention {
    /// Convention of the host, if it has a table
    pub fn host() -> Option<Convention> {
        #[cfg(all(target_arch = "x86_64", not(windows), target_endian = "little"))]
        {
            Some(Convention::SysVAmd64)
        }
        #[cfg(all(target_arch = "aarch64", not(windows), target_endian = "little"))]
        {
            Some(Convention::Aapcs64)
        }
        #[cfg(not(any(
            all(target_arch = "x86_64", not(windows), target_endian = "little"),
            all(target_arch = "aarch64", not(windows), target_endian = "little")
        )))]
        {
            None
        }
    }

    /// Number of integer argument registers
    pub fn int_arg_registers(self) -> usize {
        match self {
            Convention::SysVAmd64 => sysv_x86_64::INT_ARG_REGS,
            Convention::Aapcs64 => aapcs64::INT_ARG_REGS,
        }
    }

    /// Number of floating-point argument registers
    pub fn float_arg_registers(self) -> usize {
        match self {
            Convention::SysVAmd64 => sysv_x86_64::FLOAT_ARG_REGS,
            Convention::Aapcs64 => aapcs64::FLOAT_ARG_REGS,
        }
    }

    /// Register plan for `function`, or `None` if it needs the stack
    pub fn plan(self, function: &FunctionDescriptor) -> Option<CallPlan> {
        match self {
            Convention::SysVAmd64 => sysv_x86_64::plan(function),
            Convention::Aapcs64 => aapcs64::plan(function),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Convention::SysVAmd64 => "sysv-amd64",
            Convention::Aapcs64 => "aapcs64",
        }
    }
}

/// A machine register of either class, by index within its class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Int(u8),
    Float(u8),
}

/// A chunk of a struct moved between memory and one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub offset: u32,
    pub len: u8,
    pub reg: Reg,
}

/// Where one argument goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgStep {
    /// Integer or pointer word into an integer register
    Int(u8),
    /// Float bits into a floating-point register
    Float(u8),
    /// Struct split into register-sized parts
    Struct(Box<[Part]>),
}

/// How the result comes back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetStep {
    Void,
    /// Scalar or pointer in the first integer return register
    Int,
    /// Scalar in the first floating-point return register
    Float,
    /// Struct reassembled from return registers
    Struct(Box<[Part]>),
    /// Struct written by the callee through a hidden pointer argument
    Indirect,
}

/// Registers a trampoline reads back after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    Void,
    Int,
    Float,
    IntInt,
    FloatFloat,
    IntFloat,
    FloatInt,
    /// Four floating-point registers (AAPCS64 homogeneous aggregates)
    Hfa4,
}

/// Register assignment for one function descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPlan {
    pub args: Box<[ArgStep]>,
    pub ret: RetStep,
    pub shape: ReturnShape,
    /// Hidden result pointer occupies integer register 0
    pub indirect_result: bool,
}

/// Register cursor shared by the planners
#[derive(Debug, Default)]
pub(crate) struct RegCursor {
    pub next_int: usize,
    pub next_float: usize,
    pub max_int: usize,
    pub max_float: usize,
}

impl RegCursor {
    pub fn new(max_int: usize, max_float: usize) -> Self {
        Self {
            next_int: 0,
            next_float: 0,
            max_int,
            max_float,
        }
    }

    pub fn take_int(&mut self) -> Option<u8> {
        self.take_ints(1)
    }

    pub fn take_float(&mut self) -> Option<u8> {
        self.take_floats(1)
    }

    /// Reserve `n` consecutive integer registers, all or nothing
    pub fn take_ints(&mut self, n: usize) -> Option<u8> {
        if self.next_int + n > self.max_int {
            return None;
        }
        let first = self.next_int as u8;
        self.next_int += n;
        Some(first)
    }

    /// Reserve `n` consecutive float registers, all or nothing
    pub fn take_floats(&mut self, n: usize) -> Option<u8> {
        if self.next_float + n > self.max_float {
            return None;
        }
        let first = self.next_float as u8;
        self.next_float += n;
        Some(first)
    }
}

/// Split `layout` into 8-byte chunks, the last one possibly short
pub(crate) fn eightbytes(layout: &LayoutDescriptor) -> Vec<(u32, u8)> {
    let size = layout.size();
    (0..size.div_ceil(8))
        .map(|i| {
            let offset = i * 8;
            (offset, (size - offset).min(8) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::c;

    #[test]
    fn test_eightbytes() {
        let l = LayoutDescriptor::of_struct([c::int(), c::int(), c::int()]).unwrap();
        assert_eq!(eightbytes(&l), vec![(0, 8), (8, 4)]);
        let l = LayoutDescriptor::of_struct([c::char()]).unwrap();
        assert_eq!(eightbytes(&l), vec![(0, 1)]);
    }

    #[test]
    fn test_cursor_all_or_nothing() {
        let mut cursor = RegCursor::new(2, 1);
        assert_eq!(cursor.take_int(), Some(0));
        assert_eq!(cursor.take_ints(2), None);
        assert_eq!(cursor.next_int, 1);
        assert_eq!(cursor.take_ints(1), Some(1));
        assert_eq!(cursor.take_float(), Some(0));
        assert_eq!(cursor.take_float(), None);
    }

    #[test]
    fn test_host_convention_has_registers() {
        if let Some(conv) = Convention::host() {
            assert!(conv.int_arg_registers() >= 6);
            assert_eq!(conv.float_arg_registers(), 8);
        }
    }
}
