//! AAPCS64 register plans
//!
//! Integer and pointer arguments use x0-x7, floats use v0-v7. A
//! homogeneous floating-point aggregate (one to four members of the same
//! float type) takes one v register per member. Other composites up to
//! 16 bytes take one or two x registers. Larger composites are passed by
//! reference to a caller copy and returned through x8; neither is planned.

use crate::layout::{Leaf, LayoutDescriptor, LayoutKind, ScalarKind};
use crate::signature::FunctionDescriptor;

use super::{eightbytes, ArgStep, CallPlan, Part, Reg, RegCursor, RetStep, ReturnShape};

pub const INT_ARG_REGS: usize = 8;
pub const FLOAT_ARG_REGS: usize = 8;

/// Members of a homogeneous floating-point aggregate
fn hfa_members(layout: &LayoutDescriptor) -> Option<Vec<(u32, ScalarKind)>> {
    let leaves = layout.leaves();
    if leaves.is_empty() || leaves.len() > 4 {
        return None;
    }
    let first = match leaves[0].1 {
        Leaf::Scalar(kind) if kind.is_float() => kind,
        _ => return None,
    };
    leaves
        .into_iter()
        .map(|(offset, leaf)| match leaf {
            Leaf::Scalar(kind) if kind == first => Some((offset, kind)),
            _ => None,
        })
        .collect()
}

fn hfa_parts(members: &[(u32, ScalarKind)], first_reg: u8) -> Box<[Part]> {
    members
        .iter()
        .enumerate()
        .map(|(i, &(offset, kind))| Part {
            offset,
            len: kind.size() as u8,
            reg: Reg::Float(first_reg + i as u8),
        })
        .collect()
}

fn int_parts(layout: &LayoutDescriptor, first_reg: u8) -> Box<[Part]> {
    eightbytes(layout)
        .into_iter()
        .enumerate()
        .map(|(i, (offset, len))| Part {
            offset,
            len,
            reg: Reg::Int(first_reg + i as u8),
        })
        .collect()
}

/// Register plan for `function`, or `None` if any part needs memory
pub fn plan(function: &FunctionDescriptor) -> Option<CallPlan> {
    let (ret, shape) = match function.return_layout() {
        None => (RetStep::Void, ReturnShape::Void),
        Some(layout) => match layout.kind() {
            LayoutKind::Pointer => (RetStep::Int, ReturnShape::Int),
            LayoutKind::Scalar(kind) if kind.is_float() => (RetStep::Float, ReturnShape::Float),
            LayoutKind::Scalar(_) => (RetStep::Int, ReturnShape::Int),
            LayoutKind::Struct(_) => {
                if !layout.is_natural() {
                    return None;
                }
                if let Some(members) = hfa_members(layout) {
                    (RetStep::Struct(hfa_parts(&members, 0)), ReturnShape::Hfa4)
                } else if layout.size() <= 8 {
                    (RetStep::Struct(int_parts(layout, 0)), ReturnShape::Int)
                } else if layout.size() <= 16 {
                    (RetStep::Struct(int_parts(layout, 0)), ReturnShape::IntInt)
                } else {
                    return None;
                }
            }
        },
    };

    let mut regs = RegCursor::new(INT_ARG_REGS, FLOAT_ARG_REGS);
    let args = function
        .argument_layouts()
        .iter()
        .map(|layout| plan_argument(layout, &mut regs))
        .collect::<Option<Box<[_]>>>()?;

    Some(CallPlan {
        args,
        ret,
        shape,
        indirect_result: false,
    })
}

fn plan_argument(layout: &LayoutDescriptor, regs: &mut RegCursor) -> Option<ArgStep> {
    match layout.kind() {
        LayoutKind::Pointer => regs.take_int().map(ArgStep::Int),
        LayoutKind::Scalar(kind) if kind.is_float() => regs.take_float().map(ArgStep::Float),
        LayoutKind::Scalar(_) => regs.take_int().map(ArgStep::Int),
        LayoutKind::Struct(_) => {
            if !layout.is_natural() {
                return None;
            }
            if let Some(members) = hfa_members(layout) {
                let first = regs.take_floats(members.len())?;
                Some(ArgStep::Struct(hfa_parts(&members, first)))
            } else if layout.size() <= 16 {
                let first = regs.take_ints(layout.size().div_ceil(8) as usize)?;
                Some(ArgStep::Struct(int_parts(layout, first)))
            } else {
                None
            }
        }
    }
}
