//! System V AMD64 register plans
//!
//! Integer class: rdi, rsi, rdx, rcx, r8, r9. SSE class: xmm0-xmm7.
//! Structs up to 16 bytes are classified per eightbyte: SSE when every
//! leaf in it is a float, INTEGER otherwise. A struct whose eightbytes do
//! not all fit in the remaining registers goes to the stack as a whole.
//! Returns larger than 16 bytes use a hidden pointer passed in rdi.

use crate::layout::{LayoutDescriptor, LayoutKind};
use crate::signature::FunctionDescriptor;

use super::{eightbytes, ArgStep, CallPlan, Part, Reg, RegCursor, RetStep, ReturnShape};

pub const INT_ARG_REGS: usize = 6;
pub const FLOAT_ARG_REGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Integer,
    Sse,
}

/// Classify each eightbyte of a struct of at most 16 bytes
fn classify(layout: &LayoutDescriptor) -> Option<Vec<(u32, u8, Class)>> {
    if layout.size() > 16 || !layout.is_natural() {
        return None;
    }
    let leaves = layout.leaves();
    eightbytes(layout)
        .into_iter()
        .map(|(offset, len)| {
            let mut inside = leaves
                .iter()
                .filter(|(at, _)| *at >= offset && *at < offset + 8)
                .peekable();
            // A padding-only eightbyte cannot arise from natural layouts.
            inside.peek()?;
            let class = if inside.all(|(_, leaf)| leaf.is_float()) {
                Class::Sse
            } else {
                Class::Integer
            };
            Some((offset, len, class))
        })
        .collect()
}

/// Register plan for `function`, or `None` if any part needs the stack
pub fn plan(function: &FunctionDescriptor) -> Option<CallPlan> {
    let mut regs = RegCursor::new(INT_ARG_REGS, FLOAT_ARG_REGS);

    let (ret, shape, indirect_result) = match function.return_layout() {
        None => (RetStep::Void, ReturnShape::Void, false),
        Some(layout) => match layout.kind() {
            LayoutKind::Pointer => (RetStep::Int, ReturnShape::Int, false),
            LayoutKind::Scalar(kind) if kind.is_float() => {
                (RetStep::Float, ReturnShape::Float, false)
            }
            LayoutKind::Scalar(_) => (RetStep::Int, ReturnShape::Int, false),
            LayoutKind::Struct(_) if layout.size() > 16 => {
                if !layout.is_natural() {
                    return None;
                }
                regs.take_int()?;
                (RetStep::Indirect, ReturnShape::Int, true)
            }
            LayoutKind::Struct(_) => {
                let (parts, shape) = plan_struct_return(layout)?;
                (RetStep::Struct(parts), shape, false)
            }
        },
    };

    let args = function
        .argument_layouts()
        .iter()
        .map(|layout| plan_argument(layout, &mut regs))
        .collect::<Option<Box<[_]>>>()?;

    Some(CallPlan {
        args,
        ret,
        shape,
        indirect_result,
    })
}

fn plan_argument(layout: &LayoutDescriptor, regs: &mut RegCursor) -> Option<ArgStep> {
    match layout.kind() {
        LayoutKind::Pointer => regs.take_int().map(ArgStep::Int),
        LayoutKind::Scalar(kind) if kind.is_float() => regs.take_float().map(ArgStep::Float),
        LayoutKind::Scalar(_) => regs.take_int().map(ArgStep::Int),
        LayoutKind::Struct(_) => {
            let classes = classify(layout)?;
            let ints = classes.iter().filter(|c| c.2 == Class::Integer).count();
            let sses = classes.len() - ints;
            if regs.next_int + ints > regs.max_int || regs.next_float + sses > regs.max_float {
                return None;
            }
            let parts = classes
                .into_iter()
                .map(|(offset, len, class)| {
                    let reg = match class {
                        Class::Integer => Reg::Int(regs.take_int()?),
                        Class::Sse => Reg::Float(regs.take_float()?),
                    };
                    Some(Part { offset, len, reg })
                })
                .collect::<Option<Box<[_]>>>()?;
            Some(ArgStep::Struct(parts))
        }
    }
}

fn plan_struct_return(layout: &LayoutDescriptor) -> Option<(Box<[Part]>, ReturnShape)> {
    let classes = classify(layout)?;
    let mut next_int = 0u8;
    let mut next_sse = 0u8;
    let parts = classes
        .iter()
        .map(|&(offset, len, class)| {
            let reg = match class {
                Class::Integer => {
                    next_int += 1;
                    Reg::Int(next_int - 1)
                }
                Class::Sse => {
                    next_sse += 1;
                    Reg::Float(next_sse - 1)
                }
            };
            Part { offset, len, reg }
        })
        .collect::<Box<[_]>>();

    let shape = match classes.as_slice() {
        [(_, _, Class::Integer)] => ReturnShape::Int,
        [(_, _, Class::Sse)] => ReturnShape::Float,
        [(_, _, Class::Integer), (_, _, Class::Integer)] => ReturnShape::IntInt,
        [(_, _, Class::Sse), (_, _, Class::Sse)] => ReturnShape::FloatFloat,
        [(_, _, Class::Integer), (_, _, Class::Sse)] => ReturnShape::IntFloat,
        [(_, _, Class::Sse), (_, _, Class::Integer)] => ReturnShape::FloatInt,
        _ => return None,
    };
    Some((parts, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{c, ScalarKind};

    fn point() -> LayoutDescriptor {
        LayoutDescriptor::of_struct([c::long_long(), c::long_long()]).unwrap()
    }

    #[test]
    fn test_scalar_plan() {
        let f = FunctionDescriptor::of(c::int(), [c::int()]);
        let plan = plan(&f).unwrap();
        assert_eq!(&*plan.args, &[ArgStep::Int(0)]);
        assert_eq!(plan.ret, RetStep::Int);
        assert_eq!(plan.shape, ReturnShape::Int);
        assert!(!plan.indirect_result);
    }

    #[test]
    fn test_mixed_args_use_both_classes() {
        let f = FunctionDescriptor::of_void([
            c::long_long(),
            c::double(),
            c::long_long(),
            c::double(),
            c::long_long(),
        ]);
        let plan = plan(&f).unwrap();
        assert_eq!(
            &*plan.args,
            &[
                ArgStep::Int(0),
                ArgStep::Float(0),
                ArgStep::Int(1),
                ArgStep::Float(1),
                ArgStep::Int(2),
            ]
        );
        assert_eq!(plan.shape, ReturnShape::Void);
    }

    #[test]
    fn test_args10_fits_registers() {
        let args = (0..10).map(|i| if i % 2 == 0 { c::long_long() } else { c::double() });
        let plan = plan(&FunctionDescriptor::of_void(args)).unwrap();
        assert_eq!(plan.args[8], ArgStep::Int(4));
        assert_eq!(plan.args[9], ArgStep::Float(4));
    }

    #[test]
    fn test_stack_spill_has_no_plan() {
        let seven_ints = (0..7).map(|_| c::long_long());
        assert!(plan(&FunctionDescriptor::of_void(seven_ints)).is_none());

        let nine_doubles = (0..9).map(|_| c::double());
        assert!(plan(&FunctionDescriptor::of_void(nine_doubles)).is_none());
    }

    #[test]
    fn test_point_struct_in_two_int_registers() {
        let f = FunctionDescriptor::of(point(), [point()]);
        let plan = plan(&f).unwrap();
        let expected: Box<[Part]> = Box::new([
            Part { offset: 0, len: 8, reg: Reg::Int(0) },
            Part { offset: 8, len: 8, reg: Reg::Int(1) },
        ]);
        assert_eq!(plan.args[0], ArgStep::Struct(expected.clone()));
        assert_eq!(plan.ret, RetStep::Struct(expected));
        assert_eq!(plan.shape, ReturnShape::IntInt);
    }

    #[test]
    fn test_mixed_eightbytes() {
        // {double, int, int}: SSE then INTEGER
        let s = LayoutDescriptor::of_struct([c::double(), c::int(), c::int()]).unwrap();
        let plan = plan(&FunctionDescriptor::of(s.clone(), [c::int(), s])).unwrap();
        assert_eq!(plan.shape, ReturnShape::FloatInt);
        assert_eq!(
            plan.args[1],
            ArgStep::Struct(Box::new([
                Part { offset: 0, len: 8, reg: Reg::Float(0) },
                Part { offset: 8, len: 8, reg: Reg::Int(1) },
            ]))
        );

        // {float, float} packs into one SSE eightbyte
        let s = LayoutDescriptor::of_struct([c::float(), c::float()]).unwrap();
        let plan = super::plan(&FunctionDescriptor::of(s.clone(), [s])).unwrap();
        assert_eq!(plan.shape, ReturnShape::Float);

        // {float, int} in one eightbyte is INTEGER
        let s = LayoutDescriptor::of_struct([c::float(), c::int()]).unwrap();
        let plan = super::plan(&FunctionDescriptor::of(s.clone(), [s])).unwrap();
        assert_eq!(plan.shape, ReturnShape::Int);
    }

    #[test]
    fn test_short_tail_eightbyte() {
        let s = LayoutDescriptor::of_struct([c::long_long(), c::char()]).unwrap();
        assert_eq!(s.size(), 16);
        let s3 = LayoutDescriptor::of_struct([c::short(), c::char()]).unwrap();
        assert_eq!(s3.size(), 4);
        let plan = plan(&FunctionDescriptor::of_void([s3])).unwrap();
        assert_eq!(
            plan.args[0],
            ArgStep::Struct(Box::new([Part { offset: 0, len: 4, reg: Reg::Int(0) }]))
        );
    }

    #[test]
    fn test_large_struct_return_is_indirect() {
        let big = LayoutDescriptor::of_struct([c::long_long(), c::long_long(), c::long_long()])
            .unwrap();
        let plan = plan(&FunctionDescriptor::of(big.clone(), [c::int()])).unwrap();
        assert_eq!(plan.ret, RetStep::Indirect);
        assert!(plan.indirect_result);
        // The hidden pointer takes rdi, so the int argument moves to rsi
        assert_eq!(plan.args[0], ArgStep::Int(1));

        // Large struct arguments travel on the stack
        assert!(super::plan(&FunctionDescriptor::of_void([big])).is_none());
    }

    #[test]
    fn test_struct_needing_too_many_registers() {
        let five = (0..5).map(|_| c::long_long());
        let f = FunctionDescriptor::of_void(five.chain([point()]));
        assert!(plan(&f).is_none());
    }

    #[test]
    fn test_explicit_offsets_are_not_planned() {
        let s = LayoutDescriptor::struct_builder()
            .field_at(0, LayoutDescriptor::scalar(ScalarKind::I32))
            .field_at(8, LayoutDescriptor::scalar(ScalarKind::I32))
            .build()
            .unwrap();
        if !s.is_natural() {
            assert!(plan(&FunctionDescriptor::of_void([s])).is_none());
        }
    }
}
