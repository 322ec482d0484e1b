//! Generic invocation through libffi
//!
//! One call interface is prepared per descriptor at bind time. Each call
//! walks the argument layouts, stores every word in its declared width and
//! hands libffi an array of pointers to that storage. Struct arguments are
//! passed as the address of the caller's region.

use std::ffi::c_void;
use std::ptr;

use libffi::middle::{Cif, CodePtr, Type};
use libffi::raw;

use crate::layout::{Leaf, LayoutDescriptor, LayoutKind, ScalarKind};
use crate::signature::FunctionDescriptor;

/// Struct results at most this large go through a scratch buffer.
const SCRATCH_WORDS: usize = 4;

/// Argument count kept on the stack
const INLINE_ARGS: usize = 16;

/// Prepared call interface
struct SharedCif(Cif);

// Safety: a prepared ffi_cif and its type tree are only read by ffi_call.
unsafe impl Send for SharedCif {}
unsafe impl Sync for SharedCif {}

#[derive(Debug, Clone, Copy)]
enum ArgKind {
    Leaf(Leaf),
    Struct,
}

#[derive(Debug, Clone, Copy)]
enum RetKind {
    Void,
    Leaf(Leaf),
    Struct { size: usize },
}

pub(crate) struct GenericInvoker {
    cif: SharedCif,
    args: Box<[ArgKind]>,
    ret: RetKind,
}

impl GenericInvoker {
    pub fn new(function: &FunctionDescriptor) -> Self {
        let cif = Cif::new(
            function.argument_layouts().iter().map(ffi_type),
            function.return_layout().map(ffi_type).unwrap_or_else(Type::void),
        );
        let args = function.argument_layouts().iter().map(arg_kind).collect();
        let ret = match function.return_layout() {
            None => RetKind::Void,
            Some(layout) => match arg_kind(layout) {
                ArgKind::Leaf(leaf) => RetKind::Leaf(leaf),
                ArgKind::Struct => RetKind::Struct {
                    size: layout.size() as usize,
                },
            },
        };
        Self {
            cif: SharedCif(cif),
            args,
            ret,
        }
    }

    /// Call `fun` with argument words.
    ///
    /// # Safety
    ///
    /// `fun` must have the bound signature, `words` must hold one word per
    /// argument with struct words addressing readable regions of the
    /// struct's size, and `ret` must address a writable region of the
    /// result's size when the result is a struct.
    pub unsafe fn call(&self, fun: usize, words: &[u64], ret: *mut u8) -> u64 {
        let count = self.args.len();
        let mut inline_slots = [0u64; INLINE_ARGS];
        let mut inline_ptrs = [ptr::null_mut::<c_void>(); INLINE_ARGS];
        let mut heap_slots;
        let mut heap_ptrs;
        let (slots, ptrs): (&mut [u64], &mut [*mut c_void]) = if count <= INLINE_ARGS {
            (&mut inline_slots[..count], &mut inline_ptrs[..count])
        } else {
            heap_slots = vec![0u64; count];
            heap_ptrs = vec![ptr::null_mut::<c_void>(); count];
            (&mut heap_slots[..], &mut heap_ptrs[..])
        };

        for (i, (kind, &word)) in self.args.iter().zip(words).enumerate() {
            match kind {
                ArgKind::Leaf(leaf) => {
                    let slot = &mut slots[i] as *mut u64;
                    store_leaf(slot as *mut u8, *leaf, word);
                    ptrs[i] = slot as *mut c_void;
                }
                ArgKind::Struct => ptrs[i] = word as usize as *mut c_void,
            }
        }

        let mut scalar_out = [0u64; 2];
        let mut scratch = [0u64; SCRATCH_WORDS];
        let rvalue: *mut c_void = match self.ret {
            RetKind::Void => ptr::null_mut(),
            RetKind::Leaf(_) => scalar_out.as_mut_ptr() as *mut c_void,
            // libffi may store whole registers past the struct's end.
            RetKind::Struct { size } if size <= SCRATCH_WORDS * 8 => {
                scratch.as_mut_ptr() as *mut c_void
            }
            RetKind::Struct { .. } => ret as *mut c_void,
        };

        let code = CodePtr(fun as *mut c_void);
        raw::ffi_call(
            self.cif.0.as_raw_ptr(),
            Some(*code.as_safe_fun()),
            rvalue,
            ptrs.as_mut_ptr(),
        );

        match self.ret {
            RetKind::Void => 0,
            RetKind::Leaf(leaf) => load_return(scalar_out.as_ptr() as *const u8, leaf),
            RetKind::Struct { size } => {
                if size <= SCRATCH_WORDS * 8 {
                    ptr::copy_nonoverlapping(scratch.as_ptr() as *const u8, ret, size);
                }
                0
            }
        }
    }
}

fn arg_kind(layout: &LayoutDescriptor) -> ArgKind {
    match layout.kind() {
        LayoutKind::Scalar(kind) => ArgKind::Leaf(Leaf::Scalar(*kind)),
        LayoutKind::Pointer => ArgKind::Leaf(Leaf::Pointer),
        LayoutKind::Struct(_) => ArgKind::Struct,
    }
}

fn scalar_type(kind: ScalarKind) -> Type {
    match kind {
        ScalarKind::I8 => Type::i8(),
        ScalarKind::I16 => Type::i16(),
        ScalarKind::I32 => Type::i32(),
        ScalarKind::I64 => Type::i64(),
        ScalarKind::U8 => Type::u8(),
        ScalarKind::U16 => Type::u16(),
        ScalarKind::U32 => Type::u32(),
        ScalarKind::U64 => Type::u64(),
        ScalarKind::F32 => Type::f32(),
        ScalarKind::F64 => Type::f64(),
    }
}

/// libffi type for a layout. Gaps between explicit field offsets become
/// byte padding, and fields at offsets libffi would not pick are passed
/// as raw bytes.
fn ffi_type(layout: &LayoutDescriptor) -> Type {
    match layout.kind() {
        LayoutKind::Scalar(kind) => scalar_type(*kind),
        LayoutKind::Pointer => Type::pointer(),
        LayoutKind::Struct(fields) => {
            let mut members = Vec::with_capacity(fields.len());
            let mut end = 0u32;
            let mut ffi_align = 1u32;
            for field in fields.iter() {
                let size = field.layout.size();
                let align = field.layout.align();
                if field.offset % align == 0 {
                    if field.offset > end.next_multiple_of(align) {
                        members.extend((end..field.offset).map(|_| Type::u8()));
                    }
                    members.push(ffi_type(&field.layout));
                    ffi_align = ffi_align.max(align);
                } else {
                    members.extend((end..field.offset + size).map(|_| Type::u8()));
                }
                end = field.offset + size;
            }
            // Only pad the tail when libffi's own rounding falls short;
            // extra byte members would change register classification.
            let ffi_size = end.next_multiple_of(ffi_align);
            if ffi_size < layout.size() {
                members.extend((ffi_size..layout.size()).map(|_| Type::u8()));
            }
            Type::structure(members)
        }
    }
}

/// Store `word` in the declared width of `leaf`.
unsafe fn store_leaf(slot: *mut u8, leaf: Leaf, word: u64) {
    match leaf {
        Leaf::Pointer => ptr::write(slot as *mut usize, word as usize),
        Leaf::Scalar(kind) => match kind {
            ScalarKind::I8 | ScalarKind::U8 => ptr::write(slot, word as u8),
            ScalarKind::I16 | ScalarKind::U16 => ptr::write(slot as *mut u16, word as u16),
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => {
                ptr::write(slot as *mut u32, word as u32)
            }
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => {
                ptr::write(slot as *mut u64, word)
            }
        },
    }
}

/// Read a scalar result. libffi widens integers narrower than a register
/// to a full `ffi_arg`.
unsafe fn load_return(out: *const u8, leaf: Leaf) -> u64 {
    match leaf {
        Leaf::Pointer => ptr::read(out as *const usize) as u64,
        Leaf::Scalar(ScalarKind::F32) => ptr::read(out as *const u32) as u64,
        Leaf::Scalar(ScalarKind::F64 | ScalarKind::I64 | ScalarKind::U64) => {
            ptr::read(out as *const u64)
        }
        Leaf::Scalar(_) => ptr::read(out as *const raw::ffi_arg) as u64,
    }
}
