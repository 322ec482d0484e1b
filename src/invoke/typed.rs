//! Statically typed handles
//!
//! `TypedHandle<A, R>` fixes the managed argument tuple `A` and result `R`
//! in the type, so the pairing with the native layouts is checked once
//! when the handle is bound and a call cannot supply the wrong arguments.
//!
//! ```ignore
//! let identity = linker.downcall_typed::<(i32,), i32>(addr, &FunctionDescriptor::of(c::int(), [c::int()]))?;
//! assert_eq!(identity.call((7,)), 7);
//!
//! let point = linker.downcall_typed::<(Segment,), Segment>(addr, &point_fn)?;
//! point.call_into((&input,), &mut output);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use crate::memory::{Address, NativeRegion};
use crate::signature::{Carrier, ManagedSignature};

use super::CallHandle;

/// Managed side of a by-value struct: passed and returned as a region.
#[derive(Debug, Clone, Copy)]
pub enum Segment {}

/// A single typed argument
pub trait NativeArg {
    /// What the caller passes for this position
    type Input<'a>;

    fn carrier() -> Carrier;

    /// Argument word; `layout_size` is the native size for this position.
    fn to_word(input: &Self::Input<'_>, layout_size: u32) -> u64;
}

/// A tuple of typed arguments
pub trait NativeArgs {
    type Input<'a>;
    type Words: AsRef<[u64]>;

    fn carriers() -> Vec<Carrier>;

    fn to_words(input: &Self::Input<'_>, layout_sizes: &[u32]) -> Self::Words;
}

/// A scalar or void result read back from the return word
pub trait NativeReturn {
    fn from_word(word: u64) -> Self;
}

/// Managed result carrier; `None` is void
pub trait ReturnCarrier {
    fn carrier() -> Option<Carrier>;
}

macro_rules! impl_scalar {
    ($($ty:ty => $carrier:ident, |$w:ident| $decode:expr, |$v:ident| $encode:expr;)*) => {
        $(
            impl NativeArg for $ty {
                type Input<'a> = $ty;

                fn carrier() -> Carrier {
                    Carrier::$carrier
                }

                fn to_word(input: &$ty, _layout_size: u32) -> u64 {
                    let $v = *input;
                    $encode
                }
            }

            impl NativeReturn for $ty {
                fn from_word($w: u64) -> Self {
                    $decode
                }
            }

            impl ReturnCarrier for $ty {
                fn carrier() -> Option<Carrier> {
                    Some(Carrier::$carrier)
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => I8, |w| w as u8 as i8, |v| v as i64 as u64;
    i16 => I16, |w| w as u16 as i16, |v| v as i64 as u64;
    i32 => I32, |w| w as u32 as i32, |v| v as i64 as u64;
    i64 => I64, |w| w as i64, |v| v as u64;
    u8 => U8, |w| w as u8, |v| v as u64;
    u16 => U16, |w| w as u16, |v| v as u64;
    u32 => U32, |w| w as u32, |v| v as u64;
    u64 => U64, |w| w, |v| v;
    f32 => F32, |w| f32::from_bits(w as u32), |v| v.to_bits() as u64;
    f64 => F64, |w| f64::from_bits(w), |v| v.to_bits();
    Address => Address, |w| Address::new(w as usize), |v| v.as_usize() as u64;
}

impl NativeArg for Segment {
    type Input<'a> = &'a NativeRegion;

    fn carrier() -> Carrier {
        Carrier::Segment
    }

    /// Panics when the region is shorter than the struct layout
    fn to_word(input: &&NativeRegion, layout_size: u32) -> u64 {
        assert!(
            input.len() >= layout_size as usize,
            "struct argument region holds {} bytes, layout needs {}",
            input.len(),
            layout_size
        );
        input.address().as_usize() as u64
    }
}

impl NativeReturn for () {
    fn from_word(_word: u64) -> Self {}
}

impl ReturnCarrier for () {
    fn carrier() -> Option<Carrier> {
        None
    }
}

impl ReturnCarrier for Segment {
    fn carrier() -> Option<Carrier> {
        Some(Carrier::Segment)
    }
}

impl NativeArgs for () {
    type Input<'a> = ();
    type Words = [u64; 0];

    fn carriers() -> Vec<Carrier> {
        Vec::new()
    }

    fn to_words(_input: &(), _layout_sizes: &[u32]) -> [u64; 0] {
        []
    }
}

macro_rules! impl_native_args {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: NativeArg),+> NativeArgs for ($($name,)+) {
            type Input<'a> = ($(<$name as NativeArg>::Input<'a>,)+);
            type Words = [u64; $len];

            fn carriers() -> Vec<Carrier> {
                vec![$(<$name as NativeArg>::carrier()),+]
            }

            fn to_words(input: &Self::Input<'_>, layout_sizes: &[u32]) -> [u64; $len] {
                [$(<$name as NativeArg>::to_word(&input.$idx, layout_sizes[$idx])),+]
            }
        }
    };
}

impl_native_args!(1; T0: 0);
impl_native_args!(2; T0: 0, T1: 1);
impl_native_args!(3; T0: 0, T1: 1, T2: 2);
impl_native_args!(4; T0: 0, T1: 1, T2: 2, T3: 3);
impl_native_args!(5; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4);
impl_native_args!(6; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5);
impl_native_args!(7; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6);
impl_native_args!(8; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6, T7: 7);
impl_native_args!(9; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6, T7: 7, T8: 8);
impl_native_args!(10; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6, T7: 7, T8: 8, T9: 9);
impl_native_args!(11; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6, T7: 7, T8: 8, T9: 9, T10: 10);
impl_native_args!(12; T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6, T7: 7, T8: 8, T9: 9, T10: 10, T11: 11);

/// Managed signature described by `A` and `R`
pub(crate) fn managed_signature<A: NativeArgs, R: ReturnCarrier>() -> ManagedSignature {
    match R::carrier() {
        Some(ret) => ManagedSignature::new(ret, A::carriers()),
        None => ManagedSignature::of_void(A::carriers()),
    }
}

/// A call handle whose managed signature is part of its type
pub struct TypedHandle<A, R> {
    handle: CallHandle,
    arg_sizes: Box<[u32]>,
    ret_size: u32,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A: NativeArgs, R: ReturnCarrier> TypedHandle<A, R> {
    pub(crate) fn new(handle: CallHandle) -> Self {
        let arg_sizes = handle
            .descriptor()
            .argument_layouts()
            .iter()
            .map(|l| l.size())
            .collect();
        let ret_size = handle.descriptor().return_layout().map_or(0, |l| l.size());
        Self {
            handle,
            arg_sizes,
            ret_size,
            _signature: PhantomData,
        }
    }

    /// Untyped handle underneath
    pub fn handle(&self) -> &CallHandle {
        &self.handle
    }

    pub fn is_specialized(&self) -> bool {
        self.handle.is_specialized()
    }
}

impl<A: NativeArgs, R: NativeReturn + ReturnCarrier> TypedHandle<A, R> {
    /// Call the native function
    ///
    /// # Panics
    ///
    /// Panics if a [`Segment`] argument's region is shorter than its
    /// struct layout. Region sizes are the one thing not fixed by the
    /// type, so this is the only per-call check.
    #[inline]
    pub fn call(&self, args: A::Input<'_>) -> R {
        let words = A::to_words(&args, &self.arg_sizes);
        // Safety: the carriers of A and R were paired with the native
        // layouts when this handle was bound, and struct regions were
        // length-checked above.
        let word = unsafe { self.handle.call_words(words.as_ref(), ptr::null_mut()) };
        R::from_word(word)
    }
}

impl<A: NativeArgs> TypedHandle<A, Segment> {
    /// Call a function returning a struct, writing the result into `out`
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than the return layout, or for a short
    /// [`Segment`] argument as in [`call`](Self::call).
    #[inline]
    pub fn call_into(&self, args: A::Input<'_>, out: &mut NativeRegion) {
        assert!(
            out.len() >= self.ret_size as usize,
            "result region holds {} bytes, layout needs {}",
            out.len(),
            self.ret_size
        );
        let words = A::to_words(&args, &self.arg_sizes);
        // Safety: as for `call`, plus `out` is large enough for the result.
        unsafe {
            self.handle.call_words(words.as_ref(), out.as_mut_ptr());
        }
    }
}

impl<A, R> Clone for TypedHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            arg_sizes: self.arg_sizes.clone(),
            ret_size: self.ret_size,
            _signature: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for TypedHandle<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedHandle")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_carriers() {
        assert!(<() as NativeArgs>::carriers().is_empty());
        assert_eq!(
            <(i64, f64, Segment) as NativeArgs>::carriers(),
            vec![Carrier::I64, Carrier::F64, Carrier::Segment]
        );
        assert_eq!(<() as ReturnCarrier>::carrier(), None);
        assert_eq!(<Address as ReturnCarrier>::carrier(), Some(Carrier::Address));
    }

    #[test]
    fn test_words() {
        let words = <(i8, u16, f32) as NativeArgs>::to_words(&(-1, 7, 0.5), &[1, 2, 4]);
        assert_eq!(words, [u64::MAX, 7, 0.5f32.to_bits() as u64]);
        assert_eq!(<i16 as NativeReturn>::from_word(0xffff_0000_ffff), -1);
    }

    #[test]
    #[should_panic(expected = "struct argument region")]
    fn test_short_region_rejected() {
        let region = NativeRegion::allocate_bytes(8, 8).unwrap();
        <(Segment,) as NativeArgs>::to_words(&(&region,), &[16]);
    }
}
