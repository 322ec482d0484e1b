//! Binder and Call Handles
//!
//! ```text
//!   NativeAddress ──┐
//!                   ├── Linker::downcall ──► CallHandle ──► invoke / call
//!   CallDescriptor ─┘        │
//!                            ├─ Specialized: register plan + fixed trampoline
//!                            └─ Generic:     libffi call interface
//! ```
//!
//! Both paths marshal identically; the specialized one exists only to cut
//! per-call overhead. A descriptor the host's calling-convention table
//! cannot keep in registers is bound to the generic path even in
//! specialized mode.

mod generic;
mod specialized;
mod typed;
mod value;

pub use typed::{NativeArg, NativeArgs, NativeReturn, ReturnCarrier, Segment, TypedHandle};
pub use value::{Arg, Value};

use std::fmt;
use std::ptr;
use std::sync::Arc;

use log::debug;

use crate::abi::Convention;
use crate::config::DowncallConfig;
use crate::error::DowncallResult;
use crate::layout::{LayoutKind, Leaf};
use crate::library::NativeAddress;
use crate::memory::NativeRegion;
use crate::signature::{CallDescriptor, FunctionDescriptor, ManagedSignature};

use generic::GenericInvoker;
use specialized::SpecializedInvoker;

/// Inline capacity for dynamic argument words
const INLINE_ARGS: usize = 16;

/// Execution mode of a linker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Per-descriptor register plans where the target has a table
    #[default]
    Specialized,
    /// Interpretation through libffi for every descriptor
    Generic,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Specialized => write!(f, "specialized"),
            ExecMode::Generic => write!(f, "generic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkerOptions {
    pub mode: ExecMode,
}

/// Produces call handles for resolved addresses
#[derive(Debug, Clone, Default)]
pub struct Linker {
    options: LinkerOptions,
}

impl Linker {
    /// Linker for the host platform
    pub fn system() -> Self {
        Self::default()
    }

    pub fn with_options(options: LinkerOptions) -> Self {
        Self { options }
    }

    /// Linker honouring `[linker] no_spec`
    pub fn from_config(config: &DowncallConfig) -> Self {
        let mode = if config.linker.no_spec {
            ExecMode::Generic
        } else {
            ExecMode::Specialized
        };
        Self::with_options(LinkerOptions { mode })
    }

    pub fn mode(&self) -> ExecMode {
        self.options.mode
    }

    /// Bind `address` to a validated descriptor
    pub fn downcall(&self, address: NativeAddress, descriptor: &CallDescriptor) -> CallHandle {
        let plan = match self.options.mode {
            ExecMode::Generic => None,
            ExecMode::Specialized => {
                Convention::host().and_then(|conv| conv.plan(descriptor.function()))
            }
        };

        let path = match plan {
            Some(plan) => Path::Specialized(SpecializedInvoker::new(plan)),
            None => {
                if self.options.mode == ExecMode::Specialized {
                    debug!("no register plan for {}, using generic path", descriptor);
                }
                Path::Generic(GenericInvoker::new(descriptor.function()))
            }
        };

        let ret_leaf = descriptor.return_layout().and_then(|layout| match layout.kind() {
            LayoutKind::Scalar(kind) => Some(Leaf::Scalar(*kind)),
            LayoutKind::Pointer => Some(Leaf::Pointer),
            LayoutKind::Struct(_) => None,
        });

        debug!(
            "bound {} at {} ({} path)",
            descriptor,
            address.address(),
            path.name()
        );

        CallHandle {
            inner: Arc::new(HandleInner {
                fun: address.address().as_usize(),
                address,
                descriptor: descriptor.clone(),
                ret_leaf,
                path,
            }),
        }
    }

    /// Validate `managed` against `function` and bind in one step
    pub fn bind(
        &self,
        address: NativeAddress,
        managed: &ManagedSignature,
        function: &FunctionDescriptor,
    ) -> DowncallResult<CallHandle> {
        let descriptor = CallDescriptor::bind(managed, function)?;
        Ok(self.downcall(address, &descriptor))
    }

    /// Bind with the managed signature taken from `A` and `R`
    pub fn downcall_typed<A: NativeArgs, R: ReturnCarrier>(
        &self,
        address: NativeAddress,
        function: &FunctionDescriptor,
    ) -> DowncallResult<TypedHandle<A, R>> {
        let managed = typed::managed_signature::<A, R>();
        let handle = self.bind(address, &managed, function)?;
        Ok(TypedHandle::new(handle))
    }
}

enum Path {
    Specialized(SpecializedInvoker),
    Generic(GenericInvoker),
}

impl Path {
    fn name(&self) -> &'static str {
        match self {
            Path::Specialized(_) => "specialized",
            Path::Generic(_) => "generic",
        }
    }
}

struct HandleInner {
    fun: usize,
    /// Keeps the owning library loaded
    address: NativeAddress,
    descriptor: CallDescriptor,
    ret_leaf: Option<Leaf>,
    path: Path,
}

/// An invocable binding of a native address to a call descriptor.
///
/// Immutable after binding; clones share the binding and may be invoked
/// from any number of threads at once.
#[derive(Clone)]
pub struct CallHandle {
    inner: Arc<HandleInner>,
}

impl CallHandle {
    pub fn descriptor(&self) -> &CallDescriptor {
        &self.inner.descriptor
    }

    pub fn address(&self) -> &NativeAddress {
        &self.inner.address
    }

    /// True when calls go through a register plan rather than libffi
    pub fn is_specialized(&self) -> bool {
        matches!(self.inner.path, Path::Specialized(_))
    }

    /// View this handle through a static signature, checked once against
    /// the bound layouts.
    pub fn typed<A: NativeArgs, R: ReturnCarrier>(&self) -> DowncallResult<TypedHandle<A, R>> {
        CallDescriptor::bind(
            &typed::managed_signature::<A, R>(),
            self.inner.descriptor.function(),
        )?;
        Ok(TypedHandle::new(self.clone()))
    }

    /// Invoke with dynamically typed arguments.
    ///
    /// Returns the scalar or pointer result, or `None` for void and struct
    /// results. Struct results are written into `ret`.
    ///
    /// # Safety
    ///
    /// Nothing is checked per call. `args` must match the descriptor's
    /// layouts in count and kind, every `Arg::Region` must hold at least
    /// its struct's size, and `ret` must be a region at least as large as
    /// the struct result when there is one. [`TypedHandle`] enforces all
    /// of this statically.
    pub unsafe fn invoke(&self, args: &[Arg<'_>], ret: Option<&mut NativeRegion>) -> Option<Value> {
        let ret_ptr = ret.map_or(ptr::null_mut(), |r| r.as_mut_ptr());

        let word = if args.len() <= INLINE_ARGS {
            let mut words = [0u64; INLINE_ARGS];
            for (slot, arg) in words.iter_mut().zip(args) {
                *slot = arg.to_word();
            }
            self.call_words(&words[..args.len()], ret_ptr)
        } else {
            let words: Vec<u64> = args.iter().map(Arg::to_word).collect();
            self.call_words(&words, ret_ptr)
        };

        self.inner.ret_leaf.map(|leaf| Value::from_word(leaf, word))
    }

    /// Raw call with argument words, returning the raw result word.
    #[inline]
    pub(crate) unsafe fn call_words(&self, words: &[u64], ret: *mut u8) -> u64 {
        match &self.inner.path {
            Path::Specialized(inv) => inv.call(self.inner.fun, words, ret),
            Path::Generic(inv) => inv.call(self.inner.fun, words, ret),
        }
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("descriptor", &self.inner.descriptor.to_string())
            .field("address", &self.inner.address.address())
            .field("path", &self.inner.path.name())
            .finish()
    }
}
