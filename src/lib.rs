//! Downcall - Descriptor-Driven Native Call Bridge
//!
//! Calls functions exported by native shared libraries from a description
//! of their layout instead of a hand-written adapter per signature.
//!
//! # Features
//!
//! - **Layout descriptors**: scalars, pointers and structs with natural or explicit offsets
//! - **Bind-time validation**: managed carriers are paired with native layouts once
//! - **Specialized path**: per-descriptor register plans for System V x86-64 and AAPCS64
//! - **Generic path**: libffi call interfaces, used everywhere else and under `no_spec`
//! - **Struct by value**: arguments and results travel through caller-owned regions
//! - **Typed handles**: `TypedHandle<(i64, f64), ()>` cannot be called with the wrong arguments
//!
//! # Example
//!
//! ```no_run
//! use downcall::{c, FunctionDescriptor, Library, Linker};
//!
//! let libc = Library::open("libc.so.6")?;
//! let labs = Linker::system().downcall_typed::<(i64,), i64>(
//!     libc.lookup("labs")?,
//!     &FunctionDescriptor::of(c::long(), [c::long()]),
//! )?;
//! assert_eq!(labs.call((-5,)), 5);
//! # Ok::<(), downcall::DowncallError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌────────────────────┐
//! │ Library::lookup  │   │ FunctionDescriptor │ + ManagedSignature
//! └────────┬─────────┘   └─────────┬──────────┘
//!          │ NativeAddress         │ CallDescriptor::bind (checked once)
//!          └──────────┬────────────┘
//!                     ▼
//!           ┌───────────────────┐
//!           │ Linker::downcall  │  picks a path per descriptor
//!           └─────────┬─────────┘
//!              ┌──────┴──────┐
//!              ▼             ▼
//!      ┌─────────────┐ ┌───────────┐
//!      │ Specialized │ │  Generic  │
//!      │ abi plan +  │ │  libffi   │
//!      │ trampoline  │ │  cif      │
//!      └──────┬──────┘ └─────┬─────┘
//!             └──────┬───────┘
//!                    ▼
//!          ┌───────────────────┐
//!          │   Native Code     │
//!          └───────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod config;
pub mod error;
pub mod invoke;
pub mod layout;
pub mod library;
pub mod memory;
pub mod registry;
pub mod signature;

// Re-export commonly used types
pub use abi::Convention;
pub use config::{ConfigError, ConfigResult, DowncallConfig};
pub use error::{DowncallError, DowncallResult, Position};
pub use invoke::{
    Arg, CallHandle, ExecMode, Linker, LinkerOptions, NativeArg, NativeArgs, NativeReturn,
    ReturnCarrier, Segment, TypedHandle, Value,
};
pub use layout::{c, Field, Leaf, LayoutDescriptor, LayoutKind, NumberClass, ScalarKind};
pub use library::{Library, LibraryLoader, NativeAddress};
pub use memory::{Address, NativeRegion, Primitive};
pub use registry::{call_overhead_table, BoundHandles, DowncallDecl, DowncallTable};
pub use signature::{
    parse_signature, parse_type, CallDescriptor, Carrier, FunctionDescriptor, ManagedSignature,
    ParsedSignature,
};
