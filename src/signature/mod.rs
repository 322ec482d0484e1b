//! Call Descriptors
//!
//! A [`FunctionDescriptor`] lists the native layouts of a function's
//! arguments and return value. A [`ManagedSignature`] lists the Rust-side
//! carrier types a caller will use. [`CallDescriptor::bind`] pairs the two
//! and checks them once; a `CallDescriptor` that exists is known to be
//! consistent, so invocation never re-validates.

mod parse;

pub use parse::{parse_signature, parse_type, ParsedSignature};

use std::fmt;
use std::sync::Arc;

use crate::error::{DowncallError, DowncallResult, Position};
use crate::layout::{LayoutDescriptor, LayoutKind, ScalarKind};

/// Managed-side type of an argument or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Carrier {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Raw address, pairs with pointer layouts
    Address,
    /// Opaque region, pairs with any struct layout
    Segment,
    /// Structured record, pairs field-by-field with a struct layout
    Record(Vec<Carrier>),
}

impl Carrier {
    /// Carrier a layout would use by default (structs map to `Segment`)
    pub fn for_layout(layout: &LayoutDescriptor) -> Carrier {
        match layout.kind() {
            LayoutKind::Scalar(kind) => Carrier::for_scalar(*kind),
            LayoutKind::Pointer => Carrier::Address,
            LayoutKind::Struct(_) => Carrier::Segment,
        }
    }

    pub fn for_scalar(kind: ScalarKind) -> Carrier {
        match kind {
            ScalarKind::I8 => Carrier::I8,
            ScalarKind::I16 => Carrier::I16,
            ScalarKind::I32 => Carrier::I32,
            ScalarKind::I64 => Carrier::I64,
            ScalarKind::U8 => Carrier::U8,
            ScalarKind::U16 => Carrier::U16,
            ScalarKind::U32 => Carrier::U32,
            ScalarKind::U64 => Carrier::U64,
            ScalarKind::F32 => Carrier::F32,
            ScalarKind::F64 => Carrier::F64,
        }
    }

    fn scalar(&self) -> Option<ScalarKind> {
        Some(match self {
            Carrier::I8 => ScalarKind::I8,
            Carrier::I16 => ScalarKind::I16,
            Carrier::I32 => ScalarKind::I32,
            Carrier::I64 => ScalarKind::I64,
            Carrier::U8 => ScalarKind::U8,
            Carrier::U16 => ScalarKind::U16,
            Carrier::U32 => ScalarKind::U32,
            Carrier::U64 => ScalarKind::U64,
            Carrier::F32 => ScalarKind::F32,
            Carrier::F64 => ScalarKind::F64,
            _ => return None,
        })
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Carrier::Address => write!(f, "address"),
            Carrier::Segment => write!(f, "segment"),
            Carrier::Record(fields) => {
                write!(f, "record{{")?;
                for (i, c) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, "}}")
            }
            scalar => match scalar.scalar() {
                Some(kind) => write!(f, "{}", kind),
                None => Ok(()),
            },
        }
    }
}

/// Native argument and return layouts of a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    args: Vec<LayoutDescriptor>,
    ret: Option<LayoutDescriptor>,
}

impl FunctionDescriptor {
    pub fn of<I>(ret: LayoutDescriptor, args: I) -> Self
    where
        I: IntoIterator<Item = LayoutDescriptor>,
    {
        Self {
            args: args.into_iter().collect(),
            ret: Some(ret),
        }
    }

    pub fn of_void<I>(args: I) -> Self
    where
        I: IntoIterator<Item = LayoutDescriptor>,
    {
        Self {
            args: args.into_iter().collect(),
            ret: None,
        }
    }

    pub fn argument_layouts(&self) -> &[LayoutDescriptor] {
        &self.args
    }

    pub fn return_layout(&self) -> Option<&LayoutDescriptor> {
        self.ret.as_ref()
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ") -> ")?;
        match &self.ret {
            Some(r) => write!(f, "{}", r),
            None => write!(f, "void"),
        }
    }
}

/// Managed-side parameter and return carriers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSignature {
    params: Vec<Carrier>,
    ret: Option<Carrier>,
}

impl ManagedSignature {
    pub fn new<I>(ret: Carrier, params: I) -> Self
    where
        I: IntoIterator<Item = Carrier>,
    {
        Self {
            params: params.into_iter().collect(),
            ret: Some(ret),
        }
    }

    pub fn of_void<I>(params: I) -> Self
    where
        I: IntoIterator<Item = Carrier>,
    {
        Self {
            params: params.into_iter().collect(),
            ret: None,
        }
    }

    /// Default carriers for every layout of `function`
    pub fn for_function(function: &FunctionDescriptor) -> Self {
        Self {
            params: function.args.iter().map(Carrier::for_layout).collect(),
            ret: function.ret.as_ref().map(Carrier::for_layout),
        }
    }

    pub fn params(&self) -> &[Carrier] {
        &self.params
    }

    pub fn return_carrier(&self) -> Option<&Carrier> {
        self.ret.as_ref()
    }
}

#[derive(Debug)]
struct CallDescriptorInner {
    function: FunctionDescriptor,
    managed: ManagedSignature,
}

/// A validated pairing of a managed signature with native layouts.
///
/// Immutable and cheap to clone; clones share the same description.
#[derive(Debug, Clone)]
pub struct CallDescriptor(Arc<CallDescriptorInner>);

impl CallDescriptor {
    /// Pair `managed` with `function`, failing on the first incompatible
    /// position.
    pub fn bind(managed: &ManagedSignature, function: &FunctionDescriptor) -> DowncallResult<Self> {
        if managed.params.len() != function.args.len() {
            return Err(DowncallError::mismatch(
                Position::Arity,
                format!("{} arguments", managed.params.len()),
                format!("{} native layouts", function.args.len()),
            ));
        }

        for (idx, (carrier, layout)) in managed.params.iter().zip(&function.args).enumerate() {
            check_pair(carrier, layout, &Position::Argument(idx), &mut Vec::new())?;
        }

        match (&managed.ret, &function.ret) {
            (None, None) => {}
            (Some(carrier), Some(layout)) => {
                check_pair(carrier, layout, &Position::Return, &mut Vec::new())?
            }
            (Some(carrier), None) => {
                return Err(DowncallError::mismatch(Position::Return, carrier, "void"))
            }
            (None, Some(layout)) => {
                return Err(DowncallError::mismatch(Position::Return, "void", layout))
            }
        }

        Ok(Self(Arc::new(CallDescriptorInner {
            function: function.clone(),
            managed: managed.clone(),
        })))
    }

    /// Bind `function` with its default carriers
    pub fn for_function(function: &FunctionDescriptor) -> DowncallResult<Self> {
        Self::bind(&ManagedSignature::for_function(function), function)
    }

    pub fn function(&self) -> &FunctionDescriptor {
        &self.0.function
    }

    pub fn managed(&self) -> &ManagedSignature {
        &self.0.managed
    }

    pub fn argument_layouts(&self) -> &[LayoutDescriptor] {
        &self.0.function.args
    }

    pub fn return_layout(&self) -> Option<&LayoutDescriptor> {
        self.0.function.ret.as_ref()
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.function)
    }
}

fn check_pair(
    carrier: &Carrier,
    layout: &LayoutDescriptor,
    root: &Position,
    path: &mut Vec<usize>,
) -> DowncallResult<()> {
    match (carrier, layout.kind()) {
        (Carrier::Address, LayoutKind::Pointer) => Ok(()),
        (Carrier::Segment, LayoutKind::Struct(_)) => Ok(()),
        (Carrier::Record(carriers), LayoutKind::Struct(fields)) => {
            if carriers.len() != fields.len() {
                return Err(DowncallError::mismatch(
                    position_of(root, path),
                    format!("{} with {} fields", carrier, carriers.len()),
                    format!("{} with {} fields", layout, fields.len()),
                ));
            }
            for (idx, (c, field)) in carriers.iter().zip(fields.iter()).enumerate() {
                path.push(idx);
                check_pair(c, &field.layout, root, path)?;
                path.pop();
            }
            Ok(())
        }
        (c, LayoutKind::Scalar(kind)) if c.scalar() == Some(*kind) => Ok(()),
        _ => Err(DowncallError::mismatch(
            position_of(root, path),
            carrier,
            layout,
        )),
    }
}

fn position_of(root: &Position, path: &[usize]) -> Position {
    if path.is_empty() {
        root.clone()
    } else {
        Position::Field {
            root: Box::new(root.clone()),
            path: path.to_vec(),
        }
    }
}
