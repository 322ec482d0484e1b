//! Layout Descriptors
//!
//! ABI-neutral description of a native value: size, alignment and
//! classification. Layouts are immutable once built and cheap to clone;
//! clones share the same description.

use std::fmt;
use std::sync::Arc;

use crate::error::{DowncallError, DowncallResult};

/// Number class requested from [`LayoutDescriptor::of_scalar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberClass {
    Signed,
    Unsigned,
    Float,
}

/// Scalar classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
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
}

impl ScalarKind {
    /// Size in bytes
    pub fn size(self) -> u32 {
        match self {
            ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarKind::I8 | ScalarKind::I16 | ScalarKind::I32 | ScalarKind::I64
        )
    }

    /// Parse from a C-ish or Rust-ish type name
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "i8" | "int8" | "int8_t" | "char" | "signed char" => Some(ScalarKind::I8),
            "u8" | "uint8" | "uint8_t" | "unsigned char" | "byte" => Some(ScalarKind::U8),
            "i16" | "int16" | "int16_t" | "short" => Some(ScalarKind::I16),
            "u16" | "uint16" | "uint16_t" | "unsigned short" => Some(ScalarKind::U16),
            "i32" | "int32" | "int32_t" | "int" => Some(ScalarKind::I32),
            "u32" | "uint32" | "uint32_t" | "unsigned" | "unsigned int" => Some(ScalarKind::U32),
            "i64" | "int64" | "int64_t" | "long long" | "longlong" => Some(ScalarKind::I64),
            "u64" | "uint64" | "uint64_t" | "unsigned long long" => Some(ScalarKind::U64),
            "long" => Some(c_long_kind()),
            "unsigned long" | "ulong" => Some(c_ulong_kind()),
            "f32" | "float" => Some(ScalarKind::F32),
            "f64" | "double" => Some(ScalarKind::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::U8 => "u8",
            ScalarKind::U16 => "u16",
            ScalarKind::U32 => "u32",
            ScalarKind::U64 => "u64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        };
        f.write_str(name)
    }
}

#[cfg(all(unix, target_pointer_width = "64"))]
fn c_long_kind() -> ScalarKind {
    ScalarKind::I64
}

#[cfg(not(all(unix, target_pointer_width = "64")))]
fn c_long_kind() -> ScalarKind {
    ScalarKind::I32
}

#[cfg(all(unix, target_pointer_width = "64"))]
fn c_ulong_kind() -> ScalarKind {
    ScalarKind::U64
}

#[cfg(not(all(unix, target_pointer_width = "64")))]
fn c_ulong_kind() -> ScalarKind {
    ScalarKind::U32
}

/// A struct member at a fixed byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub offset: u32,
    pub layout: LayoutDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    Scalar(ScalarKind),
    Pointer,
    Struct(Box<[Field]>),
}

#[derive(Debug, PartialEq, Eq)]
struct LayoutInner {
    size: u32,
    align: u32,
    kind: LayoutKind,
    /// Every field sits at its natural offset, recursively
    natural: bool,
}

/// Size, alignment and classification of a native value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDescriptor(Arc<LayoutInner>);

impl LayoutDescriptor {
    /// Scalar layout of `width_bits` in {8, 16, 32, 64}; floats only 32 or 64.
    pub fn of_scalar(width_bits: u32, class: NumberClass) -> DowncallResult<Self> {
        let kind = match (class, width_bits) {
            (NumberClass::Signed, 8) => ScalarKind::I8,
            (NumberClass::Signed, 16) => ScalarKind::I16,
            (NumberClass::Signed, 32) => ScalarKind::I32,
            (NumberClass::Signed, 64) => ScalarKind::I64,
            (NumberClass::Unsigned, 8) => ScalarKind::U8,
            (NumberClass::Unsigned, 16) => ScalarKind::U16,
            (NumberClass::Unsigned, 32) => ScalarKind::U32,
            (NumberClass::Unsigned, 64) => ScalarKind::U64,
            (NumberClass::Float, 32) => ScalarKind::F32,
            (NumberClass::Float, 64) => ScalarKind::F64,
            (class, width) => {
                return Err(DowncallError::invalid_layout(format!(
                    "no {:?} scalar of width {} bits",
                    class, width
                )))
            }
        };
        Ok(Self::scalar(kind))
    }

    pub fn scalar(kind: ScalarKind) -> Self {
        let size = kind.size();
        Self(Arc::new(LayoutInner {
            size,
            align: size,
            kind: LayoutKind::Scalar(kind),
            natural: true,
        }))
    }

    pub fn of_pointer() -> Self {
        let size = std::mem::size_of::<usize>() as u32;
        Self(Arc::new(LayoutInner {
            size,
            align: std::mem::align_of::<usize>() as u32,
            kind: LayoutKind::Pointer,
            natural: true,
        }))
    }

    /// Struct with every field at its natural offset.
    pub fn of_struct<I>(fields: I) -> DowncallResult<Self>
    where
        I: IntoIterator<Item = LayoutDescriptor>,
    {
        fields
            .into_iter()
            .fold(StructBuilder::new(), |b, f| b.field(f))
            .build()
    }

    /// Builder for structs that need explicit offsets.
    pub fn struct_builder() -> StructBuilder {
        StructBuilder::new()
    }

    pub fn size(&self) -> u32 {
        self.0.size
    }

    pub fn align(&self) -> u32 {
        self.0.align
    }

    pub fn kind(&self) -> &LayoutKind {
        &self.0.kind
    }

    /// Struct fields, empty for scalars and pointers
    pub fn fields(&self) -> &[Field] {
        match &self.0.kind {
            LayoutKind::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.0.kind, LayoutKind::Struct(_))
    }

    /// True when all (nested) fields sit at the offsets the platform's
    /// natural alignment rules would pick.
    pub fn is_natural(&self) -> bool {
        self.0.natural
    }

    /// Scalar and pointer leaves with absolute offsets, in declaration order.
    pub fn leaves(&self) -> Vec<(u32, Leaf)> {
        let mut out = Vec::new();
        self.collect_leaves(0, &mut out);
        out
    }

    fn collect_leaves(&self, base: u32, out: &mut Vec<(u32, Leaf)>) {
        match &self.0.kind {
            LayoutKind::Scalar(kind) => out.push((base, Leaf::Scalar(*kind))),
            LayoutKind::Pointer => out.push((base, Leaf::Pointer)),
            LayoutKind::Struct(fields) => {
                for field in fields.iter() {
                    field.layout.collect_leaves(base + field.offset, out);
                }
            }
        }
    }
}

/// Terminal member of a layout tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    Scalar(ScalarKind),
    Pointer,
}

impl Leaf {
    pub fn size(self) -> u32 {
        match self {
            Leaf::Scalar(kind) => kind.size(),
            Leaf::Pointer => std::mem::size_of::<usize>() as u32,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Leaf::Scalar(kind) if kind.is_float())
    }
}

impl fmt::Display for LayoutDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            LayoutKind::Scalar(kind) => write!(f, "{}", kind),
            LayoutKind::Pointer => write!(f, "ptr"),
            LayoutKind::Struct(fields) => {
                write!(f, "struct{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field.layout)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Incremental struct layout construction
#[derive(Debug, Default)]
pub struct StructBuilder {
    fields: Vec<(Option<u32>, LayoutDescriptor)>,
}

impl StructBuilder {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field at the next naturally aligned offset
    pub fn field(mut self, layout: LayoutDescriptor) -> Self {
        self.fields.push((None, layout));
        self
    }

    /// Append a field at an explicit offset
    pub fn field_at(mut self, offset: u32, layout: LayoutDescriptor) -> Self {
        self.fields.push((Some(offset), layout));
        self
    }

    pub fn build(self) -> DowncallResult<LayoutDescriptor> {
        if self.fields.is_empty() {
            return Err(DowncallError::invalid_layout("struct has no fields"));
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        let mut end: u32 = 0;
        let mut align: u32 = 1;
        let mut natural = true;

        for (idx, (explicit, layout)) in self.fields.into_iter().enumerate() {
            let aligned = align_up(end, layout.align()).ok_or_else(|| {
                DowncallError::invalid_layout(format!("field {} offset overflows", idx))
            })?;
            let offset = match explicit {
                Some(offset) if offset < end => {
                    return Err(DowncallError::invalid_layout(format!(
                        "field {} at offset {} overlaps preceding field ending at {}",
                        idx, offset, end
                    )));
                }
                Some(offset) => offset,
                None => aligned,
            };
            natural &= offset == aligned && layout.is_natural();
            align = align.max(layout.align());
            end = offset.checked_add(layout.size()).ok_or_else(|| {
                DowncallError::invalid_layout(format!("field {} size overflows", idx))
            })?;
            fields.push(Field { offset, layout });
        }

        let size = align_up(end, align)
            .ok_or_else(|| DowncallError::invalid_layout("struct size overflows"))?;

        Ok(LayoutDescriptor(Arc::new(LayoutInner {
            size,
            align,
            kind: LayoutKind::Struct(fields.into_boxed_slice()),
            natural,
        })))
    }
}

fn align_up(value: u32, align: u32) -> Option<u32> {
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// C type layouts for the host platform
pub mod c {
    use super::{LayoutDescriptor, ScalarKind};

    pub fn char() -> LayoutDescriptor {
        LayoutDescriptor::scalar(ScalarKind::I8)
    }

    pub fn short() -> LayoutDescriptor {
        LayoutDescriptor::scalar(ScalarKind::I16)
    }

    pub fn int() -> LayoutDescriptor {
        LayoutDescriptor::scalar(ScalarKind::I32)
    }

    pub fn long() -> LayoutDescriptor {
        LayoutDescriptor::scalar(super::c_long_kind())
    }

    pub fn long_long() -> LayoutDescriptor {
        LayoutDescriptor::scalar(ScalarKind::I64)
    }

    pub fn float() -> LayoutDescriptor {
        LayoutDescriptor::scalar(ScalarKind::F32)
    }

    pub fn double() -> LayoutDescriptor {
        LayoutDescriptor::scalar(ScalarKind::F64)
    }

    pub fn pointer() -> LayoutDescriptor {
        LayoutDescriptor::of_pointer()
    }
}
